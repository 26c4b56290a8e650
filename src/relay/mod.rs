//! Persistent duplex link to the upstream relay.
//!
//! A single supervisor task owns the connection and walks the
//! `Disconnected -> Connecting -> Connected` cycle forever: every failed
//! attempt or dropped connection schedules exactly one new attempt after the
//! policy's delay. Outbound messages are only accepted while connected and
//! are never carried across connections.

mod websocket;

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::error::RelayError;

pub use websocket::WebSocketConnector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    Fixed(Duration),
    /// Doubles per consecutive failure, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::Fixed(Duration::from_secs(5))
    }
}

impl ReconnectPolicy {
    /// Delay before the next attempt after `failures` consecutive failures.
    pub fn delay(&self, failures: u32) -> Duration {
        match *self {
            ReconnectPolicy::Fixed(delay) => delay,
            ReconnectPolicy::Exponential { base, max } => {
                let shift = failures.saturating_sub(1).min(16);
                base.saturating_mul(1u32 << shift).min(max)
            }
        }
    }
}

pub type InboundStream = Pin<Box<dyn Stream<Item = Result<String, RelayError>> + Send>>;
pub type OutboundSink = Pin<Box<dyn Sink<String, Error = RelayError> + Send>>;

/// One live transport: raw inbound payloads and an outbound text sink.
pub struct RelayChannel {
    pub inbound: InboundStream,
    pub outbound: OutboundSink,
}

#[async_trait]
pub trait RelayConnector: Send + Sync + 'static {
    async fn connect(&self) -> Result<RelayChannel, RelayError>;

    fn endpoint(&self) -> String {
        "relay".to_string()
    }
}

/// Inbound payloads in arrival order.
pub type RelayInbox = mpsc::UnboundedReceiver<String>;

/// Best-effort outbound delivery.
pub trait RelaySink: Send + Sync {
    /// Hands `message` to the live transport. Returns `false` when it was dropped.
    fn send(&self, message: String) -> bool;
}

struct LinkShared {
    policy: ReconnectPolicy,
    state: watch::Sender<RelayState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    inbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    attempts: AtomicU64,
}

impl LinkShared {
    fn set_state(&self, state: RelayState) {
        self.state.send_replace(state);
    }
}

#[derive(Clone)]
pub struct RelayLink {
    shared: Arc<LinkShared>,
}

impl RelayLink {
    pub fn new(policy: ReconnectPolicy) -> (Self, RelayInbox) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(RelayState::Disconnected);
        let link = Self {
            shared: Arc::new(LinkShared {
                policy,
                state,
                outbound: Mutex::new(None),
                inbound: Mutex::new(Some(inbound_tx)),
                attempts: AtomicU64::new(0),
            }),
        };
        (link, inbound_rx)
    }

    /// Starts the supervisor and waits for the outcome of the first attempt.
    ///
    /// The reconnect loop keeps running whatever this returns.
    pub async fn connect<C: RelayConnector>(&self, connector: C) -> Result<(), RelayError> {
        let inbound = self
            .shared
            .inbound
            .lock()
            .take()
            .ok_or_else(|| RelayError::Connect("relay link already started".into()))?;

        let (first_tx, first_rx) = oneshot::channel();
        tokio::spawn(supervise(
            Arc::clone(&self.shared),
            connector,
            inbound,
            first_tx,
        ));

        first_rx
            .await
            .map_err(|_| RelayError::Connect("relay supervisor exited".into()))?
    }

    pub fn state(&self) -> RelayState {
        *self.shared.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<RelayState> {
        self.shared.state.subscribe()
    }

    /// Connection attempts made so far, including the first.
    pub fn attempts(&self) -> u64 {
        self.shared.attempts.load(Ordering::Relaxed)
    }
}

impl RelaySink for RelayLink {
    fn send(&self, message: String) -> bool {
        match self.shared.outbound.lock().as_ref() {
            Some(tx) => tx.send(message).is_ok(),
            None => {
                debug!("relay not connected, dropping outbound message");
                false
            }
        }
    }
}

enum PumpEnd {
    Closed,
    Failed(RelayError),
    InboxClosed,
}

async fn supervise<C: RelayConnector>(
    shared: Arc<LinkShared>,
    connector: C,
    inbound: mpsc::UnboundedSender<String>,
    first: oneshot::Sender<Result<(), RelayError>>,
) {
    let endpoint = connector.endpoint();
    let mut first = Some(first);
    let mut failures: u32 = 0;

    loop {
        shared.set_state(RelayState::Connecting);
        let attempt = shared.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(attempt, %endpoint, "connecting to relay");

        match connector.connect().await {
            Ok(channel) => {
                let (tx, rx) = mpsc::unbounded_channel();
                *shared.outbound.lock() = Some(tx);
                shared.set_state(RelayState::Connected);
                info!(attempt, %endpoint, "relay connected");
                if let Some(first) = first.take() {
                    let _ = first.send(Ok(()));
                }

                let end = pump(channel, rx, &inbound).await;

                *shared.outbound.lock() = None;
                shared.set_state(RelayState::Disconnected);
                failures = 1;
                match end {
                    PumpEnd::Closed => info!(%endpoint, "relay connection closed"),
                    PumpEnd::Failed(err) => warn!(%endpoint, error = %err, "relay connection lost"),
                    PumpEnd::InboxClosed => {
                        info!("relay inbox dropped, stopping relay link");
                        return;
                    }
                }
            }
            Err(err) => {
                shared.set_state(RelayState::Disconnected);
                failures = failures.saturating_add(1);
                warn!(attempt, %endpoint, error = %err, "relay connect failed");
                if let Some(first) = first.take() {
                    let _ = first.send(Err(err));
                }
            }
        }

        let delay = shared.policy.delay(failures);
        debug!(delay_ms = delay.as_millis() as u64, "scheduling relay reconnect");
        tokio::time::sleep(delay).await;
    }
}

async fn pump(
    channel: RelayChannel,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    inbound: &mpsc::UnboundedSender<String>,
) -> PumpEnd {
    let RelayChannel {
        inbound: mut frames,
        mut outbound,
    } = channel;

    loop {
        tokio::select! {
            frame = frames.next() => match frame {
                Some(Ok(text)) => {
                    if inbound.send(text).is_err() {
                        return PumpEnd::InboxClosed;
                    }
                }
                Some(Err(RelayError::Closed)) | None => return PumpEnd::Closed,
                Some(Err(err)) => return PumpEnd::Failed(err),
            },
            Some(message) = outbound_rx.recv() => {
                if let Err(err) = outbound.send(message).await {
                    return PumpEnd::Failed(err);
                }
            }
        }
    }
}
