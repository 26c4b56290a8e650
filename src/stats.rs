use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::info;

use crate::{
    cache::ResponseCache,
    queue::RequestQueue,
    relay::{RelayLink, RelayState},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStats {
    pub queue_length: usize,
    pub cache_size: usize,
    pub received: u64,
    pub relay_state: Option<RelayState>,
    pub connect_attempts: u64,
}

/// Read-only view over the queue, cache and relay link.
#[derive(Clone)]
pub struct StatsReporter {
    cache: Arc<ResponseCache>,
    queue: RequestQueue,
    relay: Option<RelayLink>,
    period: Duration,
    reports: Arc<AtomicU64>,
}

impl StatsReporter {
    pub fn new(cache: Arc<ResponseCache>, queue: RequestQueue, period: Duration) -> Self {
        Self {
            cache,
            queue,
            relay: None,
            period,
            reports: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_relay(mut self, relay: RelayLink) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn snapshot(&self) -> BridgeStats {
        BridgeStats {
            queue_length: self.queue.len(),
            cache_size: self.cache.size(),
            received: self.queue.received(),
            relay_state: self.relay.as_ref().map(RelayLink::state),
            connect_attempts: self.relay.as_ref().map_or(0, RelayLink::attempts),
        }
    }

    /// Logs the snapshot when there is anything to report.
    pub fn report(&self) -> Option<BridgeStats> {
        let stats = self.snapshot();
        if stats.queue_length == 0 && stats.cache_size == 0 {
            return None;
        }
        info!(
            queue_length = stats.queue_length,
            cache_size = stats.cache_size,
            received = stats.received,
            "bridge stats"
        );
        self.reports.fetch_add(1, Ordering::Relaxed);
        Some(stats)
    }

    /// Number of snapshots logged so far, shared across clones.
    pub fn reports(&self) -> u64 {
        self.reports.load(Ordering::Relaxed)
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.period.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.report();
            }
        })
    }
}
