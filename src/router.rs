use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::{
    backend::GenerationBackend,
    cache::ResponseCache,
    model::{ChatMessage, GenerationRequest},
    protocol::{InboundMessage, OutboundMessage},
    queue::RequestQueue,
    relay::{RelayInbox, RelaySink},
};

/// Turns inbound relay payloads into backend calls and relay replies.
pub struct RequestRouter {
    backend: Arc<dyn GenerationBackend>,
    cache: Arc<ResponseCache>,
    queue: RequestQueue,
    relay: Arc<dyn RelaySink>,
    limiter: Option<Arc<Semaphore>>,
}

impl RequestRouter {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        cache: Arc<ResponseCache>,
        queue: RequestQueue,
        relay: Arc<dyn RelaySink>,
    ) -> Self {
        Self {
            backend,
            cache,
            queue,
            relay,
            limiter: None,
        }
    }

    /// Caps concurrent backend calls. `None` leaves dispatch unbounded.
    pub fn with_max_in_flight(mut self, max_in_flight: Option<usize>) -> Self {
        self.limiter = max_in_flight
            .filter(|&n| n > 0)
            .map(|n| Arc::new(Semaphore::new(n)));
        self
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    /// Consumes the inbox until the relay link goes away. Each payload is
    /// handled on its own task so a slow generation never delays arrival.
    pub async fn run(self: Arc<Self>, mut inbox: RelayInbox) {
        while let Some(raw) = inbox.recv().await {
            let router = Arc::clone(&self);
            tokio::spawn(async move {
                router.handle_message(&raw).await;
            });
        }
        info!("relay inbox closed, router stopping");
    }

    /// Processes one payload to completion and returns the reply that was
    /// emitted, or `None` when the payload was discarded.
    pub async fn handle_message(&self, raw: &str) -> Option<OutboundMessage> {
        let message = match InboundMessage::parse(raw) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "discarding relay message");
                return None;
            }
        };

        match message {
            InboundMessage::Request(payload) => {
                Some(self.process(payload.into_request(), None).await)
            }
            InboundMessage::Chat(payload) => {
                let (history, request) = payload.into_parts();
                Some(self.process(request, Some(history)).await)
            }
            InboundMessage::Invalid { id, reason } => {
                warn!(%id, %reason, "rejecting unreadable relay request");
                let reply = OutboundMessage::error(id, reason);
                self.emit(&reply);
                Some(reply)
            }
            InboundMessage::Unrecognized(kind) => {
                warn!(%kind, "ignoring unrecognized relay message type");
                None
            }
        }
    }

    async fn process(
        &self,
        request: GenerationRequest,
        history: Option<Vec<ChatMessage>>,
    ) -> OutboundMessage {
        if request.prompt.trim().is_empty() {
            warn!(id = %request.id, "forwarding request with empty prompt");
        }
        let out_of_range = request.sampling.out_of_range();
        if !out_of_range.is_empty() {
            warn!(
                id = %request.id,
                fields = ?out_of_range,
                "forwarding out-of-range sampling parameters"
            );
        }

        let reply = {
            let _ticket = self.queue.enqueue(&request);
            self.dispatch(&request, history.as_deref()).await
        };

        self.emit(&reply);
        reply
    }

    async fn dispatch(
        &self,
        request: &GenerationRequest,
        history: Option<&[ChatMessage]>,
    ) -> OutboundMessage {
        let _permit = match &self.limiter {
            Some(limiter) => Arc::clone(limiter).acquire_owned().await.ok(),
            None => None,
        };

        info!(
            id = %request.id,
            model = request.model.as_deref().unwrap_or("default"),
            chat = history.is_some(),
            "processing semantic request"
        );

        let result = match history {
            Some(history) => self.backend.chat(history, request).await,
            None => self.backend.generate(request).await,
        };

        match result {
            Ok(response) => {
                info!(
                    id = %response.id,
                    model = %response.model,
                    processing_ms = response.processing_time,
                    total_tokens = response.tokens.total(),
                    "generation complete"
                );
                if let Some(evicted) = self.cache.put(request.id.clone(), response.clone()) {
                    debug!(%evicted, "evicted oldest cached response");
                }
                OutboundMessage::SemanticResponse(response)
            }
            Err(err) => {
                warn!(id = %request.id, error = %err, "generation failed");
                OutboundMessage::error(&request.id, &err)
            }
        }
    }

    fn emit(&self, reply: &OutboundMessage) {
        let payload = match serde_json::to_string(reply) {
            Ok(payload) => payload,
            Err(err) => {
                error!(id = reply.id(), error = %err, "failed to encode relay reply");
                return;
            }
        };
        if !self.relay.send(payload) {
            warn!(id = reply.id(), "relay disconnected, reply dropped");
        }
    }
}
