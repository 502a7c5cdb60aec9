use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::bus::{BusError, BusMessage, MessageBus};
use crate::protocol::{RoutedRequest, RoutedResponse, Topic};

use super::channels::Channels;
use super::RouterError;

/// Backend-side handler for one request kind.
///
/// `Ok` is the payload for a success response; `Err` carries the
/// user-facing message for an error response, e.g.
/// "That chatroom does not exist.". Infrastructure failures inside a
/// handler should surface the same way, as an error message.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: &RoutedRequest) -> Result<Value, String>;
}

/// Adapter so plain async closures can act as handlers.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> RequestHandler for FnHandler<F>
where
    F: Fn(RoutedRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, String>> + Send,
{
    async fn handle(&self, request: &RoutedRequest) -> Result<Value, String> {
        (self.0)(request.clone()).await
    }
}

/// The consuming side of the request channels: subscribes to every
/// registered kind, runs the handler, and publishes the result on the
/// matching response channel.
///
/// The worker does not reconnect on its own. If the subscription drops
/// it returns `Err` so the hosting process can decide whether to
/// restart it; shutdown returns `Ok`.
pub struct RequestWorker {
    bus: Arc<dyn MessageBus>,
    channels: Channels,
    handlers: HashMap<String, Arc<dyn RequestHandler>>,
    shutdown: broadcast::Sender<()>,
}

impl RequestWorker {
    pub fn new(bus: Arc<dyn MessageBus>, channels: Channels, shutdown: broadcast::Sender<()>) -> Self {
        Self {
            bus,
            channels,
            handlers: HashMap::new(),
            shutdown,
        }
    }

    pub fn register(mut self, kind: impl Into<String>, handler: Arc<dyn RequestHandler>) -> Self {
        self.handlers.insert(kind.into(), handler);
        self
    }

    pub fn register_fn<F, Fut>(self, kind: impl Into<String>, f: F) -> Self
    where
        F: Fn(RoutedRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        self.register(kind, Arc::new(FnHandler(f)))
    }

    /// Consume requests until shutdown or the subscription ends.
    pub async fn run(self) -> Result<(), BusError> {
        if self.handlers.is_empty() {
            tracing::warn!("Request worker started with no handlers");
            return Ok(());
        }

        let request_channels: Vec<String> = self
            .handlers
            .keys()
            .map(|kind| self.channels.request(kind))
            .collect();
        let mut subscription = self.bus.subscribe(&request_channels, &[]).await?;
        let mut shutdown_rx = self.shutdown.subscribe();

        let kinds: Vec<&String> = self.handlers.keys().collect();
        tracing::info!(kinds = ?kinds, "Request worker subscribed");

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Request worker received shutdown signal");
                    return Ok(());
                }
                message = subscription.next() => {
                    match message {
                        Some(message) => self.handle_message(message).await,
                        None => {
                            tracing::warn!("Worker subscription stream ended");
                            return Err(BusError::Closed);
                        }
                    }
                }
            }
        }
    }

    #[tracing::instrument(name = "worker.handle", skip(self, message), fields(channel = %message.channel))]
    async fn handle_message(&self, message: BusMessage) {
        let request: RoutedRequest = match serde_json::from_str(&message.payload) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(error = %e, "Discarding malformed request");
                return;
            }
        };

        let Some(handler) = self.handlers.get(&request.kind) else {
            tracing::warn!(kind = %request.kind, "No handler registered for kind");
            return;
        };

        let (channel, response) = match handler.handle(&request).await {
            Ok(data) => (self.channels.success(), RoutedResponse::success(&request, data)),
            Err(message) => (self.channels.error(), RoutedResponse::error(&request, message)),
        };

        let payload = match serde_json::to_string(&response) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(request_id = %request.id, error = %e, "Failed to encode response");
                return;
            }
        };
        if let Err(e) = self.bus.publish(&channel, &payload).await {
            tracing::error!(request_id = %request.id, error = %e, "Failed to publish response");
        } else {
            tracing::debug!(
                request_id = %request.id,
                kind = %request.kind,
                error = response.is_error(),
                "Published response"
            );
        }
    }
}

/// Worker-side producer for live update streams. Whatever is published
/// here lands on every connection subscribed to the topic at the edge.
pub struct TopicPublisher {
    bus: Arc<dyn MessageBus>,
    channels: Channels,
}

impl TopicPublisher {
    pub fn new(bus: Arc<dyn MessageBus>, channels: Channels) -> Self {
        Self { bus, channels }
    }

    pub async fn publish(&self, topic: &Topic, data: &Value) -> Result<(), RouterError> {
        let payload = serde_json::to_string(data)?;
        self.bus
            .publish(&self.channels.topic(topic.as_str()), &payload)
            .await?;
        tracing::debug!(topic = %topic, "Published topic update");
        Ok(())
    }
}
