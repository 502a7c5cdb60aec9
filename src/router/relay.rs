use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::bus::{BusError, BusMessage, BusSubscription, ExponentialBackoff, MessageBus};
use crate::gateway::Gateway;
use crate::metrics::RelayMetrics;
use crate::protocol::{DeliveryTarget, RoutedResponse, ServerEnvelope};

use super::channels::Channels;

/// Sliding window of correlation ids that already produced a delivery.
///
/// The first response for an id wins; anything later is a duplicate
/// (several workers answered the same request) and is dropped. The
/// window is bounded: once full, the oldest id is forgotten, so an
/// extremely late duplicate can in principle slip through. That trade
/// keeps memory flat under sustained load.
pub struct ResponseDedup {
    inner: tokio::sync::Mutex<DedupWindow>,
}

struct DedupWindow {
    order: VecDeque<Uuid>,
    seen: HashSet<Uuid>,
    capacity: usize,
}

impl ResponseDedup {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: tokio::sync::Mutex::new(DedupWindow {
                order: VecDeque::with_capacity(capacity),
                seen: HashSet::with_capacity(capacity),
                capacity,
            }),
        }
    }

    /// True exactly once per id while it stays inside the window.
    pub async fn first_seen(&self, id: Uuid) -> bool {
        let mut window = self.inner.lock().await;
        if window.seen.contains(&id) {
            return false;
        }
        if window.order.len() == window.capacity {
            if let Some(oldest) = window.order.pop_front() {
                window.seen.remove(&oldest);
            }
        }
        window.order.push_back(id);
        window.seen.insert(id);
        true
    }
}

/// Bridge from the bus back to live connections.
///
/// One subscription covers the two fixed response channels plus every
/// topic channel in the namespace. Worker responses are addressed
/// frames delivered to their target connection or identity; topic
/// messages fan out to whatever connections subscribed at the edge.
/// The relay owns reconnection: when the subscription drops it backs
/// off and resubscribes until shutdown.
pub struct ResponseRelay {
    bus: Arc<dyn MessageBus>,
    channels: Channels,
    gateway: Arc<Gateway>,
    dedup: ResponseDedup,
    shutdown: broadcast::Sender<()>,
}

impl ResponseRelay {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        channels: Channels,
        gateway: Arc<Gateway>,
        dedup_capacity: usize,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        Self {
            bus,
            channels,
            gateway,
            dedup: ResponseDedup::new(dedup_capacity),
            shutdown,
        }
    }

    /// Serve until shutdown, resubscribing with capped backoff whenever
    /// the bus drops the subscription.
    pub async fn run(self) {
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut backoff = ExponentialBackoff::new();

        loop {
            let subscription = tokio::select! {
                _ = shutdown_rx.recv() => break,
                result = self.subscribe() => result,
            };

            let mut subscription = match subscription {
                Ok(subscription) => {
                    backoff.reset();
                    subscription
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    RelayMetrics::record_reconnect();
                    tracing::error!(
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Relay failed to subscribe, retrying"
                    );
                    tokio::select! {
                        _ = shutdown_rx.recv() => break,
                        _ = tokio::time::sleep(delay) => continue,
                    }
                }
            };

            tracing::info!(
                pattern = %self.channels.topic_pattern(),
                "Response relay subscribed"
            );

            let stopped = loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Response relay received shutdown signal");
                        break true;
                    }
                    message = subscription.next() => {
                        match message {
                            Some(message) => self.handle(message).await,
                            None => {
                                tracing::warn!("Relay subscription stream ended");
                                break false;
                            }
                        }
                    }
                }
            };

            if stopped {
                break;
            }

            // Stream ended without shutdown: back off, then resubscribe
            let delay = backoff.next_delay();
            RelayMetrics::record_reconnect();
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        tracing::info!("Response relay stopped");
    }

    async fn subscribe(&self) -> Result<BusSubscription, BusError> {
        self.bus
            .subscribe(
                &[self.channels.success(), self.channels.error()],
                &[self.channels.topic_pattern()],
            )
            .await
    }

    async fn handle(&self, message: BusMessage) {
        if message.channel == self.channels.success() || message.channel == self.channels.error() {
            let response: RoutedResponse = match serde_json::from_str(&message.payload) {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(
                        channel = %message.channel,
                        error = %e,
                        "Discarding malformed response"
                    );
                    return;
                }
            };
            self.deliver(response).await;
        } else if let Some(topic) = self.channels.topic_from_channel(&message.channel) {
            self.push_topic(topic, &message.payload).await;
        } else {
            tracing::warn!(channel = %message.channel, "Message on unexpected channel");
        }
    }

    /// Write a worker response to its target, unless a response for the
    /// same request already went out.
    async fn deliver(&self, response: RoutedResponse) {
        if !self.dedup.first_seen(response.request_id).await {
            RelayMetrics::record_duplicate();
            tracing::warn!(
                request_id = %response.request_id,
                kind = %response.kind,
                "Dropping late duplicate response"
            );
            return;
        }

        let envelope = response.envelope();
        let delivered = match &response.to {
            DeliveryTarget::Connection(connection_id) => {
                usize::from(self.gateway.send_to_connection(*connection_id, envelope).await)
            }
            DeliveryTarget::User(user_id) => self.gateway.send_to(user_id, &envelope).await,
        };

        if response.is_error() {
            RelayMetrics::record_error();
        } else {
            RelayMetrics::record_success();
        }

        tracing::debug!(
            request_id = %response.request_id,
            kind = %response.kind,
            delivered = delivered,
            "Relayed response"
        );
    }

    async fn push_topic(&self, topic: &str, payload: &str) {
        let data: Value = match serde_json::from_str(payload) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(topic = %topic, error = %e, "Discarding malformed topic payload");
                return;
            }
        };

        let envelope = ServerEnvelope::data(topic, data);
        let delivered = self.gateway.publish_topic(topic, &envelope).await;
        RelayMetrics::record_topic_push();
        tracing::debug!(topic = %topic, delivered = delivered, "Pushed topic update");
    }
}
