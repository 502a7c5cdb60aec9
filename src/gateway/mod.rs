//! WebSocket edge of the service.
//!
//! The gateway admits ticket-authenticated connections into the
//! [`ConnectionRegistry`], probes them for liveness while any exist,
//! tracks topic subscriptions and delivers envelopes back out. Frames
//! are attributed by registry lookup only; nothing in a frame is
//! trusted to name its sender.

pub mod handler;
pub mod liveness;
pub mod registry;
pub mod topics;

pub use handler::ws_handler;
pub use registry::{ConnectionHandle, ConnectionRegistry, Outbound};
pub use topics::TopicIndex;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::auth::Subject;
use crate::config::{DeliveryPolicy, GatewayConfig};
use crate::metrics;
use crate::protocol::ServerEnvelope;

use liveness::{Sweeper, SweeperSlot};

#[derive(Debug, Error)]
pub enum GatewayError {
    /// A frame was processed for a connection the registry does not
    /// know. Structural: sockets must be admitted before they read.
    #[error("connection {0} is not registered")]
    UnverifiedConnection(Uuid),
}

/// Snapshot of gateway state for the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStats {
    pub connections: usize,
    pub users: usize,
    pub topics: HashMap<String, usize>,
}

/// Front door for everything that touches live connections.
pub struct Gateway {
    registry: Arc<ConnectionRegistry>,
    topics: Arc<TopicIndex>,
    policy: DeliveryPolicy,
    send_buffer: usize,
    sweep_interval: Duration,
    sweeper: SweeperSlot,
    shutdown: broadcast::Sender<()>,
}

impl Gateway {
    pub fn new(config: &GatewayConfig, shutdown: broadcast::Sender<()>) -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new()),
            topics: Arc::new(TopicIndex::new()),
            policy: config.delivery_policy,
            send_buffer: config.send_buffer,
            sweep_interval: Duration::from_secs(config.sweep_interval_secs),
            sweeper: Arc::new(tokio::sync::Mutex::new(None)),
            shutdown,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Admit an authenticated connection and hand back its handle plus
    /// the receiving end of its outbound channel. The first admission
    /// starts the liveness sweeper.
    pub async fn admit(&self, subject: Subject) -> (Arc<ConnectionHandle>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(self.send_buffer);
        let handle = self.registry.admit(subject, tx);
        metrics::ACTIVE_CONNECTIONS.set(self.registry.len() as i64);
        metrics::USERS_CONNECTED.set(self.registry.user_count() as i64);
        self.ensure_sweeper().await;
        (handle, rx)
    }

    /// Remove a connection and all its subscriptions. Idempotent.
    pub async fn remove(&self, connection_id: Uuid) -> Option<Arc<ConnectionHandle>> {
        detach_connection(&self.registry, &self.topics, connection_id)
    }

    /// Start the sweeper unless one is already running. Runs under the
    /// slot lock so it cannot race the sweeper's own idle-stop.
    async fn ensure_sweeper(&self) {
        let mut slot = self.sweeper.lock().await;
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let sweeper = Sweeper::new(
            self.registry.clone(),
            self.topics.clone(),
            self.sweep_interval,
            self.sweeper.clone(),
            self.shutdown.subscribe(),
        );
        *slot = Some(tokio::spawn(sweeper.run()));
    }

    pub fn subscribe_topic(&self, connection_id: Uuid, topic: &str) -> bool {
        let added = self.topics.subscribe(topic, connection_id);
        metrics::TOPICS_ACTIVE.set(self.topics.topic_count() as i64);
        added
    }

    pub fn unsubscribe_topic(&self, connection_id: Uuid, topic: &str) -> bool {
        let removed = self.topics.unsubscribe(topic, connection_id);
        metrics::TOPICS_ACTIVE.set(self.topics.topic_count() as i64);
        removed
    }

    /// Deliver an envelope to an identity according to the configured
    /// delivery policy. Returns how many connections accepted it.
    pub async fn send_to(&self, user_id: &str, envelope: &ServerEnvelope) -> usize {
        let handles = self.registry.for_user(user_id);
        if handles.is_empty() {
            tracing::debug!(user_id = %user_id, kind = %envelope.kind, "No connection for identity, dropping envelope");
            metrics::DELIVERY_FAILURES_TOTAL.inc();
            return 0;
        }

        let delivered = match self.policy {
            DeliveryPolicy::FirstMatch => {
                let mut delivered = 0;
                for handle in &handles {
                    if handle.push(envelope.clone()).await.is_ok() {
                        delivered = 1;
                        break;
                    }
                }
                delivered
            }
            DeliveryPolicy::AllConnections => {
                let mut delivered = 0;
                for handle in &handles {
                    if handle.push(envelope.clone()).await.is_ok() {
                        delivered += 1;
                    }
                }
                delivered
            }
        };

        if delivered == 0 {
            metrics::DELIVERY_FAILURES_TOTAL.inc();
        }
        delivered
    }

    /// Deliver an envelope to one exact connection.
    pub async fn send_to_connection(&self, connection_id: Uuid, envelope: ServerEnvelope) -> bool {
        match self.registry.lookup(connection_id) {
            Some(handle) => handle.push(envelope).await.is_ok(),
            None => {
                tracing::debug!(connection_id = %connection_id, "Connection gone, dropping envelope");
                metrics::DELIVERY_FAILURES_TOTAL.inc();
                false
            }
        }
    }

    /// Best-effort delivery to every registered connection.
    pub async fn broadcast(&self, envelope: &ServerEnvelope) -> usize {
        let mut delivered = 0;
        for handle in self.registry.all() {
            if handle.push(envelope.clone()).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Push a topic envelope to every connection subscribed to it.
    pub async fn publish_topic(&self, topic: &str, envelope: &ServerEnvelope) -> usize {
        let mut delivered = 0;
        for connection_id in self.topics.members(topic) {
            if let Some(handle) = self.registry.lookup(connection_id) {
                if handle.push(envelope.clone()).await.is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            connections: self.registry.len(),
            users: self.registry.user_count(),
            topics: self.topics.counts(),
        }
    }
}

/// Shared removal path for normal disconnects and sweeper evictions:
/// drop the connection from the registry, purge its subscriptions and
/// refresh the gauges.
pub(crate) fn detach_connection(
    registry: &ConnectionRegistry,
    topics: &TopicIndex,
    connection_id: Uuid,
) -> Option<Arc<ConnectionHandle>> {
    let handle = registry.remove(connection_id)?;
    topics.purge(connection_id);
    metrics::ACTIVE_CONNECTIONS.set(registry.len() as i64);
    metrics::USERS_CONNECTED.set(registry.user_count() as i64);
    metrics::TOPICS_ACTIVE.set(topics.topic_count() as i64);
    Some(handle)
}
