//! Publish/subscribe bus between the edge and backend workers
//!
//! Everything crosses this bus: inbound requests fan out on kind-keyed
//! channels, worker responses come back on the two fixed response
//! channels, and live updates ride per-topic channels. Workers attach
//! and detach freely; the edge never knows worker topology. The memory
//! backend keeps single-process deployments and tests hermetic; the
//! Redis backend is the multi-process transport.

mod backoff;
mod memory;
mod redis;

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::Settings;

pub use self::redis::RedisBus;
pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use memory::MemoryBus;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
    #[error("bus connection closed")]
    Closed,
}

/// A message as delivered to a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    pub channel: String,
    pub payload: String,
}

/// One active subscription. On backends with real connections this owns
/// a dedicated one; dropping the subscription tears everything down,
/// which is the only unsubscribe operation there is.
pub struct BusSubscription {
    receiver: mpsc::UnboundedReceiver<BusMessage>,
    _guard: Box<dyn Any + Send>,
}

impl BusSubscription {
    pub(crate) fn new(
        receiver: mpsc::UnboundedReceiver<BusMessage>,
        guard: Box<dyn Any + Send>,
    ) -> Self {
        Self {
            receiver,
            _guard: guard,
        }
    }

    /// Next message, or `None` once the subscription is gone.
    pub async fn next(&mut self) -> Option<BusMessage> {
        self.receiver.recv().await
    }
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Fire-and-forget publish. Delivery to zero subscribers is not an
    /// error.
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BusError>;

    /// Open a subscription covering exact `channels` plus glob
    /// `patterns` (Redis `*`/`?` style).
    async fn subscribe(
        &self,
        channels: &[String],
        patterns: &[String],
    ) -> Result<BusSubscription, BusError>;
}

/// Create a bus based on configuration.
pub fn create_bus(settings: &Settings) -> Result<Arc<dyn MessageBus>, BusError> {
    match settings.router.backend.as_str() {
        "redis" => {
            tracing::info!(url = %settings.redis.url, "Creating Redis message bus");
            Ok(Arc::new(RedisBus::new(&settings.redis.url)?))
        }
        _ => {
            tracing::info!("Creating in-memory message bus");
            Ok(Arc::new(MemoryBus::new()))
        }
    }
}
