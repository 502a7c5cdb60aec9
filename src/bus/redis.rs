use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use super::{BusError, BusMessage, BusSubscription, MessageBus};

/// Redis-backed bus. Publishes share one multiplexed connection;
/// every subscription gets its own pub/sub connection, since a Redis
/// connection in subscriber mode cannot be used for anything else.
pub struct RedisBus {
    client: redis::Client,
    publish_conn: Mutex<Option<MultiplexedConnection>>,
}

impl RedisBus {
    pub fn new(url: &str) -> Result<Self, BusError> {
        Ok(Self {
            client: redis::Client::open(url)?,
            publish_conn: Mutex::new(None),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, BusError> {
        let mut guard = self.publish_conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self.client.get_multiplexed_tokio_connection().await?;
        *guard = Some(conn.clone());
        Ok(conn)
    }

    async fn forget_connection(&self) {
        self.publish_conn.lock().await.take();
    }
}

/// Aborts the forwarding task (and with it the pub/sub connection)
/// when the subscription is dropped.
struct TaskGuard {
    handle: JoinHandle<()>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[async_trait]
impl MessageBus for RedisBus {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BusError> {
        let mut conn = self.connection().await?;
        match conn.publish::<_, _, ()>(channel, payload).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // Next publish reconnects instead of reusing a dead socket
                self.forget_connection().await;
                Err(e.into())
            }
        }
    }

    async fn subscribe(
        &self,
        channels: &[String],
        patterns: &[String],
    ) -> Result<BusSubscription, BusError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        for channel in channels {
            pubsub.subscribe(channel).await?;
            tracing::debug!(channel = %channel, "Subscribed to channel");
        }
        for pattern in patterns {
            pubsub.psubscribe(pattern).await?;
            tracing::debug!(pattern = %pattern, "Subscribed to pattern");
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async move {
            let mut stream = pubsub.into_on_message();
            while let Some(msg) = stream.next().await {
                let channel = msg.get_channel_name().to_string();
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!(error = %e, channel = %channel, "Failed to read message payload");
                        continue;
                    }
                };
                if sender.send(BusMessage { channel, payload }).is_err() {
                    break;
                }
            }
            tracing::debug!("Redis subscription stream ended");
        });

        Ok(BusSubscription::new(receiver, Box::new(TaskGuard { handle })))
    }
}
