use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::metrics;

use super::registry::{ConnectionHandle, ConnectionRegistry, Outbound};
use super::topics::TopicIndex;

/// Shared slot holding the running sweeper task, if any. Admissions and
/// the sweeper's own idle-stop both serialize on it.
pub(crate) type SweeperSlot = Arc<tokio::sync::Mutex<Option<JoinHandle<()>>>>;

/// Background task that probes connection liveness.
///
/// Each sweep clears every connection's liveness flag and sends a
/// protocol ping. A connection whose flag is still clear on the next
/// sweep never answered and is evicted. The task runs only while the
/// registry has connections: it is started on admission and stops
/// itself once the registry empties.
pub struct Sweeper {
    registry: Arc<ConnectionRegistry>,
    topics: Arc<TopicIndex>,
    period: Duration,
    slot: SweeperSlot,
    shutdown: broadcast::Receiver<()>,
}

impl Sweeper {
    pub(crate) fn new(
        registry: Arc<ConnectionRegistry>,
        topics: Arc<TopicIndex>,
        period: Duration,
        slot: SweeperSlot,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            registry,
            topics,
            period,
            slot,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut timer = tokio::time::interval(self.period);
        // Skip immediate first tick
        timer.tick().await;

        tracing::debug!(
            period_ms = self.period.as_millis() as u64,
            "Liveness sweeper started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::debug!("Liveness sweeper received shutdown signal");
                    break;
                }
                _ = timer.tick() => {
                    if self.idle_stop().await {
                        break;
                    }
                    self.sweep().await;
                }
            }
        }

        tracing::debug!("Liveness sweeper stopped");
    }

    /// Stop once the registry is empty. The final check runs under the
    /// spawn slot lock, so a racing admission either finds this sweeper
    /// still alive or finds the slot cleared and starts a fresh one.
    async fn idle_stop(&self) -> bool {
        if !self.registry.is_empty() {
            return false;
        }
        let mut slot = self.slot.lock().await;
        if self.registry.is_empty() {
            *slot = None;
            true
        } else {
            false
        }
    }

    async fn sweep(&self) {
        let started = Instant::now();
        let mut pinged = 0usize;
        let mut evicted = 0usize;

        for handle in self.registry.all() {
            if handle.probe() {
                // Challenge the connection; the pong restores the flag
                if handle.send(Outbound::Ping).await.is_err() {
                    tracing::debug!(
                        connection_id = %handle.id,
                        "Ping channel closed, connection already tearing down"
                    );
                } else {
                    pinged += 1;
                }
            } else {
                self.evict(&handle).await;
                evicted += 1;
            }
        }

        tracing::debug!(
            pinged = pinged,
            evicted = evicted,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Liveness sweep completed"
        );
    }

    /// Remove a connection that never answered the previous challenge.
    async fn evict(&self, handle: &Arc<ConnectionHandle>) {
        tracing::info!(
            connection_id = %handle.id,
            user_id = %handle.subject.id,
            "Evicting unresponsive connection"
        );
        super::detach_connection(&self.registry, &self.topics, handle.id);
        let _ = handle.send(Outbound::Close).await;
        metrics::LIVENESS_EVICTIONS_TOTAL.inc();
    }
}
