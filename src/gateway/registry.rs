use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::auth::Subject;
use crate::protocol::ServerEnvelope;

/// Frame pushed to a connection's writer task.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// A JSON envelope for the client.
    Envelope(ServerEnvelope),
    /// WebSocket protocol ping, sent by the liveness sweeper.
    Ping,
    /// Ask the writer to close the socket and exit.
    Close,
}

/// Handle for a single admitted WebSocket connection.
///
/// `alive` is the liveness flag the sweeper works against: any inbound
/// frame sets it, each sweep clears it, and a connection found cleared
/// on the next sweep is evicted.
pub struct ConnectionHandle {
    pub id: Uuid,
    pub subject: Subject,
    pub sender: mpsc::Sender<Outbound>,
    pub connected_at: DateTime<Utc>,
    alive: AtomicBool,
}

impl ConnectionHandle {
    pub fn new(subject: Subject, sender: mpsc::Sender<Outbound>) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject,
            sender,
            connected_at: Utc::now(),
            // A fresh connection has just proven itself by connecting
            alive: AtomicBool::new(true),
        }
    }

    pub async fn send(&self, out: Outbound) -> Result<(), mpsc::error::SendError<Outbound>> {
        self.sender.send(out).await
    }

    pub async fn push(&self, envelope: ServerEnvelope) -> Result<(), mpsc::error::SendError<Outbound>> {
        self.send(Outbound::Envelope(envelope)).await
    }

    /// Mark the connection as having shown signs of life.
    pub fn touch(&self) {
        self.alive.store(true, Ordering::Relaxed);
    }

    /// Clear the liveness flag, returning whether it was set.
    pub fn probe(&self) -> bool {
        self.alive.swap(false, Ordering::Relaxed)
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }
}

/// Tracks every admitted connection and its authenticated identity.
///
/// The registry is the single source of truth for "who is this
/// connection": inbound frames are attributed by looking the connection
/// up here, never by trusting anything the frame claims. The only
/// mutations are `admit`, `remove` and `touch`; everything else reads.
pub struct ConnectionRegistry {
    /// connection_id -> ConnectionHandle
    connections: DashMap<Uuid, Arc<ConnectionHandle>>,
    /// subject id -> Set<connection_id> (supports multiple devices)
    user_index: DashMap<String, HashSet<Uuid>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            user_index: DashMap::new(),
        }
    }

    /// Admit an authenticated connection, updating both indexes together.
    pub fn admit(&self, subject: Subject, sender: mpsc::Sender<Outbound>) -> Arc<ConnectionHandle> {
        let handle = Arc::new(ConnectionHandle::new(subject, sender));
        let conn_id = handle.id;

        self.connections.insert(conn_id, handle.clone());
        self.user_index
            .entry(handle.subject.id.clone())
            .or_default()
            .insert(conn_id);

        tracing::info!(
            connection_id = %conn_id,
            user_id = %handle.subject.id,
            "Connection admitted"
        );

        handle
    }

    /// Remove a connection from both indexes. Idempotent.
    pub fn remove(&self, connection_id: Uuid) -> Option<Arc<ConnectionHandle>> {
        let (_, handle) = self.connections.remove(&connection_id)?;

        if let Some(mut user_conns) = self.user_index.get_mut(&handle.subject.id) {
            user_conns.remove(&connection_id);
            if user_conns.is_empty() {
                drop(user_conns);
                self.user_index.remove(&handle.subject.id);
            }
        }

        tracing::info!(
            connection_id = %connection_id,
            user_id = %handle.subject.id,
            "Connection removed"
        );

        Some(handle)
    }

    /// Record liveness for a connection, if it is still registered.
    pub fn touch(&self, connection_id: Uuid) {
        if let Some(handle) = self.connections.get(&connection_id) {
            handle.touch();
        }
    }

    /// Resolve a connection id to its handle and identity.
    pub fn lookup(&self, connection_id: Uuid) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(&connection_id).map(|h| h.clone())
    }

    /// All live connections for a subject, in no particular order.
    pub fn for_user(&self, user_id: &str) -> Vec<Arc<ConnectionHandle>> {
        self.user_index
            .get(user_id)
            .map(|conn_ids| {
                conn_ids
                    .iter()
                    .filter_map(|id| self.connections.get(id).map(|h| h.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn all(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections.iter().map(|r| r.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn user_count(&self) -> usize {
        self.user_index.len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
