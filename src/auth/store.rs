//! Side cache for outstanding connection tickets
//!
//! Every issued ticket is cached under its sealed token with a short TTL.
//! Validation takes the entry out atomically, which is what makes tickets
//! single-use: even a token that decrypts cleanly fails once the entry is
//! gone. The in-memory backend serves single-process deployments and
//! tests; the Redis backend lets any edge instance validate a ticket
//! issued by a peer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use redis::AsyncCommands;
use thiserror::Error;

use crate::config::Settings;

use super::ticket::Subject;

/// Entries above this count trigger an expired-entry purge on insert.
const PURGE_THRESHOLD: usize = 256;

#[derive(Debug, Error)]
pub enum TicketStoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Storage for the subject snapshot behind each outstanding ticket.
#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Cache a subject snapshot under the sealed token.
    async fn put(
        &self,
        token: &str,
        subject: &Subject,
        ttl: Duration,
    ) -> Result<(), TicketStoreError>;

    /// Atomically remove and return the snapshot. A second take of the
    /// same token always returns `None`, as does a take after the TTL.
    async fn take(&self, token: &str) -> Result<Option<Subject>, TicketStoreError>;
}

/// In-process ticket cache.
pub struct MemoryTicketStore {
    entries: DashMap<String, (Subject, DateTime<Utc>)>,
}

impl MemoryTicketStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    fn purge_expired(&self) {
        let now = Utc::now();
        self.entries.retain(|_, (_, expires_at)| *expires_at > now);
    }
}

impl Default for MemoryTicketStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TicketStore for MemoryTicketStore {
    async fn put(
        &self,
        token: &str,
        subject: &Subject,
        ttl: Duration,
    ) -> Result<(), TicketStoreError> {
        if self.entries.len() >= PURGE_THRESHOLD {
            self.purge_expired();
        }
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(30));
        self.entries
            .insert(token.to_string(), (subject.clone(), expires_at));
        Ok(())
    }

    async fn take(&self, token: &str) -> Result<Option<Subject>, TicketStoreError> {
        match self.entries.remove(token) {
            Some((_, (subject, expires_at))) if expires_at > Utc::now() => Ok(Some(subject)),
            _ => Ok(None),
        }
    }
}

/// Redis-backed ticket cache shared by all edge instances.
pub struct RedisTicketStore {
    client: redis::Client,
    namespace: String,
}

impl RedisTicketStore {
    pub fn new(url: &str, namespace: impl Into<String>) -> Result<Self, TicketStoreError> {
        Ok(Self {
            client: redis::Client::open(url)?,
            namespace: namespace.into(),
        })
    }

    /// Generate the Redis key for a sealed token.
    fn ticket_key(&self, token: &str) -> String {
        format!("{}:ticket:{}", self.namespace, token)
    }
}

#[async_trait]
impl TicketStore for RedisTicketStore {
    async fn put(
        &self,
        token: &str,
        subject: &Subject,
        ttl: Duration,
    ) -> Result<(), TicketStoreError> {
        let mut conn = self.client.get_multiplexed_tokio_connection().await?;
        let json = serde_json::to_string(subject)?;
        let ttl_secs = ttl.as_secs().max(1);
        let _: () = conn.set_ex(self.ticket_key(token), json, ttl_secs).await?;
        Ok(())
    }

    async fn take(&self, token: &str) -> Result<Option<Subject>, TicketStoreError> {
        let mut conn = self.client.get_multiplexed_tokio_connection().await?;
        // GETDEL is the atomic take: concurrent validations race for one value
        let json: Option<String> = redis::cmd("GETDEL")
            .arg(self.ticket_key(token))
            .query_async(&mut conn)
            .await?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}

/// Create a ticket store based on configuration.
pub fn create_ticket_store(settings: &Settings) -> Result<Arc<dyn TicketStore>, TicketStoreError> {
    match settings.router.backend.as_str() {
        "redis" => {
            tracing::info!(url = %settings.redis.url, "Creating Redis ticket store");
            Ok(Arc::new(RedisTicketStore::new(
                &settings.redis.url,
                settings.redis.namespace.clone(),
            )?))
        }
        _ => {
            tracing::info!("Creating in-memory ticket store");
            Ok(Arc::new(MemoryTicketStore::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject() -> Subject {
        Subject {
            id: "user-1".to_string(),
            name: "Ada".to_string(),
            roles: vec![],
        }
    }

    #[tokio::test]
    async fn test_take_is_single_use() {
        let store = MemoryTicketStore::new();
        store
            .put("token-a", &subject(), Duration::from_secs(10))
            .await
            .unwrap();

        let first = store.take("token-a").await.unwrap();
        assert_eq!(first.map(|s| s.id), Some("user-1".to_string()));
        assert!(store.take("token-a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_take_unknown_token() {
        let store = MemoryTicketStore::new();
        assert!(store.take("never-issued").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_gone() {
        let store = MemoryTicketStore::new();
        store
            .put("token-b", &subject(), Duration::from_secs(0))
            .await
            .unwrap();
        assert!(store.take("token-b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_purge_drops_only_expired() {
        let store = MemoryTicketStore::new();
        for i in 0..PURGE_THRESHOLD {
            store
                .put(&format!("stale-{}", i), &subject(), Duration::from_secs(0))
                .await
                .unwrap();
        }
        // Crossing the threshold purges the expired entries first
        store
            .put("fresh", &subject(), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(store.entries.len(), 1);
        assert!(store.take("fresh").await.unwrap().is_some());
    }

    #[test]
    fn test_factory_defaults_to_memory() {
        let settings = test_settings("memory");
        assert!(create_ticket_store(&settings).is_ok());
    }

    fn test_settings(backend: &str) -> Settings {
        use crate::config::*;
        Settings {
            server: ServerConfig::default(),
            jwt: JwtConfig {
                secret: "test".into(),
                issuer: None,
                audience: None,
            },
            ticket: TicketConfig {
                key: String::new(),
                ttl_secs: 30,
                denied_subjects: vec![],
            },
            redis: RedisConfig::default(),
            gateway: GatewayConfig::default(),
            router: RouterConfig {
                backend: backend.to_string(),
                ..RouterConfig::default()
            },
            otel: OtelConfig::default(),
        }
    }
}
