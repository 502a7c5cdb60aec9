use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::TicketConfig;
use crate::metrics;

use super::claims::Claims;
use super::seal::{SealError, TicketSealer};
use super::store::{TicketStore, TicketStoreError};

/// Identity snapshot carried inside a ticket and cached beside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl From<&Claims> for Subject {
    fn from(claims: &Claims) -> Self {
        Self {
            id: claims.sub.clone(),
            name: claims.display_name().to_string(),
            roles: claims.roles.clone(),
        }
    }
}

/// Plaintext ticket payload. Clients only ever hold the sealed form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub issued_at: DateTime<Utc>,
    pub issued_to: IpAddr,
    pub subject: Subject,
}

#[derive(Debug, Error)]
pub enum TicketError {
    #[error("subject {0} is not eligible for a connection ticket")]
    SubjectIneligible(String),
    #[error("ticket sealing failed: {0}")]
    Seal(#[from] SealError),
    #[error("ticket store failed: {0}")]
    Store(#[from] TicketStoreError),
    #[error("ticket payload could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Mints and validates single-use connection tickets.
///
/// Issuance binds a ticket to the requesting remote address and caches
/// the subject snapshot under the sealed token. Validation fails closed:
/// any problem (undecodable token, wrong address, elapsed TTL, already
/// consumed) yields `None`, and a success consumes the cache entry before
/// the subject is returned.
pub struct TicketIssuer {
    sealer: TicketSealer,
    store: Arc<dyn TicketStore>,
    ttl: Duration,
    denied_subjects: Vec<String>,
}

impl TicketIssuer {
    pub fn new(config: &TicketConfig, store: Arc<dyn TicketStore>) -> Result<Self, TicketError> {
        Ok(Self {
            sealer: TicketSealer::new(&config.key)?,
            store,
            ttl: Duration::from_secs(config.ttl_secs),
            denied_subjects: config.denied_subjects.clone(),
        })
    }

    #[tracing::instrument(name = "ticket_issue", skip(self, subject), fields(subject_id = %subject.id))]
    pub async fn issue(&self, subject: Subject, remote: IpAddr) -> Result<String, TicketError> {
        if subject.id.is_empty() || self.denied_subjects.contains(&subject.id) {
            return Err(TicketError::SubjectIneligible(subject.id));
        }

        let ticket = Ticket {
            issued_at: Utc::now(),
            issued_to: remote,
            subject: subject.clone(),
        };
        let token = self.sealer.seal(&serde_json::to_vec(&ticket)?)?;
        self.store.put(&token, &subject, self.ttl).await?;

        metrics::TICKETS_ISSUED_TOTAL.inc();
        tracing::debug!(remote = %remote, "Ticket issued");
        Ok(token)
    }

    /// Single-use, address-bound, TTL-bound validation. `None` on any
    /// failure; the caller must refuse the upgrade in that case.
    pub async fn validate(&self, token: Option<&str>, remote: IpAddr) -> Option<Subject> {
        let subject = self.check(token, remote).await;
        let outcome = if subject.is_some() {
            "accepted"
        } else {
            "rejected"
        };
        metrics::TICKET_VALIDATIONS_TOTAL
            .with_label_values(&[outcome])
            .inc();
        subject
    }

    async fn check(&self, token: Option<&str>, remote: IpAddr) -> Option<Subject> {
        let token = match token {
            Some(t) if !t.is_empty() => t,
            _ => {
                tracing::debug!("Ticket missing from request");
                return None;
            }
        };

        let payload = match self.sealer.open(token) {
            Ok(payload) => payload,
            Err(_) => {
                tracing::debug!("Ticket failed to unseal");
                return None;
            }
        };
        let ticket: Ticket = match serde_json::from_slice(&payload) {
            Ok(ticket) => ticket,
            Err(_) => {
                tracing::debug!("Ticket payload failed to parse");
                return None;
            }
        };

        // Address and TTL are checked before the take so a probe from the
        // wrong host cannot burn a ticket the real client still holds.
        if ticket.issued_to != remote {
            tracing::warn!(
                issued_to = %ticket.issued_to,
                remote = %remote,
                "Ticket presented from a different address"
            );
            return None;
        }
        let age = Utc::now().signed_duration_since(ticket.issued_at);
        if age > chrono::Duration::seconds(self.ttl.as_secs() as i64) {
            tracing::debug!(age_secs = age.num_seconds(), "Ticket expired");
            return None;
        }

        // The atomic take makes the ticket single-use; it also rejects
        // forged tokens that decrypt but were never issued by us.
        match self.store.take(token).await {
            Ok(Some(subject)) => Some(subject),
            Ok(None) => {
                tracing::debug!("Ticket already consumed or never issued");
                None
            }
            Err(e) => {
                tracing::error!(error = %e, "Ticket store lookup failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::store::MemoryTicketStore;

    fn issuer_with(denied: Vec<String>, ttl_secs: u64) -> TicketIssuer {
        let config = TicketConfig {
            key: TicketSealer::generate_key(),
            ttl_secs,
            denied_subjects: denied,
        };
        TicketIssuer::new(&config, Arc::new(MemoryTicketStore::new())).unwrap()
    }

    fn subject(id: &str) -> Subject {
        Subject {
            id: id.to_string(),
            name: "Ada".to_string(),
            roles: vec!["player".to_string()],
        }
    }

    fn addr(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_validate_is_single_use() {
        let issuer = issuer_with(vec![], 10);
        let remote = addr("10.0.0.5");
        let token = issuer.issue(subject("user-1"), remote).await.unwrap();

        let first = issuer.validate(Some(&token), remote).await;
        assert_eq!(first.map(|s| s.id), Some("user-1".to_string()));

        // Second presentation of the same token must always fail
        assert!(issuer.validate(Some(&token), remote).await.is_none());
    }

    #[tokio::test]
    async fn test_address_mismatch_rejected_without_consuming() {
        let issuer = issuer_with(vec![], 10);
        let issued_to = addr("10.0.0.5");
        let token = issuer.issue(subject("user-1"), issued_to).await.unwrap();

        assert!(issuer
            .validate(Some(&token), addr("10.0.0.6"))
            .await
            .is_none());
        // The probe from the wrong host did not burn the ticket
        assert!(issuer.validate(Some(&token), issued_to).await.is_some());
    }

    #[tokio::test]
    async fn test_expired_payload_rejected() {
        let issuer = issuer_with(vec![], 10);
        let remote = addr("192.168.1.9");

        // Seal a ticket dated a minute ago, cache entry still live
        let ticket = Ticket {
            issued_at: Utc::now() - chrono::Duration::seconds(60),
            issued_to: remote,
            subject: subject("user-1"),
        };
        let token = issuer.sealer.seal(&serde_json::to_vec(&ticket).unwrap()).unwrap();
        issuer
            .store
            .put(&token, &ticket.subject, Duration::from_secs(600))
            .await
            .unwrap();

        assert!(issuer.validate(Some(&token), remote).await.is_none());
    }

    #[tokio::test]
    async fn test_missing_and_garbage_tokens_rejected() {
        let issuer = issuer_with(vec![], 10);
        let remote = addr("10.0.0.5");
        assert!(issuer.validate(None, remote).await.is_none());
        assert!(issuer.validate(Some(""), remote).await.is_none());
        assert!(issuer.validate(Some("AAAA"), remote).await.is_none());
    }

    #[tokio::test]
    async fn test_forged_token_needs_cache_entry() {
        let issuer = issuer_with(vec![], 10);
        let remote = addr("10.0.0.5");

        // Decrypts fine, but was never put in the store
        let ticket = Ticket {
            issued_at: Utc::now(),
            issued_to: remote,
            subject: subject("user-1"),
        };
        let token = issuer.sealer.seal(&serde_json::to_vec(&ticket).unwrap()).unwrap();
        assert!(issuer.validate(Some(&token), remote).await.is_none());
    }

    #[tokio::test]
    async fn test_denied_subject_cannot_get_ticket() {
        let issuer = issuer_with(vec!["banned-user".to_string()], 10);
        let result = issuer.issue(subject("banned-user"), addr("10.0.0.5")).await;
        assert!(matches!(result, Err(TicketError::SubjectIneligible(id)) if id == "banned-user"));

        let result = issuer.issue(subject(""), addr("10.0.0.5")).await;
        assert!(matches!(result, Err(TicketError::SubjectIneligible(_))));
    }
}
