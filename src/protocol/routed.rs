use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::envelope::ServerEnvelope;

/// A validated client frame on its way across the bus to workers.
/// `id` is the correlation id: responses echo it so the relay can
/// drop duplicates when more than one worker answers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutedRequest {
    pub id: Uuid,
    /// Authenticated identity of the sender.
    pub from: String,
    /// Connection the frame arrived on, for reply addressing.
    pub connection: Uuid,
    pub kind: String,
    pub args: Value,
    pub issued_at: DateTime<Utc>,
}

impl RoutedRequest {
    pub fn new(from: impl Into<String>, connection: Uuid, kind: impl Into<String>, args: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            from: from.into(),
            connection,
            kind: kind.into(),
            args,
            issued_at: Utc::now(),
        }
    }
}

/// Where a worker's response should be written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "target", content = "id", rename_all = "snake_case")]
pub enum DeliveryTarget {
    /// The exact connection the request arrived on.
    Connection(Uuid),
    /// Any/all connections of an identity, per the delivery policy.
    User(String),
}

/// A worker's published result. Success results travel on the success
/// channel with `data` set; failures on the error channel with `error`
/// set. `kind` always echoes the originating request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutedResponse {
    pub request_id: Uuid,
    pub to: DeliveryTarget,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RoutedResponse {
    /// Successful reply addressed back to the originating connection.
    pub fn success(request: &RoutedRequest, data: Value) -> Self {
        Self {
            request_id: request.id,
            to: DeliveryTarget::Connection(request.connection),
            kind: request.kind.clone(),
            data: Some(data),
            error: None,
        }
    }

    /// Business error addressed back to the originating connection only.
    pub fn error(request: &RoutedRequest, message: impl Into<String>) -> Self {
        Self {
            request_id: request.id,
            to: DeliveryTarget::Connection(request.connection),
            kind: request.kind.clone(),
            data: None,
            error: Some(message.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// The wire frame the edge writes to the client.
    pub fn envelope(&self) -> ServerEnvelope {
        ServerEnvelope {
            kind: self.kind.clone(),
            data: self.data.clone(),
            error: self.error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_echoes_request_kind_and_id() {
        let request = RoutedRequest::new("user-1", Uuid::new_v4(), "get-room", json!({"roomId": 4}));
        let response = RoutedResponse::success(&request, json!({"roomId": 4, "name": "lobby"}));
        assert_eq!(response.request_id, request.id);
        assert_eq!(response.kind, "get-room");
        assert_eq!(response.to, DeliveryTarget::Connection(request.connection));
        assert!(!response.is_error());
    }

    #[test]
    fn test_error_response_envelope() {
        let request = RoutedRequest::new("user-1", Uuid::new_v4(), "send-chat-message", json!({}));
        let response = RoutedResponse::error(&request, "That chatroom does not exist.");
        let envelope = response.envelope();
        assert_eq!(envelope.kind, "send-chat-message");
        assert_eq!(envelope.error.as_deref(), Some("That chatroom does not exist."));
        assert!(envelope.data.is_none());
    }

    #[test]
    fn test_delivery_target_wire_shape() {
        let target = DeliveryTarget::User("user-7".into());
        let value = serde_json::to_value(&target).unwrap();
        assert_eq!(value, json!({"target": "user", "id": "user-7"}));
    }
}
