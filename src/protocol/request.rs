use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use super::envelope::RawEnvelope;
use super::topic::Topic;

/// Every request kind a client may send, with its typed arguments.
/// The vocabulary is closed: anything else is rejected before it can
/// reach the bus. `Subscribe`/`Unsubscribe` are handled at the edge;
/// the rest are published for backend workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "args", rename_all = "kebab-case")]
pub enum ClientRequest {
    Subscribe(TopicArgs),
    Unsubscribe(TopicArgs),
    SendChatMessage(ChatMessageArgs),
    JoinRoom(RoomArgs),
    LeaveRoom(RoomArgs),
    GetRoom(RoomArgs),
    GetUser(UserArgs),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicArgs {
    pub topic: Topic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageArgs {
    pub chatroom_id: u64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomArgs {
    pub room_id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserArgs {
    pub user_id: String,
}

/// Why a single frame was rejected. The connection stays open.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolViolation {
    #[error("frame is not a valid request envelope")]
    MalformedEnvelope,
    #[error("unknown request kind: {0}")]
    UnknownKind(String),
    #[error("invalid arguments for kind {kind}: {detail}")]
    InvalidArgs { kind: String, detail: String },
}

impl ClientRequest {
    /// All wire-level kind strings, in declaration order.
    pub const KINDS: &'static [&'static str] = &[
        "subscribe",
        "unsubscribe",
        "send-chat-message",
        "join-room",
        "leave-room",
        "get-room",
        "get-user",
    ];

    pub fn kind(&self) -> &'static str {
        match self {
            ClientRequest::Subscribe(_) => "subscribe",
            ClientRequest::Unsubscribe(_) => "unsubscribe",
            ClientRequest::SendChatMessage(_) => "send-chat-message",
            ClientRequest::JoinRoom(_) => "join-room",
            ClientRequest::LeaveRoom(_) => "leave-room",
            ClientRequest::GetRoom(_) => "get-room",
            ClientRequest::GetUser(_) => "get-user",
        }
    }

    /// True for kinds the gateway resolves itself instead of publishing.
    pub fn is_edge_local(&self) -> bool {
        matches!(
            self,
            ClientRequest::Subscribe(_) | ClientRequest::Unsubscribe(_)
        )
    }

    /// The request arguments as loose JSON, as they travel on the bus.
    pub fn args(&self) -> serde_json::Value {
        let value = match self {
            ClientRequest::Subscribe(args) | ClientRequest::Unsubscribe(args) => {
                serde_json::to_value(args)
            }
            ClientRequest::SendChatMessage(args) => serde_json::to_value(args),
            ClientRequest::JoinRoom(args)
            | ClientRequest::LeaveRoom(args)
            | ClientRequest::GetRoom(args) => serde_json::to_value(args),
            ClientRequest::GetUser(args) => serde_json::to_value(args),
        };
        value.unwrap_or(serde_json::Value::Null)
    }

    /// Parse raw frame text into a validated request.
    pub fn parse(text: &str) -> Result<Self, ProtocolViolation> {
        let raw: RawEnvelope =
            serde_json::from_str(text).map_err(|_| ProtocolViolation::MalformedEnvelope)?;
        Self::from_envelope(raw)
    }

    /// Validate an already-split envelope against the vocabulary.
    pub fn from_envelope(raw: RawEnvelope) -> Result<Self, ProtocolViolation> {
        if !Self::KINDS.contains(&raw.kind.as_str()) {
            return Err(ProtocolViolation::UnknownKind(raw.kind));
        }
        serde_json::from_value(json!({ "kind": raw.kind, "args": raw.args })).map_err(|e| {
            ProtocolViolation::InvalidArgs {
                kind: raw.kind,
                detail: e.to_string(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_known_kind_with_camel_case_args() {
        let request = ClientRequest::parse(
            r#"{"kind":"send-chat-message","args":{"chatroomId":666666,"message":"Hello"}}"#,
        )
        .unwrap();
        match &request {
            ClientRequest::SendChatMessage(args) => {
                assert_eq!(args.chatroom_id, 666666);
                assert_eq!(args.message, "Hello");
            }
            other => panic!("unexpected variant: {:?}", other),
        }
        assert_eq!(request.kind(), "send-chat-message");
        assert!(!request.is_edge_local());
    }

    #[test]
    fn test_subscribe_is_edge_local_and_validates_topic() {
        let request =
            ClientRequest::parse(r#"{"kind":"subscribe","args":{"topic":"Room/1/Updated"}}"#)
                .unwrap();
        assert!(request.is_edge_local());

        let err =
            ClientRequest::parse(r#"{"kind":"subscribe","args":{"topic":"not a topic"}}"#)
                .unwrap_err();
        assert!(matches!(err, ProtocolViolation::InvalidArgs { kind, .. } if kind == "subscribe"));
    }

    #[test]
    fn test_rejects_unknown_kind() {
        let err = ClientRequest::parse(r#"{"kind":"drop-table","args":{}}"#).unwrap_err();
        assert_eq!(err, ProtocolViolation::UnknownKind("drop-table".into()));
    }

    #[test]
    fn test_rejects_garbage_frame() {
        assert_eq!(
            ClientRequest::parse("not json").unwrap_err(),
            ProtocolViolation::MalformedEnvelope
        );
        assert_eq!(
            ClientRequest::parse(r#"{"args":{}}"#).unwrap_err(),
            ProtocolViolation::MalformedEnvelope
        );
    }

    #[test]
    fn test_kind_strings_stay_in_sync() {
        let request = ClientRequest::JoinRoom(RoomArgs { room_id: 9 });
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["kind"], request.kind());
        assert!(ClientRequest::KINDS.contains(&request.kind()));
    }
}
