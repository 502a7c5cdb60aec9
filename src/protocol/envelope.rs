use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A client frame as it arrives, before the kind vocabulary is checked.
/// Parsing this first lets error replies echo the kind the client sent.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEnvelope {
    pub kind: String,
    #[serde(default)]
    pub args: Value,
}

/// Frame sent from server to client: a response or a topic push.
/// Exactly one of `data` / `error` is set on responses; topic pushes
/// carry `data` with the topic string as `kind`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerEnvelope {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServerEnvelope {
    pub fn data(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data: Some(data),
            error: None,
        }
    }

    pub fn error(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            data: None,
            error: Some(message.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
