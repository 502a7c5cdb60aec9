use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Namespace for per-room live updates (`Room/{id}/{event}`).
pub const NS_ROOM: &str = "Room";
/// Namespace for chatroom feeds.
pub const NS_CHATROOM: &str = "Chatroom";
/// Namespace for per-user streams.
pub const NS_USER: &str = "User";

const MAX_TOPIC_LEN: usize = 128;

/// A validated live-update stream key: `Namespace/EntityId/Event`,
/// e.g. `Room/42/Updated`. Each entity gets its own stream so clients
/// subscribe to exactly the entities they care about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Topic(String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopicError {
    #[error("topic must have exactly three non-empty segments")]
    Shape,
    #[error("topic contains invalid characters")]
    Charset,
    #[error("topic exceeds {MAX_TOPIC_LEN} bytes")]
    TooLong,
}

impl Topic {
    /// Build a topic from its parts. The entity id is stringified, so
    /// numeric and string ids both work.
    pub fn new(
        namespace: &str,
        entity_id: impl fmt::Display,
        event: &str,
    ) -> Result<Self, TopicError> {
        Self::parse(&format!("{}/{}/{}", namespace, entity_id, event))
    }

    /// Validate a raw topic string received off the wire.
    pub fn parse(raw: &str) -> Result<Self, TopicError> {
        if raw.len() > MAX_TOPIC_LEN {
            return Err(TopicError::TooLong);
        }
        let segments: Vec<&str> = raw.split('/').collect();
        if segments.len() != 3 || segments.iter().any(|s| s.is_empty()) {
            return Err(TopicError::Shape);
        }
        let valid = segments
            .iter()
            .flat_map(|s| s.chars())
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(TopicError::Charset);
        }
        Ok(Topic(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn namespace(&self) -> &str {
        // parse() guarantees three segments
        self.0.split('/').next().unwrap_or_default()
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Topic {
    type Error = TopicError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Topic::parse(&value)
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.0
    }
}
