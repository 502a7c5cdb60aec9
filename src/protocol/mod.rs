mod envelope;
mod request;
mod routed;
mod topic;

pub use envelope::{RawEnvelope, ServerEnvelope};
pub use request::{
    ChatMessageArgs, ClientRequest, ProtocolViolation, RoomArgs, TopicArgs, UserArgs,
};
pub use routed::{DeliveryTarget, RoutedRequest, RoutedResponse};
pub use topic::{Topic, TopicError, NS_CHATROOM, NS_ROOM, NS_USER};
