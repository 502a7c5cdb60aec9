//! Consumer-side library: one physical gateway socket shared by many
//! independent topic subscriptions.
//!
//! A UI surface (or any consumer) calls `subscribe(owner_id, topic,
//! callback)` on the multiplexer; the first owner of a topic triggers a
//! real subscribe frame, later owners piggyback on it, and the physical
//! unsubscribe only goes out when the last owner releases the topic.

mod multiplexer;
mod socket;

pub use multiplexer::{SubscriptionMultiplexer, SubscriptionTransport, UpdateCallback};
pub use socket::{GatewaySocket, SocketError};
