//! Request routing over the bus.
//!
//! Validated client frames are published on kind-keyed channels and
//! picked up by whichever worker owns the kind. Workers answer on two
//! fixed response channels (success and error); the [`relay`] watches
//! those plus every topic channel and writes results back to live
//! connections, dropping late duplicates by correlation id. [`client`]
//! offers a synchronous-style call for code that wants an answer in
//! hand, and [`worker`] is the harness backend services build on.

pub mod channels;
pub mod client;
pub mod dispatch;
pub mod relay;
pub mod worker;

pub use channels::Channels;
pub use client::{BusRequester, RequestError};
pub use dispatch::RequestDispatcher;
pub use relay::{ResponseDedup, ResponseRelay};
pub use worker::{FnHandler, RequestHandler, RequestWorker, TopicPublisher};

use thiserror::Error;

use crate::bus::BusError;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("bus error: {0}")]
    Bus(#[from] BusError),
    #[error("payload could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}
