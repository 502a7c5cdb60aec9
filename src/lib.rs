// Infrastructure layer (shared components)
pub mod config;
pub mod error;
pub mod metrics;
pub mod telemetry;

// Domain layer (connection + routing logic)
pub mod auth;
pub mod bus;
pub mod gateway;
pub mod protocol;
pub mod router;

// Application layer
pub mod api;
pub mod client;
pub mod server;
