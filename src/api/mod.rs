//! HTTP surface: ticket issuance, health, stats, metrics.

mod health;
mod metrics;
mod routes;
mod ticket;

pub use health::{health, stats, HealthResponse, StatsResponse};
pub use metrics::prometheus_metrics;
pub use routes::api_routes;
pub use ticket::{issue_ticket, TicketResponse};
