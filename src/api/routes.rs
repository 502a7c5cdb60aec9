use axum::{routing::get, Router};

use crate::server::AppState;

use super::health::{health, stats};
use super::metrics::prometheus_metrics;
use super::ticket::issue_ticket;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Upgrade credential
        .route("/auth/ticket", get(issue_ticket))
        // Prometheus scrape target
        .route("/metrics", get(prometheus_metrics))
        // Health & Stats
        .nest(
            "/api/v1",
            Router::new()
                .route("/health", get(health))
                .route("/stats", get(stats)),
        )
}
