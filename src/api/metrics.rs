//! Prometheus scrape endpoint.

use axum::{extract::State, http::header::CONTENT_TYPE, http::StatusCode, response::IntoResponse};

use crate::metrics;
use crate::server::AppState;

const TEXT_FORMAT: &str = "text/plain; version=0.0.4; charset=utf-8";

/// GET /metrics - Prometheus text exposition
pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    refresh_gauges(&state);

    match metrics::encode_metrics() {
        Ok(body) => (StatusCode::OK, [(CONTENT_TYPE, TEXT_FORMAT)], body),
        Err(e) => {
            tracing::error!(error = %e, "Metrics encoding failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(CONTENT_TYPE, "text/plain")],
                format!("metrics encoding failed: {}", e),
            )
        }
    }
}

/// Re-derive the gauges from the registry before scraping so they can
/// never drift from the source of truth.
fn refresh_gauges(state: &AppState) {
    let gateway = state.gateway.stats();
    metrics::ACTIVE_CONNECTIONS.set(gateway.connections as i64);
    metrics::USERS_CONNECTED.set(gateway.users as i64);
    metrics::TOPICS_ACTIVE.set(gateway.topics.len() as i64);
}
