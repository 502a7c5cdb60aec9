//! Health and statistics endpoints under `/api/v1`.

use std::collections::HashMap;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::metrics;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub bus: BusHealthResponse,
    pub connections: ConnectionHealthResponse,
}

#[derive(Debug, Serialize)]
pub struct BusHealthResponse {
    pub backend: String,
}

#[derive(Debug, Serialize)]
pub struct ConnectionHealthResponse {
    pub total: usize,
    pub unique_users: usize,
    pub topics_count: usize,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub connections: ConnectionStats,
    pub router: RouterStats,
}

#[derive(Debug, Serialize)]
pub struct ConnectionStats {
    pub total_connections: usize,
    pub unique_users: usize,
    pub topics: HashMap<String, usize>,
}

/// Router counters, read off the Prometheus registry so the JSON stats
/// and `/metrics` can never disagree.
#[derive(Debug, Serialize)]
pub struct RouterStats {
    pub responses_relayed_success: u64,
    pub responses_relayed_error: u64,
    pub duplicates_dropped: u64,
    pub protocol_violations: u64,
    pub topic_pushes: u64,
    pub bus_reconnects: u64,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let gateway = state.gateway.stats();

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        bus: BusHealthResponse {
            backend: state.settings.router.backend.clone(),
        },
        connections: ConnectionHealthResponse {
            total: gateway.connections,
            unique_users: gateway.users,
            topics_count: gateway.topics.len(),
        },
    })
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let gateway = state.gateway.stats();

    Json(StatsResponse {
        connections: ConnectionStats {
            total_connections: gateway.connections,
            unique_users: gateway.users,
            topics: gateway.topics,
        },
        router: RouterStats {
            responses_relayed_success: metrics::RESPONSES_RELAYED_TOTAL
                .with_label_values(&["success"])
                .get(),
            responses_relayed_error: metrics::RESPONSES_RELAYED_TOTAL
                .with_label_values(&["error"])
                .get(),
            duplicates_dropped: metrics::DUPLICATE_RESPONSES_TOTAL.get(),
            protocol_violations: metrics::PROTOCOL_VIOLATIONS_TOTAL.get(),
            topic_pushes: metrics::TOPIC_PUSHES_TOTAL.get(),
            bus_reconnects: metrics::BUS_RECONNECTS_TOTAL.get(),
        },
    })
}
