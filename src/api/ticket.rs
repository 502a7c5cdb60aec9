//! Ticket issuance endpoint: trades an authenticated session for a
//! single-use WebSocket upgrade credential.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, State},
    http::{header, HeaderMap},
    Json,
};
use serde::Serialize;

use crate::auth::Subject;
use crate::error::AppError;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct TicketResponse {
    pub ticket: String,
}

/// GET /auth/ticket - issue an upgrade ticket bound to the caller's
/// address. Requires a valid JWT bearer session; denylisted subjects
/// get a 403. The ticket is only usable once, only from this address,
/// and only within its TTL.
#[tracing::instrument(name = "api.ticket", skip(state, headers, addr), fields(remote = %addr))]
pub async fn issue_ticket(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Json<TicketResponse>, AppError> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let claims = state.jwt_validator.validate_bearer(bearer)?;
    let subject = Subject::from(&claims);

    tracing::debug!(user_id = %subject.id, "Issuing upgrade ticket");
    let ticket = state.ticket_issuer.issue(subject, addr.ip()).await?;
    Ok(Json(TicketResponse { ticket }))
}
