use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;

use crate::auth::Subject;
use crate::metrics::{
    FrameMetrics, ENVELOPES_SENT_TOTAL, WS_CONNECTIONS_CLOSED, WS_CONNECTIONS_OPENED,
    WS_CONNECTION_DURATION,
};
use crate::protocol::{ClientRequest, ServerEnvelope};
use crate::server::AppState;

use super::registry::{ConnectionHandle, Outbound};
use super::GatewayError;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub ticket: Option<String>,
}

/// WebSocket upgrade handler.
///
/// The upgrade is gated on a single-use connection ticket carried in
/// the query string. Validation is fail-closed: a missing, damaged,
/// expired, consumed or wrong-address ticket all yield 401 without
/// revealing which check failed.
#[tracing::instrument(
    name = "ws.upgrade",
    skip(ws, state, query, addr),
    fields(remote = %addr, has_ticket = query.ticket.is_some())
)]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    let subject = match state
        .ticket_issuer
        .validate(query.ticket.as_deref(), addr.ip())
        .await
    {
        Some(subject) => subject,
        None => {
            tracing::warn!(remote = %addr, "WebSocket upgrade rejected: ticket validation failed");
            return (StatusCode::UNAUTHORIZED, "Invalid or expired ticket").into_response();
        }
    };

    tracing::info!(user_id = %subject.id, "WebSocket upgrade requested");

    ws.on_upgrade(move |socket| handle_socket(socket, state, subject, addr))
}

/// Run an admitted connection until either side closes it.
#[tracing::instrument(
    name = "ws.connection",
    skip(socket, state, subject, addr),
    fields(
        user_id = %subject.id,
        remote = %addr,
        otel.kind = "server"
    )
)]
async fn handle_socket(socket: WebSocket, state: AppState, subject: Subject, addr: SocketAddr) {
    let admitted_at = std::time::Instant::now();
    let user_id = subject.id.clone();

    let (handle, mut outbound_rx) = state.gateway.admit(subject).await;
    let connection_id = handle.id;

    WS_CONNECTIONS_OPENED.inc();
    tracing::info!(
        connection_id = %connection_id,
        user_id = %user_id,
        "Connection admitted"
    );

    let (mut ws_sink, mut ws_stream) = socket.split();

    // Writer: drains the outbound channel onto the wire, preserving
    // per-connection ordering.
    let writer = tokio::spawn(async move {
        while let Some(out) = outbound_rx.recv().await {
            match out {
                Outbound::Envelope(envelope) => {
                    let text = match serde_json::to_string(&envelope) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to serialize envelope");
                            continue;
                        }
                    };
                    if ws_sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                    ENVELOPES_SENT_TOTAL.inc();
                }
                Outbound::Ping => {
                    if ws_sink.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = ws_sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    // Reader: processes frames in arrival order for this socket.
    let reader_state = state.clone();
    let reader_handle = handle.clone();
    let reader = tokio::spawn(async move {
        while let Some(frame) = ws_stream.next().await {
            let msg = match frame {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::debug!(error = %e, "WebSocket receive error");
                    break;
                }
            };
            if !process_message(msg, &reader_state, &reader_handle).await {
                break;
            }
        }
    });

    // Either side finishing ends the connection
    tokio::select! {
        _ = writer => tracing::debug!(connection_id = %connection_id, "Writer finished"),
        _ = reader => tracing::debug!(connection_id = %connection_id, "Reader finished"),
    }

    state.gateway.remove(connection_id).await;

    WS_CONNECTIONS_CLOSED.inc();
    let lifetime = admitted_at.elapsed().as_secs_f64();
    WS_CONNECTION_DURATION.observe(lifetime);

    tracing::info!(
        connection_id = %connection_id,
        user_id = %user_id,
        duration_secs = lifetime,
        "Connection closed"
    );
}

/// Handle one inbound frame; `false` means close the connection.
async fn process_message(msg: Message, state: &AppState, handle: &Arc<ConnectionHandle>) -> bool {
    match msg {
        Message::Text(text) => {
            // Any inbound frame counts as proof of life
            state.gateway.registry().touch(handle.id);

            // Attribution comes from the registry, never from the frame
            let Some(sender) = state.gateway.registry().lookup(handle.id) else {
                let err = GatewayError::UnverifiedConnection(handle.id);
                tracing::error!(error = %err, "Frame from unregistered connection");
                return false;
            };

            let request = match ClientRequest::parse(&text) {
                Ok(request) => request,
                Err(violation) => {
                    FrameMetrics::record_violation();
                    tracing::warn!(
                        connection_id = %handle.id,
                        error = %violation,
                        "Rejected client frame"
                    );
                    let _ = handle
                        .push(ServerEnvelope::error("error", violation.to_string()))
                        .await;
                    return true;
                }
            };

            FrameMetrics::record_kind(request.kind());
            handle_request(request, state, &sender).await;
            true
        }
        Message::Binary(_) => {
            let _ = handle
                .push(ServerEnvelope::error("error", "binary frames are not supported"))
                .await;
            true
        }
        Message::Ping(_) => {
            // Axum answers the pong; the ping still counts as liveness
            state.gateway.registry().touch(handle.id);
            true
        }
        Message::Pong(_) => {
            // Answer to a sweeper challenge
            state.gateway.registry().touch(handle.id);
            true
        }
        Message::Close(_) => {
            tracing::debug!(connection_id = %handle.id, "Received close frame");
            false
        }
    }
}

/// Handle a validated client request
#[tracing::instrument(
    name = "ws.request",
    skip(request, state, sender),
    fields(
        connection_id = %sender.id,
        user_id = %sender.subject.id,
        kind = request.kind()
    )
)]
async fn handle_request(request: ClientRequest, state: &AppState, sender: &Arc<ConnectionHandle>) {
    match request {
        // Subscriptions are resolved at the edge and never hit the bus
        ClientRequest::Subscribe(args) => {
            state.gateway.subscribe_topic(sender.id, args.topic.as_str());
            let _ = sender
                .push(ServerEnvelope::data("subscribe", json!({ "topic": args.topic })))
                .await;
        }
        ClientRequest::Unsubscribe(args) => {
            state.gateway.unsubscribe_topic(sender.id, args.topic.as_str());
            let _ = sender
                .push(ServerEnvelope::data("unsubscribe", json!({ "topic": args.topic })))
                .await;
        }
        request => {
            if let Err(e) = state.dispatcher.dispatch(&request, sender).await {
                tracing::error!(error = %e, kind = request.kind(), "Failed to publish request");
                let _ = sender
                    .push(ServerEnvelope::error(
                        request.kind(),
                        "service temporarily unavailable",
                    ))
                    .await;
            }
        }
    }
}
