use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::bus::{BusError, BusSubscription, MessageBus};
use crate::metrics::REQUEST_ROUNDTRIP_SECONDS;
use crate::protocol::{RoutedRequest, RoutedResponse};

use super::channels::Channels;

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request timed out after {0:?}")]
    TimedOut(Duration),
    #[error("bus connection failed: {0}")]
    Connection(#[from] BusError),
    #[error("request could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("malformed response on {channel}: {detail}")]
    MalformedResponse { channel: String, detail: String },
}

/// Request/response call over the bus for callers that want an answer
/// inline instead of a connection to relay to.
///
/// Each call opens a short-lived subscription on the two response
/// channels, publishes the request, then races the first response whose
/// kind matches against the timeout. The subscription is dropped on
/// every exit path, so nothing keeps listening after the call returns.
/// Responses are matched by kind, not correlation id: two concurrent
/// calls for the same kind can steal each other's answer, which is
/// acceptable for the administrative calls this exists for.
pub struct BusRequester {
    bus: Arc<dyn MessageBus>,
    channels: Channels,
    timeout: Duration,
}

impl BusRequester {
    pub fn new(bus: Arc<dyn MessageBus>, channels: Channels, timeout: Duration) -> Self {
        Self {
            bus,
            channels,
            timeout,
        }
    }

    /// Publish a request and wait for a matching-kind response.
    ///
    /// A worker's business failure is an `Ok` response carrying the
    /// error field; `Err` means the call itself failed.
    #[tracing::instrument(name = "router.request", skip(self, args), fields(kind = %kind, from = %from))]
    pub async fn request(
        &self,
        from: &str,
        kind: &str,
        args: Value,
    ) -> Result<RoutedResponse, RequestError> {
        // Subscribe before publishing so a fast worker cannot answer
        // into a channel nobody is listening on yet.
        let mut subscription = self
            .bus
            .subscribe(&[self.channels.success(), self.channels.error()], &[])
            .await?;

        let request = RoutedRequest::new(from, Uuid::new_v4(), kind, args);
        let payload = serde_json::to_string(&request)?;
        self.bus
            .publish(&self.channels.request(kind), &payload)
            .await?;
        tracing::debug!(request_id = %request.id, "Published inline request");

        let started = Instant::now();
        let response = tokio::time::timeout(self.timeout, self.await_response(&mut subscription, kind))
            .await
            .map_err(|_| RequestError::TimedOut(self.timeout))??;

        REQUEST_ROUNDTRIP_SECONDS.observe(started.elapsed().as_secs_f64());
        Ok(response)
    }

    async fn await_response(
        &self,
        subscription: &mut BusSubscription,
        kind: &str,
    ) -> Result<RoutedResponse, RequestError> {
        loop {
            let message = subscription
                .next()
                .await
                .ok_or(RequestError::Connection(BusError::Closed))?;

            let response: RoutedResponse = serde_json::from_str(&message.payload).map_err(|e| {
                RequestError::MalformedResponse {
                    channel: message.channel.clone(),
                    detail: e.to_string(),
                }
            })?;

            if response.kind == kind {
                return Ok(response);
            }
            // Someone else's response; keep waiting for ours
            tracing::trace!(kind = %response.kind, "Skipping unrelated response");
        }
    }
}
