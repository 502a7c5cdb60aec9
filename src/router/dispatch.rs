use std::sync::Arc;

use uuid::Uuid;

use crate::bus::MessageBus;
use crate::gateway::ConnectionHandle;
use crate::metrics;
use crate::protocol::{ClientRequest, RoutedRequest};

use super::channels::Channels;
use super::RouterError;

/// Publishes validated client requests on their kind channels.
///
/// The routed frame carries the identity the registry resolved for the
/// sending connection, so workers never see self-claimed identities.
pub struct RequestDispatcher {
    bus: Arc<dyn MessageBus>,
    channels: Channels,
}

impl RequestDispatcher {
    pub fn new(bus: Arc<dyn MessageBus>, channels: Channels) -> Self {
        Self { bus, channels }
    }

    /// Republish a client request on the bus, returning its correlation id.
    #[tracing::instrument(
        name = "router.dispatch",
        skip(self, request, sender),
        fields(kind = request.kind(), connection_id = %sender.id)
    )]
    pub async fn dispatch(
        &self,
        request: &ClientRequest,
        sender: &ConnectionHandle,
    ) -> Result<Uuid, RouterError> {
        let routed = RoutedRequest::new(
            sender.subject.id.clone(),
            sender.id,
            request.kind(),
            request.args(),
        );
        self.publish(&routed).await?;
        Ok(routed.id)
    }

    /// Publish an already-built routed request.
    pub async fn publish(&self, routed: &RoutedRequest) -> Result<(), RouterError> {
        let payload = serde_json::to_string(routed)?;
        self.bus
            .publish(&self.channels.request(&routed.kind), &payload)
            .await?;

        metrics::REQUESTS_DISPATCHED_TOTAL
            .with_label_values(&[routed.kind.as_str()])
            .inc();
        tracing::debug!(
            request_id = %routed.id,
            kind = %routed.kind,
            from = %routed.from,
            "Request published"
        );
        Ok(())
    }
}
