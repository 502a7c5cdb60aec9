use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;

use crate::auth::{JwtValidator, TicketError, TicketIssuer, TicketStore};
use crate::bus::MessageBus;
use crate::config::Settings;
use crate::gateway::Gateway;
use crate::router::{Channels, RequestDispatcher};

/// Everything the HTTP and WebSocket handlers share. The backends are
/// injected so the composition root (or a test) picks memory vs Redis.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub jwt_validator: Arc<JwtValidator>,
    pub ticket_issuer: Arc<TicketIssuer>,
    pub gateway: Arc<Gateway>,
    pub dispatcher: Arc<RequestDispatcher>,
    pub bus: Arc<dyn MessageBus>,
    pub channels: Channels,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        settings: Settings,
        ticket_store: Arc<dyn TicketStore>,
        bus: Arc<dyn MessageBus>,
        shutdown: broadcast::Sender<()>,
    ) -> Result<Self, TicketError> {
        let jwt_validator = Arc::new(JwtValidator::new(&settings.jwt));
        let ticket_issuer = Arc::new(TicketIssuer::new(&settings.ticket, ticket_store)?);
        let gateway = Arc::new(Gateway::new(&settings.gateway, shutdown));
        let channels = Channels::new(settings.redis.namespace.clone());
        let dispatcher = Arc::new(RequestDispatcher::new(bus.clone(), channels.clone()));

        Ok(Self {
            settings: Arc::new(settings),
            jwt_validator,
            ticket_issuer,
            gateway,
            dispatcher,
            bus,
            channels,
            started_at: Instant::now(),
        })
    }
}
