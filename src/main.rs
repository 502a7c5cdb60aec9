use std::net::SocketAddr;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;

use roomcast_gateway::auth::create_ticket_store;
use roomcast_gateway::bus::create_bus;
use roomcast_gateway::config::Settings;
use roomcast_gateway::router::ResponseRelay;
use roomcast_gateway::server::{create_app, AppState};
use roomcast_gateway::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration (.env first, then files, then environment)
    let settings = Settings::new()?;

    // Initialize tracing; the guard keeps the OTLP pipeline alive
    let _telemetry = init_telemetry(&settings.otel)?;
    tracing::info!(
        bus_backend = %settings.router.backend,
        "Configuration loaded"
    );

    // Shutdown fan-out observed by the relay and the liveness sweeper
    let (shutdown_tx, _) = broadcast::channel(1);

    // Wire the state with the configured backends
    let ticket_store = create_ticket_store(&settings)?;
    let bus = create_bus(&settings)?;
    let state = AppState::new(settings.clone(), ticket_store, bus, shutdown_tx.clone())?;

    // Response relay runs for the life of the process
    let relay = ResponseRelay::new(
        state.bus.clone(),
        state.channels.clone(),
        state.gateway.clone(),
        state.settings.router.dedup_capacity,
        shutdown_tx.clone(),
    );
    let relay_handle = tokio::spawn(relay.run());

    let app = create_app(state);

    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // ConnectInfo gives the upgrade handler the remote address tickets
    // are bound to
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal_handler(shutdown_tx))
    .await?;

    tracing::info!("Draining background tasks");
    let _ = tokio::join!(relay_handle);

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal_handler(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }

    // Fan the shutdown out to the relay and sweeper
    let _ = shutdown_tx.send(());
}
