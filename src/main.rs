use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use venue::{
    build_router,
    config::AppConfig,
    event::{EventBus, EventPublisher, InMemoryEventBus, RedisEventBus},
    seat::{
        repository::{InMemorySeatRepository, RedisSeatRepository, SeatRepository},
        start_expiry_reaper, ReservationService,
    },
    websockets::{ConnectionHub, HubSubscription},
    AppError, AppState, Clock, SystemClock,
};

/// Capacity of each in-process event fan-out channel
const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "venue=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting venue reservation server");

    let config = AppConfig::from_env();
    if let Err(e) = run(config).await {
        error!(error = %e, "Server exited with error");
        std::process::exit(1);
    }
}

async fn run(config: AppConfig) -> Result<(), AppError> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // Redis when configured, otherwise a single-node in-memory store
    let seat_repository: Arc<dyn SeatRepository>;
    let event_bus: Arc<dyn EventBus>;
    match &config.redis_url {
        Some(url) => {
            info!(redis_url = %url, "Using Redis seat store and event bus");
            seat_repository = Arc::new(RedisSeatRepository::connect(url).await?);
            event_bus = Arc::new(RedisEventBus::connect(url, EVENT_CHANNEL_CAPACITY).await?);
        }
        None => {
            warn!("REDIS_URL not set, using in-memory store (single node only)");
            seat_repository = Arc::new(InMemorySeatRepository::new(clock.clone()));
            event_bus = Arc::new(InMemoryEventBus::new(EVENT_CHANNEL_CAPACITY));
        }
    }

    let publisher = EventPublisher::new(event_bus.clone(), config.publish_policy());
    let reservation_service = Arc::new(ReservationService::new(
        seat_repository,
        publisher,
        clock,
        config.hold_ttl,
    ));

    let created = reservation_service
        .provision_venue(config.venue_rows, config.venue_cols)
        .await?;
    info!(
        rows = config.venue_rows,
        cols = config.venue_cols,
        created = created,
        "Venue provisioned"
    );

    // Realtime fan-out: bus -> hub -> sessions
    let hub = ConnectionHub::spawn(config.hub());
    let subscription_handle = HubSubscription::new(event_bus, hub.clone())
        .start()
        .await?;

    let reaper_handle = tokio::spawn(start_expiry_reaper(
        reservation_service.clone(),
        config.reaper(),
    ));

    let app_state = AppState::new(
        reservation_service,
        hub,
        config.gateway(),
        config.heartbeat(),
        config.session_buffer_capacity,
    );
    let app = build_router(app_state);

    let address = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .map_err(|e| AppError::Internal(format!("failed to bind {}: {}", address, e)))?;
    info!("Server running on http://localhost:{}", config.port);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| AppError::Internal(format!("server error: {}", e)));

    info!("HTTP server stopped, stopping background tasks");
    reaper_handle.abort();
    subscription_handle.abort();

    served
}

/// Returns on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
