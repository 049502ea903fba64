// Library crate for the venue seat reservation server
// This file exposes the public API for integration tests

pub mod clock;
pub mod config;
pub mod event;
pub mod seat;
pub mod shared;
pub mod websockets;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

// Re-export commonly used types for easier access in tests
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AppConfig;
pub use event::{EventBus, EventPublisher, InMemoryEventBus, SeatEvent, SeatEventKind};
pub use seat::{
    models::{SeatModel, SeatStatus},
    repository::{InMemorySeatRepository, SeatRepository},
    ExpireOutcome, ReservationService,
};
pub use shared::{AppError, AppState, ConflictReason};
pub use websockets::{
    ConnectionHub, HubSubscription, MessageHandler, OutboundMessage, SocketWrapper,
};

/// HTTP and WebSocket routes of one node
pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/seats", get(seat::list_seats))
        .route("/api/seats/select", post(seat::select_seat))
        .route("/api/seats/book", post(seat::book_seat))
        .route("/api/seats/release", post(seat::release_seat))
        .route("/ws", get(websockets::websocket_handler))
        .route("/stats", get(websockets::stats_handler))
        .route("/health", get(websockets::health_handler))
        // Browsers connect from any origin
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}
