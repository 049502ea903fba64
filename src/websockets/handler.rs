use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
    Json,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::gateway::SessionGateway;
use super::hub::HubSnapshot;
use super::socket::{Connection, ConnectionEnd, SocketWrapper};
use crate::shared::AppState;

/// WebSocket endpoint for realtime seat updates
/// GET /ws
pub async fn websocket_handler(ws: WebSocketUpgrade, State(app_state): State<AppState>) -> Response {
    let session_id = Uuid::new_v4().to_string();
    info!(session_id = %session_id, "WebSocket connection requested");

    ws.on_upgrade(move |socket| async move {
        run_session(Box::new(socket), session_id, app_state).await;
    })
}

/// Drives one session from registration to unregistration
///
/// Transport-neutral so tests can run it over a scripted socket.
#[instrument(skip(socket, app_state))]
pub async fn run_session(
    socket: Box<dyn SocketWrapper>,
    session_id: String,
    app_state: AppState,
) -> Option<ConnectionEnd> {
    // Create the outbound channel (hub -> client)
    let (outbound_sender, outbound_receiver) =
        mpsc::channel::<String>(app_state.session_buffer_capacity.max(1));

    let evicted = match app_state.hub.register(&session_id, outbound_sender).await {
        Ok(evicted) => evicted,
        Err(e) => {
            warn!(error = %e, "Could not register session");
            return None;
        }
    };

    let gateway = SessionGateway::new(
        session_id.clone(),
        app_state.reservation_service.clone(),
        app_state.hub.clone(),
        app_state.gateway_config.clone(),
    );

    let connection = Connection::new(
        session_id.clone(),
        socket,
        outbound_receiver,
        evicted,
        Box::new(gateway),
        app_state.heartbeat_config.clone(),
    );

    // Run the connection until disconnect
    let end = match connection.run().await {
        Ok(end) => {
            info!(end = ?end, "WebSocket connection closed");
            Some(end)
        }
        Err(e) => {
            warn!(error = ?e, "WebSocket connection error");
            None
        }
    };

    // Cleanup: an evicted session is already gone from the hub
    if let Err(e) = app_state.hub.unregister(&session_id).await {
        warn!(error = %e, "Failed to unregister session");
    }

    end
}

/// GET /stats
pub async fn stats_handler(State(app_state): State<AppState>) -> Json<HubSnapshot> {
    Json(app_state.hub.snapshot().await)
}

/// GET /health
pub async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
