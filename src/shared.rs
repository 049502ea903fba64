use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::seat::service::ReservationService;
use crate::websockets::{ConnectionHub, GatewayConfig, HeartbeatConfig};

/// Shared application state containing all dependencies
#[derive(Clone)]
pub struct AppState {
    pub reservation_service: Arc<ReservationService>,
    pub hub: ConnectionHub,
    pub gateway_config: GatewayConfig,
    pub heartbeat_config: HeartbeatConfig,
    pub session_buffer_capacity: usize,
}

impl AppState {
    pub fn new(
        reservation_service: Arc<ReservationService>,
        hub: ConnectionHub,
        gateway_config: GatewayConfig,
        heartbeat_config: HeartbeatConfig,
        session_buffer_capacity: usize,
    ) -> Self {
        Self {
            reservation_service,
            hub,
            gateway_config,
            heartbeat_config,
            session_buffer_capacity,
        }
    }
}

/// Why a hold could not be acquired
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictReason {
    /// The caller already holds the seat; holds are not renewed by re-acquiring
    AlreadyHeldByYou,
    /// `holder` is `None` when the lock lapsed between the attempt and the lookup
    HeldByOther { holder: Option<String> },
    AlreadyBooked,
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictReason::AlreadyHeldByYou => write!(f, "you already hold this seat"),
            ConflictReason::HeldByOther { .. } => {
                write!(f, "seat is already held by another user")
            }
            ConflictReason::AlreadyBooked => write!(f, "seat is already booked"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(ConflictReason),

    #[error("{0}")]
    Forbidden(String),

    #[error("Service unavailable: {0}")]
    Transient(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Only store/transport hiccups are worth retrying; every other failure
    /// is a statement about seat state and will not change on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Transient(_))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Publish(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let error_message = match self {
            AppError::NotFound(msg) | AppError::InvalidRequest(msg) => msg,
            AppError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": error_message
        }));

        (status, body).into_response()
    }
}
