use axum::{extract::State, Json};
use std::future::Future;
use tracing::{info, instrument};

use super::{
    models::SeatModel,
    types::{SeatActionRequest, SeatActionResponse},
};
use crate::shared::{AppError, AppState};

fn require_fields(request: &SeatActionRequest) -> Result<(), AppError> {
    if request.is_complete() {
        Ok(())
    } else {
        Err(AppError::InvalidRequest(
            "seat_id and user_id are required".to_string(),
        ))
    }
}

/// Runs a seat transition on its own task
///
/// A client that hangs up drops the handler future, but the transition still
/// finishes its lock, record and publish steps.
async fn run_detached<Fut>(transition: Fut) -> Result<SeatModel, AppError>
where
    Fut: Future<Output = Result<SeatModel, AppError>> + Send + 'static,
{
    tokio::spawn(transition)
        .await
        .map_err(|e| AppError::Internal(format!("seat transition aborted: {}", e)))?
}

/// HTTP handler for the full seat map
///
/// GET /api/seats
/// Returns every seat ordered by row then column
#[instrument(name = "list_seats", skip(state))]
pub async fn list_seats(State(state): State<AppState>) -> Result<Json<Vec<SeatModel>>, AppError> {
    let seats = state.reservation_service.get_snapshot().await?;
    info!(seat_count = seats.len(), "Seats listed successfully");
    Ok(Json(seats))
}

/// HTTP handler for placing a hold
///
/// POST /api/seats/select
#[instrument(name = "select_seat", skip(state))]
pub async fn select_seat(
    State(state): State<AppState>,
    Json(request): Json<SeatActionRequest>,
) -> Result<Json<SeatActionResponse>, AppError> {
    require_fields(&request)?;

    let service = state.reservation_service.clone();
    run_detached(async move {
        service
            .select_seat(&request.seat_id, &request.user_id)
            .await
    })
    .await?;

    Ok(Json(SeatActionResponse::new("Seat selected successfully")))
}

/// HTTP handler for confirming a hold
///
/// POST /api/seats/book
#[instrument(name = "book_seat", skip(state))]
pub async fn book_seat(
    State(state): State<AppState>,
    Json(request): Json<SeatActionRequest>,
) -> Result<Json<SeatActionResponse>, AppError> {
    require_fields(&request)?;

    let service = state.reservation_service.clone();
    run_detached(async move {
        service
            .confirm_book(&request.seat_id, &request.user_id)
            .await
    })
    .await?;

    Ok(Json(SeatActionResponse::new("Seat booked successfully")))
}

/// HTTP handler for giving a hold back
///
/// POST /api/seats/release
#[instrument(name = "release_seat", skip(state))]
pub async fn release_seat(
    State(state): State<AppState>,
    Json(request): Json<SeatActionRequest>,
) -> Result<Json<SeatActionResponse>, AppError> {
    require_fields(&request)?;

    let service = state.reservation_service.clone();
    run_detached(async move {
        service
            .release_hold(&request.seat_id, &request.user_id)
            .await
    })
    .await?;

    Ok(Json(SeatActionResponse::new("Seat released successfully")))
}
