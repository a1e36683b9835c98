use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    routing::{get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;

use super::bad_request;
use crate::error::BookingError;
use crate::ledger::BookingLedger;
use crate::models::{Booking, BookingRequest};
use crate::services::reservation::Cancellation;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/bookings", post(create_booking))
        .route("/bookings/cancel", patch(cancel_booking))
        .route("/bookings/{id}", get(get_booking))
}

/* ---------- BOOKINGS ---------- */

// POST /api/bookings
async fn create_booking(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<BookingRequest>, JsonRejection>,
) -> Result<Json<Booking>, BookingError> {
    let Json(req) = payload.map_err(bad_request)?;
    tracing::info!("Booking request: show {}, seats {:?}", req.show_id, req.seat_ids);

    let cmd = req.into_command()?;
    let booking = state.coordinator.reserve(cmd).await?;
    Ok(Json(booking))
}

// GET /api/bookings/{id}
async fn get_booking(
    State(state): State<Arc<AppState>>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<Booking>, BookingError> {
    let Path(booking_id) = path.map_err(bad_request)?;
    state
        .store
        .get_booking(booking_id)
        .await?
        .map(Json)
        .ok_or(BookingError::BookingNotFound(booking_id))
}

// PATCH /api/bookings/cancel
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CancelBookingRequest {
    booking_id: i64,
}

async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CancelBookingRequest>, JsonRejection>,
) -> Result<Json<Cancellation>, BookingError> {
    let Json(req) = payload.map_err(bad_request)?;
    let cancellation = state.coordinator.cancel(req.booking_id).await?;
    Ok(Json(cancellation))
}
