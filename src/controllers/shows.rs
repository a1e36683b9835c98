use axum::{
    extract::{rejection::PathRejection, Path, State},
    routing::get,
    Json, Router,
};
use std::sync::Arc;

use super::bad_request;
use crate::error::BookingError;
use crate::ledger::SeatLedger;
use crate::models::{Seat, Show};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/shows/{id}", get(get_show))
        .route("/shows/{id}/seats", get(get_seats))
}

async fn find_show(state: &AppState, path: Result<Path<i64>, PathRejection>) -> Result<Show, BookingError> {
    let Path(show_id) = path.map_err(bad_request)?;
    state
        .cache
        .show(show_id)
        .await?
        .ok_or(BookingError::ShowNotFound(show_id))
}

// GET /api/shows/{id}
async fn get_show(
    State(state): State<Arc<AppState>>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<Show>, BookingError> {
    find_show(&state, path).await.map(Json)
}

// GET /api/shows/{id}/seats
// Always read from the ledger, never from cache: status changes with every booking
async fn get_seats(
    State(state): State<Arc<AppState>>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<Vec<Seat>>, BookingError> {
    let show = find_show(&state, path).await?;
    let seats = state.store.list_seats(show.id).await?;
    tracing::debug!("Found {} seats for show {}", seats.len(), show.id);
    Ok(Json(seats))
}
