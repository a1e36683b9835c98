pub mod movies;
pub mod shows;
pub mod bookings;

use axum::Router;
use std::sync::Arc;

use crate::error::BookingError;

pub fn routes() -> Router<Arc<crate::AppState>> {
    Router::new()
        .merge(movies::routes())
        .merge(shows::routes())
        .merge(bookings::routes())
}

/// Malformed paths, queries and bodies are all plain 400s.
pub(crate) fn bad_request(rejection: impl std::fmt::Display) -> BookingError {
    BookingError::InvalidInput(rejection.to_string())
}
