use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::ledger::StoreError;

/// Everything a booking or catalog request can fail with.
#[derive(Debug, Error)]
pub enum BookingError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("movie {0} not found")]
    MovieNotFound(i64),
    #[error("show {0} not found")]
    ShowNotFound(i64),
    #[error("seat {seat_id} not found for show {show_id}")]
    SeatNotFound { show_id: i64, seat_id: i64 },
    #[error("booking {0} not found")]
    BookingNotFound(i64),
    #[error("seat {seat_id} is not available ({status})")]
    SeatUnavailable { seat_id: i64, status: String },
    #[error("booking {0} is already cancelled")]
    AlreadyCancelled(i64),
    /// Transient; the caller may retry.
    #[error("timed out waiting for a seat lock")]
    LockTimeout,
    #[error("store failure: {0}")]
    StoreFailure(#[source] StoreError),
}

impl BookingError {
    pub fn code(&self) -> &'static str {
        match self {
            BookingError::InvalidInput(_) => "INVALID_INPUT",
            BookingError::MovieNotFound(_) => "MOVIE_NOT_FOUND",
            BookingError::ShowNotFound(_) => "SHOW_NOT_FOUND",
            BookingError::SeatNotFound { .. } => "SEAT_NOT_FOUND",
            BookingError::BookingNotFound(_) => "BOOKING_NOT_FOUND",
            BookingError::SeatUnavailable { .. } => "SEAT_UNAVAILABLE",
            BookingError::AlreadyCancelled(_) => "ALREADY_CANCELLED",
            BookingError::LockTimeout => "LOCK_TIMEOUT",
            BookingError::StoreFailure(_) => "STORE_FAILURE",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            BookingError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            BookingError::MovieNotFound(_)
            | BookingError::ShowNotFound(_)
            | BookingError::SeatNotFound { .. }
            | BookingError::BookingNotFound(_) => StatusCode::NOT_FOUND,
            BookingError::SeatUnavailable { .. } | BookingError::AlreadyCancelled(_) => {
                StatusCode::CONFLICT
            }
            BookingError::LockTimeout | BookingError::StoreFailure(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, BookingError::LockTimeout)
    }
}

impl From<StoreError> for BookingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::LockTimeout => BookingError::LockTimeout,
            other => BookingError::StoreFailure(other),
        }
    }
}

impl IntoResponse for BookingError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Store internals stay in the logs
        let message = match &self {
            BookingError::StoreFailure(e) => {
                tracing::error!("Store failure: {:?}", e);
                "internal storage error".to_string()
            }
            other => other.to_string(),
        };
        let body = Json(json!({ "error": self.code(), "message": message }));

        if self.is_retryable() {
            (status, [(header::RETRY_AFTER, "1")], body).into_response()
        } else {
            (status, body).into_response()
        }
    }
}
