use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::Validate;

use crate::error::BookingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown booking status {0:?}")]
pub struct UnknownBookingStatus(pub String);

impl TryFrom<String> for BookingStatus {
    type Error = UnknownBookingStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "confirmed" => Ok(BookingStatus::Confirmed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            _ => Err(UnknownBookingStatus(value)),
        }
    }
}

/// Who asked for the seats.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Requester {
    pub user_id: Option<i64>,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
}

impl Requester {
    pub fn named(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            user_id: None,
            user_name: Some(name.into()),
            user_email: Some(email.into()),
        }
    }

    pub fn user(user_id: i64) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: i64,
    pub show_id: i64,
    pub user_id: Option<i64>,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
    /// Seats currently attributed to the booking, ascending.
    pub seat_ids: Vec<i64>,
    pub total_amount: f64,
    pub booking_time: DateTime<Utc>,
    pub status: BookingStatus,
}

/// Row written by the coordinator inside a reservation unit of work.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub show_id: i64,
    pub requester: Requester,
    pub total_amount: f64,
}

impl NewBooking {
    /// Flat per-seat price times seat count, in whole cents.
    pub fn total_for(price: f64, seat_count: usize) -> f64 {
        let cents = (price * 100.0).round() * seat_count as f64;
        cents.round() / 100.0
    }
}

/// Validated input of `ReservationCoordinator::reserve`.
#[derive(Debug, Clone)]
pub struct ReserveCommand {
    pub show_id: i64,
    pub seat_ids: Vec<i64>,
    pub requester: Requester,
}

// POST /api/bookings body
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct BookingRequest {
    #[validate(range(min = 1, message = "show_id must be > 0"))]
    pub show_id: i64,
    #[validate(length(min = 1, message = "seat_ids must not be empty"))]
    pub seat_ids: Vec<i64>,
    pub user_id: Option<i64>,
    #[validate(length(min = 1, max = 255, message = "user_name must be 1..=255 characters"))]
    pub user_name: Option<String>,
    #[validate(email(message = "user_email must be a valid address"))]
    pub user_email: Option<String>,
}

impl BookingRequest {
    pub fn into_command(self) -> Result<ReserveCommand, BookingError> {
        self.validate()
            .map_err(|e| BookingError::InvalidInput(e.to_string()))?;

        let user_name = self
            .user_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        if self.user_id.is_none() && user_name.is_none() {
            return Err(BookingError::InvalidInput(
                "either user_id or user_name is required".to_string(),
            ));
        }
        if matches!(self.user_id, Some(id) if id <= 0) {
            return Err(BookingError::InvalidInput("user_id must be > 0".to_string()));
        }

        Ok(ReserveCommand {
            show_id: self.show_id,
            seat_ids: self.seat_ids,
            requester: Requester {
                user_id: self.user_id,
                user_name,
                user_email: self.user_email.map(|e| e.trim().to_string()),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(body: serde_json::Value) -> Result<ReserveCommand, BookingError> {
        let req: BookingRequest = serde_json::from_value(body)
            .map_err(|e| BookingError::InvalidInput(e.to_string()))?;
        req.into_command()
    }

    #[test]
    fn total_is_price_times_seats_in_cents() {
        assert_eq!(NewBooking::total_for(12.99, 3), 38.97);
        assert_eq!(NewBooking::total_for(14.99, 1), 14.99);
        assert_eq!(NewBooking::total_for(0.1, 3), 0.3);
    }

    #[test]
    fn named_requester_is_accepted() {
        let cmd = parse(json!({
            "show_id": 1,
            "seat_ids": [3, 1, 2],
            "user_name": "  Ada Lovelace ",
            "user_email": "ada@example.com"
        }))
        .unwrap();

        assert_eq!(cmd.show_id, 1);
        assert_eq!(cmd.seat_ids, vec![3, 1, 2]);
        assert_eq!(cmd.requester.user_name.as_deref(), Some("Ada Lovelace"));
    }

    #[test]
    fn user_id_alone_is_enough() {
        let cmd = parse(json!({"show_id": 1, "seat_ids": [1], "user_id": 7})).unwrap();
        assert_eq!(cmd.requester, Requester::user(7));
    }

    #[test]
    fn empty_seat_list_is_invalid() {
        let err = parse(json!({"show_id": 1, "seat_ids": [], "user_id": 7})).unwrap_err();
        assert!(matches!(err, BookingError::InvalidInput(_)));
    }

    #[test]
    fn missing_identity_is_invalid() {
        let err = parse(json!({"show_id": 1, "seat_ids": [1], "user_name": "   "})).unwrap_err();
        assert!(matches!(err, BookingError::InvalidInput(_)));
    }

    #[test]
    fn bad_email_is_invalid() {
        let err = parse(json!({
            "show_id": 1,
            "seat_ids": [1],
            "user_name": "Ada",
            "user_email": "not-an-email"
        }))
        .unwrap_err();
        assert!(matches!(err, BookingError::InvalidInput(_)));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = parse(json!({
            "show_id": 1,
            "seat_ids": [1],
            "user_id": 7,
            "discount": 100
        }))
        .unwrap_err();
        assert!(matches!(err, BookingError::InvalidInput(_)));
    }
}
