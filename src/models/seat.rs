use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeatStatus {
    Available,
    /// Transient in-transaction state; never written by this service, and
    /// treated as unavailable if found in storage.
    Reserved,
    Booked,
}

impl SeatStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatStatus::Available => "available",
            SeatStatus::Reserved => "reserved",
            SeatStatus::Booked => "booked",
        }
    }
}

impl fmt::Display for SeatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown seat status {0:?}")]
pub struct UnknownSeatStatus(pub String);

impl TryFrom<String> for SeatStatus {
    type Error = UnknownSeatStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "available" => Ok(SeatStatus::Available),
            "reserved" => Ok(SeatStatus::Reserved),
            "booked" => Ok(SeatStatus::Booked),
            _ => Err(UnknownSeatStatus(value)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Seat {
    pub id: i64,
    pub show_id: i64,
    #[sqlx(rename = "row_name")]
    pub row: String,
    pub seat_number: i32,
    #[sqlx(try_from = "String")]
    pub status: SeatStatus,
    pub booking_id: Option<i64>,
}

impl Seat {
    pub fn is_available(&self) -> bool {
        self.status == SeatStatus::Available
    }

    /// `booking_id` is set exactly when the seat is booked.
    pub fn is_consistent(&self) -> bool {
        (self.status == SeatStatus::Booked) == self.booking_id.is_some()
    }

    pub fn label(&self) -> String {
        format!("{}{}", self.row, self.seat_number)
    }
}
