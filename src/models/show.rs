use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Show {
    pub id: i64,
    pub movie_id: i64,
    pub screen: String,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    /// Flat price of a single seat.
    pub price: f64,
    /// Running time of the movie, joined in for display.
    pub duration: i32,
}

#[derive(Debug, Clone)]
pub struct NewShow {
    pub movie_id: i64,
    pub screen: String,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub price: f64,
}

/// Fixed seat layout created together with a show.
#[derive(Debug, Clone)]
pub struct SeatGrid {
    pub rows: Vec<String>,
    pub seats_per_row: i32,
}

impl SeatGrid {
    pub fn new<I, S>(rows: I, seats_per_row: i32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            rows: rows.into_iter().map(Into::into).collect(),
            seats_per_row,
        }
    }

    /// Every (row, number) pair in display order.
    pub fn positions(&self) -> impl Iterator<Item = (&str, i32)> + '_ {
        self.rows
            .iter()
            .flat_map(move |row| (1..=self.seats_per_row).map(move |n| (row.as_str(), n)))
    }

    pub fn capacity(&self) -> usize {
        self.rows.len() * self.seats_per_row.max(0) as usize
    }
}

impl Default for SeatGrid {
    /// Five rows of ten seats, A1 through E10.
    fn default() -> Self {
        Self::new(["A", "B", "C", "D", "E"], 10)
    }
}
