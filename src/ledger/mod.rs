//! Storage contracts for the catalog, the seat ledger and the booking ledger.
//!
//! Reads outside a reservation go straight to the store. Everything that
//! mutates seats or bookings happens inside a [`UnitOfWork`], which holds an
//! exclusive lock on every row it touches until `commit` or `rollback`.
//! Dropping a unit of work without committing rolls it back.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Booking, Movie, NewBooking, NewMovie, NewShow, Seat, SeatGrid, Show};

#[derive(Debug, Error)]
pub enum StoreError {
    /// Waiting for a row lock took longer than the configured lock timeout.
    #[error("lock wait timed out")]
    LockTimeout,
    /// A write found a row in a state the caller had not verified.
    #[error("conflicting write: {0}")]
    Conflict(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Read-only catalog lookups.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn list_movies(&self) -> StoreResult<Vec<Movie>>;
    async fn get_movie(&self, movie_id: i64) -> StoreResult<Option<Movie>>;
    async fn list_shows_for_movie(&self, movie_id: i64) -> StoreResult<Vec<Show>>;
    async fn get_show(&self, show_id: i64) -> StoreResult<Option<Show>>;
}

/// Catalog scheduling, used by seeding and administration.
#[async_trait]
pub trait CatalogWriter: Send + Sync {
    async fn insert_movie(&self, movie: NewMovie) -> StoreResult<Movie>;
    /// Creates the show and its whole seat grid atomically.
    async fn schedule_show(&self, show: NewShow, grid: &SeatGrid) -> StoreResult<Show>;
}

#[async_trait]
pub trait SeatLedger: Send + Sync {
    /// Committed seats of a show ordered by row, then number.
    async fn list_seats(&self, show_id: i64) -> StoreResult<Vec<Seat>>;
}

#[async_trait]
pub trait BookingLedger: Send + Sync {
    /// Committed booking with the seat ids currently attributed to it.
    async fn get_booking(&self, booking_id: i64) -> StoreResult<Option<Booking>>;
}

#[async_trait]
pub trait TransactionalStore: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>>;
}

/// One atomic, isolated sequence of reads and writes.
///
/// Lock methods block until the row lock is granted, or fail with
/// [`StoreError::LockTimeout`]. Callers lock seats in ascending id order.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Takes the exclusive lock on a seat row of `show_id` and returns it as
    /// seen by this unit of work. A missing seat, or one belonging to another
    /// show, is `None` and is left unlocked.
    async fn lock_seat(&mut self, show_id: i64, seat_id: i64) -> StoreResult<Option<Seat>>;

    /// Takes the exclusive lock on a booking row.
    async fn lock_booking(&mut self, booking_id: i64) -> StoreResult<Option<Booking>>;

    async fn insert_booking(&mut self, booking: &NewBooking) -> StoreResult<Booking>;

    /// Moves locked, available seats to `booked` under `booking_id`.
    async fn assign_seats(&mut self, seat_ids: &[i64], booking_id: i64) -> StoreResult<()>;

    /// Locks the seats attributed to `booking_id` in ascending order, resets
    /// them to `available` and returns their ids.
    async fn release_seats(&mut self, booking_id: i64) -> StoreResult<Vec<i64>>;

    async fn mark_booking_cancelled(&mut self, booking_id: i64) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

/// Everything the application needs from its backing store.
pub trait Store:
    CatalogStore + CatalogWriter + SeatLedger + BookingLedger + TransactionalStore
{
}

impl<T> Store for T where
    T: CatalogStore + CatalogWriter + SeatLedger + BookingLedger + TransactionalStore
{
}
