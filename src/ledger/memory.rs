//! In-process store with the same locking contract as the Postgres one.
//!
//! Committed rows live behind a single `parking_lot` mutex that is only held
//! for short, non-async sections. Row locks are per-row `tokio` mutexes,
//! taken with a timeout and kept by the unit of work until it ends. Writes are
//! staged in the unit of work and applied in one step on commit, so other
//! readers only ever see committed state.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as RowMutex, OwnedMutexGuard};

use super::{
    BookingLedger, CatalogStore, CatalogWriter, SeatLedger, StoreError, StoreResult,
    TransactionalStore, UnitOfWork,
};
use crate::models::{
    Booking, BookingStatus, Movie, NewBooking, NewMovie, NewShow, Seat, SeatGrid, SeatStatus,
    Show,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RowKey {
    Seat(i64),
    Booking(i64),
}

/// Points where a unit of work can be told to fail, for exercising rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    InsertBooking,
    AssignSeats,
    Commit,
}

#[derive(Default)]
struct Tables {
    movies: BTreeMap<i64, Movie>,
    shows: BTreeMap<i64, Show>,
    seats: BTreeMap<i64, Seat>,
    bookings: BTreeMap<i64, Booking>,
    next_movie_id: i64,
    next_show_id: i64,
    next_seat_id: i64,
    next_booking_id: i64,
}

impl Tables {
    fn next_id(counter: &mut i64) -> i64 {
        *counter += 1;
        *counter
    }

    fn seat_ids_of(&self, booking_id: i64) -> Vec<i64> {
        self.seats
            .values()
            .filter(|s| s.booking_id == Some(booking_id))
            .map(|s| s.id)
            .collect()
    }

    fn booking_with_seats(&self, booking_id: i64) -> Option<Booking> {
        self.bookings.get(&booking_id).map(|b| Booking {
            seat_ids: self.seat_ids_of(booking_id),
            ..b.clone()
        })
    }
}

struct Inner {
    tables: Mutex<Tables>,
    row_locks: Mutex<HashMap<RowKey, Arc<RowMutex<()>>>>,
    fail_points: Mutex<Vec<FailPoint>>,
    lock_timeout: Duration,
}

#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                tables: Mutex::new(Tables::default()),
                row_locks: Mutex::new(HashMap::new()),
                fail_points: Mutex::new(Vec::new()),
                lock_timeout,
            }),
        }
    }

    /// Makes the next unit of work that reaches `point` fail there with a
    /// backend error. Each call arms a single failure.
    pub fn fail_once(&self, point: FailPoint) {
        self.inner.fail_points.lock().push(point);
    }

    fn trip(&self, point: FailPoint) -> StoreResult<()> {
        let mut points = self.inner.fail_points.lock();
        match points.iter().position(|p| *p == point) {
            Some(idx) => {
                points.remove(idx);
                Err(StoreError::Backend(format!("injected failure at {point:?}")))
            }
            None => Ok(()),
        }
    }

    fn row_lock(&self, key: RowKey) -> Arc<RowMutex<()>> {
        self.inner
            .row_locks
            .lock()
            .entry(key)
            .or_insert_with(|| Arc::new(RowMutex::new(())))
            .clone()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn list_movies(&self) -> StoreResult<Vec<Movie>> {
        Ok(self.inner.tables.lock().movies.values().cloned().collect())
    }

    async fn get_movie(&self, movie_id: i64) -> StoreResult<Option<Movie>> {
        Ok(self.inner.tables.lock().movies.get(&movie_id).cloned())
    }

    async fn list_shows_for_movie(&self, movie_id: i64) -> StoreResult<Vec<Show>> {
        let tables = self.inner.tables.lock();
        let mut shows: Vec<Show> = tables
            .shows
            .values()
            .filter(|s| s.movie_id == movie_id)
            .cloned()
            .collect();
        shows.sort_by_key(|s| (s.start_time, s.id));
        Ok(shows)
    }

    async fn get_show(&self, show_id: i64) -> StoreResult<Option<Show>> {
        Ok(self.inner.tables.lock().shows.get(&show_id).cloned())
    }
}

#[async_trait]
impl CatalogWriter for MemoryStore {
    async fn insert_movie(&self, movie: NewMovie) -> StoreResult<Movie> {
        let mut tables = self.inner.tables.lock();
        let id = Tables::next_id(&mut tables.next_movie_id);
        let movie = Movie {
            id,
            title: movie.title,
            description: movie.description,
            duration: movie.duration,
            rating: movie.rating,
            poster_url: movie.poster_url,
        };
        tables.movies.insert(id, movie.clone());
        Ok(movie)
    }

    async fn schedule_show(&self, show: NewShow, grid: &SeatGrid) -> StoreResult<Show> {
        let mut tables = self.inner.tables.lock();
        let duration = tables
            .movies
            .get(&show.movie_id)
            .map(|m| m.duration)
            .ok_or_else(|| StoreError::Backend(format!("movie {} does not exist", show.movie_id)))?;

        let id = Tables::next_id(&mut tables.next_show_id);
        let created = Show {
            id,
            movie_id: show.movie_id,
            screen: show.screen,
            start_time: show.start_time,
            end_time: show.end_time,
            price: show.price,
            duration,
        };
        tables.shows.insert(id, created.clone());

        for (row, number) in grid.positions() {
            let seat_id = Tables::next_id(&mut tables.next_seat_id);
            tables.seats.insert(
                seat_id,
                Seat {
                    id: seat_id,
                    show_id: id,
                    row: row.to_string(),
                    seat_number: number,
                    status: SeatStatus::Available,
                    booking_id: None,
                },
            );
        }
        Ok(created)
    }
}

#[async_trait]
impl SeatLedger for MemoryStore {
    async fn list_seats(&self, show_id: i64) -> StoreResult<Vec<Seat>> {
        let tables = self.inner.tables.lock();
        let mut seats: Vec<Seat> = tables
            .seats
            .values()
            .filter(|s| s.show_id == show_id)
            .cloned()
            .collect();
        seats.sort_by(|a, b| (&a.row, a.seat_number).cmp(&(&b.row, b.seat_number)));
        Ok(seats)
    }
}

#[async_trait]
impl BookingLedger for MemoryStore {
    async fn get_booking(&self, booking_id: i64) -> StoreResult<Option<Booking>> {
        Ok(self.inner.tables.lock().booking_with_seats(booking_id))
    }
}

#[async_trait]
impl TransactionalStore for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        Ok(Box::new(MemoryUnitOfWork {
            store: self.clone(),
            held: HashMap::new(),
            seat_writes: BTreeMap::new(),
            booking_writes: BTreeMap::new(),
        }))
    }
}

pub struct MemoryUnitOfWork {
    store: MemoryStore,
    held: HashMap<RowKey, OwnedMutexGuard<()>>,
    seat_writes: BTreeMap<i64, Seat>,
    booking_writes: BTreeMap<i64, Booking>,
}

impl MemoryUnitOfWork {
    async fn acquire(&mut self, key: RowKey) -> StoreResult<()> {
        if self.held.contains_key(&key) {
            return Ok(());
        }
        let lock = self.store.row_lock(key);
        let guard = tokio::time::timeout(self.store.inner.lock_timeout, lock.lock_owned())
            .await
            .map_err(|_| StoreError::LockTimeout)?;
        self.held.insert(key, guard);
        Ok(())
    }

    /// The seat as this unit of work sees it: staged write first, then committed row.
    fn current_seat(&self, seat_id: i64) -> Option<Seat> {
        self.seat_writes
            .get(&seat_id)
            .cloned()
            .or_else(|| self.store.inner.tables.lock().seats.get(&seat_id).cloned())
    }

    fn current_booking(&self, booking_id: i64) -> Option<Booking> {
        self.booking_writes
            .get(&booking_id)
            .cloned()
            .or_else(|| self.store.inner.tables.lock().bookings.get(&booking_id).cloned())
    }

    /// Seats attributed to a booking, staged writes included.
    fn attributed_seats(&self, booking_id: i64) -> Vec<i64> {
        let mut ids = self.store.inner.tables.lock().seat_ids_of(booking_id);
        ids.retain(|id| {
            self.seat_writes
                .get(id)
                .map_or(true, |s| s.booking_id == Some(booking_id))
        });
        for seat in self.seat_writes.values() {
            if seat.booking_id == Some(booking_id) && !ids.contains(&seat.id) {
                ids.push(seat.id);
            }
        }
        ids.sort_unstable();
        ids
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn lock_seat(&mut self, show_id: i64, seat_id: i64) -> StoreResult<Option<Seat>> {
        // A seat never changes show, so the committed row decides membership
        let in_show = self
            .store
            .inner
            .tables
            .lock()
            .seats
            .get(&seat_id)
            .is_some_and(|s| s.show_id == show_id);
        if !in_show {
            return Ok(None);
        }
        self.acquire(RowKey::Seat(seat_id)).await?;
        Ok(self.current_seat(seat_id))
    }

    async fn lock_booking(&mut self, booking_id: i64) -> StoreResult<Option<Booking>> {
        self.acquire(RowKey::Booking(booking_id)).await?;
        let seat_ids = self.attributed_seats(booking_id);
        Ok(self
            .current_booking(booking_id)
            .map(|b| Booking { seat_ids, ..b }))
    }

    async fn insert_booking(&mut self, booking: &NewBooking) -> StoreResult<Booking> {
        self.store.trip(FailPoint::InsertBooking)?;

        let id = {
            let mut tables = self.store.inner.tables.lock();
            if !tables.shows.contains_key(&booking.show_id) {
                return Err(StoreError::Backend(format!(
                    "show {} does not exist",
                    booking.show_id
                )));
            }
            Tables::next_id(&mut tables.next_booking_id)
        };
        // New rows are locked by their creator, as in Postgres
        self.acquire(RowKey::Booking(id)).await?;

        let created = Booking {
            id,
            show_id: booking.show_id,
            user_id: booking.requester.user_id,
            user_name: booking.requester.user_name.clone(),
            user_email: booking.requester.user_email.clone(),
            seat_ids: Vec::new(),
            total_amount: booking.total_amount,
            booking_time: Utc::now(),
            status: BookingStatus::Confirmed,
        };
        self.booking_writes.insert(id, created.clone());
        Ok(created)
    }

    async fn assign_seats(&mut self, seat_ids: &[i64], booking_id: i64) -> StoreResult<()> {
        self.store.trip(FailPoint::AssignSeats)?;

        let mut staged = Vec::with_capacity(seat_ids.len());
        for &seat_id in seat_ids {
            if !self.held.contains_key(&RowKey::Seat(seat_id)) {
                return Err(StoreError::Conflict(format!("seat {seat_id} is not locked")));
            }
            let mut seat = self
                .current_seat(seat_id)
                .ok_or_else(|| StoreError::Conflict(format!("seat {seat_id} vanished")))?;
            if !seat.is_available() {
                return Err(StoreError::Conflict(format!(
                    "seat {seat_id} is {}",
                    seat.status
                )));
            }
            seat.status = SeatStatus::Booked;
            seat.booking_id = Some(booking_id);
            staged.push(seat);
        }
        for seat in staged {
            self.seat_writes.insert(seat.id, seat);
        }
        Ok(())
    }

    async fn release_seats(&mut self, booking_id: i64) -> StoreResult<Vec<i64>> {
        let candidates = self.attributed_seats(booking_id);
        let mut released = Vec::with_capacity(candidates.len());

        for seat_id in candidates {
            self.acquire(RowKey::Seat(seat_id)).await?;
            // Re-read under the lock
            if let Some(mut seat) = self.current_seat(seat_id) {
                if seat.booking_id == Some(booking_id) {
                    seat.status = SeatStatus::Available;
                    seat.booking_id = None;
                    self.seat_writes.insert(seat_id, seat);
                    released.push(seat_id);
                }
            }
        }
        Ok(released)
    }

    async fn mark_booking_cancelled(&mut self, booking_id: i64) -> StoreResult<()> {
        self.acquire(RowKey::Booking(booking_id)).await?;
        let mut booking = self
            .current_booking(booking_id)
            .ok_or_else(|| StoreError::Conflict(format!("booking {booking_id} vanished")))?;
        booking.status = BookingStatus::Cancelled;
        self.booking_writes.insert(booking_id, booking);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.store.trip(FailPoint::Commit)?;

        let mut this = *self;
        {
            let mut tables = this.store.inner.tables.lock();
            for (id, booking) in std::mem::take(&mut this.booking_writes) {
                tables.bookings.insert(id, Booking { seat_ids: Vec::new(), ..booking });
            }
            for (id, seat) in std::mem::take(&mut this.seat_writes) {
                tables.seats.insert(id, seat);
            }
        }
        // Row locks are released only after the writes are visible
        drop(this);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        drop(self);
        Ok(())
    }
}

impl Drop for MemoryUnitOfWork {
    fn drop(&mut self) {
        let keys: Vec<RowKey> = self.held.keys().copied().collect();
        self.held.clear();

        // Forget row locks nobody holds or waits on
        let mut locks = self.store.inner.row_locks.lock();
        for key in keys {
            if locks.get(&key).is_some_and(|m| Arc::strong_count(m) == 1) {
                locks.remove(&key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Requester;
    use chrono::NaiveDate;

    async fn store_with_show() -> (MemoryStore, Show) {
        let store = MemoryStore::new(Duration::from_millis(100));
        let movie = store
            .insert_movie(NewMovie {
                title: "Inception".into(),
                description: String::new(),
                duration: 148,
                rating: "PG-13".into(),
                poster_url: String::new(),
            })
            .await
            .unwrap();
        let start = NaiveDate::from_ymd_opt(2024, 3, 20)
            .unwrap()
            .and_hms_opt(15, 0, 0)
            .unwrap();
        let show = store
            .schedule_show(
                NewShow {
                    movie_id: movie.id,
                    screen: "Screen 1".into(),
                    start_time: start,
                    end_time: start + chrono::Duration::minutes(148),
                    price: 12.99,
                },
                &SeatGrid::new(["A"], 4),
            )
            .await
            .unwrap();
        (store, show)
    }

    fn new_booking(show_id: i64) -> NewBooking {
        NewBooking {
            show_id,
            requester: Requester::user(1),
            total_amount: 12.99,
        }
    }

    #[tokio::test]
    async fn staged_writes_are_invisible_until_commit() {
        let (store, show) = store_with_show().await;
        let seat_id = store.list_seats(show.id).await.unwrap()[0].id;

        let mut uow = store.begin().await.unwrap();
        uow.lock_seat(show.id, seat_id).await.unwrap();
        let booking = uow.insert_booking(&new_booking(show.id)).await.unwrap();
        uow.assign_seats(&[seat_id], booking.id).await.unwrap();

        let outside = store.list_seats(show.id).await.unwrap();
        assert_eq!(outside[0].status, SeatStatus::Available);
        assert!(store.get_booking(booking.id).await.unwrap().is_none());

        uow.commit().await.unwrap();

        let after = store.list_seats(show.id).await.unwrap();
        assert_eq!(after[0].status, SeatStatus::Booked);
        assert_eq!(after[0].booking_id, Some(booking.id));
        let stored = store.get_booking(booking.id).await.unwrap().unwrap();
        assert_eq!(stored.seat_ids, vec![seat_id]);
    }

    #[tokio::test]
    async fn dropped_unit_of_work_releases_locks_and_discards_writes() {
        let (store, show) = store_with_show().await;
        let seat_id = store.list_seats(show.id).await.unwrap()[0].id;

        {
            let mut uow = store.begin().await.unwrap();
            uow.lock_seat(show.id, seat_id).await.unwrap();
            let booking = uow.insert_booking(&new_booking(show.id)).await.unwrap();
            uow.assign_seats(&[seat_id], booking.id).await.unwrap();
        }

        let mut next = store.begin().await.unwrap();
        let seat = next.lock_seat(show.id, seat_id).await.unwrap().unwrap();
        assert!(seat.is_available());
        next.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn second_locker_times_out_while_row_is_held() {
        let (store, show) = store_with_show().await;
        let seat_id = store.list_seats(show.id).await.unwrap()[0].id;

        let mut first = store.begin().await.unwrap();
        first.lock_seat(show.id, seat_id).await.unwrap();

        let mut second = store.begin().await.unwrap();
        let err = second.lock_seat(show.id, seat_id).await.unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout));

        first.rollback().await.unwrap();
        assert!(second.lock_seat(show.id, seat_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn seat_of_another_show_is_not_locked() {
        let (store, show) = store_with_show().await;
        let seat_id = store.list_seats(show.id).await.unwrap()[0].id;

        let mut stranger = store.begin().await.unwrap();
        assert!(stranger.lock_seat(show.id + 1, seat_id).await.unwrap().is_none());

        // Still open, yet the owner's lock is granted without waiting
        let mut owner = store.begin().await.unwrap();
        assert!(owner.lock_seat(show.id, seat_id).await.unwrap().is_some());
        drop(stranger);
    }

    #[tokio::test]
    async fn assigning_an_unlocked_seat_is_refused() {
        let (store, show) = store_with_show().await;
        let seat_id = store.list_seats(show.id).await.unwrap()[0].id;

        let mut uow = store.begin().await.unwrap();
        let booking = uow.insert_booking(&new_booking(show.id)).await.unwrap();
        let err = uow.assign_seats(&[seat_id], booking.id).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn seats_are_listed_by_row_then_number() {
        let store = MemoryStore::default();
        let movie = store
            .insert_movie(NewMovie {
                title: "Heat".into(),
                description: String::new(),
                duration: 170,
                rating: "R".into(),
                poster_url: String::new(),
            })
            .await
            .unwrap();
        let start = NaiveDate::from_ymd_opt(2024, 3, 20)
            .unwrap()
            .and_hms_opt(20, 0, 0)
            .unwrap();
        let show = store
            .schedule_show(
                NewShow {
                    movie_id: movie.id,
                    screen: "Screen 2".into(),
                    start_time: start,
                    end_time: start + chrono::Duration::minutes(170),
                    price: 9.5,
                },
                &SeatGrid::new(["B", "A"], 2),
            )
            .await
            .unwrap();

        let labels: Vec<String> = store
            .list_seats(show.id)
            .await
            .unwrap()
            .iter()
            .map(Seat::label)
            .collect();
        assert_eq!(labels, vec!["A1", "A2", "B1", "B2"]);
        assert_eq!(show.duration, 170);
    }
}
