//! reservation.rs
//!
//! The reservation coordinator: the only writer of seats and bookings.
//!
//! `reserve` runs check, lock, verify and commit inside one unit of work:
//! 1.  Input is validated before any lock is taken.
//! 2.  The show price is looked up (`ShowNotFound` if absent).
//! 3.  Optionally, the process-local seat lock table is entered.
//! 4.  Every seat row is locked in ascending id order, then verified to exist,
//!     to belong to the show and to be `available`.
//! 5.  The booking row is inserted, the seats are marked `booked` and the unit
//!     of work commits. Any failure before the commit rolls everything back.
//!
//! Commits are never retried: a commit that failed after reaching the store
//! could already be durable.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::BookingConfig;
use crate::error::BookingError;
use crate::ledger::{CatalogStore, Store, TransactionalStore, UnitOfWork};
use crate::models::{Booking, BookingStatus, NewBooking, ReserveCommand, SeatStatus};
use crate::services::seat_locks::SeatLockTable;

/// Result of a cancellation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Cancellation {
    pub booking: Booking,
    pub released_seat_ids: Vec<i64>,
}

#[derive(Clone)]
pub struct ReservationCoordinator {
    store: Arc<dyn Store>,
    local_locks: Option<Arc<SeatLockTable>>,
    max_seats: usize,
}

impl ReservationCoordinator {
    pub fn new(store: Arc<dyn Store>, config: &BookingConfig) -> Self {
        let local_locks = config.seat_locks_enabled.then(|| {
            Arc::new(SeatLockTable::new(
                config.seat_lock_shards,
                config.lock_timeout(),
            ))
        });
        Self {
            store,
            local_locks,
            max_seats: config.max_seats_per_booking,
        }
    }

    /// Checks the seat list and returns it sorted ascending, the lock order.
    fn lock_order(&self, seat_ids: &[i64]) -> Result<Vec<i64>, BookingError> {
        if seat_ids.is_empty() {
            return Err(BookingError::InvalidInput("seat_ids must not be empty".into()));
        }
        if seat_ids.len() > self.max_seats {
            return Err(BookingError::InvalidInput(format!(
                "at most {} seats per booking",
                self.max_seats
            )));
        }
        if let Some(bad) = seat_ids.iter().find(|id| **id <= 0) {
            return Err(BookingError::InvalidInput(format!("seat id {bad} must be > 0")));
        }

        let ordered: BTreeSet<i64> = seat_ids.iter().copied().collect();
        if ordered.len() != seat_ids.len() {
            return Err(BookingError::InvalidInput("seat_ids contains duplicates".into()));
        }
        Ok(ordered.into_iter().collect())
    }

    /// Reserves every requested seat and creates exactly one booking, or
    /// changes nothing.
    pub async fn reserve(&self, cmd: ReserveCommand) -> Result<Booking, BookingError> {
        if cmd.show_id <= 0 {
            return Err(BookingError::InvalidInput("show_id must be > 0".into()));
        }
        let seat_ids = self.lock_order(&cmd.seat_ids)?;

        let show = self
            .store
            .get_show(cmd.show_id)
            .await?
            .ok_or(BookingError::ShowNotFound(cmd.show_id))?;
        let total_amount = NewBooking::total_for(show.price, seat_ids.len());

        let _local = match &self.local_locks {
            Some(table) => Some(table.acquire(&seat_ids).await.map_err(|e| {
                warn!("⏳ local seat lock timed out for show {}: {}", cmd.show_id, e);
                BookingError::LockTimeout
            })?),
            None => None,
        };

        let mut uow = self.store.begin().await?;

        for &seat_id in &seat_ids {
            let seat = match uow.lock_seat(cmd.show_id, seat_id).await {
                Ok(seat) => seat,
                Err(e) => return abort(uow, e.into()).await,
            };

            let seat = match seat {
                Some(seat) => seat,
                None => {
                    let err = BookingError::SeatNotFound { show_id: cmd.show_id, seat_id };
                    return abort(uow, err).await;
                }
            };

            if seat.status != SeatStatus::Available {
                warn!(
                    "seat {} ({}) of show {} is {}, rejecting booking",
                    seat.id,
                    seat.label(),
                    cmd.show_id,
                    seat.status
                );
                let err = BookingError::SeatUnavailable {
                    seat_id,
                    status: seat.status.to_string(),
                };
                return abort(uow, err).await;
            }
        }

        let new_booking = NewBooking {
            show_id: cmd.show_id,
            requester: cmd.requester,
            total_amount,
        };
        let mut booking = match uow.insert_booking(&new_booking).await {
            Ok(booking) => booking,
            Err(e) => return abort(uow, e.into()).await,
        };

        if let Err(e) = uow.assign_seats(&seat_ids, booking.id).await {
            return abort(uow, e.into()).await;
        }

        if let Err(e) = uow.commit().await {
            error!("commit of booking {} for show {} failed: {}", booking.id, cmd.show_id, e);
            return Err(e.into());
        }

        booking.seat_ids = seat_ids;
        info!(
            "🎟️ booking {} confirmed: show {}, {} seats, total {:.2}",
            booking.id,
            booking.show_id,
            booking.seat_ids.len(),
            booking.total_amount
        );
        Ok(booking)
    }

    /// Releases every seat of a confirmed booking and marks it cancelled.
    pub async fn cancel(&self, booking_id: i64) -> Result<Cancellation, BookingError> {
        if booking_id <= 0 {
            return Err(BookingError::InvalidInput("booking_id must be > 0".into()));
        }

        let mut uow = self.store.begin().await?;

        let booking = match uow.lock_booking(booking_id).await {
            Ok(Some(booking)) => booking,
            Ok(None) => return abort(uow, BookingError::BookingNotFound(booking_id)).await,
            Err(e) => return abort(uow, e.into()).await,
        };
        if booking.status == BookingStatus::Cancelled {
            return abort(uow, BookingError::AlreadyCancelled(booking_id)).await;
        }

        let released_seat_ids = match uow.release_seats(booking_id).await {
            Ok(ids) => ids,
            Err(e) => return abort(uow, e.into()).await,
        };
        if let Err(e) = uow.mark_booking_cancelled(booking_id).await {
            return abort(uow, e.into()).await;
        }

        if let Err(e) = uow.commit().await {
            error!("commit of cancellation {} failed: {}", booking_id, e);
            return Err(e.into());
        }

        info!(
            "booking {} cancelled, {} seats released",
            booking_id,
            released_seat_ids.len()
        );
        Ok(Cancellation {
            booking: Booking {
                status: BookingStatus::Cancelled,
                seat_ids: Vec::new(),
                ..booking
            },
            released_seat_ids,
        })
    }
}

/// Rolls the unit of work back and hands the original error on.
async fn abort<T>(uow: Box<dyn UnitOfWork>, err: BookingError) -> Result<T, BookingError> {
    match &err {
        BookingError::StoreFailure(e) => error!("unit of work failed: {}", e),
        BookingError::LockTimeout => warn!("seat lock wait timed out, rolling back"),
        other => debug!("rolling back: {}", other),
    }
    if let Err(e) = uow.rollback().await {
        // The store discards the transaction when the connection goes back anyway
        error!("rollback failed: {}", e);
    }
    Err(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::{FailPoint, MemoryStore};
    use crate::ledger::{BookingLedger, CatalogWriter, SeatLedger};
    use crate::models::{NewMovie, NewShow, Requester, Seat, SeatGrid};
    use chrono::NaiveDate;
    use std::time::Duration;

    struct Fixture {
        store: MemoryStore,
        coordinator: ReservationCoordinator,
        show_id: i64,
        seats: Vec<Seat>,
    }

    async fn fixture(seats_in_row_a: i32, config: BookingConfig) -> Fixture {
        let store = MemoryStore::new(config.lock_timeout());
        let movie = store
            .insert_movie(NewMovie {
                title: "The Dark Knight".into(),
                description: String::new(),
                duration: 152,
                rating: "PG-13".into(),
                poster_url: String::new(),
            })
            .await
            .unwrap();
        let start = NaiveDate::from_ymd_opt(2024, 3, 20)
            .unwrap()
            .and_hms_opt(14, 0, 0)
            .unwrap();
        let show = store
            .schedule_show(
                NewShow {
                    movie_id: movie.id,
                    screen: "Screen 1".into(),
                    start_time: start,
                    end_time: start + chrono::Duration::minutes(152),
                    price: 12.99,
                },
                &SeatGrid::new(["A"], seats_in_row_a),
            )
            .await
            .unwrap();
        let seats = store.list_seats(show.id).await.unwrap();
        let coordinator = ReservationCoordinator::new(Arc::new(store.clone()), &config);
        Fixture { store, coordinator, show_id: show.id, seats }
    }

    fn cmd(show_id: i64, seat_ids: Vec<i64>) -> ReserveCommand {
        ReserveCommand {
            show_id,
            seat_ids,
            requester: Requester::named("Ada", "ada@example.com"),
        }
    }

    impl Fixture {
        fn ids(&self, numbers: &[i32]) -> Vec<i64> {
            numbers
                .iter()
                .map(|n| self.seats.iter().find(|s| s.seat_number == *n).unwrap().id)
                .collect()
        }

        async fn statuses(&self) -> Vec<SeatStatus> {
            self.store
                .list_seats(self.show_id)
                .await
                .unwrap()
                .into_iter()
                .map(|s| s.status)
                .collect()
        }
    }

    #[tokio::test]
    async fn reserve_books_seats_and_prices_from_show() {
        let f = fixture(10, BookingConfig::default()).await;
        let ids = f.ids(&[3, 1, 2]);

        let booking = f.coordinator.reserve(cmd(f.show_id, ids.clone())).await.unwrap();

        assert_eq!(booking.total_amount, 38.97);
        assert_eq!(booking.status, BookingStatus::Confirmed);
        assert_eq!(booking.seat_ids, f.ids(&[1, 2, 3]));

        let seats = f.store.list_seats(f.show_id).await.unwrap();
        for seat in &seats {
            assert!(seat.is_consistent());
            if ids.contains(&seat.id) {
                assert_eq!(seat.booking_id, Some(booking.id));
            }
        }

        let stored = f.store.get_booking(booking.id).await.unwrap().unwrap();
        assert_eq!(stored.seat_ids, booking.seat_ids);
    }

    #[tokio::test]
    async fn repeating_a_reservation_conflicts() {
        let f = fixture(10, BookingConfig::default()).await;
        let ids = f.ids(&[1, 2, 3]);

        f.coordinator.reserve(cmd(f.show_id, ids.clone())).await.unwrap();
        let err = f.coordinator.reserve(cmd(f.show_id, ids)).await.unwrap_err();

        assert!(matches!(err, BookingError::SeatUnavailable { .. }));
    }

    #[tokio::test]
    async fn unknown_show_is_not_found() {
        let f = fixture(10, BookingConfig::default()).await;
        let err = f.coordinator.reserve(cmd(999, f.ids(&[1]))).await.unwrap_err();
        assert!(matches!(err, BookingError::ShowNotFound(999)));
    }

    #[tokio::test]
    async fn invalid_seat_lists_are_rejected_before_locking() {
        let f = fixture(10, BookingConfig { max_seats_per_booking: 4, ..Default::default() }).await;

        for seat_ids in [vec![], f.ids(&[1, 1]), f.ids(&[1, 2, 3, 4, 5]), vec![-3]] {
            let err = f.coordinator.reserve(cmd(f.show_id, seat_ids)).await.unwrap_err();
            assert!(matches!(err, BookingError::InvalidInput(_)), "{err:?}");
        }
        assert!(f.statuses().await.iter().all(|s| *s == SeatStatus::Available));
    }

    #[tokio::test]
    async fn seat_of_another_show_is_not_found_and_nothing_changes() {
        let f = fixture(5, BookingConfig::default()).await;
        let mut ids = f.ids(&[1, 2]);
        ids.push(10_000);

        let err = f.coordinator.reserve(cmd(f.show_id, ids)).await.unwrap_err();

        assert!(matches!(err, BookingError::SeatNotFound { seat_id: 10_000, .. }));
        assert!(f.statuses().await.iter().all(|s| *s == SeatStatus::Available));
    }

    #[tokio::test]
    async fn exactly_the_available_seats_can_be_booked() {
        let f = fixture(10, BookingConfig::default()).await;
        f.coordinator.reserve(cmd(f.show_id, f.ids(&[1, 2, 3]))).await.unwrap();

        // Seven free seats plus one taken one
        let err = f
            .coordinator
            .reserve(cmd(f.show_id, f.ids(&[3, 4, 5, 6, 7, 8, 9, 10])))
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::SeatUnavailable { .. }));
        let free = f.statuses().await.iter().filter(|s| **s == SeatStatus::Available).count();
        assert_eq!(free, 7);

        f.coordinator
            .reserve(cmd(f.show_id, f.ids(&[4, 5, 6, 7, 8, 9, 10])))
            .await
            .unwrap();
        assert!(f.statuses().await.iter().all(|s| *s == SeatStatus::Booked));
    }

    #[tokio::test]
    async fn failures_inside_the_unit_of_work_leave_seats_untouched() {
        let f = fixture(4, BookingConfig::default()).await;

        for point in [FailPoint::InsertBooking, FailPoint::AssignSeats, FailPoint::Commit] {
            f.store.fail_once(point);
            let err = f
                .coordinator
                .reserve(cmd(f.show_id, f.ids(&[1, 2])))
                .await
                .unwrap_err();

            assert!(matches!(err, BookingError::StoreFailure(_)), "{point:?}: {err:?}");
            assert!(f.statuses().await.iter().all(|s| *s == SeatStatus::Available));
        }

        // Nothing stuck behind: the same seats still book fine
        f.coordinator.reserve(cmd(f.show_id, f.ids(&[1, 2]))).await.unwrap();
    }

    #[tokio::test]
    async fn held_seat_surfaces_lock_timeout() {
        let config = BookingConfig {
            lock_timeout_ms: 50,
            seat_locks_enabled: false,
            ..Default::default()
        };
        let f = fixture(4, config).await;
        let seat = f.ids(&[2])[0];

        let mut blocker = f.store.begin().await.unwrap();
        blocker.lock_seat(f.show_id, seat).await.unwrap();

        let err = f.coordinator.reserve(cmd(f.show_id, f.ids(&[1, 2]))).await.unwrap_err();
        assert!(matches!(err, BookingError::LockTimeout));
        assert!(err.is_retryable());

        blocker.rollback().await.unwrap();
        f.coordinator.reserve(cmd(f.show_id, f.ids(&[1, 2]))).await.unwrap();
    }

    #[tokio::test]
    async fn cancel_releases_seats_and_is_not_repeatable() {
        let f = fixture(10, BookingConfig::default()).await;
        let booking = f.coordinator.reserve(cmd(f.show_id, f.ids(&[4, 5]))).await.unwrap();

        let cancelled = f.coordinator.cancel(booking.id).await.unwrap();
        assert_eq!(cancelled.released_seat_ids, f.ids(&[4, 5]));
        assert_eq!(cancelled.booking.status, BookingStatus::Cancelled);
        assert!(f.statuses().await.iter().all(|s| *s == SeatStatus::Available));

        let stored = f.store.get_booking(booking.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Cancelled);
        assert!(stored.seat_ids.is_empty());

        let err = f.coordinator.cancel(booking.id).await.unwrap_err();
        assert!(matches!(err, BookingError::AlreadyCancelled(_)));

        // Released seats are bookable again
        f.coordinator.reserve(cmd(f.show_id, f.ids(&[4, 5]))).await.unwrap();
    }

    #[tokio::test]
    async fn cancel_of_unknown_booking_is_not_found() {
        let f = fixture(2, BookingConfig::default()).await;
        let err = f.coordinator.cancel(42).await.unwrap_err();
        assert!(matches!(err, BookingError::BookingNotFound(42)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn overlapping_requests_never_share_a_seat() {
        let config = BookingConfig {
            lock_timeout_ms: Duration::from_secs(5).as_millis() as u64,
            ..Default::default()
        };
        for _ in 0..20 {
            let f = fixture(3, config.clone()).await;
            let left = f.coordinator.clone();
            let right = f.coordinator.clone();
            let (a, b) = tokio::join!(
                tokio::spawn({
                    let c = cmd(f.show_id, f.ids(&[1, 2]));
                    async move { left.reserve(c).await }
                }),
                tokio::spawn({
                    let c = cmd(f.show_id, f.ids(&[2, 3]));
                    async move { right.reserve(c).await }
                }),
            );
            let (a, b) = (a.unwrap(), b.unwrap());

            assert!(a.is_ok() != b.is_ok(), "exactly one must win: {a:?} / {b:?}");
            let loser = if a.is_ok() { b } else { a };
            assert!(matches!(loser, Err(BookingError::SeatUnavailable { .. })));

            let booked = f.statuses().await.iter().filter(|s| **s == SeatStatus::Booked).count();
            assert_eq!(booked, 2);
        }
    }
}
