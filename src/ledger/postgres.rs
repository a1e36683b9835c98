use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, Postgres, Transaction};
use std::time::Duration;

use super::{
    BookingLedger, CatalogStore, CatalogWriter, SeatLedger, StoreError, StoreResult,
    TransactionalStore, UnitOfWork,
};
use crate::database::Database;
use crate::models::{
    Booking, BookingStatus, Movie, NewBooking, NewMovie, NewShow, Seat, SeatGrid, Show,
};

const MOVIE_COLUMNS: &str = "id, title, description, duration, rating, poster_url";

const SHOW_SELECT: &str = r#"
    SELECT s.id, s.movie_id, s.screen, s.start_time, s.end_time,
           s.price::FLOAT8 AS price, m.duration
    FROM shows s
    JOIN movies m ON m.id = s.movie_id
"#;

const SEAT_COLUMNS: &str = "id, show_id, row_name, seat_number, status, booking_id";

const BOOKING_COLUMNS: &str = "id, show_id, user_id, user_name, user_email, \
     total_amount::FLOAT8 AS total_amount, booking_time, status";

// lock_not_available, deadlock_detected, serialization_failure
const TRANSIENT_LOCK_CODES: [&str; 3] = ["55P03", "40P01", "40001"];

fn classify(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if let Some(code) = db_err.code() {
            if TRANSIENT_LOCK_CODES.contains(&code.as_ref()) {
                return StoreError::LockTimeout;
            }
        }
    }
    StoreError::Database(err)
}

#[derive(Debug, FromRow)]
struct BookingRow {
    id: i64,
    show_id: i64,
    user_id: Option<i64>,
    user_name: Option<String>,
    user_email: Option<String>,
    total_amount: f64,
    booking_time: DateTime<Utc>,
    #[sqlx(try_from = "String")]
    status: BookingStatus,
}

impl BookingRow {
    fn with_seats(self, seat_ids: Vec<i64>) -> Booking {
        Booking {
            id: self.id,
            show_id: self.show_id,
            user_id: self.user_id,
            user_name: self.user_name,
            user_email: self.user_email,
            seat_ids,
            total_amount: self.total_amount,
            booking_time: self.booking_time,
            status: self.status,
        }
    }
}

/// Postgres-backed store. Seat and booking rows are locked with
/// `SELECT ... FOR UPDATE`; the lock wait is bounded per transaction by
/// Postgres' `lock_timeout`.
#[derive(Clone)]
pub struct PgStore {
    db: Database,
    lock_timeout: Duration,
}

impl PgStore {
    pub fn new(db: Database, lock_timeout: Duration) -> Self {
        Self { db, lock_timeout }
    }
}

#[async_trait]
impl CatalogStore for PgStore {
    async fn list_movies(&self) -> StoreResult<Vec<Movie>> {
        let sql = format!("SELECT {MOVIE_COLUMNS} FROM movies ORDER BY id");
        sqlx::query_as::<_, Movie>(&sql)
            .fetch_all(&self.db.pool)
            .await
            .map_err(classify)
    }

    async fn get_movie(&self, movie_id: i64) -> StoreResult<Option<Movie>> {
        let sql = format!("SELECT {MOVIE_COLUMNS} FROM movies WHERE id = $1");
        sqlx::query_as::<_, Movie>(&sql)
            .bind(movie_id)
            .fetch_optional(&self.db.pool)
            .await
            .map_err(classify)
    }

    async fn list_shows_for_movie(&self, movie_id: i64) -> StoreResult<Vec<Show>> {
        let sql = format!("{SHOW_SELECT} WHERE s.movie_id = $1 ORDER BY s.start_time, s.id");
        sqlx::query_as::<_, Show>(&sql)
            .bind(movie_id)
            .fetch_all(&self.db.pool)
            .await
            .map_err(classify)
    }

    async fn get_show(&self, show_id: i64) -> StoreResult<Option<Show>> {
        let sql = format!("{SHOW_SELECT} WHERE s.id = $1");
        sqlx::query_as::<_, Show>(&sql)
            .bind(show_id)
            .fetch_optional(&self.db.pool)
            .await
            .map_err(classify)
    }
}

#[async_trait]
impl CatalogWriter for PgStore {
    async fn insert_movie(&self, movie: NewMovie) -> StoreResult<Movie> {
        let sql = format!(
            "INSERT INTO movies (title, description, duration, rating, poster_url)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {MOVIE_COLUMNS}"
        );
        sqlx::query_as::<_, Movie>(&sql)
            .bind(movie.title)
            .bind(movie.description)
            .bind(movie.duration)
            .bind(movie.rating)
            .bind(movie.poster_url)
            .fetch_one(&self.db.pool)
            .await
            .map_err(classify)
    }

    async fn schedule_show(&self, show: NewShow, grid: &SeatGrid) -> StoreResult<Show> {
        let mut tx = self.db.pool.begin().await.map_err(classify)?;

        let show_id: i64 = sqlx::query_scalar(
            "INSERT INTO shows (movie_id, screen, start_time, end_time, price)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id",
        )
        .bind(show.movie_id)
        .bind(&show.screen)
        .bind(show.start_time)
        .bind(show.end_time)
        .bind(show.price)
        .fetch_one(&mut *tx)
        .await
        .map_err(classify)?;

        let (rows, numbers): (Vec<String>, Vec<i32>) = grid
            .positions()
            .map(|(row, number)| (row.to_string(), number))
            .unzip();

        sqlx::query(
            "INSERT INTO seats (show_id, row_name, seat_number, status)
             SELECT $1, g.row_name, g.seat_number, 'available'
             FROM UNNEST($2::TEXT[], $3::INT4[]) AS g(row_name, seat_number)",
        )
        .bind(show_id)
        .bind(&rows)
        .bind(&numbers)
        .execute(&mut *tx)
        .await
        .map_err(classify)?;

        let sql = format!("{SHOW_SELECT} WHERE s.id = $1");
        let created = sqlx::query_as::<_, Show>(&sql)
            .bind(show_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(classify)?;

        tx.commit().await.map_err(classify)?;
        Ok(created)
    }
}

#[async_trait]
impl SeatLedger for PgStore {
    async fn list_seats(&self, show_id: i64) -> StoreResult<Vec<Seat>> {
        let sql = format!(
            "SELECT {SEAT_COLUMNS} FROM seats WHERE show_id = $1 ORDER BY row_name, seat_number"
        );
        sqlx::query_as::<_, Seat>(&sql)
            .bind(show_id)
            .fetch_all(&self.db.pool)
            .await
            .map_err(classify)
    }
}

#[async_trait]
impl BookingLedger for PgStore {
    async fn get_booking(&self, booking_id: i64) -> StoreResult<Option<Booking>> {
        let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1");
        let row = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(booking_id)
            .fetch_optional(&self.db.pool)
            .await
            .map_err(classify)?;

        let Some(row) = row else { return Ok(None) };

        let seat_ids = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM seats WHERE booking_id = $1 ORDER BY id",
        )
        .bind(booking_id)
        .fetch_all(&self.db.pool)
        .await
        .map_err(classify)?;

        Ok(Some(row.with_seats(seat_ids)))
    }
}

#[async_trait]
impl TransactionalStore for PgStore {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        let mut tx = self.db.pool.begin().await.map_err(classify)?;

        // Scoped to this transaction only
        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.lock_timeout.as_millis()))
            .execute(&mut *tx)
            .await
            .map_err(classify)?;

        Ok(Box::new(PgUnitOfWork { tx }))
    }
}

/// Wraps a sqlx transaction; sqlx rolls it back if it is dropped uncommitted.
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn lock_seat(&mut self, show_id: i64, seat_id: i64) -> StoreResult<Option<Seat>> {
        let sql = format!(
            "SELECT {SEAT_COLUMNS} FROM seats WHERE id = $1 AND show_id = $2 FOR UPDATE"
        );
        sqlx::query_as::<_, Seat>(&sql)
            .bind(seat_id)
            .bind(show_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(classify)
    }

    async fn lock_booking(&mut self, booking_id: i64) -> StoreResult<Option<Booking>> {
        let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1 FOR UPDATE");
        let row = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(booking_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(classify)?;

        let Some(row) = row else { return Ok(None) };

        let seat_ids = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM seats WHERE booking_id = $1 ORDER BY id",
        )
        .bind(booking_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(classify)?;

        Ok(Some(row.with_seats(seat_ids)))
    }

    async fn insert_booking(&mut self, booking: &NewBooking) -> StoreResult<Booking> {
        let sql = format!(
            "INSERT INTO bookings (show_id, user_id, user_name, user_email, total_amount, booking_time, status)
             VALUES ($1, $2, $3, $4, $5, NOW(), 'confirmed')
             RETURNING {BOOKING_COLUMNS}"
        );
        let row = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(booking.show_id)
            .bind(booking.requester.user_id)
            .bind(booking.requester.user_name.as_deref())
            .bind(booking.requester.user_email.as_deref())
            .bind(booking.total_amount)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(classify)?;

        Ok(row.with_seats(Vec::new()))
    }

    async fn assign_seats(&mut self, seat_ids: &[i64], booking_id: i64) -> StoreResult<()> {
        let updated = sqlx::query(
            "UPDATE seats
             SET status = 'booked', booking_id = $1, updated_at = NOW()
             WHERE id = ANY($2) AND status = 'available'",
        )
        .bind(booking_id)
        .bind(seat_ids)
        .execute(&mut *self.tx)
        .await
        .map_err(classify)?
        .rows_affected();

        if updated != seat_ids.len() as u64 {
            return Err(StoreError::Conflict(format!(
                "expected to book {} seats, updated {}",
                seat_ids.len(),
                updated
            )));
        }
        Ok(())
    }

    async fn release_seats(&mut self, booking_id: i64) -> StoreResult<Vec<i64>> {
        let mut released = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE seats
            SET status = 'available', booking_id = NULL, updated_at = NOW()
            WHERE id IN (
                SELECT id FROM seats WHERE booking_id = $1 ORDER BY id FOR UPDATE
            )
            RETURNING id
            "#,
        )
        .bind(booking_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(classify)?;

        released.sort_unstable();
        Ok(released)
    }

    async fn mark_booking_cancelled(&mut self, booking_id: i64) -> StoreResult<()> {
        let updated = sqlx::query("UPDATE bookings SET status = 'cancelled' WHERE id = $1")
            .bind(booking_id)
            .execute(&mut *self.tx)
            .await
            .map_err(classify)?
            .rows_affected();

        if updated == 0 {
            return Err(StoreError::Conflict(format!("booking {booking_id} vanished")));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await.map_err(classify)
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx.rollback().await.map_err(classify)
    }
}
