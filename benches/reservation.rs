//! Reservation throughput on the in-memory store.
//!
//! Run with: `cargo bench --bench reservation`

#![allow(clippy::expect_used)]

use chrono::NaiveDate;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cinema_booking::{
    config::BookingConfig,
    ledger::{memory::MemoryStore, CatalogWriter, SeatLedger},
    models::{NewMovie, NewShow, Requester, ReserveCommand, SeatGrid},
    services::reservation::ReservationCoordinator,
};

async fn show_with_seats(config: &BookingConfig) -> (ReservationCoordinator, i64, Vec<i64>) {
    let store = MemoryStore::new(config.lock_timeout());
    let movie = store
        .insert_movie(NewMovie {
            title: "Bench".into(),
            description: String::new(),
            duration: 120,
            rating: "PG".into(),
            poster_url: String::new(),
        })
        .await
        .expect("insert movie");
    let start = NaiveDate::from_ymd_opt(2024, 3, 20)
        .and_then(|d| d.and_hms_opt(20, 0, 0))
        .expect("valid date");
    let show = store
        .schedule_show(
            NewShow {
                movie_id: movie.id,
                screen: "Screen 1".into(),
                start_time: start,
                end_time: start + chrono::Duration::minutes(120),
                price: 10.0,
            },
            &SeatGrid::default(),
        )
        .await
        .expect("schedule show");
    let seats = store
        .list_seats(show.id)
        .await
        .expect("list seats")
        .into_iter()
        .map(|s| s.id)
        .collect();
    (ReservationCoordinator::new(Arc::new(store), config), show.id, seats)
}

/// `clients` tasks each ask for a pair of seats; pairs overlap with their
/// neighbours so roughly half of the requests lose.
async fn contended_round(config: &BookingConfig, clients: usize) -> Duration {
    let (coordinator, show_id, seats) = show_with_seats(config).await;
    let commands: Vec<ReserveCommand> = (0..clients)
        .map(|i| ReserveCommand {
            show_id,
            seat_ids: vec![seats[i % seats.len()], seats[(i + 1) % seats.len()]],
            requester: Requester::user(i as i64 + 1),
        })
        .collect();

    let started = Instant::now();
    let handles = commands.into_iter().map(|cmd| {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.reserve(cmd).await.is_ok() })
    });
    let _ = join_all(handles).await;
    started.elapsed()
}

fn benchmark_contended_reservations(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .expect("tokio runtime");

    let mut group = c.benchmark_group("contended_reservations");
    for clients in [8usize, 32, 50] {
        group.throughput(Throughput::Elements(clients as u64));
        for seat_locks_enabled in [true, false] {
            let config = BookingConfig {
                seat_locks_enabled,
                ..BookingConfig::default()
            };
            let label = if seat_locks_enabled { "local_locks" } else { "store_locks_only" };
            group.bench_with_input(BenchmarkId::new(label, clients), &clients, |b, &clients| {
                b.iter_custom(|iters| {
                    runtime.block_on(async {
                        let mut total = Duration::ZERO;
                        for _ in 0..iters {
                            total += contended_round(&config, clients).await;
                        }
                        total
                    })
                });
            });
        }
    }
    group.finish();
}

criterion_group!(benches, benchmark_contended_reservations);
criterion_main!(benches);
