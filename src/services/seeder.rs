use chrono::{NaiveDate, NaiveDateTime};
use tracing::info;

use crate::ledger::{CatalogStore, CatalogWriter, StoreResult};
use crate::models::{NewMovie, NewShow, SeatGrid};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SeedReport {
    pub movies: usize,
    pub shows: usize,
    pub seats: usize,
}

struct SampleShow {
    movie: usize,
    screen: &'static str,
    start: (u32, u32),
    price: f64,
}

const SAMPLE_SHOWS: [SampleShow; 6] = [
    SampleShow { movie: 0, screen: "Screen 1", start: (14, 0), price: 12.99 },
    SampleShow { movie: 0, screen: "Screen 2", start: (18, 0), price: 14.99 },
    SampleShow { movie: 1, screen: "Screen 1", start: (15, 0), price: 12.99 },
    SampleShow { movie: 1, screen: "Screen 3", start: (19, 0), price: 14.99 },
    SampleShow { movie: 2, screen: "Screen 2", start: (16, 0), price: 12.99 },
    SampleShow { movie: 2, screen: "Screen 1", start: (20, 0), price: 14.99 },
];

fn sample_movies() -> Vec<NewMovie> {
    vec![
        NewMovie {
            title: "The Dark Knight".into(),
            description: "When the menace known as the Joker wreaks havoc and chaos on the people of Gotham, Batman must accept one of the greatest psychological and physical tests of his ability to fight injustice.".into(),
            duration: 152,
            rating: "PG-13".into(),
            poster_url: "https://example.com/dark_knight.jpg".into(),
        },
        NewMovie {
            title: "Inception".into(),
            description: "A thief who steals corporate secrets through the use of dream-sharing technology is given the inverse task of planting an idea into the mind of a C.E.O.".into(),
            duration: 148,
            rating: "PG-13".into(),
            poster_url: "https://example.com/inception.jpg".into(),
        },
        NewMovie {
            title: "The Shawshank Redemption".into(),
            description: "Two imprisoned men bond over a number of years, finding solace and eventual redemption through acts of common decency.".into(),
            duration: 142,
            rating: "R".into(),
            poster_url: "https://example.com/shawshank.jpg".into(),
        },
    ]
}

fn screening_at(day: NaiveDate, (hour, minute): (u32, u32)) -> NaiveDateTime {
    day.and_hms_opt(hour, minute, 0).unwrap_or_else(|| day.and_time(Default::default()))
}

/// Inserts the sample catalog: three movies, two shows each, and a 5×10
/// seat grid per show. A store that already has movies is left alone.
pub async fn seed_catalog<S>(store: &S, day: NaiveDate) -> StoreResult<SeedReport>
where
    S: CatalogStore + CatalogWriter + ?Sized,
{
    let existing = store.list_movies().await?.len();
    if existing > 0 {
        info!("🌱 Catalog already has {} movies, skipping seed", existing);
        return Ok(SeedReport::default());
    }

    let grid = SeatGrid::default();
    let mut report = SeedReport::default();

    let mut movies = Vec::new();
    for movie in sample_movies() {
        movies.push(store.insert_movie(movie).await?);
        report.movies += 1;
    }

    for sample in &SAMPLE_SHOWS {
        let movie = &movies[sample.movie];
        let start_time = screening_at(day, sample.start);
        let show = store
            .schedule_show(
                NewShow {
                    movie_id: movie.id,
                    screen: sample.screen.to_string(),
                    start_time,
                    end_time: start_time + chrono::Duration::minutes(movie.duration as i64),
                    price: sample.price,
                },
                &grid,
            )
            .await?;
        info!("🌱 Scheduled show {} of {:?} on {}", show.id, movie.title, show.screen);
        report.shows += 1;
        report.seats += grid.capacity();
    }

    info!(
        "🌱 Seeding completed: {} movies, {} shows, {} seats",
        report.movies, report.shows, report.seats
    );
    Ok(report)
}
