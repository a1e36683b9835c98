use crate::cache::CacheService;
use crate::ledger::{CatalogStore, StoreResult};
use crate::models::{Movie, Show};

pub(crate) const KEY_PATTERN: &str = "catalog:*";

fn movie_key(movie_id: i64) -> String {
    format!("catalog:movie:{}", movie_id)
}

fn shows_key(movie_id: i64) -> String {
    format!("catalog:movie:{}:shows", movie_id)
}

fn show_key(show_id: i64) -> String {
    format!("catalog:show:{}", show_id)
}

// Misses are not cached, so a movie added later shows up without waiting for a TTL
impl CacheService {
    pub async fn movies(&self) -> StoreResult<Vec<Movie>> {
        const KEY: &str = "catalog:movies";
        if let Some(movies) = self.read(KEY).await {
            return Ok(movies);
        }
        let movies = self.store.list_movies().await?;
        self.write(KEY, &movies).await;
        Ok(movies)
    }

    pub async fn movie(&self, movie_id: i64) -> StoreResult<Option<Movie>> {
        let key = movie_key(movie_id);
        if let Some(movie) = self.read(&key).await {
            return Ok(Some(movie));
        }
        let movie = self.store.get_movie(movie_id).await?;
        if let Some(movie) = &movie {
            self.write(&key, movie).await;
        }
        Ok(movie)
    }

    pub async fn shows_for_movie(&self, movie_id: i64) -> StoreResult<Vec<Show>> {
        let key = shows_key(movie_id);
        if let Some(shows) = self.read(&key).await {
            return Ok(shows);
        }
        let shows = self.store.list_shows_for_movie(movie_id).await?;
        self.write(&key, &shows).await;
        Ok(shows)
    }

    pub async fn show(&self, show_id: i64) -> StoreResult<Option<Show>> {
        let key = show_key(show_id);
        if let Some(show) = self.read(&key).await {
            return Ok(Some(show));
        }
        let show = self.store.get_show(show_id).await?;
        if let Some(show) = &show {
            self.write(&key, show).await;
        }
        Ok(show)
    }
}
