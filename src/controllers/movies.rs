use axum::{
    extract::{rejection::QueryRejection, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;

use super::bad_request;
use crate::error::BookingError;
use crate::models::{Movie, Show};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/movies/all", get(get_all_movies))
        .route("/movies/details", get(get_movie))
        .route("/movies/shows", get(get_movie_shows))
}

#[derive(Debug, Deserialize)]
struct MovieQuery {
    id: Option<i64>,
}

fn movie_id(query: Result<Query<MovieQuery>, QueryRejection>) -> Result<i64, BookingError> {
    let Query(query) = query.map_err(bad_request)?;
    match query.id {
        Some(id) if id > 0 => Ok(id),
        Some(_) => Err(BookingError::InvalidInput("id must be > 0".into())),
        None => Err(BookingError::InvalidInput("movie id not provided".into())),
    }
}

// GET /api/movies/all
async fn get_all_movies(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Movie>>, BookingError> {
    let movies = state.cache.movies().await?;
    tracing::debug!("Found {} movies", movies.len());
    Ok(Json(movies))
}

// GET /api/movies/details?id=
async fn get_movie(
    State(state): State<Arc<AppState>>,
    query: Result<Query<MovieQuery>, QueryRejection>,
) -> Result<Json<Movie>, BookingError> {
    let id = movie_id(query)?;
    state
        .cache
        .movie(id)
        .await?
        .map(Json)
        .ok_or(BookingError::MovieNotFound(id))
}

// GET /api/movies/shows?id=
async fn get_movie_shows(
    State(state): State<Arc<AppState>>,
    query: Result<Query<MovieQuery>, QueryRejection>,
) -> Result<Json<Vec<Show>>, BookingError> {
    let id = movie_id(query)?;
    if state.cache.movie(id).await?.is_none() {
        return Err(BookingError::MovieNotFound(id));
    }

    let shows = state.cache.shows_for_movie(id).await?;
    tracing::debug!("Found {} shows for movie {}", shows.len(), id);
    Ok(Json(shows))
}
