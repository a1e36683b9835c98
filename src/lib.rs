pub mod config;
pub mod database;
pub mod redis_client;
pub mod models;
pub mod error;
pub mod ledger;
pub mod cache;
pub mod services;
pub mod controllers;

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::config::{Config, StorageBackend};
use crate::ledger::{memory::MemoryStore, postgres::PgStore, Store};
use crate::services::reservation::ReservationCoordinator;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migrations: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

// Shared state for the whole application
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub coordinator: ReservationCoordinator,
    pub cache: cache::CacheService,
    pub config: Config,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Arc<Self>, StartupError> {
        let lock_timeout = config.booking.lock_timeout();
        let store: Arc<dyn Store> = match config.storage.backend {
            StorageBackend::Postgres => {
                let db = database::Database::from_config(&config.database).await?;
                info!("Database connected");
                db.run_migrations().await?;
                Arc::new(PgStore::new(db, lock_timeout))
            }
            StorageBackend::Memory => {
                warn!("Using the in-memory store, nothing survives a restart");
                Arc::new(MemoryStore::new(lock_timeout))
            }
        };

        // The catalog cache is optional; a dead Redis only costs latency
        let redis = match config.redis.url.as_deref() {
            Some(url) => match redis_client::RedisClient::connect(url).await {
                Ok(client) => {
                    info!("Redis connected");
                    Some(client)
                }
                Err(e) => {
                    warn!("Redis unavailable, catalog cache disabled: {}", e);
                    None
                }
            },
            None => None,
        };

        Ok(Self::assemble(store, redis, config))
    }

    /// State over an already built store, without Redis.
    pub fn with_store(store: Arc<dyn Store>, config: Config) -> Arc<Self> {
        Self::assemble(store, None, config)
    }

    fn assemble(
        store: Arc<dyn Store>,
        redis: Option<redis_client::RedisClient>,
        config: Config,
    ) -> Arc<Self> {
        let cache = cache::CacheService::new(redis, store.clone(), config.redis.catalog_ttl_secs);
        let coordinator = ReservationCoordinator::new(store.clone(), &config.booking);
        Arc::new(Self {
            store,
            coordinator,
            cache,
            config,
        })
    }
}

/// The full HTTP surface: banner, health check and everything under `/api`.
pub fn app(state: Arc<AppState>) -> Router {
    let request_timeout = state.config.app.request_timeout();

    Router::new()
        .route("/", get(|| async { "Cinema Booking API v1.0" }))
        .route("/health", get(|| async { "OK" }))
        .nest("/api", controllers::routes())
        .with_state(state)
        // A timed out request drops its handler, which rolls back any open transaction
        .layer(TimeoutLayer::new(request_timeout))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
