use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{ledger::Store, redis_client::RedisClient};

pub mod catalog;

/// Read-through cache in front of the catalog. Without Redis every call goes
/// straight to the store; Redis errors are logged and never fail a request.
#[derive(Clone)]
pub struct CacheService {
    redis: Option<RedisClient>,
    store: Arc<dyn Store>,
    ttl_secs: u64,
}

impl CacheService {
    pub fn new(redis: Option<RedisClient>, store: Arc<dyn Store>, ttl_secs: u64) -> Self {
        Self { redis, store, ttl_secs }
    }

    pub fn is_enabled(&self) -> bool {
        self.redis.is_some()
    }

    // Warm the cache at start-up
    pub async fn warmup_cache(&self) {
        if !self.is_enabled() {
            return;
        }
        info!("Starting catalog cache warmup...");
        match self.movies().await {
            Ok(movies) => info!("Catalog cache warmed with {} movies", movies.len()),
            Err(e) => warn!("Catalog cache warmup failed: {}", e),
        }
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let redis = self.redis.as_ref()?;
        let mut conn = redis.conn();
        let data: Option<String> = match conn.get(key).await {
            Ok(data) => data,
            Err(e) => {
                warn!("cache read {} failed: {}", key, e);
                return None;
            }
        };
        let value = serde_json::from_str(&data?)
            .map_err(|e| warn!("cache entry {} is corrupt: {}", key, e))
            .ok()?;
        debug!("cache hit {}", key);
        Some(value)
    }

    async fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        let Some(redis) = self.redis.as_ref() else { return };
        let data = match serde_json::to_string(value) {
            Ok(data) => data,
            Err(e) => {
                warn!("cache entry {} not serializable: {}", key, e);
                return;
            }
        };
        let mut conn = redis.conn();
        let result: Result<(), _> = conn.set_ex(key, data, self.ttl_secs).await;
        if let Err(e) = result {
            warn!("cache write {} failed: {}", key, e);
        }
    }

    /// Drops every catalog entry, after the catalog has been changed.
    pub async fn invalidate_catalog(&self) {
        let Some(redis) = self.redis.as_ref() else { return };
        let mut conn = redis.conn();
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(catalog::KEY_PATTERN)
            .query_async(&mut conn)
            .await
            .unwrap_or_default();

        if !keys.is_empty() {
            let result: Result<(), _> = conn.del(&keys).await;
            match result {
                Ok(()) => info!("Invalidated {} catalog cache entries", keys.len()),
                Err(e) => warn!("catalog cache invalidation failed: {}", e),
            }
        }
    }
}
