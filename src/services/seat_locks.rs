//! Process-local lock table keyed by seat id.
//!
//! Requests for the same hot seats queue here instead of piling up on the
//! store's row locks. It only spans one process, so the reservation protocol
//! still takes the store lock for every seat; this table never replaces it.

use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as SeatMutex, OwnedMutexGuard};

type Shard = Mutex<HashMap<i64, Arc<SeatMutex<()>>>>;

#[derive(Debug, thiserror::Error)]
#[error("timed out waiting for the local lock on seat {0}")]
pub struct LocalLockTimeout(pub i64);

pub struct SeatLockTable {
    shards: Arc<Vec<Shard>>,
    timeout: Duration,
}

impl SeatLockTable {
    pub fn new(shard_count: usize, timeout: Duration) -> Self {
        let shards = (0..shard_count.max(1))
            .map(|_| Mutex::new(HashMap::new()))
            .collect();
        Self {
            shards: Arc::new(shards),
            timeout,
        }
    }

    fn shard_of(shards: &[Shard], seat_id: i64) -> &Shard {
        let mut hasher = DefaultHasher::new();
        seat_id.hash(&mut hasher);
        &shards[(hasher.finish() as usize) % shards.len()]
    }

    /// Locks every seat in ascending id order. Ids must be sorted and unique.
    pub async fn acquire(&self, seat_ids: &[i64]) -> Result<SeatLockGuard, LocalLockTimeout> {
        debug_assert!(seat_ids.windows(2).all(|w| w[0] < w[1]));

        let mut guard = SeatLockGuard {
            shards: self.shards.clone(),
            held: Vec::with_capacity(seat_ids.len()),
        };
        for &seat_id in seat_ids {
            let mutex = Self::shard_of(&self.shards, seat_id)
                .lock()
                .entry(seat_id)
                .or_insert_with(|| Arc::new(SeatMutex::new(())))
                .clone();

            // On timeout the partially filled guard drops and releases what it holds
            let held = tokio::time::timeout(self.timeout, mutex.lock_owned())
                .await
                .map_err(|_| LocalLockTimeout(seat_id))?;
            guard.held.push((seat_id, held));
        }
        Ok(guard)
    }

    /// Number of seats with a live entry, held or awaited.
    pub fn tracked(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }
}

/// Releases its seats on drop and forgets entries nobody else is waiting on.
pub struct SeatLockGuard {
    shards: Arc<Vec<Shard>>,
    held: Vec<(i64, OwnedMutexGuard<()>)>,
}

impl Drop for SeatLockGuard {
    fn drop(&mut self) {
        for (seat_id, held) in self.held.drain(..).rev() {
            drop(held);
            let mut shard = SeatLockTable::shard_of(&self.shards, seat_id).lock();
            // Only the table's own reference left
            if shard.get(&seat_id).is_some_and(|m| Arc::strong_count(m) == 1) {
                shard.remove(&seat_id);
            }
        }
    }
}
