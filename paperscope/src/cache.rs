/*!
Single-slot TTL cache for the aggregated result set.

The whole aggregation output is cached as one unit: it is either fresh and
served as-is, or stale and replaced wholesale by the next refresh. There is
no per-journal invalidation and no background refresh; staleness is only
observed by the next read. The cache is an owned value living in server
state so tests can construct and drive it directly.
*/

use std::sync::Mutex;
use std::time::{Duration, Instant};

use common::ArticleGroup;

pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;

struct CacheEntry {
    data: Vec<ArticleGroup>,
    stamped_at: Instant,
}

pub struct AggregationCache {
    ttl: Duration,
    slot: Mutex<Option<CacheEntry>>,
}

impl AggregationCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
        }
    }

    /// Returns the cached groups while they are younger than the TTL.
    /// A miss (None) is distinct from a cached empty result (Some(vec![])).
    pub fn get(&self) -> Option<Vec<ArticleGroup>> {
        self.get_at(Instant::now())
    }

    /// Replaces the slot contents and restamps the entry.
    pub fn set(&self, data: Vec<ArticleGroup>) {
        self.set_at(data, Instant::now());
    }

    /// Clock-explicit variant of `get`, for deterministic tests.
    pub fn get_at(&self, now: Instant) -> Option<Vec<ArticleGroup>> {
        let slot = self.slot.lock().expect("cache lock poisoned");
        slot.as_ref().and_then(|entry| {
            if now.duration_since(entry.stamped_at) < self.ttl {
                Some(entry.data.clone())
            } else {
                None
            }
        })
    }

    /// Clock-explicit variant of `set`, for deterministic tests.
    pub fn set_at(&self, data: Vec<ArticleGroup>, now: Instant) {
        let mut slot = self.slot.lock().expect("cache lock poisoned");
        *slot = Some(CacheEntry {
            data,
            stamped_at: now,
        });
    }
}
