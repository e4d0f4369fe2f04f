//! Process-local, capacity-bounded stationboard response cache.
//!
//! Entries are evicted in insertion order once the cache holds more than
//! `capacity` entries; reads do not refresh an entry's position. Entries
//! older than `max_age` are dropped on lookup. The cache is not shared
//! between instances.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use super::cache_key::CacheKey;
use super::stationboard::StationboardResponse;

/// A cache hit.
#[derive(Debug, Clone)]
pub struct CachedBoard {
    /// Stored response.
    pub response: Arc<StationboardResponse>,
    /// Time since it was stored.
    pub age: Duration,
}

#[derive(Debug)]
struct Entry {
    response: Arc<StationboardResponse>,
    stored_at: Instant,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<CacheKey, Entry>,
    order: VecDeque<CacheKey>,
}

impl Inner {
    fn forget(&mut self, key: &CacheKey) {
        self.entries.remove(key);
        self.order.retain(|k| k != key);
    }
}

/// Bounded response cache keyed by [`CacheKey`].
#[derive(Debug)]
pub struct ResponseCache {
    inner: Mutex<Inner>,
    capacity: usize,
    max_age: Duration,
}

impl ResponseCache {
    /// Creates an empty cache. A zero capacity is raised to one.
    #[must_use]
    pub fn new(capacity: usize, max_age: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            capacity: capacity.max(1),
            max_age,
        }
    }

    /// Returns the entry for `key` if it is younger than `max_age`.
    pub async fn get(&self, key: &CacheKey) -> Option<CachedBoard> {
        let mut inner = self.inner.lock().await;
        let age = inner.entries.get(key)?.stored_at.elapsed();
        if age > self.max_age {
            inner.forget(key);
            return None;
        }
        inner.entries.get(key).map(|entry| CachedBoard {
            response: Arc::clone(&entry.response),
            age,
        })
    }

    /// Stores `response` under `key` as the newest entry, evicting the
    /// oldest entries while over capacity.
    pub async fn insert(&self, key: CacheKey, response: Arc<StationboardResponse>) {
        let mut inner = self.inner.lock().await;
        if inner.entries.contains_key(&key) {
            inner.order.retain(|k| k != &key);
        }
        inner.order.push_back(key.clone());
        inner.entries.insert(
            key,
            Entry {
                response,
                stored_at: Instant::now(),
            },
        );

        while inner.entries.len() > self.capacity {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            inner.entries.remove(&oldest);
            tracing::debug!(key = %oldest, "evicted stationboard cache entry");
        }
    }

    /// Number of stored entries, expired ones included until looked up.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    /// Returns `true` if nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.entries.is_empty()
    }

    /// Configured capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Configured staleness ceiling.
    #[must_use]
    pub const fn max_age(&self) -> Duration {
        self.max_age
    }
}
