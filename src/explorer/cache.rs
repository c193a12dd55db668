//! TTL response cache with stale-read fallback.
//!
//! Entries are never evicted; they live until overwritten or explicitly
//! invalidated. Keys are bounded by the (address, path) pairs in active use.

use std::time::Duration;

use dashmap::{DashMap, DashSet};
use tokio::time::Instant;

use crate::observability::metrics;

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    data: T,
    stored_at: Instant,
}

/// Thread-safe keyed cache.
#[derive(Debug)]
pub struct ResponseCache<T> {
    entries: DashMap<String, CacheEntry<T>>,
    refreshing: DashSet<String>,
    refresh_ahead_ratio: Option<f64>,
}

impl<T: Clone> ResponseCache<T> {
    pub fn new(refresh_ahead_ratio: Option<f64>) -> Self {
        Self {
            entries: DashMap::new(),
            refreshing: DashSet::new(),
            refresh_ahead_ratio,
        }
    }

    /// Fresh value, if one was stored no more than `max_age` ago.
    pub fn get(&self, key: &str, max_age: Duration) -> Option<T> {
        self.get_at(key, max_age, Instant::now())
    }

    pub fn get_at(&self, key: &str, max_age: Duration, now: Instant) -> Option<T> {
        let entry = self.entries.get(key)?;
        if now.saturating_duration_since(entry.stored_at) <= max_age {
            metrics::record_cache_event("hit");
            Some(entry.data.clone())
        } else {
            None
        }
    }

    /// Latest value regardless of age.
    pub fn get_stale(&self, key: &str) -> Option<T> {
        self.entries.get(key).map(|entry| entry.data.clone())
    }

    /// Store a value (last writer wins).
    pub fn set(&self, key: &str, data: T) {
        self.set_at(key, data, Instant::now());
    }

    pub fn set_at(&self, key: &str, data: T, now: Instant) {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                data,
                stored_at: now,
            },
        );
    }

    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Whether a fresh entry has aged past the refresh-ahead point.
    pub fn wants_refresh_at(&self, key: &str, ttl: Duration, now: Instant) -> bool {
        let Some(ratio) = self.refresh_ahead_ratio else {
            return false;
        };
        self.entries.get(key).is_some_and(|entry| {
            let age = now.saturating_duration_since(entry.stored_at);
            age <= ttl && age >= ttl.mul_f64(ratio)
        })
    }

    /// Claim the background refresh for `key`. Only one refresh per key
    /// runs at a time; the claim must be released with `end_refresh`.
    pub fn begin_refresh(&self, key: &str) -> bool {
        self.refreshing.insert(key.to_string())
    }

    pub fn end_refresh(&self, key: &str) {
        self.refreshing.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
