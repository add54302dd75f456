//! Cache Metrics System
//!
//! Every cache in this crate keeps a small set of counters and reports them
//! through the [`CacheMetrics`] trait as a `BTreeMap`, so the output always
//! comes back in the same key order (useful for logs and test assertions).

use std::collections::BTreeMap;

pub mod lru;
pub mod memo;

pub use lru::LruCacheMetrics;
pub use memo::MemoizerMetrics;

/// Counters shared by every cache kind.
#[derive(Debug, Default, Clone)]
pub struct CoreCacheMetrics {
    /// Total number of lookups.
    pub requests: u64,

    /// Lookups answered from the cache.
    pub cache_hits: u64,

    /// Entries written into the cache.
    pub insertions: u64,

    /// Entries dropped to respect the capacity bound.
    pub evictions: u64,
}

impl CoreCacheMetrics {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a lookup that was answered from the cache.
    pub fn record_hit(&mut self) {
        self.requests += 1;
        self.cache_hits += 1;
    }

    /// Records a lookup that had to go to the provider.
    ///
    /// Misses are derived as `requests - cache_hits`.
    pub fn record_miss(&mut self) {
        self.requests += 1;
    }

    /// Records a new entry.
    pub fn record_insertion(&mut self) {
        self.insertions += 1;
    }

    /// Records a capacity eviction.
    pub fn record_eviction(&mut self) {
        self.evictions += 1;
    }

    /// Number of lookups that missed.
    pub fn cache_misses(&self) -> u64 {
        self.requests - self.cache_hits
    }

    /// Fraction of lookups answered from the cache, or 0.0 before any lookup.
    pub fn hit_rate(&self) -> f64 {
        if self.requests > 0 {
            self.cache_hits as f64 / self.requests as f64
        } else {
            0.0
        }
    }

    /// Converts the counters into a deterministic map.
    pub fn to_btreemap(&self) -> BTreeMap<String, f64> {
        let mut metrics = BTreeMap::new();
        metrics.insert("cache_hits".to_string(), self.cache_hits as f64);
        metrics.insert("cache_misses".to_string(), self.cache_misses() as f64);
        metrics.insert("evictions".to_string(), self.evictions as f64);
        metrics.insert("hit_rate".to_string(), self.hit_rate());
        metrics.insert("insertions".to_string(), self.insertions as f64);
        metrics.insert("requests".to_string(), self.requests as f64);
        metrics
    }
}

/// Uniform metrics reporting for every cache type.
pub trait CacheMetrics {
    /// Returns all metrics as key-value pairs, sorted by key.
    fn metrics(&self) -> BTreeMap<String, f64>;

    /// Short name identifying the cache kind (e.g. "LRU", "MEMO").
    fn algorithm_name(&self) -> &'static str;
}
