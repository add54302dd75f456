//! LRU Cache Metrics
//!
//! Metrics for [`BoundedLruCache`](crate::BoundedLruCache). LRU only tracks the
//! core counters; the type exists so every cache reports through its own
//! metrics struct.

use super::{CacheMetrics, CoreCacheMetrics};
use std::collections::BTreeMap;

/// LRU metrics (core counters only).
#[derive(Debug, Clone, Default)]
pub struct LruCacheMetrics {
    /// Core metrics common to all caches.
    pub core: CoreCacheMetrics,
}

impl LruCacheMetrics {
    /// Creates zeroed LRU metrics.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheMetrics for LruCacheMetrics {
    fn metrics(&self) -> BTreeMap<String, f64> {
        self.core.to_btreemap()
    }

    fn algorithm_name(&self) -> &'static str {
        "LRU"
    }
}
