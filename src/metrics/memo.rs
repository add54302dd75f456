//! Memoizer Metrics
//!
//! Counters for [`Memoizer`](crate::Memoizer). On top of the core counters the
//! memoizer tracks the ways a stored entry can fail to produce a hit, and
//! backend writes that were dropped.

use super::{CacheMetrics, CoreCacheMetrics};
use std::collections::BTreeMap;

/// Memoizer-specific metrics.
#[derive(Debug, Clone, Default)]
pub struct MemoizerMetrics {
    /// Core metrics common to all caches. `insertions` counts persisted
    /// entries (values and remembered failures).
    pub core: CoreCacheMetrics,

    /// Entries found but older than the configured maximum age.
    pub stale_entries: u64,

    /// Entries found but not decodable.
    pub corrupt_entries: u64,

    /// Lookups answered by replaying a remembered provider failure.
    pub replayed_failures: u64,

    /// Backend reads that failed and were treated as misses.
    pub read_failures: u64,

    /// Backend writes that failed and were dropped.
    pub write_failures: u64,
}

impl MemoizerMetrics {
    /// Creates zeroed memoizer metrics.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheMetrics for MemoizerMetrics {
    fn metrics(&self) -> BTreeMap<String, f64> {
        let mut metrics = self.core.to_btreemap();
        metrics.insert("corrupt_entries".to_string(), self.corrupt_entries as f64);
        metrics.insert("read_failures".to_string(), self.read_failures as f64);
        metrics.insert(
            "replayed_failures".to_string(),
            self.replayed_failures as f64,
        );
        metrics.insert("stale_entries".to_string(), self.stale_entries as f64);
        metrics.insert("write_failures".to_string(), self.write_failures as f64);
        metrics
    }

    fn algorithm_name(&self) -> &'static str {
        "MEMO"
    }
}
