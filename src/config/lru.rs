//! Configuration for the synchronous bounded LRU cache.

use core::fmt;

/// Configuration for a [`BoundedLruCache`](crate::BoundedLruCache).
///
/// # Fields
///
/// - `max_count`: Maximum number of entries kept. A value of `0` is allowed and
///   turns the cache into a pass-through: every lookup calls the provider and
///   nothing is retained.
///
/// # Examples
///
/// ```
/// use memo_cache::config::BoundedLruCacheConfig;
/// use memo_cache::BoundedLruCache;
///
/// let config = BoundedLruCacheConfig { max_count: 10 };
/// let cache = BoundedLruCache::infallible(config, |x: &u32| x * 2);
/// assert_eq!(cache.value(&21), 42);
/// ```
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BoundedLruCacheConfig {
    /// Maximum number of key-value pairs the cache retains.
    pub max_count: usize,
}

impl Default for BoundedLruCacheConfig {
    fn default() -> Self {
        Self { max_count: 1000 }
    }
}

impl fmt::Debug for BoundedLruCacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedLruCacheConfig")
            .field("max_count", &self.max_count)
            .finish()
    }
}
