//! Configuration for the background-populated LRU cache.

use core::fmt;

/// Configuration for a [`BackgroundLruCache`](crate::BackgroundLruCache).
///
/// # Fields
///
/// - `max_count`: Maximum number of entries (loading or complete) kept in the
///   shared store. Also bounds the number of pending load requests.
/// - `thread_count`: Upper bound on worker threads that populate entries. The
///   workers are shared by every view created through
///   [`create_shared`](crate::BackgroundLruCache::create_shared). Values below
///   one are treated as one.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BackgroundLruCacheConfig {
    /// Maximum number of entries and pending requests.
    pub max_count: usize,
    /// Maximum number of concurrently running worker threads.
    pub thread_count: usize,
}

impl Default for BackgroundLruCacheConfig {
    fn default() -> Self {
        Self {
            max_count: 1000,
            thread_count: 2,
        }
    }
}

impl fmt::Debug for BackgroundLruCacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundLruCacheConfig")
            .field("max_count", &self.max_count)
            .field("thread_count", &self.thread_count)
            .finish()
    }
}
