#![doc = include_str!("../README.md")]
//!
//! ---
//!
//! # Code Reference
//!
//! ## Which cache?
//!
//! | Type | Lookup on a miss | Survives restart | Typical use |
//! |------|------------------|------------------|-------------|
//! | [`BoundedLruCache`] | caller runs the provider | no | memoizing a pure function in memory |
//! | [`BackgroundLruCache`] | returns a placeholder, a worker runs the provider | no | UI-style lookups that must never block |
//! | [`Memoizer`] | caller runs the provider, result persisted | yes | expensive computations reused across runs |
//!
//! ## Bounded LRU
//!
//! ```rust
//! use memo_cache::BoundedLruCache;
//! use memo_cache::config::BoundedLruCacheConfig;
//!
//! let cache = BoundedLruCache::infallible(BoundedLruCacheConfig { max_count: 10 }, |x: &u32| x * 2);
//! for i in 0..20 {
//!     assert_eq!(cache.value(&i), i * 2);
//! }
//! assert_eq!(cache.len(), 10);
//! assert!(cache.contains_key(&10));
//! assert!(!cache.contains_key(&0));
//! ```
//!
//! ## Persistent memoizer
//!
//! ```rust
//! use memo_cache::{MemoizerConfig, MemoizerRegistry};
//!
//! let dir = std::env::temp_dir().join(format!("memo-cache-doc-{}", std::process::id()));
//! let registry = MemoizerRegistry::file_backed(&dir, MemoizerConfig::default());
//! let lookup = registry.local("users::lookup").unwrap();
//!
//! let name = lookup.get_cached("John", |id: &str| format!("Looked up: {id}")).unwrap();
//! assert_eq!(name, "Looked up: John");
//!
//! // Served from disk; the provider does not run.
//! let name = lookup.get_cached("John", |_: &str| String::from("never")).unwrap();
//! assert_eq!(name, "Looked up: John");
//!
//! lookup.clear().unwrap();
//! # let _ = std::fs::remove_dir_all(&dir);
//! ```

/// Doubly linked recency list.
///
/// **Note**: This module is internal infrastructure. It exposes raw pointer
/// operations that require careful invariant maintenance.
pub(crate) mod list;

/// Cache configuration structures.
pub mod config;

/// Error types.
pub mod error;

/// Bounded LRU algorithm and the synchronous provider-backed cache.
pub mod lru;

/// Background-populated LRU cache with a shared worker pool.
pub mod background;

/// Content digests used as persistent cache keys.
pub mod digest;

/// Deterministic encoding of keys and stored results.
pub mod codec;

/// Byte-string entry stores backing the memoizer.
pub mod store;

/// Persistent memoizer and its per-identity registry.
pub mod memo;

/// Cache metrics system.
///
/// Each cache reports its counters through the common [`metrics::CacheMetrics`]
/// interface.
pub mod metrics;

pub use background::{BackgroundLruCache, EntryState, LoadError};
pub use codec::{CachedResult, ErrorDescriptor, Remember};
pub use config::{BackgroundLruCacheConfig, BoundedLruCacheConfig, MemoizerConfig, TableStoreConfig};
pub use digest::Digest;
pub use error::{CacheError, MemoError};
pub use lru::{BoundedLruCache, CacheEntry, LruSegment};
pub use memo::{Memoizer, MemoizerRegistry};
pub use store::{EntryStore, FileStore, StoredEntry, TableStore};
