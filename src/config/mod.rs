//! Cache Configuration Module
//!
//! Configuration structures for every cache in this crate. Each cache type has
//! its own dedicated configuration struct with public fields and a `Default`
//! implementation, so a config is built with struct-update syntax:
//!
//! ```
//! use memo_cache::config::BackgroundLruCacheConfig;
//!
//! let config = BackgroundLruCacheConfig {
//!     max_count: 500,
//!     ..Default::default()
//! };
//! assert_eq!(config.thread_count, 2);
//! ```
//!
//! | Config | Used by |
//! |--------|---------|
//! | `BoundedLruCacheConfig` | [`BoundedLruCache`](crate::BoundedLruCache) |
//! | `BackgroundLruCacheConfig` | [`BackgroundLruCache`](crate::BackgroundLruCache) |
//! | `MemoizerConfig` | [`Memoizer`](crate::Memoizer) |
//! | `TableStoreConfig` | [`TableStore`](crate::store::TableStore) |

pub mod background;
pub mod lru;
pub mod memo;

pub use background::BackgroundLruCacheConfig;
pub use lru::BoundedLruCacheConfig;
pub use memo::{MemoizerConfig, TableStoreConfig};
