//! Byte-string entry stores.
//!
//! A memoizer persists entries through the [`EntryStore`] trait: a flat map
//! from a key string (a rendered [`Digest`](crate::Digest)) to a payload and
//! its creation time. Two backends implement it with the same contract:
//!
//! | Backend | Layout | Durability |
//! |---------|--------|------------|
//! | [`FileStore`] | `<root>/<key>`, one file per entry, mtime = creation time | each write is atomic (temp file + rename) |
//! | [`TableStore`] | one SQLite table `(rowid, digest UNIQUE, created_at, payload)` | writes batched into timed transactions |
//!
//! `clear_all` is destructive and leaves the store empty; the backing
//! directory or table is recreated lazily (file) or immediately (table).

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::CacheError;

mod file;
mod table;

pub use file::FileStore;
pub use table::TableStore;

/// One stored entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    /// Encoded payload. May be empty.
    pub payload: Vec<u8>,
    /// When the entry was written.
    pub created_at: SystemTime,
}

impl StoredEntry {
    /// Age of the entry relative to `now`. Entries from the future are zero
    /// seconds old.
    pub fn age(&self, now: SystemTime) -> Duration {
        now.duration_since(self.created_at).unwrap_or(Duration::ZERO)
    }
}

/// A persistent map from key strings to payloads.
///
/// Implementations must be usable from several threads at once.
pub trait EntryStore: Send + Sync {
    /// Reads the entry for `key`.
    fn get(&self, key: &str) -> Result<Option<StoredEntry>, CacheError>;

    /// Writes (or overwrites) the entry for `key`.
    fn put(&self, key: &str, payload: &[u8], created_at: SystemTime) -> Result<(), CacheError>;

    /// Deletes the entry for `key`. Deleting an absent key succeeds.
    fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Deletes every entry.
    fn clear_all(&self) -> Result<(), CacheError>;

    /// Returns `true` if an entry exists for `key`, regardless of age.
    fn exists(&self, key: &str) -> Result<bool, CacheError>;

    /// Makes buffered writes durable.
    fn flush(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Rejects keys that are not plain `[A-Za-z0-9_-]+` tokens.
pub(crate) fn validate_key(key: &str) -> Result<(), CacheError> {
    let valid = !key.is_empty()
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(CacheError::InvalidKey {
            key: key.to_string(),
        })
    }
}

pub(crate) fn to_unix_millis(time: SystemTime) -> i64 {
    let millis = time
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis();
    i64::try_from(millis).unwrap_or(i64::MAX)
}

pub(crate) fn from_unix_millis(millis: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(u64::try_from(millis).unwrap_or(0))
}
