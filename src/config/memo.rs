//! Configuration for the persistent memoizer and its table backend.

use core::fmt;
use core::time::Duration;

/// Configuration for a [`Memoizer`](crate::Memoizer).
///
/// # Fields
///
/// - `max_age`: Entries older than this are treated as misses by
///   [`get_or_compute`](crate::Memoizer::get_or_compute) and overwritten on
///   repopulation. `None` means entries never go stale.
/// - `remember_exceptions`: When set, a provider failure is persisted and
///   replayed to later callers without running the provider again. When
///   cleared, previously persisted failures are ignored.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoizerConfig {
    /// Maximum age of a usable entry.
    pub max_age: Option<Duration>,
    /// Persist and replay provider failures.
    pub remember_exceptions: bool,
}

impl fmt::Debug for MemoizerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoizerConfig")
            .field("max_age", &self.max_age)
            .field("remember_exceptions", &self.remember_exceptions)
            .finish()
    }
}

/// Configuration for a [`TableStore`](crate::store::TableStore).
///
/// # Fields
///
/// - `table`: Name of the table holding the entries. Must be a plain SQL
///   identifier (ASCII letters, digits, underscores).
/// - `commit_interval`: Writes accumulate in one transaction that is committed
///   once this much time has passed since it was opened. Deletes, clears,
///   explicit flushes and dropping the store also commit.
/// - `row_cache_capacity`: Number of recently read rows kept in memory in front
///   of the table. `0` disables the row cache.
/// - `busy_timeout`: How long a statement waits for a lock held by another
///   connection before failing with `SQLITE_BUSY`.
#[derive(Clone, PartialEq, Eq)]
pub struct TableStoreConfig {
    /// Table name.
    pub table: String,
    /// Time between batched commits.
    pub commit_interval: Duration,
    /// Size of the in-memory row cache.
    pub row_cache_capacity: usize,
    /// Lock wait before a statement gives up.
    pub busy_timeout: Duration,
}

impl Default for TableStoreConfig {
    fn default() -> Self {
        Self {
            table: String::from("memo_entries"),
            commit_interval: Duration::from_secs(60),
            row_cache_capacity: 256,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl fmt::Debug for TableStoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableStoreConfig")
            .field("table", &self.table)
            .field("commit_interval", &self.commit_interval)
            .field("row_cache_capacity", &self.row_cache_capacity)
            .field("busy_timeout", &self.busy_timeout)
            .finish()
    }
}
