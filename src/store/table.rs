//! SQLite-backed entry table.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use super::{from_unix_millis, to_unix_millis, validate_key, EntryStore, StoredEntry};
use crate::config::TableStoreConfig;
use crate::error::CacheError;
use crate::lru::LruSegment;

/// Stores entries as rows of one SQLite table.
///
/// Writes are batched: the first write after a commit opens a transaction,
/// and the transaction is committed by the first write that finds it older
/// than [`commit_interval`](TableStoreConfig::commit_interval). Deletes,
/// clears, [`flush`](EntryStore::flush) and dropping the store commit
/// immediately. Until then, a crash loses the batched writes, and other
/// connections to the same database do not see them.
///
/// Recently read or written rows are kept in a small LRU row cache, so the
/// store assumes it is the only writer of its table.
pub struct TableStore {
    inner: Mutex<TableInner>,
    table: String,
    commit_interval: Duration,
    path: Option<PathBuf>,
}

struct TableInner {
    conn: Connection,
    txn_started: Option<Instant>,
    rows: LruSegment<String, StoredEntry>,
}

impl TableStore {
    /// Opens (creating if needed) the database at `path` and its entry table.
    pub fn open(path: impl AsRef<Path>, config: TableStoreConfig) -> Result<Self, CacheError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| CacheError::io(parent, e))?;
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn, config, Some(path.to_path_buf()))
    }

    /// Creates a store in a private in-memory database.
    pub fn in_memory(config: TableStoreConfig) -> Result<Self, CacheError> {
        Self::with_connection(Connection::open_in_memory()?, config, None)
    }

    fn with_connection(
        conn: Connection,
        config: TableStoreConfig,
        path: Option<PathBuf>,
    ) -> Result<Self, CacheError> {
        validate_table_name(&config.table)?;
        conn.busy_timeout(config.busy_timeout)?;
        create_table(&conn, &config.table)?;
        debug!(table = %config.table, path = ?path, "opened entry table");

        Ok(Self {
            inner: Mutex::new(TableInner {
                conn,
                txn_started: None,
                rows: LruSegment::new(config.row_cache_capacity),
            }),
            table: config.table,
            commit_interval: config.commit_interval,
            path,
        })
    }

    /// Name of the entry table.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Database file, or `None` for an in-memory store.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns `true` while writes are waiting for a commit.
    pub fn has_pending_writes(&self) -> bool {
        self.inner.lock().txn_started.is_some()
    }
}

impl TableInner {
    fn begin(&mut self) -> Result<(), CacheError> {
        if self.txn_started.is_none() {
            if self.conn.is_autocommit() {
                self.conn.execute_batch("BEGIN")?;
            }
            self.txn_started = Some(Instant::now());
        }
        Ok(())
    }

    /// A failed COMMIT leaves the transaction open, so `txn_started` stays
    /// set and the next commit retries it.
    fn commit(&mut self) -> Result<(), CacheError> {
        if let Some(started) = self.txn_started {
            self.conn.execute_batch("COMMIT")?;
            self.txn_started = None;
            debug!(open_for = ?started.elapsed(), "committed entry batch");
        }
        Ok(())
    }

    fn commit_if_due(&mut self, interval: Duration) -> Result<(), CacheError> {
        match self.txn_started {
            Some(started) if started.elapsed() >= interval => self.commit(),
            _ => Ok(()),
        }
    }
}

impl EntryStore for TableStore {
    fn get(&self, key: &str) -> Result<Option<StoredEntry>, CacheError> {
        validate_key(key)?;
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.rows.get(key) {
            return Ok(Some(entry.clone()));
        }

        let sql = format!(
            "SELECT created_at, payload FROM {} WHERE digest = ?1",
            self.table
        );
        let row = inner
            .conn
            .query_row(&sql, params![key], |row| {
                Ok(StoredEntry {
                    created_at: from_unix_millis(row.get(0)?),
                    payload: row.get(1)?,
                })
            })
            .optional()?;
        if let Some(entry) = &row {
            inner.rows.put(key.to_string(), entry.clone());
        }
        Ok(row)
    }

    fn put(&self, key: &str, payload: &[u8], created_at: SystemTime) -> Result<(), CacheError> {
        validate_key(key)?;
        let mut inner = self.inner.lock();
        inner.begin()?;

        let sql = format!(
            "INSERT INTO {} (digest, created_at, payload) VALUES (?1, ?2, ?3) \
             ON CONFLICT(digest) DO UPDATE SET \
             created_at = excluded.created_at, payload = excluded.payload",
            self.table
        );
        inner
            .conn
            .execute(&sql, params![key, to_unix_millis(created_at), payload])?;
        inner.rows.put(
            key.to_string(),
            StoredEntry {
                payload: payload.to_vec(),
                created_at,
            },
        );
        // The row is written into the open batch; a busy commit is retried later.
        if let Err(err) = inner.commit_if_due(self.commit_interval) {
            warn!(table = %self.table, error = %err, "deferred commit of entry batch");
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), CacheError> {
        validate_key(key)?;
        let mut inner = self.inner.lock();
        inner.rows.remove(key);
        let sql = format!("DELETE FROM {} WHERE digest = ?1", self.table);
        inner.conn.execute(&sql, params![key])?;
        inner.commit()
    }

    fn clear_all(&self) -> Result<(), CacheError> {
        let mut inner = self.inner.lock();
        inner.rows.clear();
        inner.commit()?;
        inner
            .conn
            .execute_batch(&format!("DROP TABLE IF EXISTS {}", self.table))?;
        create_table(&inner.conn, &self.table)?;
        debug!(table = %self.table, "cleared entry table");
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool, CacheError> {
        validate_key(key)?;
        let inner = self.inner.lock();
        if inner.rows.contains_key(key) {
            return Ok(true);
        }
        let sql = format!("SELECT 1 FROM {} WHERE digest = ?1", self.table);
        let found = inner
            .conn
            .query_row(&sql, params![key], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    fn flush(&self) -> Result<(), CacheError> {
        self.inner.lock().commit()
    }
}

impl Drop for TableStore {
    fn drop(&mut self) {
        if let Err(err) = self.inner.get_mut().commit() {
            warn!(table = %self.table, error = %err, "failed to commit pending entries");
        }
    }
}

impl std::fmt::Debug for TableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableStore")
            .field("table", &self.table)
            .field("path", &self.path)
            .field("commit_interval", &self.commit_interval)
            .finish()
    }
}

fn validate_table_name(table: &str) -> Result<(), CacheError> {
    let valid = table
        .bytes()
        .next()
        .is_some_and(|b| b.is_ascii_alphabetic() || b == b'_')
        && table.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(CacheError::InvalidConfig {
            reason: format!("table name {table:?} is not a plain identifier"),
        })
    }
}

fn create_table(conn: &Connection, table: &str) -> Result<(), CacheError> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            rowid INTEGER PRIMARY KEY,
            digest TEXT NOT NULL UNIQUE,
            created_at INTEGER NOT NULL,
            payload BLOB NOT NULL
        )"
    ))?;
    Ok(())
}
