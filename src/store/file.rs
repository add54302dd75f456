//! One file per entry.

use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use super::{validate_key, EntryStore, StoredEntry};
use crate::error::CacheError;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Stores each entry as `<root>/<key>`.
///
/// The payload is the whole file; a zero-length file is a valid entry. The
/// file's modification time is the entry's creation time. Writes go to a
/// hidden temporary file in the same directory which is then renamed over the
/// target, so readers never observe a half-written entry.
///
/// The root directory is created on first write and removed entirely by
/// [`clear_all`](EntryStore::clear_all).
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Creates a store rooted at `root`. Nothing is touched on disk yet.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The directory holding the entries.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, key: &str) -> Result<PathBuf, CacheError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn temp_path(&self, key: &str) -> PathBuf {
        let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.root
            .join(format!(".{key}.{}.{n}.tmp", std::process::id()))
    }

    fn write_temp(&self, temp: &Path, payload: &[u8], created_at: SystemTime) -> std::io::Result<()> {
        let mut file = File::create(temp)?;
        file.write_all(payload)?;
        file.set_modified(created_at)?;
        file.sync_data()
    }
}

impl EntryStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<StoredEntry>, CacheError> {
        let path = self.entry_path(key)?;
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::io(path, e)),
        };
        let created_at = file
            .metadata()
            .and_then(|meta| meta.modified())
            .map_err(|e| CacheError::io(&path, e))?;
        let mut payload = Vec::new();
        file.read_to_end(&mut payload)
            .map_err(|e| CacheError::io(&path, e))?;
        Ok(Some(StoredEntry {
            payload,
            created_at,
        }))
    }

    fn put(&self, key: &str, payload: &[u8], created_at: SystemTime) -> Result<(), CacheError> {
        let path = self.entry_path(key)?;
        fs::create_dir_all(&self.root).map_err(|e| CacheError::io(&self.root, e))?;

        let temp = self.temp_path(key);
        let written = self
            .write_temp(&temp, payload, created_at)
            .and_then(|()| fs::rename(&temp, &path));
        if let Err(e) = written {
            let _ = fs::remove_file(&temp);
            return Err(CacheError::io(path, e));
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), CacheError> {
        let path = self.entry_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::io(path, e)),
        }
    }

    fn clear_all(&self) -> Result<(), CacheError> {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::io(&self.root, e)),
        }
    }

    fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let path = self.entry_path(key)?;
        match fs::metadata(&path) {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::io(path, e)),
        }
    }
}
