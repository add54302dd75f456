//! Persistent memoization.
//!
//! A [`Memoizer`] answers `get_or_compute(key, provider)` from an
//! [`EntryStore`], calling the provider only when no usable entry exists and
//! persisting what it returns. Entries are keyed by
//! [`Digest::of_call`]`(identity, key)`, so one store can serve several call
//! sites as long as each memoizer has its own identity.
//!
//! # Entry validity
//!
//! A stored entry is used when it exists, decodes, and is younger than
//! `max_age` (if set). Stale entries are overwritten by the next successful
//! computation and are never removed on their own. [`Memoizer::contains`]
//! ignores `max_age`: it reports whether an entry exists, not whether
//! `get_or_compute` would use it.
//!
//! # Failures
//!
//! Backend errors never fail a call. A failed read is a miss and a failed
//! write is dropped; both are logged with `tracing` and counted in the
//! metrics. With `remember_exceptions` set, provider failures are stored as
//! [`ErrorDescriptor`]s and replayed through [`Remember::replay`] on later
//! calls. With it cleared, stored failures are ignored and recomputed.
//!
//! # Registry
//!
//! [`MemoizerRegistry`] creates one memoizer per identity on first use and
//! hands out shared handles afterwards. [`MemoizerRegistry::global`] is a
//! process-wide instance rooted at `$MEMO_CACHE_DIR`.

use core::fmt;
use core::time::Duration;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::SystemTime;

#[cfg(feature = "hashbrown")]
use hashbrown::HashMap;
#[cfg(not(feature = "hashbrown"))]
use std::collections::HashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::codec::{self, CachedResult, ErrorDescriptor, Remember};
use crate::config::{MemoizerConfig, TableStoreConfig};
use crate::digest::Digest;
use crate::error::{CacheError, MemoError};
use crate::metrics::{CacheMetrics, MemoizerMetrics};
use crate::store::{EntryStore, FileStore, TableStore};

/// Environment variable naming the root directory of the global registry.
pub const CACHE_DIR_ENV: &str = "MEMO_CACHE_DIR";

/// What a store lookup produced.
enum Lookup<V> {
    Hit(V),
    Failure(ErrorDescriptor),
    Miss,
}

/// Persists provider results for one call site.
pub struct Memoizer {
    identity: String,
    store: Box<dyn EntryStore>,
    config: Mutex<MemoizerConfig>,
    metrics: Mutex<MemoizerMetrics>,
}

impl Memoizer {
    /// Creates a memoizer for the call site `identity` on top of `store`.
    pub fn new(
        identity: impl Into<String>,
        store: Box<dyn EntryStore>,
        config: MemoizerConfig,
    ) -> Self {
        Self {
            identity: identity.into(),
            store,
            config: Mutex::new(config),
            metrics: Mutex::new(MemoizerMetrics::new()),
        }
    }

    /// The call-site identity mixed into every digest.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// The backing store.
    pub fn store(&self) -> &dyn EntryStore {
        self.store.as_ref()
    }

    /// Returns the stored result for `key`, or runs `provider` and stores its
    /// result.
    ///
    /// The provider's error comes back as [`MemoError::Provider`], both when
    /// it fails now and when a remembered failure is replayed.
    /// [`MemoError::Serialization`] means `key` or the computed value could
    /// not be encoded; nothing is stored in that case.
    ///
    /// # Example
    ///
    /// ```
    /// use memo_cache::{ErrorDescriptor, Memoizer, MemoizerConfig};
    /// use memo_cache::store::TableStore;
    ///
    /// let store = TableStore::in_memory(Default::default()).unwrap();
    /// let memo = Memoizer::new("lengths", Box::new(store), MemoizerConfig::default());
    ///
    /// let len = memo
    ///     .get_or_compute("hello", |s: &str| Ok::<_, ErrorDescriptor>(s.len()))
    ///     .unwrap();
    /// assert_eq!(len, 5);
    ///
    /// // The second provider is never called.
    /// let len = memo
    ///     .get_or_compute("hello", |_: &str| Ok::<usize, ErrorDescriptor>(0))
    ///     .unwrap();
    /// assert_eq!(len, 5);
    /// ```
    pub fn get_or_compute<K, V, E, F>(&self, key: &K, provider: F) -> Result<V, MemoError<E>>
    where
        K: Serialize + ?Sized,
        V: Serialize + DeserializeOwned,
        E: Remember,
        F: FnOnce(&K) -> Result<V, E>,
    {
        let digest = Digest::of_call(&self.identity, key).map_err(MemoError::Serialization)?;
        let config = *self.config.lock();

        match self.lookup::<V>(&digest, config.max_age) {
            Lookup::Hit(value) => {
                self.metrics.lock().core.record_hit();
                return Ok(value);
            }
            Lookup::Failure(descriptor) if config.remember_exceptions => {
                let mut metrics = self.metrics.lock();
                metrics.core.record_hit();
                metrics.replayed_failures += 1;
                drop(metrics);
                debug!(identity = %self.identity, %digest, kind = %descriptor.kind, "replaying remembered failure");
                return Err(MemoError::Provider(E::replay(descriptor)));
            }
            Lookup::Failure(_) => {
                debug!(identity = %self.identity, %digest, "ignoring remembered failure");
                self.metrics.lock().core.record_miss();
            }
            Lookup::Miss => self.metrics.lock().core.record_miss(),
        }

        match provider(key) {
            Ok(value) => {
                let payload = codec::encode_value(&value).map_err(MemoError::Serialization)?;
                self.persist(&digest, &payload);
                Ok(value)
            }
            Err(err) => {
                if config.remember_exceptions {
                    match codec::encode_failure(&err.describe()) {
                        Ok(payload) => self.persist(&digest, &payload),
                        Err(encode_err) => {
                            warn!(identity = %self.identity, %digest, error = %encode_err, "failed to encode provider failure");
                        }
                    }
                }
                Err(MemoError::Provider(err))
            }
        }
    }

    /// Like [`get_or_compute`](Self::get_or_compute) for providers that cannot
    /// fail. Remembered failures left by other callers are recomputed.
    pub fn get_cached<K, V, F>(&self, key: &K, provider: F) -> Result<V, CacheError>
    where
        K: Serialize + ?Sized,
        V: Serialize + DeserializeOwned,
        F: FnOnce(&K) -> V,
    {
        let digest = Digest::of_call(&self.identity, key)?;
        let max_age = self.config.lock().max_age;
        match self.lookup::<V>(&digest, max_age) {
            Lookup::Hit(value) => {
                self.metrics.lock().core.record_hit();
                return Ok(value);
            }
            Lookup::Failure(_) | Lookup::Miss => self.metrics.lock().core.record_miss(),
        }

        let value = provider(key);
        self.persist(&digest, &codec::encode_value(&value)?);
        Ok(value)
    }

    fn lookup<V: DeserializeOwned>(&self, digest: &Digest, max_age: Option<Duration>) -> Lookup<V> {
        let key = digest.to_hex();
        let entry = match self.store.get(&key) {
            Ok(Some(entry)) => entry,
            Ok(None) => return Lookup::Miss,
            Err(err) => {
                warn!(identity = %self.identity, %digest, error = %err, "cache read failed, recomputing");
                self.metrics.lock().read_failures += 1;
                return Lookup::Miss;
            }
        };

        if let Some(max_age) = max_age {
            let age = entry.age(SystemTime::now());
            if age >= max_age {
                debug!(identity = %self.identity, %digest, ?age, "stale entry");
                self.metrics.lock().stale_entries += 1;
                return Lookup::Miss;
            }
        }

        match codec::decode_payload::<V>(&entry.payload) {
            Ok(CachedResult::Value(value)) => Lookup::Hit(value),
            Ok(CachedResult::Failure(descriptor)) => Lookup::Failure(descriptor),
            Err(err) => {
                warn!(identity = %self.identity, %digest, error = %err, "corrupt cache entry, recomputing");
                self.metrics.lock().corrupt_entries += 1;
                Lookup::Miss
            }
        }
    }

    fn persist(&self, digest: &Digest, payload: &[u8]) {
        match self.store.put(&digest.to_hex(), payload, SystemTime::now()) {
            Ok(()) => self.metrics.lock().core.record_insertion(),
            Err(err) => {
                warn!(identity = %self.identity, %digest, error = %err, "cache write failed");
                self.metrics.lock().write_failures += 1;
            }
        }
    }

    /// Returns `true` if an entry exists for `key`, stale or not.
    ///
    /// Keys that cannot be encoded and backend errors both report `false`.
    pub fn contains<K: Serialize + ?Sized>(&self, key: &K) -> bool {
        let exists = Digest::of_call(&self.identity, key)
            .and_then(|digest| self.store.exists(&digest.to_hex()));
        match exists {
            Ok(exists) => exists,
            Err(err) => {
                debug!(identity = %self.identity, error = %err, "existence check failed");
                false
            }
        }
    }

    /// Same as [`contains`](Self::contains).
    pub fn is_cached<K: Serialize + ?Sized>(&self, key: &K) -> bool {
        self.contains(key)
    }

    /// Deletes the entry for `key`.
    pub fn reset<K: Serialize + ?Sized>(&self, key: &K) -> Result<(), CacheError> {
        let digest = Digest::of_call(&self.identity, key)?;
        self.store.delete(&digest.to_hex())
    }

    /// Same as [`reset`](Self::reset).
    pub fn remove<K: Serialize + ?Sized>(&self, key: &K) -> Result<(), CacheError> {
        self.reset(key)
    }

    /// Deletes every entry of the backing store.
    ///
    /// The store is shared by everything written through it, not only by this
    /// memoizer's identity.
    pub fn clear(&self) -> Result<(), CacheError> {
        debug!(identity = %self.identity, "clearing memoizer store");
        self.store.clear_all()
    }

    /// Makes batched writes durable.
    pub fn flush(&self) -> Result<(), CacheError> {
        self.store.flush()
    }

    /// Maximum age of a usable entry.
    pub fn max_age(&self) -> Option<Duration> {
        self.config.lock().max_age
    }

    /// Changes the maximum age. Applies to entries already stored.
    pub fn set_max_age(&self, max_age: Option<Duration>) {
        self.config.lock().max_age = max_age;
    }

    /// Whether provider failures are persisted and replayed.
    pub fn remember_exceptions(&self) -> bool {
        self.config.lock().remember_exceptions
    }

    /// Turns failure remembering on or off.
    pub fn set_remember_exceptions(&self, remember: bool) {
        self.config.lock().remember_exceptions = remember;
    }
}

impl CacheMetrics for Memoizer {
    fn metrics(&self) -> BTreeMap<String, f64> {
        self.metrics.lock().metrics()
    }

    fn algorithm_name(&self) -> &'static str {
        "MEMO"
    }
}

impl fmt::Debug for Memoizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memoizer")
            .field("identity", &self.identity)
            .field("config", &*self.config.lock())
            .finish()
    }
}

type StoreFactory = Box<dyn Fn(&str) -> Result<Box<dyn EntryStore>, CacheError> + Send + Sync>;

/// Lazily creates one [`Memoizer`] per identity.
///
/// Every memoizer gets its own store from the registry's factory. Handles are
/// shared: `local("x")` returns the same memoizer until
/// [`dispose_all`](Self::dispose_all) forgets it.
pub struct MemoizerRegistry {
    factory: StoreFactory,
    config: MemoizerConfig,
    memoizers: Mutex<HashMap<String, Arc<Memoizer>>>,
}

impl MemoizerRegistry {
    /// Creates a registry whose memoizers use stores built by `factory` from
    /// the identity.
    pub fn new<F>(config: MemoizerConfig, factory: F) -> Self
    where
        F: Fn(&str) -> Result<Box<dyn EntryStore>, CacheError> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            config,
            memoizers: Mutex::new(HashMap::new()),
        }
    }

    /// One entry directory per identity under `root`.
    pub fn file_backed(root: impl Into<PathBuf>, config: MemoizerConfig) -> Self {
        let root = root.into();
        Self::new(config, move |identity| {
            let store = FileStore::new(root.join(store_name(identity)));
            Ok(Box::new(store) as Box<dyn EntryStore>)
        })
    }

    /// One SQLite database per identity under `root`.
    pub fn table_backed(
        root: impl Into<PathBuf>,
        config: MemoizerConfig,
        table_config: TableStoreConfig,
    ) -> Self {
        let root = root.into();
        Self::new(config, move |identity| {
            let path = root.join(format!("{}.db", store_name(identity)));
            let store = TableStore::open(path, table_config.clone())?;
            Ok(Box::new(store) as Box<dyn EntryStore>)
        })
    }

    /// The process-wide file-backed registry rooted at `$MEMO_CACHE_DIR`, or
    /// `<temp dir>/memo-cache` when the variable is unset.
    pub fn global() -> &'static MemoizerRegistry {
        static GLOBAL: OnceLock<MemoizerRegistry> = OnceLock::new();
        GLOBAL.get_or_init(|| {
            let root = std::env::var_os(CACHE_DIR_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| std::env::temp_dir().join("memo-cache"));
            debug!(root = %root.display(), "initialising global memoizer registry");
            MemoizerRegistry::file_backed(root, MemoizerConfig::default())
        })
    }

    /// Returns the memoizer for `identity`, creating it on first use.
    pub fn local(&self, identity: &str) -> Result<Arc<Memoizer>, CacheError> {
        let mut memoizers = self.memoizers.lock();
        if let Some(memo) = memoizers.get(identity) {
            return Ok(Arc::clone(memo));
        }
        let store = (self.factory)(identity)?;
        let memo = Arc::new(Memoizer::new(identity, store, self.config));
        memoizers.insert(identity.to_string(), Arc::clone(&memo));
        debug!(identity, "created memoizer");
        Ok(memo)
    }

    /// Flushes and forgets every memoizer. Outstanding handles keep working;
    /// the next `local` call creates a fresh memoizer.
    pub fn dispose_all(&self) {
        let drained: Vec<_> = self.memoizers.lock().drain().collect();
        for (identity, memo) in drained {
            if let Err(err) = memo.flush() {
                warn!(%identity, error = %err, "failed to flush memoizer");
            }
        }
    }

    /// Number of live memoizers.
    pub fn len(&self) -> usize {
        self.memoizers.lock().len()
    }

    /// Returns `true` if no memoizer has been created since the last
    /// [`dispose_all`](Self::dispose_all).
    pub fn is_empty(&self) -> bool {
        self.memoizers.lock().is_empty()
    }
}

impl fmt::Debug for MemoizerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoizerRegistry")
            .field("config", &self.config)
            .field("memoizers", &self.len())
            .finish()
    }
}

/// File-system safe name for an identity's store: the identity with unsafe
/// characters replaced, plus a digest prefix so distinct identities never
/// collide after replacement.
fn store_name(identity: &str) -> String {
    let readable: String = identity
        .chars()
        .take(64)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let digest = Digest::of_call_site(identity).to_hex();
    format!("{readable}-{}", &digest[..8])
}

/// Location of `identity`'s entries in a file-backed registry rooted at `root`.
pub fn file_store_path(root: &Path, identity: &str) -> PathBuf {
    root.join(store_name(identity))
}
