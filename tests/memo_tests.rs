//! Persistent Memoizer Tests
//!
//! Every behavioral test runs against both entry stores (one file per entry,
//! and a SQLite table) to check that they are interchangeable.
//!
//! ## Segments
//!
//! 1. **Memoization**: hits, resets, clears, persistence across instances
//! 2. **Remembered failures**: replay on and off
//! 3. **Staleness**: `max_age`
//! 4. **Registry**: per-identity memoizers and disposal
//! 5. **Backend failures**: unreadable and unwritable stores

use memo_cache::config::{MemoizerConfig, TableStoreConfig};
use memo_cache::metrics::CacheMetrics;
use memo_cache::store::{EntryStore, FileStore, StoredEntry, TableStore};
use memo_cache::{
    CacheError, Digest, ErrorDescriptor, MemoError, Memoizer, MemoizerRegistry, Remember,
};
use std::cell::Cell;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

// ============================================================================
// HELPERS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    File,
    Table,
}

const BACKENDS: [Backend; 2] = [Backend::File, Backend::Table];

fn open_store(backend: Backend, dir: &Path) -> Box<dyn EntryStore> {
    match backend {
        Backend::File => Box::new(FileStore::new(dir.join("entries"))),
        Backend::Table => {
            Box::new(TableStore::open(dir.join("memo.db"), TableStoreConfig::default()).unwrap())
        }
    }
}

fn make_memo(backend: Backend, dir: &Path, config: MemoizerConfig) -> Memoizer {
    Memoizer::new("tests::lookup", open_store(backend, dir), config)
}

fn look_up(id: &str) -> String {
    format!("Looked up: {id}")
}

#[derive(Debug, PartialEq, Eq)]
enum MathError {
    DivideByZero,
    Overflow(String),
}

impl Remember for MathError {
    fn describe(&self) -> ErrorDescriptor {
        match self {
            MathError::DivideByZero => ErrorDescriptor::new("DivideByZero", "attempt to divide by zero"),
            MathError::Overflow(msg) => ErrorDescriptor::new("Overflow", msg.as_str()),
        }
    }

    fn replay(descriptor: ErrorDescriptor) -> Self {
        match descriptor.kind.as_str() {
            "DivideByZero" => MathError::DivideByZero,
            _ => MathError::Overflow(descriptor.message),
        }
    }
}

fn reciprocal(x: &i64) -> Result<i64, MathError> {
    if *x == 0 {
        Err(MathError::DivideByZero)
    } else {
        Ok(1000 / x)
    }
}

/// Entry store whose reads or writes fail as if the disk were unavailable.
struct FlakyStore {
    inner: TableStore,
    fail_reads: bool,
    fail_writes: bool,
}

impl FlakyStore {
    fn new(fail_reads: bool, fail_writes: bool) -> Self {
        Self {
            inner: TableStore::in_memory(TableStoreConfig::default()).unwrap(),
            fail_reads,
            fail_writes,
        }
    }
}

fn unavailable() -> CacheError {
    CacheError::Io {
        path: PathBuf::from("/unavailable/entries"),
        source: io::Error::other("disk unavailable"),
    }
}

impl EntryStore for FlakyStore {
    fn get(&self, key: &str) -> Result<Option<StoredEntry>, CacheError> {
        if self.fail_reads {
            return Err(unavailable());
        }
        self.inner.get(key)
    }

    fn put(&self, key: &str, payload: &[u8], created_at: SystemTime) -> Result<(), CacheError> {
        if self.fail_writes {
            return Err(unavailable());
        }
        self.inner.put(key, payload, created_at)
    }

    fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.inner.delete(key)
    }

    fn clear_all(&self) -> Result<(), CacheError> {
        self.inner.clear_all()
    }

    fn exists(&self, key: &str) -> Result<bool, CacheError> {
        self.inner.exists(key)
    }
}

fn make_flaky_memo(fail_reads: bool, fail_writes: bool, config: MemoizerConfig) -> Memoizer {
    Memoizer::new(
        "tests::flaky",
        Box::new(FlakyStore::new(fail_reads, fail_writes)),
        config,
    )
}

// ============================================================================
// SEGMENT 1: MEMOIZATION
// ============================================================================

#[test]
fn test_second_provider_is_never_invoked() {
    for backend in BACKENDS {
        let dir = TempDir::new().unwrap();
        let memo = make_memo(backend, dir.path(), MemoizerConfig::default());

        let first = memo.get_cached("John", look_up).unwrap();
        assert_eq!(first, "Looked up: John", "{backend:?}");

        let second = memo
            .get_cached("John", |_: &str| -> String { panic!("provider must not run") })
            .unwrap();
        assert_eq!(second, "Looked up: John", "{backend:?}");
        assert!(memo.contains("John"));
        assert!(memo.is_cached("John"));
        assert!(!memo.contains("Jane"));
    }
}

#[test]
fn test_reset_and_clear_force_recomputation() {
    for backend in BACKENDS {
        let dir = TempDir::new().unwrap();
        let memo = make_memo(backend, dir.path(), MemoizerConfig::default());
        memo.get_cached("John", look_up).unwrap();
        memo.get_cached("Jane", look_up).unwrap();

        memo.reset("John").unwrap();
        assert!(!memo.contains("John"), "{backend:?}");
        assert!(memo.contains("Jane"), "{backend:?}");
        let recomputed = memo.get_cached("John", |id: &str| format!("Again: {id}")).unwrap();
        assert_eq!(recomputed, "Again: John");

        memo.remove("Jane").unwrap();
        assert!(!memo.contains("Jane"));

        memo.clear().unwrap();
        assert!(!memo.contains("John"), "{backend:?}");
        let after_clear = memo.get_cached("John", |id: &str| format!("Fresh: {id}")).unwrap();
        assert_eq!(after_clear, "Fresh: John");
    }
}

#[test]
fn test_entries_survive_a_new_instance() {
    for backend in BACKENDS {
        let dir = TempDir::new().unwrap();
        {
            let memo = make_memo(backend, dir.path(), MemoizerConfig::default());
            memo.get_cached(&(3u32, "x"), |_| vec![1u8, 2, 3]).unwrap();
            memo.flush().unwrap();
        }
        let memo = make_memo(backend, dir.path(), MemoizerConfig::default());
        let value = memo
            .get_cached(&(3u32, "x"), |_| -> Vec<u8> { panic!("provider must not run") })
            .unwrap();
        assert_eq!(value, vec![1, 2, 3], "{backend:?}");
    }
}

#[test]
fn test_unit_and_none_results_are_cached() {
    for backend in BACKENDS {
        let dir = TempDir::new().unwrap();
        let memo = make_memo(backend, dir.path(), MemoizerConfig::default());
        let calls = Cell::new(0);

        for _ in 0..2 {
            memo.get_cached(&"unit", |_| calls.set(calls.get() + 1)).unwrap();
        }
        for _ in 0..2 {
            let none: Option<u32> = memo
                .get_cached(&"none", |_| {
                    calls.set(calls.get() + 1);
                    None
                })
                .unwrap();
            assert_eq!(none, None);
        }
        assert_eq!(calls.get(), 2, "{backend:?}");
    }
}

#[test]
fn test_zero_length_entry_reads_as_cached_none() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("entries");
    std::fs::create_dir_all(&root).unwrap();
    let digest = Digest::of_call("tests::lookup", "k").unwrap();
    std::fs::write(root.join(digest.to_hex()), b"").unwrap();

    let memo = make_memo(Backend::File, dir.path(), MemoizerConfig::default());
    let value: Option<String> = memo
        .get_cached("k", |_: &str| -> Option<String> { panic!("provider must not run") })
        .unwrap();
    assert_eq!(value, None);
    assert_eq!(memo.metrics()["corrupt_entries"], 0.0);

    // A computed None is written back as an empty entry.
    memo.get_cached("other", |_: &str| None::<String>).unwrap();
    let other = Digest::of_call("tests::lookup", "other").unwrap();
    assert_eq!(std::fs::read(root.join(other.to_hex())).unwrap(), b"");
}

// ============================================================================
// SEGMENT 2: REMEMBERED FAILURES
// ============================================================================

#[test]
fn test_remembered_failure_is_replayed() {
    for backend in BACKENDS {
        let dir = TempDir::new().unwrap();
        let config = MemoizerConfig {
            remember_exceptions: true,
            ..Default::default()
        };
        let memo = make_memo(backend, dir.path(), config);

        let first = memo.get_or_compute(&0i64, reciprocal).unwrap_err();
        assert!(matches!(first, MemoError::Provider(MathError::DivideByZero)));

        // The alternate provider would succeed, but is never called.
        let second = memo
            .get_or_compute(&0i64, |_| -> Result<i64, MathError> { panic!("provider must not run") })
            .unwrap_err();
        assert!(
            matches!(second, MemoError::Provider(MathError::DivideByZero)),
            "{backend:?}"
        );
        assert_eq!(memo.metrics()["replayed_failures"], 1.0);
    }
}

#[test]
fn test_failures_are_not_replayed_when_remembering_is_off() {
    for backend in BACKENDS {
        let dir = TempDir::new().unwrap();
        let memo = make_memo(backend, dir.path(), MemoizerConfig::default());

        let first = memo.get_or_compute(&0i64, reciprocal).unwrap_err();
        assert_eq!(first.into_provider(), Some(MathError::DivideByZero));
        assert!(!memo.contains(&0i64), "{backend:?}");

        let second = memo.get_or_compute(&0i64, |_| Ok::<_, MathError>(7)).unwrap();
        assert_eq!(second, 7);
    }
}

#[test]
fn test_turning_remembering_off_ignores_stored_failures() {
    for backend in BACKENDS {
        let dir = TempDir::new().unwrap();
        let config = MemoizerConfig {
            remember_exceptions: true,
            ..Default::default()
        };
        let memo = make_memo(backend, dir.path(), config);
        let err = memo
            .get_or_compute(&5i64, |_| Err::<i64, _>(MathError::Overflow("too big".into())))
            .unwrap_err();
        assert_eq!(err.into_provider(), Some(MathError::Overflow("too big".into())));
        assert!(memo.contains(&5i64));

        memo.set_remember_exceptions(false);
        let value = memo.get_or_compute(&5i64, reciprocal).unwrap();
        assert_eq!(value, 200, "{backend:?}");

        // The stored failure was overwritten by the value.
        memo.set_remember_exceptions(true);
        assert_eq!(memo.get_or_compute(&5i64, reciprocal).unwrap(), 200);
    }
}

#[test]
fn test_successful_values_never_replay_as_failures() {
    let dir = TempDir::new().unwrap();
    let config = MemoizerConfig {
        remember_exceptions: true,
        ..Default::default()
    };
    let memo = make_memo(Backend::Table, dir.path(), config);
    assert_eq!(memo.get_or_compute(&4i64, reciprocal).unwrap(), 250);
    assert_eq!(
        memo.get_or_compute(&4i64, |_| Err::<i64, _>(MathError::DivideByZero))
            .unwrap(),
        250
    );
}

// ============================================================================
// SEGMENT 3: STALENESS
// ============================================================================

#[test]
fn test_stale_entries_are_recomputed_but_still_exist() {
    for backend in BACKENDS {
        let dir = TempDir::new().unwrap();
        let memo = make_memo(backend, dir.path(), MemoizerConfig::default());
        memo.get_cached(&1u32, |_| String::from("old")).unwrap();

        memo.set_max_age(Some(Duration::ZERO));
        // Existence ignores max_age.
        assert!(memo.contains(&1u32), "{backend:?}");
        let fresh = memo.get_cached(&1u32, |_| String::from("new")).unwrap();
        assert_eq!(fresh, "new", "{backend:?}");
        assert!(memo.metrics()["stale_entries"] >= 1.0);

        memo.set_max_age(Some(Duration::from_secs(3600)));
        let cached = memo.get_cached(&1u32, |_| String::from("newer")).unwrap();
        assert_eq!(cached, "new", "{backend:?}");
    }
}

// ============================================================================
// SEGMENT 4: REGISTRY
// ============================================================================

#[test]
fn test_registry_shares_memoizers_per_identity() {
    let dir = TempDir::new().unwrap();
    let registry = MemoizerRegistry::file_backed(dir.path(), MemoizerConfig::default());
    assert!(registry.is_empty());

    let a = registry.local("users::lookup").unwrap();
    let again = registry.local("users::lookup").unwrap();
    let b = registry.local("orders::lookup").unwrap();
    assert!(Arc::ptr_eq(&a, &again));
    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(registry.len(), 2);

    a.get_cached("John", look_up).unwrap();
    assert!(!b.contains("John"));

    registry.dispose_all();
    assert!(registry.is_empty());

    // A fresh memoizer for the same identity finds the stored entry.
    let reopened = registry.local("users::lookup").unwrap();
    assert!(!Arc::ptr_eq(&a, &reopened));
    let value = reopened
        .get_cached("John", |_: &str| -> String { panic!("provider must not run") })
        .unwrap();
    assert_eq!(value, "Looked up: John");
}

#[test]
fn test_table_backed_registry() {
    let dir = TempDir::new().unwrap();
    let table_config = TableStoreConfig {
        commit_interval: Duration::from_secs(3600),
        ..Default::default()
    };
    let registry =
        MemoizerRegistry::table_backed(dir.path(), MemoizerConfig::default(), table_config.clone());
    let memo = registry.local("reports::render").unwrap();
    memo.get_cached(&42u32, |x| x.to_string()).unwrap();
    registry.dispose_all();
    drop(memo);

    let registry =
        MemoizerRegistry::table_backed(dir.path(), MemoizerConfig::default(), table_config);
    let memo = registry.local("reports::render").unwrap();
    let value = memo
        .get_cached(&42u32, |_| -> String { panic!("provider must not run") })
        .unwrap();
    assert_eq!(value, "42");
}

#[test]
fn test_memoizer_is_usable_across_threads() {
    let dir = TempDir::new().unwrap();
    let memo = Arc::new(make_memo(Backend::File, dir.path(), MemoizerConfig::default()));
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let memo = Arc::clone(&memo);
            std::thread::spawn(move || {
                for i in 0..25u32 {
                    let key = (t + i) % 10;
                    assert_eq!(memo.get_cached(&key, |k| k * 3).unwrap(), key * 3);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    for key in 0..10u32 {
        assert!(memo.contains(&key));
    }
}

// ============================================================================
// SEGMENT 5: BACKEND FAILURES
// ============================================================================

#[test]
fn test_failed_read_is_a_miss() {
    let memo = make_flaky_memo(true, false, MemoizerConfig::default());
    let calls = Cell::new(0);
    for _ in 0..2 {
        let value = memo
            .get_cached("John", |id: &str| {
                calls.set(calls.get() + 1);
                look_up(id)
            })
            .unwrap();
        assert_eq!(value, "Looked up: John");
    }
    assert_eq!(calls.get(), 2);

    let metrics = memo.metrics();
    assert_eq!(metrics["read_failures"], 2.0);
    assert_eq!(metrics["write_failures"], 0.0);
    // The writes still reached the store.
    assert!(memo.contains("John"));
}

#[test]
fn test_failed_write_is_swallowed() {
    let memo = make_flaky_memo(false, true, MemoizerConfig::default());
    let value = memo.get_cached("John", look_up).unwrap();
    assert_eq!(value, "Looked up: John");
    assert!(!memo.contains("John"));

    let again = memo.get_cached("John", |id: &str| format!("Again: {id}")).unwrap();
    assert_eq!(again, "Again: John");

    let metrics = memo.metrics();
    assert_eq!(metrics["write_failures"], 2.0);
    assert_eq!(metrics["read_failures"], 0.0);
}

#[test]
fn test_failed_write_of_remembered_failure_keeps_provider_error() {
    let config = MemoizerConfig {
        remember_exceptions: true,
        ..Default::default()
    };
    let memo = make_flaky_memo(false, true, config);
    let calls = Cell::new(0);
    for _ in 0..2 {
        let err = memo
            .get_or_compute(&0i64, |x| {
                calls.set(calls.get() + 1);
                reciprocal(x)
            })
            .unwrap_err();
        assert_eq!(err.into_provider(), Some(MathError::DivideByZero));
    }
    // Nothing was stored, so nothing was replayed.
    assert_eq!(calls.get(), 2);

    let metrics = memo.metrics();
    assert_eq!(metrics["write_failures"], 2.0);
    assert_eq!(metrics["replayed_failures"], 0.0);
}
