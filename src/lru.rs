//! Least Recently Used (LRU) Cache Implementation
//!
//! This module provides the bounded LRU algorithm shared by every cache in the
//! crate, and [`BoundedLruCache`], a thread-safe cache that fills itself from a
//! provider function on a miss.
//!
//! # Algorithm
//!
//! Entries live in a hash map that points into a recency list. Every hit moves
//! the entry to the front of the list and stamps it with the next tick of a
//! logical clock; when the cache grows past `max_count` the entry at the back of
//! the list (the smallest `last_used` tick) is evicted. The clock is a plain
//! counter, so recency never depends on timer resolution.
//!
//! # Performance Characteristics
//!
//! - Get / Put / Remove: O(1)
//! - Memory: one map slot plus one list node per entry
//!
//! # Disposal
//!
//! Evicted, removed and cleared values are dropped before the operation that
//! displaced them returns. Values that own resources release them through
//! their `Drop` impl, so a cache of such values never holds more than
//! `max_count` of them alive.
//!
//! # Thread Safety
//!
//! [`LruSegment`] is not synchronised. [`BoundedLruCache`] wraps one segment in
//! a single `parking_lot::Mutex`, and calls the provider with the lock released.

use core::borrow::Borrow;
use core::convert::Infallible;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::config::BoundedLruCacheConfig;
use crate::list::{Node, RecencyList};
use crate::metrics::{CacheMetrics, LruCacheMetrics};

#[cfg(feature = "hashbrown")]
pub(crate) use hashbrown::DefaultHashBuilder;
#[cfg(feature = "hashbrown")]
use hashbrown::HashMap;

#[cfg(not(feature = "hashbrown"))]
pub(crate) use std::collections::hash_map::RandomState as DefaultHashBuilder;
#[cfg(not(feature = "hashbrown"))]
use std::collections::HashMap;

/// One cached entry with its recency stamp.
#[derive(Debug, Clone)]
pub struct CacheEntry<K, V> {
    /// The entry's key.
    pub key: K,
    /// The cached value.
    pub value: V,
    /// Logical clock tick of the last access.
    pub last_used: u64,
}

/// The LRU algorithm without synchronisation.
///
/// Shared by [`BoundedLruCache`], the background cache's store and the table
/// backend's row cache.
///
/// # Safety
///
/// The map holds raw pointers into `list`. They stay valid because a node is
/// only freed after its map slot has been removed, and both structures are
/// only touched through `&mut self`.
pub struct LruSegment<K, V, S = DefaultHashBuilder> {
    max_count: usize,
    clock: u64,
    list: RecencyList<CacheEntry<K, V>>,
    map: HashMap<K, *mut Node<CacheEntry<K, V>>, S>,
    metrics: LruCacheMetrics,
}

// SAFETY: the segment owns all data; raw pointers only point at nodes owned by
// `list`. Moving the segment between threads moves that ownership with it.
unsafe impl<K: Send, V: Send, S: Send> Send for LruSegment<K, V, S> {}

// SAFETY: all mutation requires `&mut self`; shared references only read.
unsafe impl<K: Sync, V: Sync, S: Sync> Sync for LruSegment<K, V, S> {}

impl<K: Hash + Eq, V> LruSegment<K, V> {
    /// Creates a segment that holds at most `max_count` entries.
    pub fn new(max_count: usize) -> Self {
        Self::with_hasher(max_count, DefaultHashBuilder::default())
    }
}

impl<K: Hash + Eq, V, S: BuildHasher> LruSegment<K, V, S> {
    /// Creates a segment with a custom hash builder.
    pub fn with_hasher(max_count: usize, hash_builder: S) -> Self {
        let map_capacity = max_count.min(1 << 16);
        LruSegment {
            max_count,
            clock: 0,
            list: RecencyList::new(),
            map: HashMap::with_capacity_and_hasher(map_capacity, hash_builder),
            metrics: LruCacheMetrics::new(),
        }
    }

    /// Maximum number of entries.
    #[inline]
    pub fn max_count(&self) -> usize {
        self.max_count
    }

    /// Current number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` if no entry is stored.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Current value of the logical clock.
    #[inline]
    pub fn clock(&self) -> u64 {
        self.clock
    }

    /// Advances the logical clock and returns the new tick.
    #[inline]
    pub fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Counters collected so far.
    #[inline]
    pub fn metrics(&self) -> &LruCacheMetrics {
        &self.metrics
    }

    /// Looks up `key`, marking it most recently used.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.get_mut(key).map(|v| &*v)
    }

    /// Looks up `key` mutably, marking it most recently used.
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let Some(node) = self.map.get(key).copied() else {
            self.metrics.core.record_miss();
            return None;
        };
        let tick = self.tick();
        self.metrics.core.record_hit();
        // SAFETY: `node` comes from our map, so it is a live node of `list`.
        unsafe {
            self.list.promote(node);
            let entry = (*node).value_mut();
            entry.last_used = tick;
            Some(&mut entry.value)
        }
    }

    /// Looks up `key` without touching recency or metrics.
    pub fn peek<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let node = self.map.get(key).copied()?;
        // SAFETY: `node` comes from our map.
        unsafe { Some(&(*node).value().value) }
    }

    /// Mutable lookup that leaves recency and metrics alone.
    pub fn peek_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let node = self.map.get(key).copied()?;
        // SAFETY: `node` comes from our map and `&mut self` guarantees
        // exclusive access.
        unsafe { Some(&mut (*node).value_mut().value) }
    }

    /// Returns `true` if `key` is stored. Does not affect recency.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.map.contains_key(key)
    }

    /// Returns the tick at which `key` was last used.
    pub fn last_used<Q>(&self, key: &Q) -> Option<u64>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let node = self.map.get(key).copied()?;
        // SAFETY: `node` comes from our map.
        unsafe { Some((*node).value().last_used) }
    }

    /// The eviction candidate: the entry with the smallest `last_used` tick.
    pub fn oldest(&self) -> Option<&CacheEntry<K, V>> {
        self.list.back()
    }

    /// Inserts or replaces `key`, marking it most recently used.
    ///
    /// Returns the displaced entry: the previous value for `key`, or the entry
    /// evicted to stay within `max_count`. With `max_count == 0` the new entry
    /// itself is handed straight back.
    pub fn put(&mut self, key: K, value: V) -> Option<(K, V)>
    where
        K: Clone,
    {
        if self.max_count == 0 {
            self.metrics.core.record_eviction();
            return Some((key, value));
        }

        let tick = self.tick();
        if let Some(node) = self.map.get(&key).copied() {
            // SAFETY: `node` comes from our map.
            unsafe {
                self.list.promote(node);
                let entry = (*node).value_mut();
                entry.last_used = tick;
                let old = core::mem::replace(&mut entry.value, value);
                return Some((key, old));
            }
        }

        let mut evicted = None;
        if self.map.len() >= self.max_count {
            if let Some(oldest) = self.list.pop_back() {
                self.map.remove(&oldest.key);
                self.metrics.core.record_eviction();
                evicted = Some((oldest.key, oldest.value));
            }
        }

        let node = self.list.push_front(CacheEntry {
            key: key.clone(),
            value,
            last_used: tick,
        });
        self.map.insert(key, node);
        self.metrics.core.record_insertion();
        evicted
    }

    /// Removes `key` and returns its value.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let node = self.map.remove(key)?;
        // SAFETY: `node` was in our map, so it is a live node of `list`; its
        // map slot is gone so nothing else refers to it.
        let entry = unsafe { self.list.unlink(node) };
        Some(entry.value)
    }

    /// Removes and returns the least recently used entry.
    pub fn pop_oldest(&mut self) -> Option<(K, V)> {
        let oldest = self.list.pop_back()?;
        self.map.remove(&oldest.key);
        Some((oldest.key, oldest.value))
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.map.clear();
        self.list.clear();
    }

    /// Iterates entries from most to least recently used.
    pub fn iter(&self) -> impl Iterator<Item = &CacheEntry<K, V>> {
        self.list.iter()
    }
}

impl<K, V, S> fmt::Debug for LruSegment<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LruSegment")
            .field("max_count", &self.max_count)
            .field("len", &self.list.len())
            .field("clock", &self.clock)
            .finish()
    }
}

type Provider<K, V, E> = Box<dyn Fn(&K) -> Result<V, E> + Send + Sync>;

/// A thread-safe, fixed-capacity LRU cache that fills itself from a provider.
///
/// [`get`](Self::get) returns the cached value on a hit. On a miss it calls
/// the provider once, stores the result (evicting the least recently used
/// entry if needed) and returns it. A provider error is returned as-is and
/// nothing is stored.
///
/// The provider runs without the cache lock held, so lookups of other keys
/// proceed while a slow value is computed. The flip side is that two threads
/// missing on the same key at the same time may both call the provider; the
/// later result replaces the earlier one. Use
/// [`BackgroundLruCache`](crate::BackgroundLruCache) when population must be
/// collapsed to one call per key.
///
/// # Examples
///
/// ```
/// use memo_cache::config::BoundedLruCacheConfig;
/// use memo_cache::BoundedLruCache;
///
/// let cache = BoundedLruCache::infallible(BoundedLruCacheConfig { max_count: 10 }, |x: &i32| x * 2);
///
/// for i in 0..20 {
///     assert_eq!(cache.value(&i), i * 2);
/// }
/// assert_eq!(cache.len(), 10);
/// assert!(cache.contains_key(&10));
/// assert!(!cache.contains_key(&0));
/// ```
pub struct BoundedLruCache<K, V, E = Infallible, S = DefaultHashBuilder> {
    segment: Mutex<LruSegment<K, V, S>>,
    provider: Provider<K, V, E>,
}

impl<K, V, E> BoundedLruCache<K, V, E>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Creates a cache whose provider may fail.
    pub fn new<F>(config: BoundedLruCacheConfig, provider: F) -> Self
    where
        F: Fn(&K) -> Result<V, E> + Send + Sync + 'static,
    {
        Self::with_hasher(config, DefaultHashBuilder::default(), provider)
    }
}

impl<K, V> BoundedLruCache<K, V, Infallible>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Creates a cache whose provider cannot fail.
    pub fn infallible<F>(config: BoundedLruCacheConfig, provider: F) -> Self
    where
        F: Fn(&K) -> V + Send + Sync + 'static,
    {
        Self::new(config, move |key: &K| Ok(provider(key)))
    }
}

impl<K, V, S> BoundedLruCache<K, V, Infallible, S>
where
    K: Hash + Eq + Clone,
    V: Clone,
    S: BuildHasher,
{
    /// [`get`](Self::get) for providers that cannot fail.
    pub fn value(&self, key: &K) -> V {
        match self.get(key) {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }
}

impl<K, V, E, S> BoundedLruCache<K, V, E, S>
where
    K: Hash + Eq + Clone,
    V: Clone,
    S: BuildHasher,
{
    /// Creates a cache with a custom hash builder.
    pub fn with_hasher<F>(config: BoundedLruCacheConfig, hash_builder: S, provider: F) -> Self
    where
        F: Fn(&K) -> Result<V, E> + Send + Sync + 'static,
    {
        Self {
            segment: Mutex::new(LruSegment::with_hasher(config.max_count, hash_builder)),
            provider: Box::new(provider),
        }
    }

    /// Returns the cached value for `key`, calling the provider on a miss.
    pub fn get(&self, key: &K) -> Result<V, E> {
        if let Some(value) = self.segment.lock().get(key) {
            return Ok(value.clone());
        }

        let value = (self.provider)(key)?;
        let displaced = self.segment.lock().put(key.clone(), value.clone());
        drop(displaced);
        Ok(value)
    }

    /// Returns the cached value without calling the provider or touching
    /// recency.
    pub fn peek(&self, key: &K) -> Option<V> {
        self.segment.lock().peek(key).cloned()
    }

    /// Stores `value` for `key`, bypassing the provider.
    pub fn insert(&self, key: K, value: V) {
        let displaced = self.segment.lock().put(key, value);
        drop(displaced);
    }

    /// Returns `true` if `key` is cached. Does not affect recency.
    pub fn contains_key(&self, key: &K) -> bool {
        self.segment.lock().contains_key(key)
    }

    /// Removes `key`, dropping its value. Absent keys are ignored.
    pub fn remove(&self, key: &K) {
        let removed = self.segment.lock().remove(key);
        drop(removed);
    }

    /// Drops every cached value.
    pub fn clear(&self) {
        self.segment.lock().clear();
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.segment.lock().len()
    }

    /// Returns `true` if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.segment.lock().is_empty()
    }

    /// The capacity bound.
    pub fn max_count(&self) -> usize {
        self.segment.lock().max_count()
    }
}

impl<K, V, E, S> CacheMetrics for BoundedLruCache<K, V, E, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    fn metrics(&self) -> BTreeMap<String, f64> {
        self.segment.lock().metrics().metrics()
    }

    fn algorithm_name(&self) -> &'static str {
        "LRU"
    }
}

impl<K, V, E, S> fmt::Debug for BoundedLruCache<K, V, E, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedLruCache")
            .field("segment", &*self.segment.lock())
            .finish_non_exhaustive()
    }
}
