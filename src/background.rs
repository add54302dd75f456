//! Background-Populated LRU Cache
//!
//! [`BackgroundLruCache`] never makes a caller wait for a value. A lookup
//! returns the cached value when there is one and a placeholder
//! ([`default_value_while_loading`](BackgroundLruCache::default_value_while_loading))
//! otherwise, after queueing the key for a worker thread to populate.
//!
//! # Architecture
//!
//! ```text
//!   view A ─┐                        ┌──────────── Shared ────────────┐
//!   view B ─┼── Arc<Shared> ──lock──▶│ store: LruSegment<K, Slot<V>>  │
//!   view C ─┘                        │ queue: RequestQueue (newest    │
//!                                    │        first, <= max_count)    │
//!                                    │ running workers / thread_count │
//!                                    └───────────────┬────────────────┘
//!                                                    │ pop newest
//!                                     worker 1..thread_count (std threads)
//!                                       provider(key) with lock released
//! ```
//!
//! Every view created through [`create_shared`](BackgroundLruCache::create_shared)
//! sees the same entries and feeds the same queue, so a slow provider can tie
//! up at most `thread_count` threads in total.
//!
//! # Entry states
//!
//! `Missing → Loading → Complete` on success, `Loading → Missing` when the
//! provider fails, returns `None`, or the request is trimmed from the queue,
//! and any state `→ Missing` on [`reset`](BackgroundLruCache::reset).
//!
//! # Failures
//!
//! Provider errors and panics are logged and swallowed: there is no caller
//! waiting for the result. The entry goes back to `Missing` so a later lookup
//! retries it.
//!
//! # Events
//!
//! Listeners registered with
//! [`on_entry_updated`](BackgroundLruCache::on_entry_updated) run on the worker
//! thread that completed the entry (or on the thread calling `reset`). Callers
//! that need a particular thread must hand the notification over themselves.

use core::fmt;
use core::hash::Hash;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::BackgroundLruCacheConfig;
use crate::lru::LruSegment;

#[cfg(feature = "hashbrown")]
use hashbrown::HashMap;
#[cfg(not(feature = "hashbrown"))]
use std::collections::HashMap;

/// Error type background providers may return.
pub type LoadError = Box<dyn std::error::Error + Send + Sync>;

type LoadFn<K, V> = Arc<dyn Fn(&K) -> Result<Option<V>, LoadError> + Send + Sync>;
type Listener<K> = Arc<dyn Fn(&K) + Send + Sync>;

/// Population state of one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Not cached and not queued.
    Missing,
    /// Queued or being computed by a worker.
    Loading,
    /// Value available.
    Complete,
}

enum Slot<V> {
    /// `ticket` identifies the request that owns this load, so a result from a
    /// load that was reset in the meantime is discarded. `running` is set once
    /// a worker has taken the request.
    Loading { ticket: u64, running: bool },
    Complete(V),
}

impl<V> Slot<V> {
    fn state(&self) -> EntryState {
        match self {
            Slot::Loading { .. } => EntryState::Loading,
            Slot::Complete(_) => EntryState::Complete,
        }
    }
}

struct Request<K, V> {
    key: K,
    ticket: u64,
    provider: LoadFn<K, V>,
}

/// Pending load requests ordered by request recency.
struct RequestQueue<K, V> {
    by_tick: BTreeMap<u64, Request<K, V>>,
    ticks: HashMap<K, u64>,
}

impl<K: Hash + Eq + Clone, V> RequestQueue<K, V> {
    fn new() -> Self {
        Self {
            by_tick: BTreeMap::new(),
            ticks: HashMap::new(),
        }
    }

    fn len(&self) -> usize {
        self.by_tick.len()
    }

    /// Queues `request` at `tick`, replacing an older request for the same key.
    fn push(&mut self, tick: u64, request: Request<K, V>) {
        if let Some(old) = self.ticks.insert(request.key.clone(), tick) {
            self.by_tick.remove(&old);
        }
        self.by_tick.insert(tick, request);
    }

    fn remove(&mut self, key: &K) {
        if let Some(tick) = self.ticks.remove(key) {
            self.by_tick.remove(&tick);
        }
    }

    fn pop_newest(&mut self) -> Option<Request<K, V>> {
        let (_, request) = self.by_tick.pop_last()?;
        self.ticks.remove(&request.key);
        Some(request)
    }

    fn pop_oldest(&mut self) -> Option<(u64, Request<K, V>)> {
        let (tick, request) = self.by_tick.pop_first()?;
        self.ticks.remove(&request.key);
        Some((tick, request))
    }

    fn oldest_tick(&self) -> Option<u64> {
        self.by_tick.keys().next().copied()
    }

    fn clear(&mut self) {
        self.by_tick.clear();
        self.ticks.clear();
    }
}

struct SharedState<K, V> {
    store: LruSegment<K, Slot<V>>,
    queue: RequestQueue<K, V>,
    running: usize,
    thread_count: usize,
    listeners: Vec<(u64, Listener<K>)>,
    next_view: u64,
    next_ticket: u64,
}

impl<K: Hash + Eq + Clone, V> SharedState<K, V> {
    /// Queues a load for `key` unless it is complete or a worker is already
    /// computing it.
    ///
    /// A key that is still queued keeps its ticket and only moves to the front
    /// of the queue.
    fn request(&mut self, key: &K, provider: &LoadFn<K, V>) {
        let ticket = match self.store.peek(key) {
            Some(Slot::Complete(_) | Slot::Loading { running: true, .. }) => return,
            Some(Slot::Loading { ticket, .. }) => *ticket,
            None => {
                self.next_ticket += 1;
                let ticket = self.next_ticket;
                let slot = Slot::Loading {
                    ticket,
                    running: false,
                };
                drop(self.store.put(key.clone(), slot));
                if !self.store.contains_key(key) {
                    // Zero capacity: nothing can ever be stored.
                    return;
                }
                ticket
            }
        };
        // Touch the slot so the request and the entry share one recency stamp.
        self.store.get(key);
        let tick = self.store.last_used(key).unwrap_or_else(|| self.store.clock());
        self.queue.push(
            tick,
            Request {
                key: key.clone(),
                ticket,
                provider: Arc::clone(provider),
            },
        );
        self.trim_queue();
    }

    /// Keeps at most `max_count` requests, newest first, and drops requests
    /// older than the oldest entry still in the store. A dropped request's
    /// slot returns to `Missing`.
    fn trim_queue(&mut self) {
        let max_count = self.store.max_count();
        let oldest_retained = self.store.oldest().map(|entry| entry.last_used);
        let mut dropped = 0usize;
        while let Some(tick) = self.queue.oldest_tick() {
            let over_capacity = self.queue.len() > max_count;
            let outlived = oldest_retained.is_some_and(|oldest| tick < oldest);
            if !over_capacity && !outlived {
                break;
            }
            if let Some((_, request)) = self.queue.pop_oldest() {
                self.abandon(&request);
                dropped += 1;
            }
        }
        if dropped > 0 {
            debug!(dropped, pending = self.queue.len(), "trimmed load requests");
        }
    }

    /// Returns `request`'s slot to `Missing` if it still belongs to it.
    fn abandon(&mut self, request: &Request<K, V>) {
        if self.owns_slot(request) {
            self.store.remove(&request.key);
        }
    }

    fn owns_slot(&self, request: &Request<K, V>) -> bool {
        matches!(
            self.store.peek(&request.key),
            Some(Slot::Loading { ticket, .. }) if *ticket == request.ticket
        )
    }

    /// Hands `request` to a worker if its slot is still waiting for it.
    fn claim(&mut self, request: &Request<K, V>) -> bool {
        match self.store.peek_mut(&request.key) {
            Some(Slot::Loading { ticket, running }) if *ticket == request.ticket && !*running => {
                *running = true;
                true
            }
            _ => false,
        }
    }

    fn listeners(&self) -> Vec<Listener<K>> {
        self.listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
    }
}

/// State shared by all views of one background cache.
struct Shared<K, V> {
    state: Mutex<SharedState<K, V>>,
}

impl<K, V> Shared<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Starts workers until there is one per pending request or the thread
    /// budget is used up. Must be called with the state lock held.
    fn spawn_workers(shared: &Arc<Self>, state: &mut SharedState<K, V>) {
        let budget = state.thread_count.max(1);
        while state.running < budget && state.running < state.queue.len() {
            let shared = Arc::clone(shared);
            let spawned = thread::Builder::new()
                .name("memo-cache-loader".to_string())
                .spawn(move || shared.work());
            match spawned {
                Ok(_) => {
                    state.running += 1;
                    debug!(running = state.running, "started cache loader");
                }
                Err(err) => {
                    warn!(error = %err, "failed to start cache loader");
                    break;
                }
            }
        }
    }

    fn work(self: Arc<Self>) {
        loop {
            let request = {
                let mut state = self.state.lock();
                loop {
                    match state.queue.pop_newest() {
                        Some(request) if state.claim(&request) => break request,
                        Some(_) => continue,
                        None => {
                            state.running -= 1;
                            debug!(running = state.running, "cache loader idle, exiting");
                            return;
                        }
                    }
                }
            };

            let provider = Arc::clone(&request.provider);
            let key = &request.key;
            let outcome = catch_unwind(AssertUnwindSafe(|| provider(key)));

            let mut state = self.state.lock();
            let owned = state.owns_slot(&request);
            let completed = match outcome {
                Ok(Ok(Some(value))) if owned => {
                    if let Some(slot) = state.store.get_mut(key) {
                        *slot = Slot::Complete(value);
                    }
                    true
                }
                Ok(Ok(Some(_))) => {
                    debug!("discarding result for a reset or evicted entry");
                    false
                }
                Ok(Ok(None)) => {
                    state.abandon(&request);
                    false
                }
                Ok(Err(err)) => {
                    warn!(error = %err, "background provider failed");
                    state.abandon(&request);
                    false
                }
                Err(_) => {
                    warn!("background provider panicked");
                    state.abandon(&request);
                    false
                }
            };
            let listeners = if completed { state.listeners() } else { Vec::new() };
            drop(state);

            notify(&listeners, key);
        }
    }
}

fn notify<K>(listeners: &[Listener<K>], key: &K) {
    for listener in listeners {
        if catch_unwind(AssertUnwindSafe(|| listener(key))).is_err() {
            warn!("entry-updated listener panicked");
        }
    }
}

/// An LRU cache whose entries are computed on background worker threads.
///
/// # Examples
///
/// ```
/// use memo_cache::config::BackgroundLruCacheConfig;
/// use memo_cache::BackgroundLruCache;
/// use std::sync::mpsc;
///
/// let cache = BackgroundLruCache::new(BackgroundLruCacheConfig::default(), |id: &u32| {
///     Ok(Some(format!("user-{id}")))
/// });
/// let (tx, rx) = mpsc::channel();
/// let tx = std::sync::Mutex::new(tx);
/// cache.on_entry_updated(move |key: &u32| {
///     let _ = tx.lock().unwrap().send(*key);
/// });
///
/// // The first lookup returns the placeholder and queues the key.
/// assert_eq!(cache.get(&7), "");
/// assert_eq!(rx.recv().unwrap(), 7);
/// assert_eq!(cache.get(&7), "user-7");
/// ```
pub struct BackgroundLruCache<K, V> {
    shared: Arc<Shared<K, V>>,
    view: u64,
    provider: LoadFn<K, V>,
    default_value: V,
}

impl<K, V> BackgroundLruCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Default + Send + Sync + 'static,
{
    /// Creates a cache whose placeholder is `V::default()`.
    ///
    /// The provider returns `Ok(None)` when it has no value for a key; the key
    /// then stays missing.
    pub fn new<F>(config: BackgroundLruCacheConfig, provider: F) -> Self
    where
        F: Fn(&K) -> Result<Option<V>, LoadError> + Send + Sync + 'static,
    {
        Self::with_default(config, V::default(), provider)
    }
}

impl<K, V> BackgroundLruCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates a cache with an explicit placeholder value.
    pub fn with_default<F>(config: BackgroundLruCacheConfig, default_value: V, provider: F) -> Self
    where
        F: Fn(&K) -> Result<Option<V>, LoadError> + Send + Sync + 'static,
    {
        let state = SharedState {
            store: LruSegment::new(config.max_count),
            queue: RequestQueue::new(),
            running: 0,
            thread_count: config.thread_count.max(1),
            listeners: Vec::new(),
            next_view: 1,
            next_ticket: 0,
        };
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
            }),
            view: 0,
            provider: Arc::new(provider),
            default_value,
        }
    }

    /// Returns a new view over the same entries, queue and workers.
    ///
    /// The view starts with this view's provider and placeholder. Listeners
    /// are per view: each view registers its own and they are removed when
    /// the view is dropped, but every view's listeners hear about every
    /// completed entry.
    pub fn create_shared(&self) -> Self {
        let view = {
            let mut state = self.shared.state.lock();
            let view = state.next_view;
            state.next_view += 1;
            view
        };
        Self {
            shared: Arc::clone(&self.shared),
            view,
            provider: Arc::clone(&self.provider),
            default_value: self.default_value.clone(),
        }
    }

    /// Returns the cached value, or the placeholder while the key loads.
    ///
    /// A missing key is queued for loading. This never waits for a provider.
    pub fn get(&self, key: &K) -> V {
        let mut state = self.shared.state.lock();
        if let Some(Slot::Complete(value)) = state.store.get(key) {
            return value.clone();
        }
        state.request(key, &self.provider);
        Shared::spawn_workers(&self.shared, &mut state);
        self.default_value.clone()
    }

    /// Queues `key` for loading unless it is already complete.
    ///
    /// A key that is already loading is moved to the front of the queue.
    pub fn load(&self, key: &K) {
        let mut state = self.shared.state.lock();
        state.request(key, &self.provider);
        Shared::spawn_workers(&self.shared, &mut state);
    }

    /// Returns `true` only when a value for `key` is available.
    pub fn contains(&self, key: &K) -> bool {
        self.state(key) == EntryState::Complete
    }

    /// Current population state of `key`. Does not affect recency.
    pub fn state(&self, key: &K) -> EntryState {
        self.shared
            .state
            .lock()
            .store
            .peek(key)
            .map_or(EntryState::Missing, Slot::state)
    }

    /// Forgets `key` and notifies listeners.
    ///
    /// A load already running for the key finishes but its result is
    /// discarded.
    pub fn reset(&self, key: &K) {
        let listeners = {
            let mut state = self.shared.state.lock();
            drop(state.store.remove(key));
            state.queue.remove(key);
            state.listeners()
        };
        notify(&listeners, key);
    }

    /// Drops every entry and pending request.
    pub fn clear(&self) {
        let mut state = self.shared.state.lock();
        state.queue.clear();
        state.store.clear();
    }

    /// Registers a listener for completed (and reset) entries on this view.
    pub fn on_entry_updated<F>(&self, listener: F)
    where
        F: Fn(&K) + Send + Sync + 'static,
    {
        let mut state = self.shared.state.lock();
        state.listeners.push((self.view, Arc::new(listener)));
    }

    /// Number of entries with a value.
    pub fn len(&self) -> usize {
        let state = self.shared.state.lock();
        state
            .store
            .iter()
            .filter(|entry| matches!(entry.value, Slot::Complete(_)))
            .count()
    }

    /// Returns `true` if no entry has a value.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Capacity bound shared by all views.
    pub fn max_count(&self) -> usize {
        self.shared.state.lock().store.max_count()
    }

    /// Number of queued load requests.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Number of worker threads currently alive.
    pub fn running_workers(&self) -> usize {
        self.shared.state.lock().running
    }

    /// Upper bound on concurrently running workers.
    pub fn thread_count(&self) -> usize {
        self.shared.state.lock().thread_count
    }

    /// Changes the worker budget. Takes effect on the next request; running
    /// workers are never stopped early.
    pub fn set_thread_count(&self, thread_count: usize) {
        self.shared.state.lock().thread_count = thread_count.max(1);
    }

    /// The value returned while a key is not available.
    pub fn default_value_while_loading(&self) -> &V {
        &self.default_value
    }

    /// Replaces the placeholder for this view.
    pub fn set_default_value_while_loading(&mut self, value: V) {
        self.default_value = value;
    }
}

impl<K, V> Drop for BackgroundLruCache<K, V> {
    fn drop(&mut self) {
        let view = self.view;
        self.shared
            .state
            .lock()
            .listeners
            .retain(|(owner, _)| *owner != view);
    }
}

impl<K: Hash + Eq + Clone, V> fmt::Debug for BackgroundLruCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("BackgroundLruCache")
            .field("view", &self.view)
            .field("entries", &state.store.len())
            .field("pending", &state.queue.len())
            .field("running", &state.running)
            .field("thread_count", &state.thread_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request<K, V>(key: K, ticket: u64, provider: &LoadFn<K, V>) -> Request<K, V> {
        Request {
            key,
            ticket,
            provider: Arc::clone(provider),
        }
    }

    #[test]
    fn test_request_queue_pops_newest_first() {
        let provider: LoadFn<&str, u32> = Arc::new(|_| Ok(None));
        let mut queue = RequestQueue::new();
        queue.push(1, request("a", 1, &provider));
        queue.push(2, request("b", 2, &provider));
        queue.push(3, request("c", 3, &provider));
        assert_eq!(queue.pop_newest().map(|r| r.key), Some("c"));
        assert_eq!(queue.pop_oldest().map(|(t, r)| (t, r.key)), Some((1, "a")));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_request_queue_push_replaces_older_request() {
        let provider: LoadFn<&str, u32> = Arc::new(|_| Ok(None));
        let mut queue = RequestQueue::new();
        queue.push(1, request("a", 1, &provider));
        queue.push(2, request("b", 2, &provider));
        queue.push(3, request("a", 1, &provider));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.oldest_tick(), Some(2));
        queue.remove(&"b");
        assert_eq!(queue.pop_newest().map(|r| r.key), Some("a"));
        assert!(queue.pop_newest().is_none());
    }

    fn idle_state(max_count: usize) -> SharedState<u32, u32> {
        SharedState {
            store: LruSegment::new(max_count),
            queue: RequestQueue::new(),
            running: 0,
            thread_count: 1,
            listeners: Vec::new(),
            next_view: 1,
            next_ticket: 0,
        }
    }

    #[test]
    fn test_request_marks_slot_loading_and_queues_once() {
        let provider: LoadFn<u32, u32> = Arc::new(|k| Ok(Some(*k)));
        let mut state = idle_state(4);
        state.request(&1, &provider);
        state.request(&1, &provider);
        assert_eq!(state.queue.len(), 1);
        assert_eq!(state.store.peek(&1).map(Slot::state), Some(EntryState::Loading));
    }

    #[test]
    fn test_request_trims_queue_to_max_count() {
        let provider: LoadFn<u32, u32> = Arc::new(|k| Ok(Some(*k)));
        let mut state = idle_state(3);
        for key in 0..6 {
            state.request(&key, &provider);
        }
        assert_eq!(state.queue.len(), 3);
        // The oldest requests were dropped and their slots went back to Missing.
        for key in 0..3 {
            assert!(state.store.peek(&key).is_none());
        }
        let mut queued = Vec::new();
        while let Some(request) = state.queue.pop_newest() {
            queued.push(request.key);
        }
        assert_eq!(queued, vec![5, 4, 3]);
    }

    #[test]
    fn test_request_outlived_by_retained_entries_is_dropped() {
        let provider: LoadFn<u32, u32> = Arc::new(|k| Ok(Some(*k)));
        let mut state = idle_state(3);
        state.store.put(10, Slot::Complete(100));
        state.request(&1, &provider);
        // Newer entries push the Loading slot for 1 out of the store.
        for key in 20..23 {
            state.store.put(key, Slot::Complete(key * 10));
        }
        assert!(state.store.peek(&1).is_none());
        assert_eq!(state.queue.len(), 1);

        // The queue is under its count limit, but request 1 is older than
        // every retained entry.
        state.request(&2, &provider);
        assert_eq!(state.queue.len(), 1);
        assert_eq!(state.queue.pop_newest().map(|r| r.key), Some(2));
        assert!(state.store.peek(&1).is_none());
        assert_eq!(state.store.peek(&2).map(Slot::state), Some(EntryState::Loading));
    }

    #[test]
    fn test_request_ignores_complete_and_zero_capacity() {
        let provider: LoadFn<u32, u32> = Arc::new(|k| Ok(Some(*k)));
        let mut state = idle_state(2);
        state.store.put(9, Slot::Complete(90));
        state.request(&9, &provider);
        assert_eq!(state.queue.len(), 0);

        let mut empty = idle_state(0);
        empty.request(&1, &provider);
        assert_eq!(empty.queue.len(), 0);
        assert!(empty.store.is_empty());
    }

    #[test]
    fn test_claimed_request_is_not_queued_again() {
        let provider: LoadFn<u32, u32> = Arc::new(|k| Ok(Some(*k)));
        let mut state = idle_state(4);
        state.request(&1, &provider);
        let Some(request) = state.queue.pop_newest() else {
            panic!("request was not queued");
        };
        assert!(state.claim(&request));
        assert!(!state.claim(&request));
        assert!(state.owns_slot(&request));

        state.request(&1, &provider);
        assert_eq!(state.queue.len(), 0);
    }
}
