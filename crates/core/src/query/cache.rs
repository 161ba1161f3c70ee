//! In-memory query cache.
//!
//! Entries are keyed by [`QueryKey`] and hold type-erased data so queries of
//! different result types share one store. Each entry publishes its state on
//! a `tokio::sync::watch` channel that observers subscribe to.
//!
//! Invariants:
//!
//! - at most one fetch is in flight per key; later requests join it
//! - a settled fetch is applied only if its entry still expects it
//! - an entry invalidated mid-fetch is refetched once that fetch settles
//! - observed entries are never garbage collected
//!
//! Fetches are spawned on the ambient Tokio runtime.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::time::Instant;

use super::{QueryDefaults, QueryKey, ResolvedOptions};
use crate::Error;

pub(crate) type Erased = Arc<dyn Any + Send + Sync>;
pub(crate) type ErasedFuture = BoxFuture<'static, Result<Erased, Error>>;

/// Produces a fetch for an entry given its current data.
pub(crate) type Fetcher = Arc<dyn Fn(Option<Erased>) -> ErasedFuture + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    /// Nothing fetched yet.
    Pending,
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Idle,
    Fetching,
    FetchingNextPage,
}

/// Snapshot of one cache entry.
#[derive(Clone)]
pub struct EntryState {
    pub(crate) data: Option<Erased>,
    pub error: Option<Error>,
    pub status: QueryStatus,
    pub fetch_status: FetchStatus,
    /// Monotonic time of the last successful fetch or write.
    pub updated_at: Option<Instant>,
    /// Wall-clock time of the last successful fetch or write.
    pub fetched_at: Option<DateTime<Utc>>,
    pub invalidated: bool,
}

impl EntryState {
    fn pending() -> Self {
        Self {
            data: None,
            error: None,
            status: QueryStatus::Pending,
            fetch_status: FetchStatus::Idle,
            updated_at: None,
            fetched_at: None,
            invalidated: false,
        }
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    pub fn is_fetching(&self) -> bool {
        self.fetch_status != FetchStatus::Idle
    }

    pub fn is_stale(&self, stale_time: Duration) -> bool {
        if self.invalidated {
            return true;
        }
        match self.updated_at {
            Some(at) => at.elapsed() >= stale_time,
            None => true,
        }
    }

    /// Cached data downcast to `T`.
    pub(crate) fn data_as<T: Send + Sync + 'static>(&self, key: &QueryKey) -> Result<Option<Arc<T>>, Error> {
        match &self.data {
            None => Ok(None),
            Some(data) => {
                Arc::clone(data).downcast::<T>().map(Some).map_err(|_| Error::TypeMismatch(key.to_string()))
            }
        }
    }
}

impl fmt::Debug for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryState")
            .field("has_data", &self.data.is_some())
            .field("error", &self.error)
            .field("status", &self.status)
            .field("fetch_status", &self.fetch_status)
            .field("fetched_at", &self.fetched_at)
            .field("invalidated", &self.invalidated)
            .finish()
    }
}

struct Entry {
    state: watch::Sender<EntryState>,
    in_flight: Option<u64>,
    next_fetch_id: u64,
    refetch_pending: bool,
    fetcher: Option<Fetcher>,
    observers: usize,
    enabled_observers: usize,
    gc_time: Duration,
    released_at: Option<Instant>,
}

impl Entry {
    fn new(gc_time: Duration) -> Self {
        let (state, _) = watch::channel(EntryState::pending());
        Self {
            state,
            in_flight: None,
            next_fetch_id: 0,
            refetch_pending: false,
            fetcher: None,
            observers: 0,
            enabled_observers: 0,
            gc_time,
            released_at: Some(Instant::now()),
        }
    }

    fn is_collectable(&self) -> bool {
        self.observers == 0
            && self.in_flight.is_none()
            && self.released_at.is_some_and(|at| at.elapsed() >= self.gc_time)
    }
}

struct Inner {
    defaults: QueryDefaults,
    entries: Mutex<HashMap<QueryKey, Entry>>,
}

/// Shared handle to the query cache.
#[derive(Clone)]
pub struct QueryClient {
    inner: Arc<Inner>,
}

/// Non-owning handle, held by hooks stored inside the cache itself.
#[derive(Clone)]
pub struct WeakQueryClient {
    inner: Weak<Inner>,
}

impl WeakQueryClient {
    pub fn upgrade(&self) -> Option<QueryClient> {
        self.inner.upgrade().map(|inner| QueryClient { inner })
    }
}

impl Default for QueryClient {
    fn default() -> Self {
        Self::new(QueryDefaults::default())
    }
}

impl fmt::Debug for QueryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryClient").field("defaults", &self.inner.defaults).field("entries", &self.len()).finish()
    }
}

/// Registration of one observer on an entry; released on drop.
pub(crate) struct ObserverGuard {
    client: WeakQueryClient,
    key: QueryKey,
    enabled: bool,
}

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        if let Some(client) = self.client.upgrade() {
            client.release(&self.key, self.enabled);
        }
    }
}

pub(crate) struct Mounted {
    pub(crate) guard: ObserverGuard,
    pub(crate) rx: watch::Receiver<EntryState>,
}

impl QueryClient {
    pub fn new(defaults: QueryDefaults) -> Self {
        Self { inner: Arc::new(Inner { defaults, entries: Mutex::new(HashMap::new()) }) }
    }

    pub fn defaults(&self) -> &QueryDefaults {
        &self.inner.defaults
    }

    pub fn downgrade(&self) -> WeakQueryClient {
        WeakQueryClient { inner: Arc::downgrade(&self.inner) }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<QueryKey, Entry>> {
        self.inner.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Register an observer and fetch if the entry is missing or stale.
    pub(crate) fn mount(&self, key: &QueryKey, fetcher: Fetcher, options: &ResolvedOptions) -> Mounted {
        let (rx, should_fetch) = {
            let mut entries = self.lock();
            let entry = entries.entry(key.clone()).or_insert_with(|| Entry::new(options.gc_time));
            entry.observers += 1;
            if options.enabled {
                entry.enabled_observers += 1;
            }
            entry.released_at = None;
            entry.gc_time = options.gc_time;
            entry.fetcher = Some(fetcher.clone());
            let stale = entry.state.borrow().is_stale(options.stale_time);
            (entry.state.subscribe(), options.enabled && stale && entry.in_flight.is_none())
        };

        tracing::debug!(query = %key, should_fetch, "observer mounted");
        if should_fetch {
            self.start_fetch(key, FetchStatus::Fetching, move |current| fetcher(current));
        }

        let guard = ObserverGuard { client: self.downgrade(), key: key.clone(), enabled: options.enabled };
        Mounted { guard, rx }
    }

    fn release(&self, key: &QueryKey, enabled: bool) {
        {
            let mut entries = self.lock();
            if let Some(entry) = entries.get_mut(key) {
                entry.observers = entry.observers.saturating_sub(1);
                if enabled {
                    entry.enabled_observers = entry.enabled_observers.saturating_sub(1);
                }
                if entry.observers == 0 {
                    entry.released_at = Some(Instant::now());
                }
            }
        }
        self.collect_garbage();
    }

    /// Start a fetch for `key` unless one is already in flight.
    ///
    /// `make` receives the entry's current data and is called outside the
    /// cache lock. Returns `false` when the request joined an in-flight fetch.
    pub(crate) fn start_fetch<M>(&self, key: &QueryKey, kind: FetchStatus, make: M) -> bool
    where
        M: FnOnce(Option<Erased>) -> ErasedFuture,
    {
        let (id, current) = {
            let mut entries = self.lock();
            let entry = entries.entry(key.clone()).or_insert_with(|| Entry::new(self.inner.defaults.gc_time));
            if entry.in_flight.is_some() {
                tracing::debug!(query = %key, "fetch already in flight");
                return false;
            }
            entry.next_fetch_id += 1;
            let id = entry.next_fetch_id;
            entry.in_flight = Some(id);
            entry.refetch_pending = false;
            entry.state.send_modify(|s| s.fetch_status = kind);
            let current = entry.state.borrow().data.clone();
            (id, current)
        };

        tracing::debug!(query = %key, ?kind, "fetch started");
        let future = make(current);
        let client = self.downgrade();
        let key = key.clone();
        tokio::spawn(async move {
            let result = future.await;
            match client.upgrade() {
                Some(client) => client.settle(&key, id, result),
                None => tracing::debug!(query = %key, "cache dropped before fetch settled"),
            }
        });
        true
    }

    fn settle(&self, key: &QueryKey, id: u64, result: Result<Erased, Error>) {
        let refetch = {
            let mut entries = self.lock();
            let Some(entry) = entries.get_mut(key) else {
                tracing::debug!(query = %key, "discarding result for removed query");
                return;
            };
            if entry.in_flight != Some(id) {
                tracing::debug!(query = %key, "discarding superseded result");
                return;
            }
            entry.in_flight = None;
            let invalidated = std::mem::take(&mut entry.refetch_pending);

            entry.state.send_modify(|s| {
                s.fetch_status = FetchStatus::Idle;
                match result {
                    Ok(data) => {
                        s.data = Some(data);
                        s.error = None;
                        s.status = QueryStatus::Success;
                        s.updated_at = Some(Instant::now());
                        s.fetched_at = Some(Utc::now());
                        s.invalidated = invalidated;
                    }
                    Err(err) => {
                        tracing::warn!(query = %key, error = %err, "fetch failed");
                        s.error = Some(err);
                        s.status = QueryStatus::Error;
                    }
                }
            });

            if invalidated && entry.enabled_observers > 0 { entry.fetcher.clone() } else { None }
        };

        if let Some(fetcher) = refetch {
            tracing::debug!(query = %key, "refetching after invalidation during fetch");
            self.start_fetch(key, FetchStatus::Fetching, move |current| fetcher(current));
        }
    }

    /// Refetch `key` with its registered fetcher.
    ///
    /// Returns `false` when no observer ever registered a fetcher, or a fetch
    /// is already in flight.
    pub fn refetch(&self, key: &QueryKey) -> bool {
        let fetcher = self.lock().get(key).and_then(|e| e.fetcher.clone());
        match fetcher {
            Some(fetcher) => self.start_fetch(key, FetchStatus::Fetching, move |current| fetcher(current)),
            None => false,
        }
    }

    /// Mark every entry under `prefix` stale and refetch the observed ones.
    ///
    /// Entries whose observers are all disabled are only marked. Returns the
    /// number of entries marked.
    pub fn invalidate_queries(&self, prefix: &QueryKey) -> usize {
        let mut marked = 0;
        let mut to_refetch = Vec::new();
        {
            let mut entries = self.lock();
            for (key, entry) in entries.iter_mut().filter(|(k, _)| k.starts_with(prefix)) {
                marked += 1;
                entry.state.send_modify(|s| s.invalidated = true);
                if entry.in_flight.is_some() {
                    entry.refetch_pending = true;
                } else if entry.enabled_observers > 0
                    && let Some(fetcher) = &entry.fetcher
                {
                    to_refetch.push((key.clone(), fetcher.clone()));
                }
            }
        }

        tracing::debug!(prefix = %prefix, marked, refetching = to_refetch.len(), "invalidated queries");
        for (key, fetcher) in to_refetch {
            self.start_fetch(&key, FetchStatus::Fetching, move |current| fetcher(current));
        }
        marked
    }

    /// Drop every unobserved entry under `prefix`.
    ///
    /// In-flight results for dropped entries are discarded. Entries with
    /// mounted observers are kept so those observers can still refetch.
    pub fn remove_queries(&self, prefix: &QueryKey) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|k, e| !k.starts_with(prefix) || e.observers > 0);
        let removed = before - entries.len();
        tracing::debug!(prefix = %prefix, removed, kept = entries.len(), "removed queries");
        removed
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Write `value` under `key` as freshly fetched data.
    pub fn set_query_data<T: Send + Sync + 'static>(&self, key: &QueryKey, value: T) {
        let mut entries = self.lock();
        let entry = entries.entry(key.clone()).or_insert_with(|| Entry::new(self.inner.defaults.gc_time));
        let data: Erased = Arc::new(value);
        entry.state.send_modify(|s| {
            s.data = Some(data);
            s.error = None;
            s.status = QueryStatus::Success;
            s.updated_at = Some(Instant::now());
            s.fetched_at = Some(Utc::now());
            s.invalidated = false;
        });
    }

    /// Cached data under `key`, if present and of type `T`.
    pub fn get_query_data<T: Send + Sync + 'static>(&self, key: &QueryKey) -> Option<Arc<T>> {
        let entries = self.lock();
        let entry = entries.get(key)?;
        let state = entry.state.borrow();
        state.data_as::<T>(key).ok().flatten()
    }

    pub fn query_state(&self, key: &QueryKey) -> Option<EntryState> {
        self.lock().get(key).map(|e| e.state.borrow().clone())
    }

    pub fn observer_count(&self, key: &QueryKey) -> usize {
        self.lock().get(key).map_or(0, |e| e.observers)
    }

    /// Evict unobserved, idle entries whose `gc_time` has elapsed.
    pub fn collect_garbage(&self) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, e| !e.is_collectable());
        let evicted = before - entries.len();
        if evicted > 0 {
            tracing::debug!(evicted, "collected idle queries");
        }
        evicted
    }
}
