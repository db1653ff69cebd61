//! Key-indexed cache of server data.
//!
//! # Read path
//!
//! | Entry state                       | `fetch` does                                   |
//! |-----------------------------------|------------------------------------------------|
//! | fresh                             | returns the cached value, no network           |
//! | stale (time)                      | returns the cached value, refetches in background |
//! | fetching, servable value          | returns the cached value                       |
//! | fetching, nothing servable        | waits on the running fetch                     |
//! | absent / error / invalidated      | starts a fetch and waits on it                 |
//!
//! At most one fetch runs per key. Fetches run as spawned tasks, so a
//! consumer that goes away does not cancel the fetch; it just never sees the
//! result.
//!
//! # Ordering
//!
//! Every entry carries a generation. Invalidation and `set_data` move the
//! entry to a new generation and detach the running fetch; a fetch that
//! completes under an old generation hands its result to whoever was waiting
//! on it but does not touch the entry.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::FutureExt;
use tally_types::{ApiError, QueryKey};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::entry::{CacheEntry, CacheSnapshot, CacheStatus, InFlight, SharedFetch};
use crate::retry::{RetryPolicy, run_with_retry};

pub const DEFAULT_STALE_TIME: Duration = Duration::from_secs(30);
pub const DEFAULT_GC_HORIZON: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryCacheConfig {
    /// How long a fetched value is served without revalidation.
    pub stale_time: Duration,
    /// How long an unobserved, unread entry survives.
    pub gc_horizon: Duration,
    pub read_retry: RetryPolicy,
    pub mutation_retry: RetryPolicy,
}

impl Default for QueryCacheConfig {
    fn default() -> Self {
        Self {
            stale_time: DEFAULT_STALE_TIME,
            gc_horizon: DEFAULT_GC_HORIZON,
            read_retry: RetryPolicy::reads(),
            mutation_retry: RetryPolicy::mutations(),
        }
    }
}

type Entries<V> = HashMap<QueryKey, CacheEntry<V>>;

struct CacheInner<V> {
    config: QueryCacheConfig,
    entries: Mutex<Entries<V>>,
    /// Source of fetch ids and entry generations.
    next_id: AtomicU64,
}

impl<V> CacheInner<V> {
    fn lock(&self) -> MutexGuard<'_, Entries<V>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl<V: Clone> CacheInner<V> {
    fn complete_fetch(
        &self,
        key: &QueryKey,
        fetch_id: u64,
        generation: u64,
        result: &Result<V, ApiError>,
    ) {
        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(key) else {
            tracing::debug!(key = %key, "Entry removed while fetching; dropping result");
            return;
        };

        if entry.in_flight.as_ref().is_some_and(|f| f.id == fetch_id) {
            entry.in_flight = None;
        }

        if entry.generation != generation {
            tracing::debug!(key = %key, "Discarding fetch result that predates invalidation");
            return;
        }

        match result {
            Ok(value) => {
                let now = Instant::now();
                entry.value = Some(value.clone());
                entry.error = None;
                entry.invalidated = false;
                entry.fetched_at = Some(now);
                entry.stale_at = Some(now + self.config.stale_time);
            }
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "Fetch failed");
                entry.error = Some(err.clone());
            }
        }
    }
}

/// Shared handle to the cache. Clones refer to the same entries.
pub struct QueryCache<V> {
    inner: Arc<CacheInner<V>>,
}

impl<V> Clone for QueryCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> std::fmt::Debug for QueryCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("config", &self.inner.config)
            .field("entries", &self.inner.lock().len())
            .finish()
    }
}

enum ReadPlan<V> {
    Hit(V),
    Wait(SharedFetch<V>),
}

impl<V> QueryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(config: QueryCacheConfig) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                config,
                entries: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> QueryCacheConfig {
        self.inner.config
    }

    /// Read `key`, running `fetcher` only when the cache cannot answer.
    ///
    /// `fetcher` may be called more than once (retries) and is dropped
    /// unused on a cache hit.
    pub async fn fetch<F, Fut>(&self, key: QueryKey, fetcher: F) -> Result<V, ApiError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, ApiError>> + Send + 'static,
    {
        let plan = {
            let mut entries = self.inner.lock();
            let now = Instant::now();
            let entry = entries
                .entry(key.clone())
                .or_insert_with(|| CacheEntry::new(key.clone(), self.inner.next_id(), now));
            entry.last_read = now;

            if let Some(in_flight) = &entry.in_flight {
                match entry.servable() {
                    Some(value) => ReadPlan::Hit(value),
                    None => ReadPlan::Wait(in_flight.shared.clone()),
                }
            } else if let Some(value) = entry.servable() {
                if entry.is_fresh(now) {
                    tracing::trace!(key = %key, "Cache hit");
                } else {
                    tracing::debug!(key = %key, "Serving stale value; revalidating");
                    let _background = self.start_fetch(entry, fetcher);
                }
                ReadPlan::Hit(value)
            } else {
                tracing::debug!(key = %key, "Cache miss; fetching");
                ReadPlan::Wait(self.start_fetch(entry, fetcher))
            }
        };

        match plan {
            ReadPlan::Hit(value) => Ok(value),
            ReadPlan::Wait(shared) => shared.await,
        }
    }

    fn start_fetch<F, Fut>(&self, entry: &mut CacheEntry<V>, fetcher: F) -> SharedFetch<V>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, ApiError>> + Send + 'static,
    {
        let fetch_id = self.inner.next_id();
        let generation = entry.generation;
        let key = entry.key.clone();
        let policy = self.inner.config.read_retry;
        let inner = Arc::clone(&self.inner);

        let task: JoinHandle<Result<V, ApiError>> = tokio::spawn(async move {
            let label = key.to_string();
            let result = AssertUnwindSafe(run_with_retry(&policy, &label, || fetcher()))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(ApiError::network("fetcher panicked")));
            inner.complete_fetch(&key, fetch_id, generation, &result);
            result
        });

        let shared = async move {
            task.await
                .unwrap_or_else(|err| Err(ApiError::network(format!("fetch task failed: {err}"))))
        }
        .boxed()
        .shared();

        entry.in_flight = Some(InFlight {
            id: fetch_id,
            shared: shared.clone(),
        });
        shared
    }

    /// Perform a write, then invalidate every entry matched by `invalidates`.
    ///
    /// Retried per the mutation policy. The write runs as its own task, so
    /// dropping the returned future does not abandon a write (or its
    /// invalidation) halfway.
    pub async fn mutate<T, F, Fut>(
        &self,
        key: QueryKey,
        invalidates: Vec<QueryKey>,
        fetcher: F,
    ) -> Result<T, ApiError>
    where
        T: Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let cache = self.clone();
        let policy = self.inner.config.mutation_retry;

        let task = tokio::spawn(async move {
            let label = key.to_string();
            let result = run_with_retry(&policy, &label, || fetcher()).await;
            if result.is_ok() {
                let invalidated = cache.invalidate(&invalidates);
                tracing::debug!(key = %key, invalidated, "Mutation succeeded");
            }
            result
        });

        task.await
            .unwrap_or_else(|err| Err(ApiError::network(format!("mutation task failed: {err}"))))
    }

    /// Mark every entry matched by any filter as needing a refetch.
    ///
    /// Running fetches for those entries are detached; their results will
    /// not be applied. Returns the number of entries affected.
    pub fn invalidate(&self, filters: &[QueryKey]) -> usize {
        let mut entries = self.inner.lock();
        let mut count = 0;
        for entry in entries.values_mut() {
            if filters.iter().any(|filter| filter.matches(&entry.key)) {
                entry.invalidated = true;
                entry.generation = self.inner.next_id();
                entry.in_flight = None;
                count += 1;
            }
        }
        count
    }

    /// Seed or overwrite an entry with an authoritative value.
    pub fn set_data(&self, key: QueryKey, value: V) {
        let mut entries = self.inner.lock();
        let now = Instant::now();
        let generation = self.inner.next_id();
        let entry = entries
            .entry(key.clone())
            .or_insert_with(|| CacheEntry::new(key, generation, now));
        entry.generation = generation;
        entry.in_flight = None;
        entry.value = Some(value);
        entry.error = None;
        entry.invalidated = false;
        entry.fetched_at = Some(now);
        entry.stale_at = Some(now + self.inner.config.stale_time);
        entry.last_read = now;
    }

    /// Cached value without any network activity.
    #[must_use]
    pub fn get_data(&self, key: &QueryKey) -> Option<V> {
        self.inner.lock().get(key).and_then(|e| e.value.clone())
    }

    #[must_use]
    pub fn status(&self, key: &QueryKey) -> Option<CacheStatus> {
        let now = Instant::now();
        self.inner.lock().get(key).map(|e| e.status(now))
    }

    #[must_use]
    pub fn snapshot(&self, key: &QueryKey) -> Option<CacheSnapshot<V>> {
        let now = Instant::now();
        self.inner.lock().get(key).map(|e| e.snapshot(now))
    }

    pub fn remove(&self, key: &QueryKey) -> bool {
        self.inner.lock().remove(key).is_some()
    }

    /// Drop every entry. Running fetches complete but find nothing to update.
    pub fn clear(&self) {
        let mut entries = self.inner.lock();
        let count = entries.len();
        entries.clear();
        tracing::debug!(count, "Query cache cleared");
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Register a consumer of `key`. The entry is kept alive until the
    /// returned observer is dropped and the GC horizon has passed since.
    pub fn observe(&self, key: QueryKey) -> QueryObserver<V> {
        {
            let mut entries = self.inner.lock();
            let now = Instant::now();
            let entry = entries
                .entry(key.clone())
                .or_insert_with(|| CacheEntry::new(key.clone(), self.inner.next_id(), now));
            entry.observers += 1;
            entry.last_read = now;
        }
        QueryObserver {
            cache: self.clone(),
            key,
        }
    }

    /// Evict entries nobody observes, nobody is fetching, and nobody has
    /// read within the GC horizon. Returns the number evicted.
    pub fn collect_garbage(&self) -> usize {
        let horizon = self.inner.config.gc_horizon;
        let now = Instant::now();
        let mut entries = self.inner.lock();
        let before = entries.len();
        entries.retain(|key, entry| {
            let keep = entry.observers > 0
                || entry.in_flight.is_some()
                || now.saturating_duration_since(entry.last_read) < horizon;
            if !keep {
                tracing::debug!(key = %key, "Evicting unused cache entry");
            }
            keep
        });
        before - entries.len()
    }

    /// Run [`collect_garbage`](Self::collect_garbage) every `interval` until
    /// the cache is dropped or the task is aborted.
    pub fn spawn_gc(&self, interval: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let period = interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let evicted = QueryCache { inner }.collect_garbage();
                if evicted > 0 {
                    tracing::debug!(evicted, "Query cache garbage collection");
                }
            }
        })
    }
}

/// A mounted consumer of one key.
pub struct QueryObserver<V> {
    cache: QueryCache<V>,
    key: QueryKey,
}

impl<V> QueryObserver<V>
where
    V: Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub async fn fetch<F, Fut>(&self, fetcher: F) -> Result<V, ApiError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, ApiError>> + Send + 'static,
    {
        self.cache.fetch(self.key.clone(), fetcher).await
    }

    #[must_use]
    pub fn snapshot(&self) -> Option<CacheSnapshot<V>> {
        self.cache.snapshot(&self.key)
    }
}

impl<V> Drop for QueryObserver<V> {
    fn drop(&mut self) {
        let mut entries = self.cache.inner.lock();
        if let Some(entry) = entries.get_mut(&self.key) {
            entry.observers = entry.observers.saturating_sub(1);
            entry.last_read = Instant::now();
        }
    }
}
