//! Cache entries.

use futures_util::future::{BoxFuture, Shared};
use tally_types::{ApiError, QueryKey};
use tokio::time::Instant;

pub(crate) type SharedFetch<V> = Shared<BoxFuture<'static, Result<V, ApiError>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served straight from the cache.
    Fresh,
    /// Served from the cache while a refetch runs (or on the next read).
    Stale,
    /// A fetch is running for this key.
    Fetching,
    /// The last fetch failed.
    Error,
}

/// The one running fetch for a key.
pub(crate) struct InFlight<V> {
    pub(crate) id: u64,
    pub(crate) shared: SharedFetch<V>,
}

pub(crate) struct CacheEntry<V> {
    pub(crate) key: QueryKey,
    pub(crate) value: Option<V>,
    pub(crate) error: Option<ApiError>,
    pub(crate) fetched_at: Option<Instant>,
    pub(crate) stale_at: Option<Instant>,
    /// Set by invalidation; the next read must wait for a refetch.
    pub(crate) invalidated: bool,
    /// Results of fetches started under another generation are discarded.
    pub(crate) generation: u64,
    pub(crate) in_flight: Option<InFlight<V>>,
    pub(crate) last_read: Instant,
    pub(crate) observers: usize,
}

impl<V: Clone> CacheEntry<V> {
    pub(crate) fn new(key: QueryKey, generation: u64, now: Instant) -> Self {
        Self {
            key,
            value: None,
            error: None,
            fetched_at: None,
            stale_at: None,
            invalidated: false,
            generation,
            in_flight: None,
            last_read: now,
            observers: 0,
        }
    }

    pub(crate) fn status(&self, now: Instant) -> CacheStatus {
        if self.in_flight.is_some() {
            CacheStatus::Fetching
        } else if self.error.is_some() {
            CacheStatus::Error
        } else if self.is_fresh(now) {
            CacheStatus::Fresh
        } else {
            CacheStatus::Stale
        }
    }

    pub(crate) fn is_fresh(&self, now: Instant) -> bool {
        self.value.is_some() && !self.invalidated && self.stale_at.is_some_and(|at| now < at)
    }

    /// A value that may be handed out without waiting: present, not
    /// invalidated, and not superseded by an error.
    pub(crate) fn servable(&self) -> Option<V> {
        if self.invalidated || self.error.is_some() {
            return None;
        }
        self.value.clone()
    }

    pub(crate) fn snapshot(&self, now: Instant) -> CacheSnapshot<V> {
        CacheSnapshot {
            key: self.key.clone(),
            value: self.value.clone(),
            error: self.error.clone(),
            status: self.status(now),
            fetched_at: self.fetched_at,
            stale_at: self.stale_at,
            observers: self.observers,
        }
    }
}

/// Point-in-time copy of an entry, for inspection.
#[derive(Debug, Clone)]
pub struct CacheSnapshot<V> {
    pub key: QueryKey,
    pub value: Option<V>,
    pub error: Option<ApiError>,
    pub status: CacheStatus,
    pub fetched_at: Option<Instant>,
    pub stale_at: Option<Instant>,
    pub observers: usize,
}
