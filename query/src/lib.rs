//! Query cache for Tally.
//!
//! Server data keyed by [`QueryKey`], with request deduplication,
//! stale-while-revalidate reads, invalidation after writes, bounded retry and
//! garbage collection of unused entries.

mod cache;
mod entry;
pub mod retry;

pub use cache::{
    DEFAULT_GC_HORIZON, DEFAULT_STALE_TIME, QueryCache, QueryCacheConfig, QueryObserver,
};
pub use entry::{CacheSnapshot, CacheStatus};
pub use retry::{RetryDecision, RetryPolicy};
pub use tally_types::{ApiError, QueryKey};
