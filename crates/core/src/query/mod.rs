//! Query layer: keyed caching of remote reads.
//!
//! This module provides:
//!
//! - `QueryKey` composition with deterministic filter encoding
//! - Cursor fetch adapters over offset/limit and string-cursor list APIs
//! - A query cache with in-flight deduplication, staleness and invalidation
//! - Single-item and infinite-scroll queries in blocking and non-blocking modes
//! - Mutations that announce their effects on the cache event bus

pub mod cache;
pub mod infinite;
pub mod key;
pub mod mutation;
pub mod options;
pub mod paged;
pub mod retry;
pub mod single;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

pub use cache::{EntryState, FetchStatus, QueryClient, QueryStatus, WeakQueryClient};
pub use infinite::{
    BlockingInfiniteQuery, InfiniteData, InfiniteQuery, InfiniteQueryObserver, make_blocking_infinite_query,
    make_infinite_query,
};
pub use key::QueryKey;
pub use mutation::Mutation;
pub use options::{QueryDefaults, QueryOptions, ResolvedOptions};
pub use paged::{
    CursorPagedFetch, CursorRequest, CursorResponse, ListResponse, Page, PageFetcher, PageRequest, PagedFetch,
};
pub use retry::RetryPolicy;
pub use single::{
    BlockingQuery, BlockingQueryResult, Query, QueryObserver, QueryResult, QueryState, make_blocking_query,
    make_query,
};

use crate::Error;

/// Best-effort hook run over freshly fetched data, typically to warm
/// per-item cache entries.
pub type PostProcess<T> = Arc<dyn Fn(&T) -> Result<(), Error> + Send + Sync>;

/// Run a post-process hook, swallowing its failure.
///
/// Both `Err` returns and panics are logged and dropped; the fetch that
/// produced `value` succeeds regardless.
pub(crate) fn run_post_process<T: ?Sized>(hook: &PostProcess<T>, value: &T, label: &str) {
    match catch_unwind(AssertUnwindSafe(|| hook(value))) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::warn!(query = label, error = %err, "post-process failed"),
        Err(_) => tracing::warn!(query = label, "post-process panicked"),
    }
}
