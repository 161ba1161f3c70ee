//! Core types and shared functionality for certdesk.
//!
//! This crate provides:
//! - Query keys, cursor fetch adapters and a hand-rolled query cache
//! - Unified single-item and infinite-scroll queries
//! - The cache event bus and the provider that turns events into invalidation
//! - Unified error types
//! - Configuration structures

pub mod config;
pub mod error;
pub mod events;
pub mod provider;
pub mod query;

pub use config::{AppConfig, ConfigError};
pub use error::Error;
pub use events::{CacheEvent, CacheEventBus, EventHandler, Topic};
pub use provider::{InvalidationRule, QueryProvider};
pub use query::{
    BlockingInfiniteQuery, BlockingQuery, BlockingQueryResult, CursorPagedFetch, InfiniteData, InfiniteQuery,
    InfiniteQueryObserver, Mutation, Page, PageFetcher, PagedFetch, Query, QueryClient, QueryDefaults, QueryKey,
    QueryObserver, QueryOptions, QueryState, RetryPolicy, make_blocking_infinite_query, make_blocking_query,
    make_infinite_query, make_query,
};
