//! Single-item queries.
//!
//! [`make_query`] builds a non-blocking query whose handle reports a
//! loading/error/success tri-state and never waits. [`make_blocking_query`]
//! builds one whose `use_query` suspends the caller until data is available
//! or the fetch fails for good.
//!
//! Both share the cache key rule (`key` plus the serialized filter), the
//! retry policy and the post-process hook.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::watch;

use super::cache::{EntryState, Erased, Fetcher, ObserverGuard, QueryStatus};
use super::{PostProcess, QueryClient, QueryKey, QueryOptions, ResolvedOptions, RetryPolicy, run_post_process};
use crate::Error;

type FetchFn<F, T> = Arc<dyn Fn(Option<F>) -> BoxFuture<'static, Result<T, Error>> + Send + Sync>;

/// Loading/error/success view of a query.
#[derive(Debug)]
pub enum QueryState<T> {
    Loading,
    Error(Error),
    Success(Arc<T>),
}

impl<T> QueryState<T> {
    pub fn data(&self) -> Option<&Arc<T>> {
        match self {
            QueryState::Success(data) => Some(data),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, QueryState::Loading)
    }
}

/// Detailed view of a query. `data` survives a failed refetch.
#[derive(Debug)]
pub struct QueryResult<T> {
    pub data: Option<Arc<T>>,
    pub error: Option<Error>,
    pub is_loading: bool,
    pub is_fetching: bool,
    pub is_stale: bool,
    pub fetched_at: Option<DateTime<Utc>>,
}

/// A mounted query. Dropping it releases the cache entry.
pub struct QueryObserver<T> {
    key: QueryKey,
    client: QueryClient,
    options: ResolvedOptions,
    rx: watch::Receiver<EntryState>,
    _guard: ObserverGuard,
    _marker: PhantomData<fn() -> T>,
}

enum Wait<T> {
    Ready(Arc<T>),
    Failed(Error),
    Kick,
    Pending,
}

impl<T: Send + Sync + 'static> QueryObserver<T> {
    pub(crate) fn mount(client: &QueryClient, key: QueryKey, fetcher: Fetcher, options: ResolvedOptions) -> Self {
        let mounted = client.mount(&key, fetcher, &options);
        Self {
            key,
            client: client.clone(),
            options,
            rx: mounted.rx,
            _guard: mounted.guard,
            _marker: PhantomData,
        }
    }

    pub(crate) fn client(&self) -> &QueryClient {
        &self.client
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn state(&self) -> QueryState<T> {
        let state = self.rx.borrow();
        if state.status == QueryStatus::Error
            && let Some(err) = &state.error
        {
            return QueryState::Error(err.clone());
        }
        match state.data_as::<T>(&self.key) {
            Ok(Some(data)) => QueryState::Success(data),
            Ok(None) => QueryState::Loading,
            Err(err) => QueryState::Error(err),
        }
    }

    pub fn result(&self) -> QueryResult<T> {
        let state = self.rx.borrow();
        let (data, error) = match state.data_as::<T>(&self.key) {
            Ok(data) => (data, state.error.clone()),
            Err(err) => (None, Some(err)),
        };
        QueryResult {
            is_loading: data.is_none() && error.is_none(),
            data,
            error,
            is_fetching: state.is_fetching(),
            is_stale: state.is_stale(self.options.stale_time),
            fetched_at: state.fetched_at,
        }
    }

    pub fn data(&self) -> Option<Arc<T>> {
        self.rx.borrow().data_as::<T>(&self.key).ok().flatten()
    }

    pub fn is_fetching(&self) -> bool {
        self.rx.borrow().is_fetching()
    }

    /// Force a fetch. Returns `false` if one is already in flight or the
    /// entry was cleared from the cache.
    pub fn refetch(&self) -> bool {
        !self.is_detached() && self.client.refetch(&self.key)
    }

    /// True once the cache entry this observer watches has been dropped.
    pub(crate) fn is_detached(&self) -> bool {
        self.rx.has_changed().is_err()
    }

    /// Wait for the next state change.
    pub async fn changed(&mut self) -> Result<(), Error> {
        self.rx.changed().await.map_err(|_| Error::Removed(self.key.to_string()))
    }

    /// Wait until no fetch is in flight, then report the state.
    pub async fn settled(&mut self) -> Result<QueryState<T>, Error> {
        loop {
            if !self.rx.borrow_and_update().is_fetching() {
                return Ok(self.state());
            }
            self.changed().await?;
        }
    }

    /// Wait until data is cached or the fetch fails terminally.
    pub(crate) async fn wait_for_data(&mut self) -> Result<Arc<T>, Error> {
        loop {
            let step = {
                let state = self.rx.borrow_and_update();
                match state.data_as::<T>(&self.key) {
                    Err(err) => Wait::Failed(err),
                    Ok(Some(data)) => Wait::Ready(data),
                    Ok(None) if state.is_fetching() => Wait::Pending,
                    Ok(None) => match &state.error {
                        Some(err) => Wait::Failed(err.clone()),
                        None if !self.options.enabled => Wait::Failed(Error::Disabled(self.key.to_string())),
                        None => Wait::Kick,
                    },
                }
            };
            match step {
                Wait::Ready(data) => return Ok(data),
                Wait::Failed(err) => return Err(err),
                Wait::Kick => {
                    self.client.refetch(&self.key);
                }
                Wait::Pending => self.changed().await?,
            }
        }
    }
}

struct QueryCore<F, T> {
    client: QueryClient,
    fetch: FetchFn<F, T>,
    post_process: Option<PostProcess<T>>,
}

impl<F, T> QueryCore<F, T>
where
    F: Serialize + Clone + Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    fn new<R, Fut>(client: &QueryClient, remote: R) -> Self
    where
        R: Fn(Option<F>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
    {
        Self { client: client.clone(), fetch: Arc::new(move |filter| remote(filter).boxed()), post_process: None }
    }

    fn observe(&self, key: &QueryKey, filter: Option<F>, options: &QueryOptions) -> Result<QueryObserver<T>, Error> {
        let cache_key = key.with_filter(filter.as_ref())?;
        let resolved = self.client.defaults().resolve(options);
        let fetcher = self.fetcher(&cache_key, filter, resolved.retry);
        Ok(QueryObserver::mount(&self.client, cache_key, fetcher, resolved))
    }

    fn fetcher(&self, key: &QueryKey, filter: Option<F>, retry: RetryPolicy) -> Fetcher {
        let fetch = self.fetch.clone();
        let post_process = self.post_process.clone();
        let label = key.to_string();
        Arc::new(move |_current: Option<Erased>| {
            let fetch = fetch.clone();
            let post_process = post_process.clone();
            let filter = filter.clone();
            let label = label.clone();
            async move {
                let value = retry.run(&label, || fetch(filter.clone())).await?;
                if let Some(hook) = &post_process {
                    run_post_process(hook, &value, &label);
                }
                Ok(Arc::new(value) as Erased)
            }
            .boxed()
        })
    }
}

/// Non-blocking single-item query factory.
pub struct Query<F, T> {
    core: QueryCore<F, T>,
}

/// Blocking single-item query factory.
pub struct BlockingQuery<F, T> {
    core: QueryCore<F, T>,
}

/// Data of a resolved blocking query, plus the observer keeping it mounted.
pub struct BlockingQueryResult<T> {
    pub data: Arc<T>,
    pub observer: QueryObserver<T>,
}

/// Build a non-blocking query over `remote`.
pub fn make_query<F, T, R, Fut>(client: &QueryClient, remote: R) -> Query<F, T>
where
    F: Serialize + Clone + Send + Sync + 'static,
    T: Send + Sync + 'static,
    R: Fn(Option<F>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, Error>> + Send + 'static,
{
    Query { core: QueryCore::new(client, remote) }
}

/// Build a blocking query over `remote`.
pub fn make_blocking_query<F, T, R, Fut>(client: &QueryClient, remote: R) -> BlockingQuery<F, T>
where
    F: Serialize + Clone + Send + Sync + 'static,
    T: Send + Sync + 'static,
    R: Fn(Option<F>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, Error>> + Send + 'static,
{
    BlockingQuery { core: QueryCore::new(client, remote) }
}

impl<F, T> Query<F, T>
where
    F: Serialize + Clone + Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    pub fn with_post_process(mut self, hook: PostProcess<T>) -> Self {
        self.core.post_process = Some(hook);
        self
    }

    /// Mount the query. Returns immediately; a fetch starts in the background
    /// when the entry is missing or stale.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidKey` if the filter cannot be serialized.
    pub fn use_query(&self, key: &QueryKey, filter: Option<F>, options: QueryOptions) -> Result<QueryObserver<T>, Error> {
        self.core.observe(key, filter, &options)
    }
}

impl<F, T> BlockingQuery<F, T>
where
    F: Serialize + Clone + Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    pub fn with_post_process(mut self, hook: PostProcess<T>) -> Self {
        self.core.post_process = Some(hook);
        self
    }

    /// Mount the query and wait for its data.
    ///
    /// Cached data is returned at once, with a background refetch if stale.
    ///
    /// # Errors
    ///
    /// Returns the terminal fetch error, `Error::Disabled` for a disabled
    /// query with nothing cached, or `Error::InvalidKey`.
    pub async fn use_query(
        &self, key: &QueryKey, filter: Option<F>, options: QueryOptions,
    ) -> Result<BlockingQueryResult<T>, Error> {
        let mut observer = self.core.observe(key, filter, &options)?;
        let data = observer.wait_for_data().await?;
        Ok(BlockingQueryResult { data, observer })
    }
}
