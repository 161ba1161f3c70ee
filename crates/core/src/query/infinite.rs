//! Infinite-scroll queries over a [`PageFetcher`].
//!
//! Pages accumulate in one cache entry under `key` plus the serialized
//! filter. `fetch_next_page` appends a page using the last cursor; it is a
//! no-op while any fetch for the entry is in flight, so a page is never
//! requested twice concurrently. A full refetch (invalidation, stale mount)
//! reloads as many pages as were loaded before, from the first cursor.
//!
//! The blocking variant suspends only until the first page is available.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::FutureExt;
use serde::Serialize;

use super::cache::{Erased, FetchStatus, Fetcher};
use super::{Page, PageFetcher, QueryClient, QueryKey, QueryObserver, QueryOptions, QueryResult, QueryState, RetryPolicy};
use crate::Error;

/// Pages loaded so far, in order.
pub struct InfiniteData<T, C = u64> {
    pages: Vec<Arc<Vec<T>>>,
    page_cursors: Vec<C>,
    next_cursor: Option<C>,
}

impl<T, C: Clone> Clone for InfiniteData<T, C> {
    fn clone(&self) -> Self {
        Self { pages: self.pages.clone(), page_cursors: self.page_cursors.clone(), next_cursor: self.next_cursor.clone() }
    }
}

impl<T, C: fmt::Debug> fmt::Debug for InfiniteData<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InfiniteData")
            .field("pages", &self.pages.len())
            .field("page_cursors", &self.page_cursors)
            .field("next_cursor", &self.next_cursor)
            .finish()
    }
}

impl<T, C> Default for InfiniteData<T, C> {
    fn default() -> Self {
        Self { pages: Vec::new(), page_cursors: Vec::new(), next_cursor: None }
    }
}

impl<T, C: Clone> InfiniteData<T, C> {
    fn push(&mut self, cursor: C, page: Page<T, C>) {
        self.pages.push(Arc::new(page.data));
        self.page_cursors.push(cursor);
        self.next_cursor = page.next_cursor;
    }

    pub fn pages(&self) -> &[Arc<Vec<T>>] {
        &self.pages
    }

    /// Cursor each loaded page was fetched with.
    pub fn page_cursors(&self) -> &[C] {
        &self.page_cursors
    }

    pub fn next_cursor(&self) -> Option<&C> {
        self.next_cursor.as_ref()
    }

    pub fn has_next_page(&self) -> bool {
        self.next_cursor.is_some()
    }

    /// Items of all pages, flattened.
    pub fn items(&self) -> impl Iterator<Item = &T> {
        self.pages.iter().flat_map(|page| page.iter())
    }

    pub fn len(&self) -> usize {
        self.pages.iter().map(|page| page.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A mounted infinite query. Dropping it releases the cache entry.
pub struct InfiniteQueryObserver<T, C = u64> {
    inner: QueryObserver<InfiniteData<T, C>>,
    next_page: Fetcher,
}

impl<T, C> InfiniteQueryObserver<T, C>
where
    T: Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
{
    pub fn key(&self) -> &QueryKey {
        self.inner.key()
    }

    pub fn state(&self) -> QueryState<InfiniteData<T, C>> {
        self.inner.state()
    }

    pub fn result(&self) -> QueryResult<InfiniteData<T, C>> {
        self.inner.result()
    }

    pub fn infinite_data(&self) -> Option<Arc<InfiniteData<T, C>>> {
        self.inner.data()
    }

    /// Last fetch error. Loaded pages stay available alongside it.
    pub fn error(&self) -> Option<Error> {
        self.inner.result().error
    }

    pub fn has_next_page(&self) -> bool {
        self.infinite_data().is_some_and(|data| data.has_next_page())
    }

    pub fn is_fetching(&self) -> bool {
        self.inner.is_fetching()
    }

    pub fn is_fetching_next_page(&self) -> bool {
        self.inner
            .client()
            .query_state(self.key())
            .is_some_and(|state| state.fetch_status == FetchStatus::FetchingNextPage)
    }

    /// Request the page after the last loaded one.
    ///
    /// Returns `false` without fetching when no page is loaded yet, the last
    /// page has been reached, a fetch for this query is already in flight, or
    /// the entry was cleared from the cache.
    pub fn fetch_next_page(&self) -> bool {
        if self.inner.is_detached() || self.is_fetching() || !self.has_next_page() {
            return false;
        }
        let next_page = self.next_page.clone();
        self.inner.client().start_fetch(self.key(), FetchStatus::FetchingNextPage, move |current| next_page(current))
    }

    /// Reload every loaded page. Returns `false` if a fetch is in flight.
    pub fn refetch(&self) -> bool {
        self.inner.refetch()
    }

    pub async fn changed(&mut self) -> Result<(), Error> {
        self.inner.changed().await
    }

    /// Wait until no fetch is in flight, then report the state.
    pub async fn settled(&mut self) -> Result<QueryState<InfiniteData<T, C>>, Error> {
        self.inner.settled().await
    }
}

impl<T, C> InfiniteQueryObserver<T, C>
where
    T: Clone + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
{
    /// Items of all loaded pages, flattened. Empty before the first page.
    pub fn data(&self) -> Vec<T> {
        self.infinite_data().map(|data| data.items().cloned().collect()).unwrap_or_default()
    }
}

struct InfiniteCore<F, T, P> {
    client: QueryClient,
    pages: Arc<P>,
    _marker: PhantomData<fn(F) -> T>,
}

impl<F, T, P> InfiniteCore<F, T, P>
where
    F: Serialize + Clone + Send + Sync + 'static,
    T: Send + Sync + 'static,
    P: PageFetcher<F, T>,
{
    fn new(client: &QueryClient, pages: P) -> Self {
        Self { client: client.clone(), pages: Arc::new(pages), _marker: PhantomData }
    }

    fn observe(
        &self, key: &QueryKey, filter: Option<F>, options: &QueryOptions,
    ) -> Result<InfiniteQueryObserver<T, P::Cursor>, Error> {
        let cache_key = key.with_filter(filter.as_ref())?;
        let resolved = self.client.defaults().resolve(options);
        let reload = self.reload(&cache_key, filter.clone(), resolved.retry);
        let next_page = self.next_page(&cache_key, filter, resolved.retry);
        Ok(InfiniteQueryObserver { inner: QueryObserver::mount(&self.client, cache_key, reload, resolved), next_page })
    }

    /// Full refetch from the first cursor, as many pages as are loaded.
    fn reload(&self, key: &QueryKey, filter: Option<F>, retry: RetryPolicy) -> Fetcher {
        let pages = self.pages.clone();
        let label = key.to_string();
        Arc::new(move |current: Option<Erased>| {
            let wanted = current
                .and_then(|data| data.downcast::<InfiniteData<T, P::Cursor>>().ok())
                .map_or(1, |data| data.pages.len().max(1));
            let pages = pages.clone();
            let filter = filter.clone();
            let label = label.clone();
            async move {
                let mut data = InfiniteData::default();
                let mut cursor = Some(pages.initial_cursor());
                while let Some(current) = cursor {
                    let page = retry.run(&label, || pages.fetch_page(current.clone(), filter.clone())).await?;
                    data.push(current, page);
                    if data.pages.len() >= wanted {
                        break;
                    }
                    cursor = data.next_cursor.clone();
                }
                tracing::debug!(query = %label, pages = data.pages.len(), "reloaded pages");
                Ok(Arc::new(data) as Erased)
            }
            .boxed()
        })
    }

    /// Append the page after the last loaded one.
    fn next_page(&self, key: &QueryKey, filter: Option<F>, retry: RetryPolicy) -> Fetcher {
        let pages = self.pages.clone();
        let label = key.to_string();
        Arc::new(move |current: Option<Erased>| {
            let pages = pages.clone();
            let filter = filter.clone();
            let label = label.clone();
            async move {
                let Some(current) = current else {
                    return Err(Error::InvalidInput(format!("{label}: no page loaded")));
                };
                let loaded = current
                    .clone()
                    .downcast::<InfiniteData<T, P::Cursor>>()
                    .map_err(|_| Error::TypeMismatch(label.clone()))?;
                let Some(cursor) = loaded.next_cursor.clone() else {
                    return Ok(current);
                };
                let page = retry.run(&label, || pages.fetch_page(cursor.clone(), filter.clone())).await?;
                let mut data = (*loaded).clone();
                data.push(cursor, page);
                tracing::debug!(query = %label, pages = data.pages.len(), "appended page");
                Ok(Arc::new(data) as Erased)
            }
            .boxed()
        })
    }
}

/// Non-blocking infinite query factory.
pub struct InfiniteQuery<F, T, P> {
    core: InfiniteCore<F, T, P>,
}

/// Infinite query factory whose `use_query` waits for the first page.
pub struct BlockingInfiniteQuery<F, T, P> {
    core: InfiniteCore<F, T, P>,
}

pub fn make_infinite_query<F, T, P>(client: &QueryClient, pages: P) -> InfiniteQuery<F, T, P>
where
    F: Serialize + Clone + Send + Sync + 'static,
    T: Send + Sync + 'static,
    P: PageFetcher<F, T>,
{
    InfiniteQuery { core: InfiniteCore::new(client, pages) }
}

pub fn make_blocking_infinite_query<F, T, P>(client: &QueryClient, pages: P) -> BlockingInfiniteQuery<F, T, P>
where
    F: Serialize + Clone + Send + Sync + 'static,
    T: Send + Sync + 'static,
    P: PageFetcher<F, T>,
{
    BlockingInfiniteQuery { core: InfiniteCore::new(client, pages) }
}

impl<F, T, P> InfiniteQuery<F, T, P>
where
    F: Serialize + Clone + Send + Sync + 'static,
    T: Send + Sync + 'static,
    P: PageFetcher<F, T>,
{
    /// Mount the query without waiting.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidKey` if the filter cannot be serialized.
    pub fn use_query(
        &self, key: &QueryKey, filter: Option<F>, options: QueryOptions,
    ) -> Result<InfiniteQueryObserver<T, P::Cursor>, Error> {
        self.core.observe(key, filter, &options)
    }
}

impl<F, T, P> BlockingInfiniteQuery<F, T, P>
where
    F: Serialize + Clone + Send + Sync + 'static,
    T: Send + Sync + 'static,
    P: PageFetcher<F, T>,
{
    /// Mount the query and wait for the first page.
    ///
    /// Later pages are fetched through the returned observer and never block.
    ///
    /// # Errors
    ///
    /// Returns the first page's terminal error, `Error::Disabled`, or
    /// `Error::InvalidKey`.
    pub async fn use_query(
        &self, key: &QueryKey, filter: Option<F>, options: QueryOptions,
    ) -> Result<InfiniteQueryObserver<T, P::Cursor>, Error> {
        let mut observer = self.core.observe(key, filter, &options)?;
        observer.inner.wait_for_data().await?;
        Ok(observer)
    }
}
