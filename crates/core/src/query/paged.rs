//! Cursor fetch adapters.
//!
//! Bridges list APIs to the page-cursor protocol consumed by infinite queries:
//!
//! - [`PagedFetch`]: offset/limit APIs reporting a `total`. The cursor is a
//!   zero-based page index; `offset = index * page_size`.
//! - [`CursorPagedFetch`]: APIs that hand out an opaque string cursor.
//!
//! Neither adapter retries; remote failures propagate unchanged.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use super::{PostProcess, run_post_process};
use crate::Error;

/// One fetched page plus the cursor of the next one, `None` at the end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T, C = u64> {
    pub data: Vec<T>,
    pub next_cursor: Option<C>,
}

/// Offset/limit request. The filter's fields are merged in at the top level.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageRequest<F> {
    #[serde(flatten)]
    pub filter: Option<F>,
    pub offset: u64,
    pub limit: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
}

/// String-cursor request. No cursor means the first page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CursorRequest<F> {
    #[serde(flatten)]
    pub filter: Option<F>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    pub limit: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorResponse<T> {
    pub items: Vec<T>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// A source of pages addressed by cursor.
#[async_trait]
pub trait PageFetcher<F, T>: Send + Sync + 'static {
    type Cursor: Clone + fmt::Debug + Send + Sync + 'static;

    /// Cursor of the first page.
    fn initial_cursor(&self) -> Self::Cursor;

    async fn fetch_page(&self, cursor: Self::Cursor, filter: Option<F>) -> Result<Page<T, Self::Cursor>, Error>;
}

type ListFn<F, T> = Arc<dyn Fn(PageRequest<F>) -> BoxFuture<'static, Result<ListResponse<T>, Error>> + Send + Sync>;
type CursorListFn<F, T> =
    Arc<dyn Fn(CursorRequest<F>) -> BoxFuture<'static, Result<CursorResponse<T>, Error>> + Send + Sync>;

/// Page-index cursor over an offset/limit list API.
pub struct PagedFetch<F, T> {
    remote: ListFn<F, T>,
    page_size: u64,
    post_process: Option<PostProcess<[T]>>,
}

impl<F, T> Clone for PagedFetch<F, T> {
    fn clone(&self) -> Self {
        Self { remote: self.remote.clone(), page_size: self.page_size, post_process: self.post_process.clone() }
    }
}

impl<F, T> fmt::Debug for PagedFetch<F, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PagedFetch")
            .field("page_size", &self.page_size)
            .field("post_process", &self.post_process.is_some())
            .finish()
    }
}

impl<F: 'static, T: 'static> PagedFetch<F, T> {
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` if `page_size` is 0.
    pub fn new<R, Fut>(remote: R, page_size: u64) -> Result<Self, Error>
    where
        R: Fn(PageRequest<F>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ListResponse<T>, Error>> + Send + 'static,
    {
        if page_size == 0 {
            return Err(Error::InvalidInput("page size must be greater than 0".into()));
        }
        Ok(Self { remote: Arc::new(move |req| remote(req).boxed()), page_size, post_process: None })
    }

    /// Run `hook` over the items of every non-empty page before it is returned.
    pub fn with_post_process(self, hook: PostProcess<[T]>) -> Self {
        Self { post_process: Some(hook), ..self }
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Fetch the page at `page_index`.
    pub async fn fetch(&self, page_index: u64, filter: Option<F>) -> Result<Page<T>, Error> {
        let offset = page_index
            .checked_mul(self.page_size)
            .ok_or_else(|| Error::InvalidInput(format!("page {page_index} is out of range")))?;

        tracing::debug!(page_index, offset, limit = self.page_size, "fetching page");
        let response = (self.remote)(PageRequest { filter, offset, limit: self.page_size }).await?;

        let next_offset = offset.saturating_add(self.page_size);
        let next_cursor = (next_offset < response.total).then(|| page_index + 1);

        if !response.items.is_empty()
            && let Some(hook) = &self.post_process
        {
            run_post_process(hook, response.items.as_slice(), &format!("page {page_index}"));
        }

        Ok(Page { data: response.items, next_cursor })
    }
}

#[async_trait]
impl<F, T> PageFetcher<F, T> for PagedFetch<F, T>
where
    F: Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    type Cursor = u64;

    fn initial_cursor(&self) -> u64 {
        0
    }

    async fn fetch_page(&self, cursor: u64, filter: Option<F>) -> Result<Page<T>, Error> {
        self.fetch(cursor, filter).await
    }
}

/// Opaque string cursor owned by the backend.
///
/// The empty string stands for the first page and is sent as no cursor; an
/// absent or empty `next_cursor` ends the sequence.
pub struct CursorPagedFetch<F, T> {
    remote: CursorListFn<F, T>,
    limit: u64,
    post_process: Option<PostProcess<[T]>>,
}

impl<F, T> Clone for CursorPagedFetch<F, T> {
    fn clone(&self) -> Self {
        Self { remote: self.remote.clone(), limit: self.limit, post_process: self.post_process.clone() }
    }
}

impl<F: 'static, T: 'static> CursorPagedFetch<F, T> {
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` if `limit` is 0.
    pub fn new<R, Fut>(remote: R, limit: u64) -> Result<Self, Error>
    where
        R: Fn(CursorRequest<F>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CursorResponse<T>, Error>> + Send + 'static,
    {
        if limit == 0 {
            return Err(Error::InvalidInput("page size must be greater than 0".into()));
        }
        Ok(Self { remote: Arc::new(move |req| remote(req).boxed()), limit, post_process: None })
    }

    pub fn with_post_process(self, hook: PostProcess<[T]>) -> Self {
        Self { post_process: Some(hook), ..self }
    }

    pub async fn fetch(&self, cursor: &str, filter: Option<F>) -> Result<Page<T, String>, Error> {
        let request = CursorRequest {
            filter,
            cursor: (!cursor.is_empty()).then(|| cursor.to_string()),
            limit: self.limit,
        };
        tracing::debug!(cursor, limit = self.limit, "fetching page");
        let response = (self.remote)(request).await?;

        if !response.items.is_empty()
            && let Some(hook) = &self.post_process
        {
            run_post_process(hook, response.items.as_slice(), &format!("cursor {cursor:?}"));
        }

        Ok(Page { data: response.items, next_cursor: response.next_cursor.filter(|c| !c.is_empty()) })
    }
}

#[async_trait]
impl<F, T> PageFetcher<F, T> for CursorPagedFetch<F, T>
where
    F: Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    type Cursor = String;

    fn initial_cursor(&self) -> String {
        String::new()
    }

    async fn fetch_page(&self, cursor: String, filter: Option<F>) -> Result<Page<T, String>, Error> {
        self.fetch(&cursor, filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Remote that holds `total` numbered items and answers any window.
    fn numbered(total: u64) -> impl Fn(PageRequest<()>) -> BoxFuture<'static, Result<ListResponse<u64>, Error>> {
        move |req: PageRequest<()>| {
            async move {
                let start = req.offset.min(total);
                let end = req.offset.saturating_add(req.limit).min(total);
                Ok(ListResponse { items: (start..end).collect(), total })
            }
            .boxed()
        }
    }

    async fn drain(fetch: &PagedFetch<(), u64>) -> Vec<Page<u64>> {
        let mut pages = Vec::new();
        let mut cursor = Some(0);
        while let Some(index) = cursor {
            let page = fetch.fetch(index, None).await.unwrap();
            cursor = page.next_cursor;
            pages.push(page);
        }
        pages
    }

    #[tokio::test]
    async fn test_scenario_45_items_page_size_20() {
        let fetch = PagedFetch::new(numbered(45), 20).unwrap();
        let pages = drain(&fetch).await;

        let lens: Vec<usize> = pages.iter().map(|p| p.data.len()).collect();
        let cursors: Vec<Option<u64>> = pages.iter().map(|p| p.next_cursor).collect();
        assert_eq!(lens, vec![20, 20, 5]);
        assert_eq!(cursors, vec![Some(1), Some(2), None]);
        let flat: Vec<u64> = pages.into_iter().flat_map(|p| p.data).collect();
        assert_eq!(flat, (0..45).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_cursor_termination_for_all_sizes() {
        for total in 0..=41u64 {
            for page_size in 1..=12u64 {
                let fetch = PagedFetch::new(numbered(total), page_size).unwrap();
                let pages = drain(&fetch).await;
                let non_empty = pages.iter().filter(|p| !p.data.is_empty()).count() as u64;
                assert_eq!(non_empty, total.div_ceil(page_size), "total={total} page_size={page_size}");
                assert_eq!(pages.len() as u64, non_empty.max(1), "total={total} page_size={page_size}");
                let len: usize = pages.iter().map(|p| p.data.len()).sum();
                assert_eq!(len as u64, total, "total={total} page_size={page_size}");
            }
        }
    }

    #[tokio::test]
    async fn test_exact_multiple_terminates() {
        let fetch = PagedFetch::new(numbered(40), 20).unwrap();
        let second = fetch.fetch(1, None).await.unwrap();
        assert_eq!(second.data.len(), 20);
        assert_eq!(second.next_cursor, None);
    }

    #[tokio::test]
    async fn test_empty_total_single_empty_page() {
        let fetch = PagedFetch::new(numbered(0), 20).unwrap();
        let page = fetch.fetch(0, None).await.unwrap();
        assert!(page.data.is_empty());
        assert_eq!(page.next_cursor, None);
    }

    #[tokio::test]
    async fn test_offset_and_limit_sent() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let spy = {
            let seen = seen.clone();
            move |req: PageRequest<()>| {
                seen.lock().unwrap().push((req.offset, req.limit));
                async move { Ok::<_, Error>(ListResponse::<u64> { items: Vec::new(), total: 1_000 }) }
            }
        };
        let fetch = PagedFetch::new(spy, 25).unwrap();
        for p in [0u64, 1, 2, 7] {
            fetch.fetch(p, None).await.unwrap();
        }
        assert_eq!(*seen.lock().unwrap(), vec![(0, 25), (25, 25), (50, 25), (175, 25)]);
    }

    #[test]
    fn test_filter_merged_into_request() {
        #[derive(Serialize)]
        struct Filter {
            keyword: String,
        }
        let req = PageRequest { filter: Some(Filter { keyword: "api".into() }), offset: 40, limit: 20 };
        assert_eq!(serde_json::to_value(&req).unwrap(), json!({"keyword": "api", "offset": 40, "limit": 20}));

        let req: PageRequest<Filter> = PageRequest { filter: None, offset: 0, limit: 20 };
        assert_eq!(serde_json::to_value(&req).unwrap(), json!({"offset": 0, "limit": 20}));
    }

    #[test]
    fn test_zero_page_size_rejected() {
        assert!(matches!(PagedFetch::new(numbered(10), 0), Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_remote_error_propagates_without_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let remote = {
            let calls = calls.clone();
            move |_req: PageRequest<()>| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<ListResponse<u64>, _>(Error::Http { status: 503, message: "down".into() }) }
            }
        };
        let fetch = PagedFetch::new(remote, 20).unwrap();
        let err = fetch.fetch(0, None).await.unwrap_err();
        assert_eq!(err.status(), Some(503));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_post_process_only_on_non_empty_pages() {
        let warmed = Arc::new(AtomicU32::new(0));
        let hook: PostProcess<[u64]> = {
            let warmed = warmed.clone();
            Arc::new(move |items: &[u64]| {
                warmed.fetch_add(items.len() as u32, Ordering::SeqCst);
                Ok(())
            })
        };
        let fetch = PagedFetch::new(numbered(25), 20).unwrap().with_post_process(hook);
        fetch.fetch(0, None).await.unwrap();
        fetch.fetch(1, None).await.unwrap();
        fetch.fetch(5, None).await.unwrap();
        assert_eq!(warmed.load(Ordering::SeqCst), 25);
    }

    #[tokio::test]
    async fn test_post_process_failure_does_not_fail_page() {
        let hook: PostProcess<[u64]> = Arc::new(|_: &[u64]| Err(Error::SideEffect("cache full".into())));
        let fetch = PagedFetch::new(numbered(5), 20).unwrap().with_post_process(hook);
        let page = fetch.fetch(0, None).await.unwrap();
        assert_eq!(page.data.len(), 5);
    }

    #[tokio::test]
    async fn test_string_cursor_sequence() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let remote = {
            let seen = seen.clone();
            move |req: CursorRequest<()>| {
                seen.lock().unwrap().push(req.cursor.clone());
                async move {
                    let (items, next) = match req.cursor.as_deref() {
                        None => (vec!["a", "b"], Some("c2".to_string())),
                        Some("c2") => (vec!["c"], Some(String::new())),
                        Some(other) => panic!("unexpected cursor {other}"),
                    };
                    Ok::<_, Error>(CursorResponse { items, next_cursor: next })
                }
            }
        };
        let fetch = CursorPagedFetch::new(remote, 2).unwrap();

        let first = fetch.fetch_page(fetch.initial_cursor(), None).await.unwrap();
        assert_eq!(first.data, vec!["a", "b"]);
        assert_eq!(first.next_cursor.as_deref(), Some("c2"));

        let second = fetch.fetch_page(first.next_cursor.unwrap(), None).await.unwrap();
        assert_eq!(second.data, vec!["c"]);
        assert_eq!(second.next_cursor, None);
        assert_eq!(*seen.lock().unwrap(), vec![None, Some("c2".to_string())]);
    }
}
