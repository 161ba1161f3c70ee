//! Prebuilt certificate and file-browser queries.
//!
//! Cache keys:
//!
//! - `["certs", "list", <type|"all">, <filter>]`: infinite certificate lists
//! - `["certs", "detail", <id>]`: single certificates, also warmed from list pages
//! - `["files", <filter>]`: the file browser
//!
//! Everything certificate-related lives under `["certs"]` so a single
//! `REFRESH_CERTIFICATES` event reaches it.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use certdesk_core::query::{
    BlockingInfiniteQuery, BlockingQuery, CursorPagedFetch, CursorRequest, InfiniteQuery, PageRequest, PagedFetch,
    PostProcess, Query, QueryClient, QueryKey, make_blocking_infinite_query, make_blocking_query, make_infinite_query,
    make_query,
};
use certdesk_core::Error;

use crate::api::{CertClient, Certificate, CertificateFilter, CertificateType, FileEntry, FileFilter};

pub type CertificateList = PagedFetch<CertificateFilter, Certificate>;
pub type FileList = CursorPagedFetch<FileFilter, FileEntry>;

type CertFuture = Pin<Box<dyn Future<Output = Result<Certificate, Error>> + Send>>;

/// Query factories bound to one cache and one API client.
#[derive(Clone)]
pub struct CertificateQueries {
    client: QueryClient,
    api: CertClient,
    page_size: u64,
}

impl CertificateQueries {
    pub fn new(client: &QueryClient, api: CertClient, page_size: u64) -> Self {
        Self { client: client.clone(), api, page_size }
    }

    pub fn certs_namespace() -> QueryKey {
        QueryKey::new(["certs"])
    }

    pub fn list_key(cert_type: Option<CertificateType>) -> QueryKey {
        Self::certs_namespace().child("list").child(cert_type.map_or("all", |t| t.as_str()))
    }

    /// Base key for [`detail`](Self::detail); the id filter completes it.
    pub fn detail_base() -> QueryKey {
        Self::certs_namespace().child("detail")
    }

    pub fn detail_key(id: &str) -> QueryKey {
        Self::detail_base().child(id)
    }

    pub fn files_key() -> QueryKey {
        QueryKey::new(["files"])
    }

    /// Non-blocking certificate list.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` for a zero page size.
    pub fn list(&self) -> Result<InfiniteQuery<CertificateFilter, Certificate, CertificateList>, Error> {
        Ok(make_infinite_query(&self.client, self.list_pages()?))
    }

    /// Certificate list that waits for its first page.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` for a zero page size.
    pub fn list_blocking(&self) -> Result<BlockingInfiniteQuery<CertificateFilter, Certificate, CertificateList>, Error> {
        Ok(make_blocking_infinite_query(&self.client, self.list_pages()?))
    }

    fn list_pages(&self) -> Result<CertificateList, Error> {
        let api = self.api.clone();
        let pages = PagedFetch::new(
            move |req: PageRequest<CertificateFilter>| {
                let api = api.clone();
                async move { api.list_certificates(&req).await.map_err(Error::from) }
            },
            self.page_size,
        )?;
        Ok(pages.with_post_process(self.warm_details()))
    }

    /// Seed detail entries from list pages so opening a listed certificate
    /// needs no request.
    fn warm_details(&self) -> PostProcess<[Certificate]> {
        let client = self.client.downgrade();
        Arc::new(move |certs: &[Certificate]| {
            let client = client.upgrade().ok_or_else(|| Error::SideEffect("query cache dropped".into()))?;
            for cert in certs {
                client.set_query_data(&Self::detail_key(&cert.id), cert.clone());
            }
            Ok(())
        })
    }

    /// Single certificate by id, non-blocking. The id is the filter.
    pub fn detail(&self) -> Query<String, Certificate> {
        make_query(&self.client, self.fetch_detail())
    }

    /// Single certificate by id, waiting for data.
    pub fn detail_blocking(&self) -> BlockingQuery<String, Certificate> {
        make_blocking_query(&self.client, self.fetch_detail())
    }

    fn fetch_detail(&self) -> impl Fn(Option<String>) -> CertFuture + Send + Sync + 'static {
        let api = self.api.clone();
        move |id: Option<String>| -> CertFuture {
            let api = api.clone();
            Box::pin(async move {
                let id = id.ok_or_else(|| Error::InvalidInput("certificate id is required".into()))?;
                api.get_certificate(&id).await.map_err(Error::from)
            })
        }
    }

    /// File browser, paged by string cursor.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` for a zero page size.
    pub fn files(&self) -> Result<BlockingInfiniteQuery<FileFilter, FileEntry, FileList>, Error> {
        let api = self.api.clone();
        let pages = CursorPagedFetch::new(
            move |req: CursorRequest<FileFilter>| {
                let api = api.clone();
                async move { api.list_files(&req).await.map_err(Error::from) }
            },
            self.page_size,
        )?;
        Ok(make_blocking_infinite_query(&self.client, pages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiConfig;
    use certdesk_core::query::{QueryDefaults, QueryOptions, RetryPolicy};
    use httpmock::MockServer;
    use serde_json::{Value, json};

    fn cert_json(n: u64) -> Value {
        json!({"id": format!("c{n}"), "name": format!("site{n}.example.com"), "type": "websites", "status": "active"})
    }

    fn setup(server: &MockServer, page_size: u64) -> (QueryClient, CertificateQueries) {
        let client = QueryClient::new(QueryDefaults { retry: RetryPolicy::none(), ..QueryDefaults::default() });
        let api = CertClient::new(ApiConfig { base_url: server.base_url(), ..ApiConfig::default() }).unwrap();
        let queries = CertificateQueries::new(&client, api, page_size);
        (client, queries)
    }

    #[test]
    fn test_keys_share_certs_namespace() {
        let namespace = CertificateQueries::certs_namespace();
        assert!(CertificateQueries::list_key(Some(CertificateType::Ssh)).starts_with(&namespace));
        assert!(CertificateQueries::list_key(None).starts_with(&namespace));
        assert!(CertificateQueries::detail_key("c1").starts_with(&namespace));
        assert!(!CertificateQueries::files_key().starts_with(&namespace));
        assert_eq!(
            CertificateQueries::detail_key("c1"),
            CertificateQueries::detail_base().with_filter(Some(&"c1".to_string())).unwrap()
        );
    }

    #[tokio::test]
    async fn test_list_pages_through_api() {
        let server = MockServer::start_async().await;
        let first = server
            .mock_async(|when, then| {
                when.method("GET").path("/certs").query_param("offset", "0").query_param("limit", "2");
                then.status(200).json_body(json!({"items": [cert_json(1), cert_json(2)], "total": 3}));
            })
            .await;
        let second = server
            .mock_async(|when, then| {
                when.method("GET").path("/certs").query_param("offset", "2").query_param("limit", "2");
                then.status(200).json_body(json!({"items": [cert_json(3)], "total": 3}));
            })
            .await;

        let (_client, queries) = setup(&server, 2);
        let filter = CertificateFilter::of_type(CertificateType::Websites);
        let list = queries.list_blocking().unwrap();
        let mut observer = list
            .use_query(&CertificateQueries::list_key(filter.cert_type), Some(filter), QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(observer.data().len(), 2);

        assert!(observer.fetch_next_page());
        observer.settled().await.unwrap();
        let ids: Vec<String> = observer.data().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["c1", "c2", "c3"]);
        assert!(!observer.has_next_page());
        first.assert_async().await;
        second.assert_async().await;
    }

    #[tokio::test]
    async fn test_list_warms_detail_entries() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method("GET").path("/certs");
                then.status(200).json_body(json!({"items": [cert_json(7)], "total": 1}));
            })
            .await;
        let detail = server
            .mock_async(|when, then| {
                when.method("GET").path("/certs/c7");
                then.status(200).json_body(cert_json(7));
            })
            .await;

        let (client, queries) = setup(&server, 20);
        let list = queries.list_blocking().unwrap();
        let _observer = list.use_query(&CertificateQueries::list_key(None), None, QueryOptions::default()).await.unwrap();
        assert!(client.get_query_data::<Certificate>(&CertificateQueries::detail_key("c7")).is_some());

        let fresh = QueryOptions::default().stale_time(std::time::Duration::from_secs(60));
        let result =
            queries.detail_blocking().use_query(&CertificateQueries::detail_base(), Some("c7".into()), fresh).await.unwrap();
        assert_eq!(result.data.name, "site7.example.com");
        detail.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn test_detail_requires_id() {
        let server = MockServer::start_async().await;
        let (_client, queries) = setup(&server, 20);
        let err = queries.detail_blocking().use_query(&CertificateQueries::detail_base(), None, QueryOptions::default()).await;
        assert!(matches!(err, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_files_follow_cursor() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method("GET").path("/files").query_param("cursor", "next-1");
                then.status(200).json_body(json!({"items": [{"name": "b.pem", "path": "/b.pem"}], "next_cursor": ""}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method("GET").path("/files").query_param_missing("cursor");
                then.status(200).json_body(json!({"items": [{"name": "a.pem", "path": "/a.pem"}], "next_cursor": "next-1"}));
            })
            .await;

        let (_client, queries) = setup(&server, 1);
        let files = queries.files().unwrap();
        let mut observer = files.use_query(&CertificateQueries::files_key(), None, QueryOptions::default()).await.unwrap();
        assert!(observer.has_next_page());
        observer.fetch_next_page();
        observer.settled().await.unwrap();

        let names: Vec<String> = observer.data().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["a.pem", "b.pem"]);
        assert!(!observer.has_next_page());
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let client = QueryClient::new(QueryDefaults::default());
        let queries = CertificateQueries::new(&client, CertClient::new(ApiConfig::default()).unwrap(), 0);
        assert!(matches!(queries.list(), Err(Error::InvalidInput(_))));
    }
}
