//! Certificate management API client.
//!
//! ### Endpoints
//!
//! - `GET /certs`: offset/limit list with filter fields as query parameters,
//!   answering `{items, total}`
//! - `GET|PUT|DELETE /certs/{id}`, `POST /certs`
//! - `POST /certs/{id}/apply` and `/reapply`: issuance, which can take
//!   minutes and gets its own timeout
//! - `POST /certs/export`: raw archive bytes
//! - `GET /files`: file browser, paged with an opaque string cursor
//!
//! Authentication is a bearer token. Failures map to [`ApiError`], which
//! converts into the core error for the query layer.

pub mod error;
pub mod types;

pub use error::ApiError;
pub use types::{
    Certificate, CertificateFilter, CertificateStatus, CertificateType, CertificateUpdate, ExportFormat,
    ExportRequest, FileEntry, FileFilter, NewCertificate,
};

use std::sync::Arc;
use std::time::{Duration, Instant};

use certdesk_core::AppConfig;
use certdesk_core::query::{CursorRequest, CursorResponse, ListResponse, PageRequest};
use reqwest::{Method, RequestBuilder, Response, header};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

const DEFAULT_BASE_URL: &str = "http://localhost:8080/api";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Issuance runs synchronously on the server.
const DEFAULT_APPLY_TIMEOUT: Duration = Duration::from_secs(300);

const DEFAULT_USER_AGENT: &str = "certdesk/0.1";

/// Certificate API client configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base URL, without trailing slash.
    pub base_url: String,
    /// Bearer token. Requests go out unauthenticated without one.
    pub token: Option<String>,
    pub timeout: Duration,
    /// Timeout for apply/reapply.
    pub apply_timeout: Duration,
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token: None,
            timeout: DEFAULT_TIMEOUT,
            apply_timeout: DEFAULT_APPLY_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl ApiConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            base_url: config.api_base_url.clone(),
            token: config.api_token.clone(),
            timeout: config.timeout(),
            apply_timeout: config.apply_timeout(),
            user_agent: config.user_agent.clone(),
        }
    }
}

/// Certificate API client. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CertClient {
    http: reqwest::Client,
    config: Arc<ApiConfig>,
}

impl CertClient {
    /// # Errors
    ///
    /// Returns `ApiError::InvalidConfig` for a base URL that is not http(s)
    /// or a client that cannot be built.
    pub fn new(mut config: ApiConfig) -> Result<Self, ApiError> {
        let url = url::Url::parse(&config.base_url)
            .map_err(|e| ApiError::InvalidConfig(format!("base url {}: {e}", config.base_url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ApiError::InvalidConfig(format!("base url must be http or https: {}", config.base_url)));
        }
        config.base_url = config.base_url.trim_end_matches('/').to_string();

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ApiError::InvalidConfig(e.to_string()))?;

        Ok(Self { http, config: Arc::new(config) })
    }

    pub fn from_app_config(config: &AppConfig) -> Result<Self, ApiError> {
        Self::new(ApiConfig::from_app_config(config))
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.config.base_url, path);
        let req = self.http.request(method, url).header(header::ACCEPT, "application/json");
        match &self.config.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, ApiError> {
        let start = Instant::now();
        let response = req.send().await?;
        let status = response.status();
        tracing::debug!(url = %response.url(), %status, elapsed = ?start.elapsed(), "certificate API response");

        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        Err(match status.as_u16() {
            401 | 403 => ApiError::AuthError { status: status.as_u16() },
            404 => ApiError::NotFound(message),
            code => ApiError::HttpError { status: code, message },
        })
    }

    async fn json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, ApiError> {
        let bytes = self.send(req).await?.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ApiError::Parse(e.to_string()))
    }

    /// `GET /certs`.
    pub async fn list_certificates(
        &self, req: &PageRequest<CertificateFilter>,
    ) -> Result<ListResponse<Certificate>, ApiError> {
        tracing::debug!(offset = req.offset, limit = req.limit, filter = ?req.filter, "listing certificates");
        let query = query_pairs(req)?;
        self.json(self.request(Method::GET, "/certs").query(&query)).await
    }

    /// `GET /certs/{id}`.
    pub async fn get_certificate(&self, id: &str) -> Result<Certificate, ApiError> {
        self.json(self.request(Method::GET, &cert_path(id)?)).await
    }

    /// `POST /certs`.
    pub async fn create_certificate(&self, cert: &NewCertificate) -> Result<Certificate, ApiError> {
        tracing::debug!(name = %cert.name, cert_type = %cert.cert_type, "creating certificate");
        self.json(self.request(Method::POST, "/certs").json(cert)).await
    }

    /// `PUT /certs/{id}`.
    pub async fn update_certificate(&self, update: &CertificateUpdate) -> Result<Certificate, ApiError> {
        self.json(self.request(Method::PUT, &cert_path(&update.id)?).json(update)).await
    }

    /// `POST /certs/{id}/apply`: request issuance.
    pub async fn apply_certificate(&self, id: &str) -> Result<Certificate, ApiError> {
        let path = format!("{}/apply", cert_path(id)?);
        self.json(self.request(Method::POST, &path).timeout(self.config.apply_timeout)).await
    }

    /// `POST /certs/{id}/reapply`: reissue an existing certificate.
    pub async fn reapply_certificate(&self, id: &str) -> Result<Certificate, ApiError> {
        let path = format!("{}/reapply", cert_path(id)?);
        self.json(self.request(Method::POST, &path).timeout(self.config.apply_timeout)).await
    }

    /// `DELETE /certs/{id}`.
    pub async fn delete_certificate(&self, id: &str) -> Result<(), ApiError> {
        self.send(self.request(Method::DELETE, &cert_path(id)?)).await?;
        Ok(())
    }

    /// `POST /certs/export`. Returns the archive as sent by the server.
    pub async fn export_certificates(&self, req: &ExportRequest) -> Result<Vec<u8>, ApiError> {
        if req.ids.is_empty() {
            return Err(ApiError::InvalidConfig("export needs at least one certificate id".into()));
        }
        let response = self.send(self.request(Method::POST, "/certs/export").json(req)).await?;
        Ok(response.bytes().await?.to_vec())
    }

    /// `GET /files`.
    pub async fn list_files(&self, req: &CursorRequest<FileFilter>) -> Result<CursorResponse<FileEntry>, ApiError> {
        let query = query_pairs(req)?;
        self.json(self.request(Method::GET, "/files").query(&query)).await
    }
}

fn cert_path(id: &str) -> Result<String, ApiError> {
    if id.is_empty() || id.contains('/') {
        return Err(ApiError::InvalidConfig(format!("invalid certificate id: {id:?}")));
    }
    Ok(format!("/certs/{id}"))
}

/// Flatten a request into query parameters. Strings go out unquoted and
/// nulls are dropped.
fn query_pairs<S: Serialize>(req: &S) -> Result<Vec<(String, String)>, ApiError> {
    let value = serde_json::to_value(req).map_err(|e| ApiError::InvalidConfig(e.to_string()))?;
    let Value::Object(fields) = value else {
        return Err(ApiError::InvalidConfig("query must serialize to an object".into()));
    };
    Ok(fields
        .into_iter()
        .filter_map(|(name, value)| match value {
            Value::Null => None,
            Value::String(s) => Some((name, s)),
            other => Some((name, other.to_string())),
        })
        .collect())
}
