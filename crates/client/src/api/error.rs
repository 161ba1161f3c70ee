//! Certificate API client error types.

use std::sync::Arc;

use certdesk_core::Error;

/// Errors from the certificate API client.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Base URL or client settings unusable.
    #[error("invalid client configuration: {0}")]
    InvalidConfig(String),

    /// Token missing, expired or lacking permission.
    #[error("authentication failed: HTTP {status}")]
    AuthError { status: u16 },

    #[error("not found: {0}")]
    NotFound(String),

    /// Any other non-success response.
    #[error("HTTP error {status}: {message}")]
    HttpError { status: u16, message: String },

    /// Request timeout.
    #[error("request timeout")]
    Timeout,

    /// Network error.
    #[error("network error: {0}")]
    Network(Arc<reqwest::Error>),

    /// Response parse error.
    #[error("parse error: {0}")]
    Parse(String),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::AuthError { status } | ApiError::HttpError { status, .. } => Some(*status),
            ApiError::NotFound(_) => Some(404),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout
        } else if err.is_decode() {
            ApiError::Parse(err.to_string())
        } else {
            ApiError::Network(Arc::new(err))
        }
    }
}

/// Keeps the HTTP status so the query layer can tell transient failures
/// (5xx, timeouts, connection errors) from final ones.
impl From<ApiError> for Error {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::InvalidConfig(msg) => Error::InvalidInput(msg),
            ApiError::AuthError { status } => Error::Http { status, message: "authentication failed".into() },
            ApiError::NotFound(msg) => Error::Http { status: 404, message: msg },
            ApiError::HttpError { status, message } => Error::Http { status, message },
            ApiError::Timeout => Error::Timeout("request timeout".into()),
            ApiError::Network(e) => Error::Network(e.to_string()),
            ApiError::Parse(msg) => Error::Decode(msg),
        }
    }
}
