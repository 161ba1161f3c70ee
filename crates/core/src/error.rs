//! Unified error types for certdesk.
//!
//! Every error carries a stable upper-case code as the prefix of its message.
//! The type is `Clone` because a single failed fetch is observed by every
//! handle mounted on the same cache entry.

/// Unified error type for queries, fetch adapters and the API client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Remote API answered with a non-success status.
    #[error("HTTP_ERROR: {status}: {message}")]
    Http { status: u16, message: String },

    /// Connection-level failure (refused, reset, DNS).
    #[error("NETWORK_ERROR: {0}")]
    Network(String),

    /// Transport-level timeout.
    #[error("TIMEOUT: {0}")]
    Timeout(String),

    /// Invalid input parameters (e.g., zero page size).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// Remote payload could not be decoded.
    #[error("DECODE_FAILED: {0}")]
    Decode(String),

    /// Filter could not be serialized into a query key.
    #[error("INVALID_KEY: {0}")]
    InvalidKey(String),

    /// Cached value under the key was stored with a different type.
    #[error("TYPE_MISMATCH: cached value for {0} has a different type")]
    TypeMismatch(String),

    /// Blocking query is disabled and has nothing cached.
    #[error("QUERY_DISABLED: {0}")]
    Disabled(String),

    /// Cache entry was removed while a caller waited on it.
    #[error("QUERY_REMOVED: {0}")]
    Removed(String),

    /// Best-effort side channel (post-process, event handler) failed.
    #[error("SIDE_EFFECT_FAILED: {0}")]
    SideEffect(String),
}

impl Error {
    /// Whether the failure is worth retrying.
    ///
    /// Only server-side (5xx) statuses and network-level failures qualify.
    /// Client errors and validation failures are final.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http { status, .. } => *status >= 500,
            Error::Network(_) | Error::Timeout(_) => true,
            _ => false,
        }
    }

    /// HTTP status, when the failure came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Error::Http { .. } => "HTTP_ERROR",
            Error::Network(_) => "NETWORK_ERROR",
            Error::Timeout(_) => "TIMEOUT",
            Error::InvalidInput(_) => "INVALID_INPUT",
            Error::Decode(_) => "DECODE_FAILED",
            Error::InvalidKey(_) => "INVALID_KEY",
            Error::TypeMismatch(_) => "TYPE_MISMATCH",
            Error::Disabled(_) => "QUERY_DISABLED",
            Error::Removed(_) => "QUERY_REMOVED",
            Error::SideEffect(_) => "SIDE_EFFECT_FAILED",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Decode(err.to_string())
    }
}
