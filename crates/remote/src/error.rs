//! Error types for the remote backend crate.

use sprout_core::sync::{classify_http_status, SyncRetryClass};
use sprout_core::DispatchError;
use thiserror::Error;

/// Result type alias for remote operations.
pub type Result<T> = std::result::Result<T, RemoteApiError>;

#[derive(Debug, Error)]
pub enum RemoteApiError {
    /// HTTP client error (connect, timeout, body)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error response from the REST API
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Missing or malformed credentials
    #[error("Authentication error: {0}")]
    Auth(String),
}

impl RemoteApiError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Classify error for retry policy.
    pub fn retry_class(&self) -> SyncRetryClass {
        match self {
            Self::Api { status, .. } => classify_http_status(*status),
            Self::Http(_) => SyncRetryClass::Retryable,
            Self::Json(_) => SyncRetryClass::Permanent,
            Self::Auth(_) => SyncRetryClass::ReauthRequired,
        }
    }
}

impl From<RemoteApiError> for DispatchError {
    fn from(err: RemoteApiError) -> Self {
        let retry_class = err.retry_class();
        let status = err.status_code();
        let message = match err {
            RemoteApiError::Api { message, .. } => message,
            other => other.to_string(),
        };
        DispatchError::Remote {
            status,
            message,
            retry_class,
        }
    }
}
