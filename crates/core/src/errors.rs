//! Error types shared across the Sprout crates.

use thiserror::Error;

use crate::sync::{SyncAction, SyncRetryClass};

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by local (non-network) operations.
///
/// Network failures during a drain never surface here; they are recorded
/// against the queue item that caused them (see [`DispatchError`]).
#[derive(Debug, Error)]
pub enum Error {
    /// Durable local storage could not be read or written.
    #[error("Local storage error: {0}")]
    Storage(String),

    /// A persisted value could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

/// Failure to apply one queued operation to the remote backend.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// No handler is registered for the entity type.
    #[error("Unknown entity type: {0}")]
    UnknownEntity(String),

    /// The entity handler does not accept this action.
    #[error("Action '{action}' is not supported for entity '{entity}'")]
    UnsupportedAction { entity: String, action: SyncAction },

    /// The payload is missing data the remote call needs.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// The remote backend rejected the call or could not be reached.
    #[error("Remote error{}: {message}", status_suffix(.status))]
    Remote {
        status: Option<u16>,
        message: String,
        retry_class: SyncRetryClass,
    },
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({})", s)).unwrap_or_default()
}

impl DispatchError {
    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::InvalidPayload(message.into())
    }

    /// Remote failure classified from an HTTP status.
    pub fn remote(status: u16, message: impl Into<String>) -> Self {
        Self::Remote {
            status: Some(status),
            message: message.into(),
            retry_class: crate::sync::classify_http_status(status),
        }
    }

    /// Remote failure with no HTTP response (timeouts, refused connections).
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Remote {
            status: None,
            message: message.into(),
            retry_class: SyncRetryClass::Retryable,
        }
    }

    /// Classify error for retry policy.
    pub fn retry_class(&self) -> SyncRetryClass {
        match self {
            Self::UnknownEntity(_) | Self::UnsupportedAction { .. } | Self::InvalidPayload(_) => {
                SyncRetryClass::Permanent
            }
            Self::Remote { retry_class, .. } => *retry_class,
        }
    }

    /// The write can never be applied as queued, so it skips the retry budget.
    ///
    /// Remote rejections (validation errors included) are always retried up
    /// to the ceiling; only failures detected before reaching the backend
    /// qualify.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::UnknownEntity(_) | Self::UnsupportedAction { .. } | Self::InvalidPayload(_)
        )
    }

    /// Short machine-readable code stored alongside dead letters.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownEntity(_) => "unknown_entity",
            Self::UnsupportedAction { .. } => "unsupported_action",
            Self::InvalidPayload(_) => "invalid_payload",
            Self::Remote { retry_class, .. } => match retry_class {
                SyncRetryClass::Retryable => "retryable",
                SyncRetryClass::Permanent => "permanent",
                SyncRetryClass::ReauthRequired => "reauth_required",
            },
        }
    }
}
