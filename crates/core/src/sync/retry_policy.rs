//! Retry classification for failed queue items.

use serde::{Deserialize, Serialize};

/// Number of failed attempts after which a queue item is dropped.
pub const DEFAULT_RETRY_CEILING: u32 = 3;

/// Retry policy classification for remote failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncRetryClass {
    Retryable,
    Permanent,
    ReauthRequired,
}

impl SyncRetryClass {
    /// Whether another drain may succeed without a code or data change.
    pub fn is_retryable(self) -> bool {
        !matches!(self, SyncRetryClass::Permanent)
    }
}

/// Classify HTTP status into retry behavior.
pub fn classify_http_status(status: u16) -> SyncRetryClass {
    match status {
        401 | 403 => SyncRetryClass::ReauthRequired,
        408 | 409 | 423 | 425 | 429 => SyncRetryClass::Retryable,
        500..=599 => SyncRetryClass::Retryable,
        _ => SyncRetryClass::Permanent,
    }
}

/// Whether an item that has now failed `retry_count` times must be dropped.
pub fn retry_ceiling_reached(retry_count: u32, ceiling: u32) -> bool {
    retry_count >= ceiling
}
