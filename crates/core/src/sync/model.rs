//! Offline queue domain models.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Remote resource a queued write targets.
///
/// Tags not known to this build are kept as [`EntityType::Other`] so a queue
/// written by a newer version still loads; the dispatcher rejects them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Observation,
    Attendance,
    Goal,
    GoalUpdate,
    ChildUpdate,
    #[serde(untagged)]
    Other(String),
}

impl EntityType {
    pub fn as_str(&self) -> &str {
        match self {
            EntityType::Observation => "observation",
            EntityType::Attendance => "attendance",
            EntityType::Goal => "goal",
            EntityType::GoalUpdate => "goal_update",
            EntityType::ChildUpdate => "child_update",
            EntityType::Other(tag) => tag.as_str(),
        }
    }

    /// Parse a tag, mapping known names to their variant.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "observation" => EntityType::Observation,
            "attendance" => EntityType::Attendance,
            "goal" => EntityType::Goal,
            "goal_update" => EntityType::GoalUpdate,
            "child_update" => EntityType::ChildUpdate,
            other => EntityType::Other(other.to_string()),
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supported write actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Create,
    Update,
    Delete,
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncAction::Create => "create",
            SyncAction::Update => "update",
            SyncAction::Delete => "delete",
        })
    }
}

/// A pending local mutation awaiting remote application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: String,
    pub entity_type: EntityType,
    pub action: SyncAction,
    pub payload: serde_json::Value,
    pub created_at: String,
    pub retry_count: u32,
    /// Queue item that must be applied before this one is attempted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<String>,
}

impl QueueItem {
    /// The `id` field carried in the payload, if any.
    pub fn payload_id(&self) -> Option<&str> {
        payload_id(&self.payload)
    }
}

pub(crate) fn payload_id(payload: &serde_json::Value) -> Option<&str> {
    payload
        .get("id")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Why a queue item was moved to the dead-letter store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterCode {
    RetryExhausted,
    Permanent,
    DependencyFailed,
}

/// A queue item dropped from the queue, retained for user-visible recovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub item: QueueItem,
    pub code: DeadLetterCode,
    pub reason: String,
    pub dropped_at: String,
}

/// Local file attached to an offline record, not yet uploaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRef {
    pub name: String,
    pub path: String,
}

/// A record authored while offline, echoed locally until its create syncs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineRecord {
    pub id: String,
    pub entity_type: EntityType,
    pub fields: serde_json::Map<String, serde_json::Value>,
    pub created_at: String,
    pub dirty: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media_files: Vec<MediaRef>,
}

impl OfflineRecord {
    /// Create payload for the queue: the record's fields plus its local-only markers.
    ///
    /// The dispatcher strips `id`, `dirty` and `media_files` before submission.
    /// The local capture time stays on the record; the backend stamps its own.
    pub fn to_create_payload(&self) -> serde_json::Value {
        let mut body = self.fields.clone();
        body.insert("id".to_string(), serde_json::Value::String(self.id.clone()));
        body.insert("dirty".to_string(), serde_json::Value::Bool(self.dirty));
        if !self.media_files.is_empty() {
            body.insert(
                "media_files".to_string(),
                serde_json::to_value(&self.media_files).unwrap_or(serde_json::Value::Null),
            );
        }
        serde_json::Value::Object(body)
    }
}

/// Why a drain did or did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainStatus {
    Completed,
    Offline,
    NoSession,
    AlreadyRunning,
}

/// Result of one drain pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainOutcome {
    pub success_count: usize,
    pub failed_count: usize,
    pub deferred_count: usize,
    pub status: DrainStatus,
}

impl DrainOutcome {
    /// A drain that could not run; the queue was not touched.
    pub fn skipped(status: DrainStatus) -> Self {
        Self {
            success_count: 0,
            failed_count: 0,
            deferred_count: 0,
            status,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.success_count == 0 && self.failed_count == 0
    }
}
