//! Routing of queued writes to remote table calls.
//!
//! Each entity type is served by one [`EntitySyncHandler`] registered at
//! startup. Adding an entity type means registering another handler; the
//! executor never matches on entity tags itself.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::errors::DispatchError;

use super::model::{payload_id, EntityType, SyncAction};

/// Fields that only exist on the device and must never reach the backend.
pub const LOCAL_ONLY_FIELDS: [&str; 3] = ["id", "dirty", "media_files"];

/// Remote resource API (row-level table writes).
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Insert one row and return the backend-assigned id when it reports one.
    async fn insert(&self, table: &str, row: Value) -> Result<Option<String>, DispatchError>;

    async fn update(&self, table: &str, id: &str, fields: Value) -> Result<(), DispatchError>;

    /// Delete every row whose `column` equals `value`.
    async fn delete_where(&self, table: &str, column: &str, value: &str) -> Result<(), DispatchError>;
}

/// Result of applying one queued write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Backend id of a created row.
    pub remote_id: Option<String>,
}

/// Entity handler contract used by the dispatcher.
#[async_trait]
pub trait EntitySyncHandler: Send + Sync {
    fn entity(&self) -> EntityType;

    async fn apply(
        &self,
        action: SyncAction,
        payload: &Value,
        user_id: &str,
    ) -> Result<ApplyOutcome, DispatchError>;
}

/// Child rows removed before the parent row is deleted.
#[derive(Debug, Clone)]
pub struct CascadeDelete {
    pub table: &'static str,
    pub foreign_key: &'static str,
}

/// Generic handler mapping an entity type onto one backend table.
pub struct TableHandler {
    entity: EntityType,
    table: &'static str,
    actions: &'static [SyncAction],
    extra_create_strip: &'static [&'static str],
    cascades: Vec<CascadeDelete>,
    remote: Arc<dyn RemoteStore>,
}

const ALL_ACTIONS: &[SyncAction] = &[SyncAction::Create, SyncAction::Update, SyncAction::Delete];
const UPDATE_ONLY: &[SyncAction] = &[SyncAction::Update];

impl TableHandler {
    pub fn new(entity: EntityType, table: &'static str, remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            entity,
            table,
            actions: ALL_ACTIONS,
            extra_create_strip: &[],
            cascades: Vec::new(),
            remote,
        }
    }

    /// Restrict the handler to field updates on existing rows.
    pub fn update_only(mut self) -> Self {
        self.actions = UPDATE_ONLY;
        self
    }

    /// Additional fields removed from create bodies.
    pub fn strip_on_create(mut self, fields: &'static [&'static str]) -> Self {
        self.extra_create_strip = fields;
        self
    }

    pub fn cascade_delete(mut self, table: &'static str, foreign_key: &'static str) -> Self {
        self.cascades.push(CascadeDelete { table, foreign_key });
        self
    }

    fn object<'a>(&self, payload: &'a Value) -> Result<&'a Map<String, Value>, DispatchError> {
        payload.as_object().ok_or_else(|| {
            DispatchError::invalid_payload(format!("{} payload must be a JSON object", self.entity))
        })
    }

    fn target_id<'a>(&self, action: SyncAction, payload: &'a Value) -> Result<&'a str, DispatchError> {
        payload_id(payload).ok_or_else(|| {
            DispatchError::invalid_payload(format!("{} {} requires an id", self.entity, action))
        })
    }

    fn create_body(&self, payload: &Value, user_id: &str) -> Result<Value, DispatchError> {
        let mut body = self.object(payload)?.clone();
        for field in LOCAL_ONLY_FIELDS.iter().chain(self.extra_create_strip) {
            body.remove(*field);
        }
        body.insert("user_id".to_string(), Value::String(user_id.to_string()));
        Ok(Value::Object(body))
    }

    fn update_body(&self, payload: &Value) -> Result<Value, DispatchError> {
        let mut body = self.object(payload)?.clone();
        body.remove("id");
        Ok(Value::Object(body))
    }
}

#[async_trait]
impl EntitySyncHandler for TableHandler {
    fn entity(&self) -> EntityType {
        self.entity.clone()
    }

    async fn apply(
        &self,
        action: SyncAction,
        payload: &Value,
        user_id: &str,
    ) -> Result<ApplyOutcome, DispatchError> {
        if !self.actions.contains(&action) {
            return Err(DispatchError::UnsupportedAction {
                entity: self.entity.to_string(),
                action,
            });
        }

        match action {
            SyncAction::Create => {
                let body = self.create_body(payload, user_id)?;
                let remote_id = self.remote.insert(self.table, body).await?;
                Ok(ApplyOutcome { remote_id })
            }
            SyncAction::Update => {
                let id = self.target_id(action, payload)?;
                let body = self.update_body(payload)?;
                self.remote.update(self.table, id, body).await?;
                Ok(ApplyOutcome::default())
            }
            SyncAction::Delete => {
                let id = self.target_id(action, payload)?;
                for cascade in &self.cascades {
                    self.remote
                        .delete_where(cascade.table, cascade.foreign_key, id)
                        .await?;
                }
                self.remote.delete_where(self.table, "id", id).await?;
                Ok(ApplyOutcome::default())
            }
        }
    }
}

/// Registry of entity handlers.
#[derive(Default)]
pub struct EntityDispatcher {
    handlers: HashMap<EntityType, Arc<dyn EntitySyncHandler>>,
}

impl EntityDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handlers for every entity type the app queues offline.
    pub fn with_default_handlers(remote: Arc<dyn RemoteStore>) -> Self {
        let mut dispatcher = Self::new();
        dispatcher.register(Arc::new(
            TableHandler::new(EntityType::Observation, "observations", Arc::clone(&remote))
                .strip_on_create(&["created_at"])
                .cascade_delete("assessments", "observation_id"),
        ));
        dispatcher.register(Arc::new(TableHandler::new(
            EntityType::Attendance,
            "attendance",
            Arc::clone(&remote),
        )));
        dispatcher.register(Arc::new(TableHandler::new(
            EntityType::Goal,
            "goals",
            Arc::clone(&remote),
        )));
        dispatcher.register(Arc::new(
            TableHandler::new(EntityType::GoalUpdate, "goals", Arc::clone(&remote)).update_only(),
        ));
        dispatcher.register(Arc::new(
            TableHandler::new(EntityType::ChildUpdate, "children", remote).update_only(),
        ));
        dispatcher
    }

    /// Register (or replace) the handler for its entity type.
    pub fn register(&mut self, handler: Arc<dyn EntitySyncHandler>) {
        self.handlers.insert(handler.entity(), handler);
    }

    pub fn supports(&self, entity_type: &EntityType) -> bool {
        self.handlers.contains_key(entity_type)
    }

    pub async fn apply(
        &self,
        entity_type: &EntityType,
        action: SyncAction,
        payload: &Value,
        user_id: &str,
    ) -> Result<ApplyOutcome, DispatchError> {
        let handler = self
            .handlers
            .get(entity_type)
            .ok_or_else(|| DispatchError::UnknownEntity(entity_type.to_string()))?;
        handler.apply(action, payload, user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::SyncRetryClass;
    use serde_json::json;
    use tokio::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Insert(String, Value),
        Update(String, String, Value),
        Delete(String, String, String),
    }

    #[derive(Default)]
    struct RecordingRemote {
        calls: Mutex<Vec<Call>>,
    }

    #[async_trait]
    impl RemoteStore for RecordingRemote {
        async fn insert(&self, table: &str, row: Value) -> Result<Option<String>, DispatchError> {
            self.calls.lock().await.push(Call::Insert(table.to_string(), row));
            Ok(Some("remote-1".to_string()))
        }

        async fn update(&self, table: &str, id: &str, fields: Value) -> Result<(), DispatchError> {
            self.calls
                .lock()
                .await
                .push(Call::Update(table.to_string(), id.to_string(), fields));
            Ok(())
        }

        async fn delete_where(
            &self,
            table: &str,
            column: &str,
            value: &str,
        ) -> Result<(), DispatchError> {
            self.calls.lock().await.push(Call::Delete(
                table.to_string(),
                column.to_string(),
                value.to_string(),
            ));
            Ok(())
        }
    }

    fn dispatcher() -> (EntityDispatcher, Arc<RecordingRemote>) {
        let remote = Arc::new(RecordingRemote::default());
        (
            EntityDispatcher::with_default_handlers(remote.clone()),
            remote,
        )
    }

    #[tokio::test]
    async fn observation_create_strips_local_fields_and_sets_owner() {
        let (dispatcher, remote) = dispatcher();
        let outcome = dispatcher
            .apply(
                &EntityType::Observation,
                SyncAction::Create,
                &json!({
                    "id": "local-1",
                    "created_at": "2026-01-01T00:00:00Z",
                    "dirty": true,
                    "media_files": [{ "name": "a.jpg", "path": "/tmp/a.jpg" }],
                    "child_id": "c1",
                    "note": "built a tower"
                }),
                "user-9",
            )
            .await
            .expect("apply");

        assert_eq!(outcome.remote_id.as_deref(), Some("remote-1"));
        let calls = remote.calls.lock().await.clone();
        assert_eq!(
            calls,
            vec![Call::Insert(
                "observations".to_string(),
                json!({ "child_id": "c1", "note": "built a tower", "user_id": "user-9" })
            )]
        );
    }

    #[tokio::test]
    async fn update_sends_fields_without_id() {
        let (dispatcher, remote) = dispatcher();
        dispatcher
            .apply(
                &EntityType::GoalUpdate,
                SyncAction::Update,
                &json!({ "id": "g1", "progress": 80, "status": "active" }),
                "user-9",
            )
            .await
            .expect("apply");

        let calls = remote.calls.lock().await.clone();
        assert_eq!(
            calls,
            vec![Call::Update(
                "goals".to_string(),
                "g1".to_string(),
                json!({ "progress": 80, "status": "active" })
            )]
        );
    }

    #[tokio::test]
    async fn observation_delete_removes_assessments_first() {
        let (dispatcher, remote) = dispatcher();
        dispatcher
            .apply(
                &EntityType::Observation,
                SyncAction::Delete,
                &json!({ "id": "o1" }),
                "user-9",
            )
            .await
            .expect("apply");

        let calls = remote.calls.lock().await.clone();
        assert_eq!(
            calls,
            vec![
                Call::Delete(
                    "assessments".to_string(),
                    "observation_id".to_string(),
                    "o1".to_string()
                ),
                Call::Delete("observations".to_string(), "id".to_string(), "o1".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn unknown_entity_is_permanent_error() {
        let (dispatcher, remote) = dispatcher();
        let err = dispatcher
            .apply(
                &EntityType::Other("portfolio_photo".to_string()),
                SyncAction::Create,
                &json!({}),
                "user-9",
            )
            .await
            .expect_err("unknown entity");
        assert!(matches!(err, DispatchError::UnknownEntity(ref tag) if tag == "portfolio_photo"));
        assert_eq!(err.retry_class(), SyncRetryClass::Permanent);
        assert!(remote.calls.lock().await.is_empty());
    }

    #[tokio::test]
    async fn update_only_entities_reject_create() {
        let (dispatcher, remote) = dispatcher();
        let err = dispatcher
            .apply(
                &EntityType::ChildUpdate,
                SyncAction::Create,
                &json!({ "name": "Ada" }),
                "user-9",
            )
            .await
            .expect_err("unsupported");
        assert!(matches!(err, DispatchError::UnsupportedAction { .. }));
        assert!(remote.calls.lock().await.is_empty());
    }

    #[tokio::test]
    async fn update_without_id_is_invalid_payload() {
        let (dispatcher, _remote) = dispatcher();
        let err = dispatcher
            .apply(
                &EntityType::Attendance,
                SyncAction::Update,
                &json!({ "status": "present", "id": "  " }),
                "user-9",
            )
            .await
            .expect_err("missing id");
        assert!(matches!(err, DispatchError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn registered_handler_extends_routing() {
        let (mut dispatcher, remote) = dispatcher();
        let entity = EntityType::Other("announcement".to_string());
        assert!(!dispatcher.supports(&entity));
        dispatcher.register(Arc::new(TableHandler::new(
            entity.clone(),
            "announcements",
            remote.clone(),
        )));
        dispatcher
            .apply(&entity, SyncAction::Create, &json!({ "title": "Trip" }), "u1")
            .await
            .expect("apply");
        assert!(matches!(
            remote.calls.lock().await.first(),
            Some(Call::Insert(table, _)) if table == "announcements"
        ));
    }
}
