//! Durable FIFO queue of writes captured while offline.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use log::debug;
use uuid::Uuid;

use crate::errors::{Error, Result};
use crate::storage::{load_json, save_json, KeyValueStore};

use super::model::{EntityType, QueueItem, SyncAction};

/// Storage key holding the serialized queue array.
pub const OFFLINE_QUEUE_KEY: &str = "offlineQueue";

/// Local persistent queue.
///
/// Every mutation rewrites the whole array before returning, so a crash right
/// after a call can neither lose nor repeat its effect.
pub struct OfflineQueue {
    store: Arc<dyn KeyValueStore>,
    write_lock: Mutex<()>,
}

impl OfflineQueue {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| Error::storage("offline queue lock poisoned"))
    }

    fn load(&self) -> Result<Vec<QueueItem>> {
        Ok(load_json(self.store.as_ref(), OFFLINE_QUEUE_KEY)?.unwrap_or_default())
    }

    fn save(&self, items: &[QueueItem]) -> Result<()> {
        if items.is_empty() {
            return self.store.remove(OFFLINE_QUEUE_KEY);
        }
        save_json(self.store.as_ref(), OFFLINE_QUEUE_KEY, items)
    }

    /// Append a write to the queue.
    pub fn enqueue(
        &self,
        entity_type: EntityType,
        action: SyncAction,
        payload: serde_json::Value,
    ) -> Result<QueueItem> {
        self.push(entity_type, action, payload, None)
    }

    /// Append a write that must wait until `depends_on` has been applied.
    pub fn enqueue_after(
        &self,
        entity_type: EntityType,
        action: SyncAction,
        payload: serde_json::Value,
        depends_on: impl Into<String>,
    ) -> Result<QueueItem> {
        self.push(entity_type, action, payload, Some(depends_on.into()))
    }

    fn push(
        &self,
        entity_type: EntityType,
        action: SyncAction,
        payload: serde_json::Value,
        depends_on: Option<String>,
    ) -> Result<QueueItem> {
        let _guard = self.lock()?;
        let mut items = self.load()?;

        let mut id = Uuid::now_v7().to_string();
        while items.iter().any(|item| item.id == id) {
            id = Uuid::now_v7().to_string();
        }

        let item = QueueItem {
            id,
            entity_type,
            action,
            payload,
            created_at: Utc::now().to_rfc3339(),
            retry_count: 0,
            depends_on,
        };
        items.push(item.clone());
        self.save(&items)?;

        debug!(
            "[OfflineSync] Queued {} {} ({} pending)",
            item.entity_type,
            item.action,
            items.len()
        );
        Ok(item)
    }

    /// All pending items in enqueue order.
    pub fn list(&self) -> Result<Vec<QueueItem>> {
        let _guard = self.lock()?;
        self.load()
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.list()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn contains(&self, id: &str) -> Result<bool> {
        Ok(self.list()?.iter().any(|item| item.id == id))
    }

    /// Remove an item. Removing an absent id is a no-op.
    pub fn remove(&self, id: &str) -> Result<()> {
        let _guard = self.lock()?;
        let mut items = self.load()?;
        let before = items.len();
        items.retain(|item| item.id != id);
        if items.len() == before {
            return Ok(());
        }
        self.save(&items)
    }

    /// Bump the retry count. Returns the new count, or `None` when absent.
    pub fn increment_retry(&self, id: &str) -> Result<Option<u32>> {
        let _guard = self.lock()?;
        let mut items = self.load()?;
        let Some(item) = items.iter_mut().find(|item| item.id == id) else {
            return Ok(None);
        };
        item.retry_count += 1;
        let count = item.retry_count;
        self.save(&items)?;
        Ok(Some(count))
    }

    /// Put a previously dropped item back at the tail, keeping its id and
    /// dependency and resetting its retry count.
    ///
    /// Returns the queued copy. An item whose id is already queued is left
    /// as it is.
    pub fn requeue(&self, mut item: QueueItem) -> Result<QueueItem> {
        let _guard = self.lock()?;
        let mut items = self.load()?;
        if let Some(existing) = items.iter().find(|queued| queued.id == item.id) {
            return Ok(existing.clone());
        }
        item.retry_count = 0;
        items.push(item.clone());
        self.save(&items)?;

        debug!(
            "[OfflineSync] Requeued {} {} ({} pending)",
            item.entity_type,
            item.action,
            items.len()
        );
        Ok(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKeyValueStore;
    use serde_json::json;
    use std::collections::HashSet;

    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get(&self, _key: &str) -> Result<Option<String>> {
            Ok(None)
        }

        fn set(&self, _key: &str, _value: &str) -> Result<()> {
            Err(Error::storage("disk full"))
        }

        fn remove(&self, _key: &str) -> Result<()> {
            Err(Error::storage("disk full"))
        }
    }

    fn queue() -> OfflineQueue {
        OfflineQueue::new(Arc::new(MemoryKeyValueStore::new()))
    }

    #[test]
    fn enqueued_ids_are_unique() {
        let queue = queue();
        let ids = (0..50)
            .map(|n| {
                queue
                    .enqueue(
                        EntityType::Observation,
                        SyncAction::Create,
                        json!({ "note": format!("obs {n}") }),
                    )
                    .expect("enqueue")
                    .id
            })
            .collect::<HashSet<_>>();
        assert_eq!(ids.len(), 50);
        assert_eq!(queue.len().unwrap(), 50);
    }

    #[test]
    fn list_preserves_enqueue_order() {
        let queue = queue();
        for n in 0..5 {
            queue
                .enqueue(EntityType::Goal, SyncAction::Create, json!({ "n": n }))
                .unwrap();
        }
        let order = queue
            .list()
            .unwrap()
            .iter()
            .map(|item| item.payload["n"].as_i64().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn new_items_start_with_zero_retries() {
        let queue = queue();
        let item = queue
            .enqueue(EntityType::Attendance, SyncAction::Update, json!({ "id": "a1" }))
            .unwrap();
        assert_eq!(item.retry_count, 0);
        assert_eq!(item.depends_on, None);
        assert_eq!(queue.list().unwrap(), vec![item]);
    }

    #[test]
    fn remove_is_idempotent() {
        let queue = queue();
        let a = queue
            .enqueue(EntityType::Goal, SyncAction::Delete, json!({ "id": "g1" }))
            .unwrap();
        let b = queue
            .enqueue(EntityType::Goal, SyncAction::Delete, json!({ "id": "g2" }))
            .unwrap();

        queue.remove(&a.id).unwrap();
        let once = queue.list().unwrap();
        queue.remove(&a.id).unwrap();
        assert_eq!(queue.list().unwrap(), once);
        assert_eq!(once, vec![b]);
    }

    #[test]
    fn increment_retry_updates_only_target() {
        let queue = queue();
        let a = queue
            .enqueue(EntityType::Goal, SyncAction::Create, json!({ "title": "a" }))
            .unwrap();
        let b = queue
            .enqueue(EntityType::Goal, SyncAction::Create, json!({ "title": "b" }))
            .unwrap();

        assert_eq!(queue.increment_retry(&a.id).unwrap(), Some(1));
        assert_eq!(queue.increment_retry(&a.id).unwrap(), Some(2));
        assert_eq!(queue.increment_retry("missing").unwrap(), None);

        let items = queue.list().unwrap();
        assert_eq!(items[0].retry_count, 2);
        assert_eq!(items[1].id, b.id);
        assert_eq!(items[1].retry_count, 0);
    }

    #[test]
    fn queue_survives_new_instance_over_same_store() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::new());
        let first = OfflineQueue::new(Arc::clone(&store));
        let item = first
            .enqueue_after(
                EntityType::ChildUpdate,
                SyncAction::Update,
                json!({ "id": "c1" }),
                "parent-item",
            )
            .unwrap();

        let second = OfflineQueue::new(store);
        let items = second.list().unwrap();
        assert_eq!(items, vec![item]);
        assert_eq!(items[0].depends_on.as_deref(), Some("parent-item"));
    }

    #[test]
    fn emptied_queue_removes_storage_key() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::new());
        let queue = OfflineQueue::new(Arc::clone(&store));
        let item = queue
            .enqueue(EntityType::Goal, SyncAction::Create, json!({}))
            .unwrap();
        assert!(store.get(OFFLINE_QUEUE_KEY).unwrap().is_some());
        queue.remove(&item.id).unwrap();
        assert!(store.get(OFFLINE_QUEUE_KEY).unwrap().is_none());
        assert!(queue.is_empty().unwrap());
    }

    #[test]
    fn storage_failure_propagates_from_enqueue() {
        let queue = OfflineQueue::new(Arc::new(BrokenStore));
        let result = queue.enqueue(EntityType::Goal, SyncAction::Create, json!({}));
        assert!(matches!(result, Err(Error::Storage(_))));
    }

    #[test]
    fn requeue_keeps_identity_and_resets_retries() {
        let queue = queue();
        let first = queue
            .enqueue(EntityType::Goal, SyncAction::Create, json!({ "id": "g1" }))
            .unwrap();
        let mut dropped = queue
            .enqueue_after(
                EntityType::Goal,
                SyncAction::Update,
                json!({ "id": "g1", "title": "Zip coat" }),
                &first.id,
            )
            .unwrap();
        queue.remove(&dropped.id).unwrap();
        dropped.retry_count = 3;

        let requeued = queue.requeue(dropped.clone()).unwrap();
        assert_eq!(requeued.id, dropped.id);
        assert_eq!(requeued.depends_on.as_deref(), Some(first.id.as_str()));
        assert_eq!(requeued.retry_count, 0);

        // Requeueing an id that is already queued does not duplicate it.
        queue.requeue(dropped).unwrap();
        assert_eq!(queue.len().unwrap(), 2);
    }
}
