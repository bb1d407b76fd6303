//! Local id → remote id mapping for records created offline.

use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::Result;
use crate::storage::{load_json, save_json, KeyValueStore};

use super::model::{payload_id, SyncAction};

pub const LOCAL_ID_MAP_KEY: &str = "offlineIdMap";

pub struct LocalIdMap {
    store: Arc<dyn KeyValueStore>,
}

impl LocalIdMap {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    fn load(&self) -> Result<HashMap<String, String>> {
        Ok(load_json(self.store.as_ref(), LOCAL_ID_MAP_KEY)?.unwrap_or_default())
    }

    pub fn record(&self, local_id: &str, remote_id: &str) -> Result<()> {
        if local_id == remote_id {
            return Ok(());
        }
        let mut map = self.load()?;
        map.insert(local_id.to_string(), remote_id.to_string());
        save_json(self.store.as_ref(), LOCAL_ID_MAP_KEY, &map)
    }

    pub fn resolve(&self, local_id: &str) -> Result<Option<String>> {
        Ok(self.load()?.get(local_id).cloned())
    }

    /// Point an update/delete payload at the remote row when its `id` is a
    /// local id whose create has already synced.
    pub fn rewrite_payload(
        &self,
        action: SyncAction,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        if action == SyncAction::Create {
            return Ok(payload.clone());
        }
        let Some(id) = payload_id(payload) else {
            return Ok(payload.clone());
        };
        match self.resolve(id)? {
            Some(remote_id) => {
                let mut rewritten = payload.clone();
                rewritten["id"] = serde_json::Value::String(remote_id);
                Ok(rewritten)
            }
            None => Ok(payload.clone()),
        }
    }

    pub fn clear(&self) -> Result<()> {
        self.store.remove(LOCAL_ID_MAP_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKeyValueStore;
    use serde_json::json;

    #[test]
    fn rewrites_update_payload_for_synced_local_id() {
        let map = LocalIdMap::new(Arc::new(MemoryKeyValueStore::new()));
        map.record("local-1", "9f1c").unwrap();

        let rewritten = map
            .rewrite_payload(SyncAction::Update, &json!({ "id": "local-1", "progress": 40 }))
            .unwrap();
        assert_eq!(rewritten, json!({ "id": "9f1c", "progress": 40 }));

        let untouched = map
            .rewrite_payload(SyncAction::Delete, &json!({ "id": "other" }))
            .unwrap();
        assert_eq!(untouched, json!({ "id": "other" }));
    }

    #[test]
    fn create_payloads_are_never_rewritten() {
        let map = LocalIdMap::new(Arc::new(MemoryKeyValueStore::new()));
        map.record("local-1", "9f1c").unwrap();
        let payload = json!({ "id": "local-1" });
        assert_eq!(
            map.rewrite_payload(SyncAction::Create, &payload).unwrap(),
            payload
        );
    }

    #[test]
    fn clear_forgets_mappings() {
        let map = LocalIdMap::new(Arc::new(MemoryKeyValueStore::new()));
        map.record("local-1", "9f1c").unwrap();
        map.clear().unwrap();
        assert_eq!(map.resolve("local-1").unwrap(), None);
    }
}
