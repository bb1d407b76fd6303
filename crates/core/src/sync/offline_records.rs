//! Optimistic local echo of records authored while offline.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use uuid::Uuid;

use crate::errors::{Error, Result};
use crate::storage::{load_json, save_json, KeyValueStore};

use super::model::{EntityType, MediaRef, OfflineRecord};

pub const OFFLINE_RECORDS_KEY: &str = "offlineRecords";

pub struct OfflineRecordStore {
    store: Arc<dyn KeyValueStore>,
    write_lock: Mutex<()>,
}

impl OfflineRecordStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| Error::storage("offline record lock poisoned"))
    }

    fn load(&self) -> Result<Vec<OfflineRecord>> {
        Ok(load_json(self.store.as_ref(), OFFLINE_RECORDS_KEY)?.unwrap_or_default())
    }

    fn save(&self, records: &[OfflineRecord]) -> Result<()> {
        if records.is_empty() {
            return self.store.remove(OFFLINE_RECORDS_KEY);
        }
        save_json(self.store.as_ref(), OFFLINE_RECORDS_KEY, records)
    }

    /// Store a new dirty record under a fresh local id.
    pub fn record(
        &self,
        entity_type: EntityType,
        fields: serde_json::Map<String, serde_json::Value>,
        media_files: Vec<MediaRef>,
    ) -> Result<OfflineRecord> {
        let _guard = self.lock()?;
        let mut records = self.load()?;
        let record = OfflineRecord {
            id: Uuid::new_v4().to_string(),
            entity_type,
            fields,
            created_at: Utc::now().to_rfc3339(),
            dirty: true,
            media_files,
        };
        records.push(record.clone());
        self.save(&records)?;
        Ok(record)
    }

    pub fn list(&self, entity_type: &EntityType) -> Result<Vec<OfflineRecord>> {
        let _guard = self.lock()?;
        Ok(self
            .load()?
            .into_iter()
            .filter(|record| &record.entity_type == entity_type)
            .collect())
    }

    /// Records of one entity type whose `field` equals `value`, e.g. the
    /// observations of a single child.
    pub fn list_matching(
        &self,
        entity_type: &EntityType,
        field: &str,
        value: &serde_json::Value,
    ) -> Result<Vec<OfflineRecord>> {
        Ok(self
            .list(entity_type)?
            .into_iter()
            .filter(|record| record.fields.get(field) == Some(value))
            .collect())
    }

    /// Drop a record once its create has reached the backend. No-op if absent.
    pub fn remove(&self, local_id: &str) -> Result<bool> {
        let _guard = self.lock()?;
        let mut records = self.load()?;
        let before = records.len();
        records.retain(|record| record.id != local_id);
        if records.len() == before {
            return Ok(false);
        }
        self.save(&records)?;
        Ok(true)
    }
}
