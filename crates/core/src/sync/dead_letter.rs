//! Dead-letter store for queue items dropped during a drain.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;

use crate::errors::{Error, Result};
use crate::storage::{load_json, save_json, KeyValueStore};

use super::model::{DeadLetter, DeadLetterCode, QueueItem};

pub const DEAD_LETTERS_KEY: &str = "offlineDeadLetters";

pub struct DeadLetterStore {
    store: Arc<dyn KeyValueStore>,
    write_lock: Mutex<()>,
}

impl DeadLetterStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| Error::storage("dead letter lock poisoned"))
    }

    fn load(&self) -> Result<Vec<DeadLetter>> {
        Ok(load_json(self.store.as_ref(), DEAD_LETTERS_KEY)?.unwrap_or_default())
    }

    pub fn push(&self, item: QueueItem, code: DeadLetterCode, reason: impl Into<String>) -> Result<()> {
        let _guard = self.lock()?;
        let mut letters = self.load()?;
        letters.retain(|letter| letter.item.id != item.id);
        letters.push(DeadLetter {
            item,
            code,
            reason: reason.into(),
            dropped_at: Utc::now().to_rfc3339(),
        });
        save_json(self.store.as_ref(), DEAD_LETTERS_KEY, &letters)
    }

    pub fn list(&self) -> Result<Vec<DeadLetter>> {
        let _guard = self.lock()?;
        self.load()
    }

    pub fn contains(&self, item_id: &str) -> Result<bool> {
        Ok(self.list()?.iter().any(|letter| letter.item.id == item_id))
    }

    /// Remove and return a dead letter.
    pub fn take(&self, item_id: &str) -> Result<Option<DeadLetter>> {
        let _guard = self.lock()?;
        let mut letters = self.load()?;
        let Some(position) = letters.iter().position(|letter| letter.item.id == item_id) else {
            return Ok(None);
        };
        let letter = letters.remove(position);
        if letters.is_empty() {
            self.store.remove(DEAD_LETTERS_KEY)?;
        } else {
            save_json(self.store.as_ref(), DEAD_LETTERS_KEY, &letters)?;
        }
        Ok(Some(letter))
    }
}
