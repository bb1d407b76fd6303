//! SQLite-backed [`KeyValueStore`].

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension};
use sprout_core::storage::KeyValueStore;

use crate::errors::{Result, StorageError};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS kv_store (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
";

/// Durable key-value store over a single SQLite connection.
///
/// Every `set` commits before returning, so queued writes survive the app
/// being killed right after an enqueue.
pub struct SqliteKeyValueStore {
    conn: Mutex<Connection>,
}

impl SqliteKeyValueStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!("[Storage] journal_mode={}", mode);
        conn.pragma_update(None, "synchronous", "FULL")?;
        let store = Self::init(conn)?;
        info!("[Storage] Opened key-value store at {}", path.display());
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    fn read(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM kv_store WHERE key = ?1", params![key])?;
        if removed > 0 {
            debug!("[Storage] Removed key {}", key);
        }
        Ok(())
    }
}

impl KeyValueStore for SqliteKeyValueStore {
    fn get(&self, key: &str) -> sprout_core::Result<Option<String>> {
        Ok(self.read(key)?)
    }

    fn set(&self, key: &str, value: &str) -> sprout_core::Result<()> {
        Ok(self.write(key, value)?)
    }

    fn remove(&self, key: &str) -> sprout_core::Result<()> {
        Ok(self.delete(key)?)
    }
}
