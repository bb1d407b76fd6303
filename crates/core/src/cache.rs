//! Read cache for reference data shown while offline.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::warn;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::storage::{load_json, save_json, KeyValueStore};

pub const CACHED_CHILDREN_KEY: &str = "cachedChildren";
pub const CACHED_CLASSES_KEY: &str = "cachedClasses";
pub const DEFAULT_CACHE_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheEntry<T> {
    data: T,
    cached_at: DateTime<Utc>,
}

/// Timestamped JSON snapshots of remote lists.
#[derive(Clone)]
pub struct ReadCache {
    store: Arc<dyn KeyValueStore>,
}

impl ReadCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn put<T: Serialize>(&self, key: &str, data: &T) -> Result<()> {
        let entry = CacheEntry {
            data,
            cached_at: Utc::now(),
        };
        save_json(self.store.as_ref(), key, &entry)
    }

    /// Cached value if younger than `max_age`. Stale entries are evicted.
    ///
    /// Storage and decoding faults are logged and reported as a miss.
    pub fn get<T: DeserializeOwned>(&self, key: &str, max_age: Duration) -> Option<T> {
        let entry: CacheEntry<T> = match load_json(self.store.as_ref(), key) {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(err) => {
                warn!("[ReadCache] Failed to read {}: {}", key, err);
                return None;
            }
        };

        let age = Utc::now().signed_duration_since(entry.cached_at);
        let expired = age
            .to_std()
            .map(|age| age > max_age)
            .unwrap_or(false);
        if expired {
            self.evict(key);
            return None;
        }
        Some(entry.data)
    }

    pub fn evict(&self, key: &str) {
        if let Err(err) = self.store.remove(key) {
            warn!("[ReadCache] Failed to evict {}: {}", key, err);
        }
    }
}
