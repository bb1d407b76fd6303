//! Runtime configuration for the sync stack.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::sync::DEFAULT_RETRY_CEILING;

const DEFAULT_STARTUP_DELAY_MS: u64 = 2_000;
const DEFAULT_PROBE_INTERVAL_SECS: u64 = 30;
const DEFAULT_DB_PATH: &str = "sprout.db";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    /// Base URL of the Supabase project, without a trailing slash.
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub db_path: PathBuf,
    /// Failed attempts after which a queued write is dead-lettered.
    pub retry_ceiling: u32,
    pub startup_delay_ms: u64,
    pub probe_interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            retry_ceiling: DEFAULT_RETRY_CEILING,
            startup_delay_ms: DEFAULT_STARTUP_DELAY_MS,
            probe_interval_secs: DEFAULT_PROBE_INTERVAL_SECS,
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_number<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env_string(name) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::config(format!("{} must be a number, got '{}'", name, raw))),
        None => Ok(None),
    }
}

impl SyncConfig {
    /// Defaults overridden by whichever variables are set.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(url) = env_string("SUPABASE_URL") {
            config.supabase_url = url.trim_end_matches('/').to_string();
        }
        if let Some(key) = env_string("SUPABASE_ANON_KEY") {
            config.supabase_anon_key = key;
        }
        if let Some(path) = env_string("SPROUT_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Some(ceiling) = env_number::<u32>("SPROUT_SYNC_RETRY_CEILING")? {
            if ceiling == 0 {
                return Err(Error::config("SPROUT_SYNC_RETRY_CEILING must be at least 1"));
            }
            config.retry_ceiling = ceiling;
        }
        if let Some(delay) = env_number("SPROUT_SYNC_STARTUP_DELAY_MS")? {
            config.startup_delay_ms = delay;
        }
        if let Some(interval) = env_number("SPROUT_PROBE_INTERVAL_SECS")? {
            config.probe_interval_secs = interval;
        }
        Ok(config)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs.max(1))
    }

    /// Whether the remote backend is configured at all.
    pub fn has_remote(&self) -> bool {
        !self.supabase_url.is_empty() && !self.supabase_anon_key.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_sync_behaviour() {
        let config = SyncConfig::default();
        assert_eq!(config.retry_ceiling, 3);
        assert_eq!(config.startup_delay(), Duration::from_secs(2));
        assert!(!config.has_remote());
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: SyncConfig = serde_json::from_str(
            r#"{"supabaseUrl":"https://example.supabase.co","retryCeiling":5}"#,
        )
        .unwrap();
        assert_eq!(config.supabase_url, "https://example.supabase.co");
        assert_eq!(config.retry_ceiling, 5);
        assert_eq!(config.probe_interval_secs, DEFAULT_PROBE_INTERVAL_SECS);
    }
}
