use std::sync::{Arc, Mutex};

use log::{info, warn};
use sprout_core::cache::ReadCache;
use sprout_core::session::SessionStore;
use sprout_core::storage::KeyValueStore;
use sprout_core::sync::{ConnectivityMonitor, EntityDispatcher, NetworkStatus, SyncService};
use sprout_core::{ChangeBus, SyncConfig};
use sprout_remote::{PostgrestClient, ReachabilityProbe};
use sprout_storage_sqlite::SqliteKeyValueStore;
use tokio::task::JoinHandle;

use crate::errors::Result;

/// Services shared by the host application for the lifetime of the process.
pub struct SyncContext {
    pub config: SyncConfig,
    pub session: Arc<SessionStore>,
    pub connectivity: Arc<ConnectivityMonitor>,
    pub bus: ChangeBus,
    pub read_cache: ReadCache,
    pub sync_service: Arc<SyncService>,
    probe_task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncContext {
    /// Open local storage and build the service graph. Nothing runs until
    /// [`start`](Self::start).
    pub fn build(config: SyncConfig) -> Result<Self> {
        let store: Arc<dyn KeyValueStore> = Arc::new(SqliteKeyValueStore::open(&config.db_path)?);
        Self::with_store(config, store)
    }

    pub fn with_store(config: SyncConfig, store: Arc<dyn KeyValueStore>) -> Result<Self> {
        if !config.has_remote() {
            warn!("[SyncContext] Supabase URL or anon key missing; queued writes will not sync");
        }

        let session = Arc::new(SessionStore::new());
        let remote = Arc::new(PostgrestClient::new(
            &config.supabase_url,
            &config.supabase_anon_key,
            session.clone(),
        )?);
        let dispatcher = Arc::new(EntityDispatcher::with_default_handlers(remote));
        let connectivity = Arc::new(ConnectivityMonitor::new(
            NetworkStatus::Unknown,
            config.startup_delay(),
        ));
        let bus = ChangeBus::new();

        let sync_service = Arc::new(SyncService::new(
            &config,
            Arc::clone(&store),
            dispatcher,
            session.clone(),
            Arc::clone(&connectivity),
            bus.clone(),
        ));

        Ok(Self {
            read_cache: ReadCache::new(store),
            config,
            session,
            connectivity,
            bus,
            sync_service,
            probe_task: Mutex::new(None),
        })
    }

    /// Start automatic syncing and, when a backend is configured, the
    /// reachability probe. Must be called inside a tokio runtime.
    pub fn start(&self) -> Result<()> {
        self.sync_service.start_auto_sync();

        if !self.config.has_remote() {
            return Ok(());
        }
        let Ok(mut guard) = self.probe_task.lock() else {
            return Ok(());
        };
        if guard.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Ok(());
        }
        let probe = ReachabilityProbe::new(&self.config.supabase_url, &self.config.supabase_anon_key)?;
        *guard = Some(probe.spawn(Arc::clone(&self.connectivity), self.config.probe_interval()));
        info!(
            "[SyncContext] Reachability probe every {}s",
            self.config.probe_interval().as_secs()
        );
        Ok(())
    }

    pub fn shutdown(&self) {
        self.sync_service.stop_auto_sync();
        if let Ok(mut guard) = self.probe_task.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}
