//! Sync executor: drains the offline queue against the backend.

use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Instant;

use log::{debug, info, warn};
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::config::SyncConfig;
use crate::errors::Result;
use crate::events::ChangeBus;
use crate::session::SessionProvider;
use crate::storage::KeyValueStore;

use super::connectivity::ConnectivityMonitor;
use super::dead_letter::DeadLetterStore;
use super::dispatcher::EntityDispatcher;
use super::id_map::LocalIdMap;
use super::model::{
    DeadLetter, DeadLetterCode, DrainOutcome, DrainStatus, EntityType, MediaRef, QueueItem,
    SyncAction,
};
use super::offline_records::OfflineRecordStore;
use super::queue::OfflineQueue;
use super::retry_policy::retry_ceiling_reached;

/// User-facing summary of a manual sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualSyncStatus {
    NoConnectivity,
    NothingToSync,
    Synced(usize),
    PartiallySynced { synced: usize, failed: usize },
}

impl std::fmt::Display for ManualSyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ManualSyncStatus::NoConnectivity => f.write_str("no connectivity"),
            ManualSyncStatus::NothingToSync => f.write_str("nothing to sync"),
            ManualSyncStatus::Synced(count) => write!(f, "{} synced", count),
            ManualSyncStatus::PartiallySynced { synced, failed } => {
                write!(f, "{} synced, {} failed", synced, failed)
            }
        }
    }
}

impl ManualSyncStatus {
    fn from_outcome(outcome: &DrainOutcome) -> Self {
        if outcome.is_empty() {
            ManualSyncStatus::NothingToSync
        } else if outcome.failed_count == 0 {
            ManualSyncStatus::Synced(outcome.success_count)
        } else {
            ManualSyncStatus::PartiallySynced {
                synced: outcome.success_count,
                failed: outcome.failed_count,
            }
        }
    }
}

/// Tracks counters during one drain.
#[derive(Default)]
struct DrainProgress {
    success_count: usize,
    failed_count: usize,
    deferred_count: usize,
    /// Snapshot items not yet removed from the queue.
    pending: HashSet<String>,
}

/// Single owner of the offline queue and its drain guard.
///
/// Construct once at startup and share behind an `Arc`.
pub struct SyncService {
    queue: OfflineQueue,
    dead_letters: DeadLetterStore,
    id_map: LocalIdMap,
    offline_records: OfflineRecordStore,
    dispatcher: Arc<EntityDispatcher>,
    session: Arc<dyn SessionProvider>,
    connectivity: Arc<ConnectivityMonitor>,
    bus: ChangeBus,
    drain_guard: Mutex<()>,
    retry_ceiling: u32,
}

impl SyncService {
    pub fn new(
        config: &SyncConfig,
        store: Arc<dyn KeyValueStore>,
        dispatcher: Arc<EntityDispatcher>,
        session: Arc<dyn SessionProvider>,
        connectivity: Arc<ConnectivityMonitor>,
        bus: ChangeBus,
    ) -> Self {
        Self {
            queue: OfflineQueue::new(Arc::clone(&store)),
            dead_letters: DeadLetterStore::new(Arc::clone(&store)),
            id_map: LocalIdMap::new(Arc::clone(&store)),
            offline_records: OfflineRecordStore::new(store),
            dispatcher,
            session,
            connectivity,
            bus,
            drain_guard: Mutex::new(()),
            retry_ceiling: config.retry_ceiling.max(1),
        }
    }

    pub fn queue(&self) -> &OfflineQueue {
        &self.queue
    }

    pub fn offline_records(&self) -> &OfflineRecordStore {
        &self.offline_records
    }

    pub fn bus(&self) -> &ChangeBus {
        &self.bus
    }

    pub fn connectivity(&self) -> Arc<ConnectivityMonitor> {
        Arc::clone(&self.connectivity)
    }

    /// Queue a write captured while offline.
    pub fn enqueue(
        &self,
        entity_type: EntityType,
        action: SyncAction,
        payload: Value,
    ) -> Result<QueueItem> {
        self.queue.enqueue(entity_type, action, payload)
    }

    /// Queue a write that waits for another queued write to sync first.
    pub fn enqueue_after(
        &self,
        entity_type: EntityType,
        action: SyncAction,
        payload: Value,
        depends_on: &str,
    ) -> Result<QueueItem> {
        self.queue
            .enqueue_after(entity_type, action, payload, depends_on)
    }

    /// Capture a record offline: keep a local echo and queue its create.
    pub fn record_offline(
        &self,
        entity_type: EntityType,
        fields: Map<String, Value>,
        media_files: Vec<MediaRef>,
    ) -> Result<QueueItem> {
        let record = self
            .offline_records
            .record(entity_type.clone(), fields, media_files)?;
        let item = match self
            .queue
            .enqueue(entity_type, SyncAction::Create, record.to_create_payload())
        {
            Ok(item) => item,
            Err(err) => {
                // A local echo without a queued create would never sync.
                if let Err(cleanup) = self.offline_records.remove(&record.id) {
                    warn!(
                        "[OfflineSync] Failed to discard offline record {}: {}",
                        record.id, cleanup
                    );
                }
                return Err(err);
            }
        };
        if !record.media_files.is_empty() {
            debug!(
                "[OfflineSync] {} media file(s) on {} stay local until uploaded separately",
                record.media_files.len(),
                record.id
            );
        }
        self.bus.publish();
        Ok(item)
    }

    pub fn pending_count(&self) -> Result<usize> {
        self.queue.len()
    }

    pub fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        self.dead_letters.list()
    }

    /// Put a dead letter back on the queue with a fresh retry budget.
    ///
    /// The item keeps its id, so writes that depend on it keep waiting for it.
    pub fn retry_dead_letter(&self, item_id: &str) -> Result<Option<QueueItem>> {
        let Some(letter) = self.dead_letters.take(item_id)? else {
            return Ok(None);
        };
        let requeued = self.queue.requeue(letter.item)?;
        info!("[OfflineSync] Requeued dead letter {}", requeued.id);
        Ok(Some(requeued))
    }

    pub fn discard_dead_letter(&self, item_id: &str) -> Result<bool> {
        let discarded = self.dead_letters.take(item_id)?.is_some();
        if discarded {
            self.clear_id_map_if_settled()?;
        }
        Ok(discarded)
    }

    /// Local ids can only be forgotten once no queued or dead-lettered write
    /// may still refer to them.
    fn clear_id_map_if_settled(&self) -> Result<()> {
        if self.queue.is_empty()? && self.dead_letters.list()?.is_empty() {
            self.id_map.clear()?;
        }
        Ok(())
    }

    /// Run one drain pass over a snapshot of the queue.
    ///
    /// Returns without touching the queue when another drain is in flight,
    /// when offline, or when nobody is signed in.
    pub async fn drain(&self) -> Result<DrainOutcome> {
        let Ok(_drain_guard) = self.drain_guard.try_lock() else {
            debug!("[OfflineSync] Drain already in progress; skipping");
            return Ok(DrainOutcome::skipped(DrainStatus::AlreadyRunning));
        };

        if !self.connectivity.is_online() {
            debug!("[OfflineSync] Offline; drain skipped");
            return Ok(DrainOutcome::skipped(DrainStatus::Offline));
        }

        let Some(user_id) = self.session.current_user_id().await else {
            warn!("[OfflineSync] No signed-in user; drain skipped");
            return Ok(DrainOutcome::skipped(DrainStatus::NoSession));
        };

        let snapshot = self.queue.list()?;
        if snapshot.is_empty() {
            return Ok(DrainOutcome::skipped(DrainStatus::Completed));
        }

        let started_at = Instant::now();
        info!("[OfflineSync] Draining {} queued write(s)", snapshot.len());

        let mut progress = DrainProgress {
            pending: snapshot.iter().map(|item| item.id.clone()).collect(),
            ..DrainProgress::default()
        };

        let mut result = Ok(());
        for item in snapshot {
            result = self.process_item(item, &user_id, &mut progress).await;
            if result.is_err() {
                break;
            }
        }
        if result.is_ok() {
            result = self.clear_id_map_if_settled();
        }

        // Writes already applied remotely must reach the UI even when a
        // local storage fault cuts the pass short.
        if progress.success_count > 0 {
            self.bus.publish();
        }
        if let Err(err) = result {
            warn!(
                "[OfflineSync] Drain aborted after {} synced write(s): {}",
                progress.success_count, err
            );
            return Err(err);
        }

        info!(
            "[OfflineSync] Drain complete synced={} failed={} deferred={} duration_ms={}",
            progress.success_count,
            progress.failed_count,
            progress.deferred_count,
            started_at.elapsed().as_millis()
        );

        Ok(DrainOutcome {
            success_count: progress.success_count,
            failed_count: progress.failed_count,
            deferred_count: progress.deferred_count,
            status: DrainStatus::Completed,
        })
    }

    async fn process_item(
        &self,
        item: QueueItem,
        user_id: &str,
        progress: &mut DrainProgress,
    ) -> Result<()> {
        if let Some(dependency) = item.depends_on.as_deref() {
            if progress.pending.contains(dependency) || self.queue.contains(dependency)? {
                debug!(
                    "[OfflineSync] Deferring {} until {} syncs",
                    item.id, dependency
                );
                progress.deferred_count += 1;
                return Ok(());
            }
            if self.dead_letters.contains(dependency)? {
                let reason = format!("Dependency {} was dropped", dependency);
                self.drop_item(item, DeadLetterCode::DependencyFailed, reason, progress)?;
                progress.failed_count += 1;
                return Ok(());
            }
        }

        let payload = self.id_map.rewrite_payload(item.action, &item.payload)?;
        match self
            .dispatcher
            .apply(&item.entity_type, item.action, &payload, user_id)
            .await
        {
            Ok(outcome) => {
                self.queue.remove(&item.id)?;
                progress.pending.remove(&item.id);
                progress.success_count += 1;
                if item.action == SyncAction::Create {
                    if let Some(local_id) = item.payload_id() {
                        if let Some(remote_id) = outcome.remote_id.as_deref() {
                            self.id_map.record(local_id, remote_id)?;
                        }
                        self.offline_records.remove(local_id)?;
                    }
                }
                debug!(
                    "[OfflineSync] Applied {} {} ({})",
                    item.entity_type, item.action, item.id
                );
            }
            Err(err) if err.is_permanent() => {
                warn!(
                    "[OfflineSync] Dropping {} {} ({}): {}",
                    item.entity_type, item.action, item.id, err
                );
                self.drop_item(item, DeadLetterCode::Permanent, err.to_string(), progress)?;
                progress.failed_count += 1;
            }
            Err(err) => {
                let attempts = self
                    .queue
                    .increment_retry(&item.id)?
                    .unwrap_or(item.retry_count + 1);
                if retry_ceiling_reached(attempts, self.retry_ceiling) {
                    warn!(
                        "[OfflineSync] Dropping {} {} ({}) after {} attempts: {}",
                        item.entity_type, item.action, item.id, attempts, err
                    );
                    let mut dropped = item;
                    dropped.retry_count = attempts;
                    self.drop_item(dropped, DeadLetterCode::RetryExhausted, err.to_string(), progress)?;
                } else {
                    warn!(
                        "[OfflineSync] Sync failed for {} {} ({}), attempt {}/{}: {}",
                        item.entity_type, item.action, item.id, attempts, self.retry_ceiling, err
                    );
                }
                progress.failed_count += 1;
            }
        }
        Ok(())
    }

    fn drop_item(
        &self,
        item: QueueItem,
        code: DeadLetterCode,
        reason: String,
        progress: &mut DrainProgress,
    ) -> Result<()> {
        let id = item.id.clone();
        self.dead_letters.push(item, code, reason)?;
        self.queue.remove(&id)?;
        progress.pending.remove(&id);
        Ok(())
    }

    /// User-triggered drain with a human-readable summary.
    ///
    /// Local storage faults propagate instead of being reported as a status.
    pub async fn manual_sync(&self) -> Result<String> {
        if !self.connectivity.is_online() {
            return Ok(ManualSyncStatus::NoConnectivity.to_string());
        }
        let outcome = self.drain().await?;
        Ok(ManualSyncStatus::from_outcome(&outcome).to_string())
    }

    /// Drain on every reconnect and once shortly after startup when online.
    pub fn start_auto_sync(self: &Arc<Self>) -> bool {
        let service: Weak<Self> = Arc::downgrade(self);
        self.connectivity.start(move || {
            let service = service.clone();
            async move {
                let Some(service) = service.upgrade() else {
                    return;
                };
                match service.drain().await {
                    Ok(outcome) => {
                        if outcome.success_count > 0 {
                            info!("[OfflineSync] {} record(s) synced", outcome.success_count);
                        }
                        if outcome.failed_count > 0 {
                            warn!(
                                "[OfflineSync] {} record(s) could not be synced",
                                outcome.failed_count
                            );
                        }
                    }
                    Err(err) => warn!("[OfflineSync] Automatic sync failed: {}", err),
                }
            }
        })
    }

    pub fn stop_auto_sync(&self) {
        self.connectivity.stop();
    }
}
