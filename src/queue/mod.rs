//! Tracking and bounded execution of package mutations.
//!
//! Every install/uninstall/update is an [`OperationRecord`] owned
//! exclusively by the queue; collaborators only read snapshots. Statistics
//! are derived from the live record set on every read, never stored.

mod batch;
mod operation;

pub use batch::{BatchItemResult, BatchOptions};
pub use operation::{OperationId, OperationKey, OperationRecord, OperationStatus};

use crate::cache::CacheStore;
use crate::core::{DeckError, MutationKind, PackageCategory, Result};
use crate::source::{Clock, PackageSource};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Concurrency ceiling for directly enqueued mutations. Matches the
    /// default batch window; this pool is isolated from the prefetch
    /// scheduler's ceiling.
    pub max_running: usize,
    /// Default batch window size.
    pub batch_window: usize,
    /// How long completed records stay visible before auto-removal.
    pub success_linger: Duration,
    /// How long failed records stay visible before auto-removal.
    pub failure_linger: Duration,
    /// Assumed operation duration for ETA when no history exists.
    pub default_op_duration: Duration,
    /// A running operation older than this is flagged suspect in health
    /// reports. It is never auto-killed.
    pub stuck_after: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_running: 3,
            batch_window: 3,
            success_linger: Duration::from_secs(5),
            failure_linger: Duration::from_secs(30),
            default_op_duration: Duration::from_secs(30),
            stuck_after: Duration::from_secs(300),
        }
    }
}

/// Derived counters, recomputed from the live operation set on every read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
    pub success_rate: f64,
    pub average_duration_ms: u64,
    pub estimated_remaining_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueHealth {
    pub has_stuck_operations: bool,
    pub oldest_running_ms: Option<i64>,
    pub is_draining: bool,
}

struct OpsState {
    records: HashMap<OperationId, OperationRecord>,
    /// Identity index covering pending and running records only.
    live: HashMap<OperationKey, OperationId>,
}

pub(crate) struct QueueInner {
    config: QueueConfig,
    clock: Arc<dyn Clock>,
    source: Arc<dyn PackageSource>,
    cache: Arc<CacheStore>,
    ops: Mutex<OpsState>,
    run_slots: Arc<Semaphore>,
}

/// The operation queue: state machine, per-identity exclusivity, and a
/// bounded executor for directly enqueued mutations.
pub struct OperationQueue {
    pub(crate) inner: Arc<QueueInner>,
}

impl OperationQueue {
    pub fn new(
        source: Arc<dyn PackageSource>,
        cache: Arc<CacheStore>,
        clock: Arc<dyn Clock>,
        config: QueueConfig,
    ) -> Self {
        let run_slots = Arc::new(Semaphore::new(config.max_running.max(1)));
        Self {
            inner: Arc::new(QueueInner {
                config,
                clock,
                source,
                cache,
                ops: Mutex::new(OpsState {
                    records: HashMap::new(),
                    live: HashMap::new(),
                }),
                run_slots,
            }),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Enqueue a mutation. Starts `Pending` and begins executing as soon as
    /// a run slot frees up.
    ///
    /// A duplicate of an identity that is already pending or running is
    /// coalesced: the existing operation's id is returned and no second
    /// record is created.
    pub async fn enqueue(
        &self,
        kind: MutationKind,
        name: &str,
        category: PackageCategory,
    ) -> OperationId {
        let key = OperationKey::new(kind, name, category);
        self.enqueue_key(key).await
    }

    /// Like [`enqueue`](Self::enqueue) but surfaces a duplicate identity as
    /// an error instead of coalescing.
    pub async fn enqueue_strict(
        &self,
        kind: MutationKind,
        name: &str,
        category: PackageCategory,
    ) -> Result<OperationId> {
        let key = OperationKey::new(kind, name, category);
        match self.inner.create(&key).await {
            Ok(id) => {
                self.spawn_runner(id, key);
                Ok(id)
            }
            Err(_) => Err(DeckError::DuplicateOperation(key.to_string())),
        }
    }

    /// Enqueue the synthetic bulk "update all" mutation for a category.
    pub async fn enqueue_update_all(&self, category: PackageCategory) -> OperationId {
        self.enqueue_key(OperationKey::bulk_update(category)).await
    }

    async fn enqueue_key(&self, key: OperationKey) -> OperationId {
        match self.inner.create(&key).await {
            Ok(id) => {
                info!("Enqueued {}", key);
                self.spawn_runner(id, key);
                id
            }
            Err(existing) => {
                debug!("Coalesced duplicate enqueue of {} onto {}", key, existing);
                existing
            }
        }
    }

    fn spawn_runner(&self, id: OperationId, key: OperationKey) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let Ok(_permit) = Arc::clone(&inner.run_slots).acquire_owned().await else {
                // Semaphore closed: the process is shutting down.
                return;
            };
            inner.execute(id, &key).await;
        });
    }

    /// Fail every pending record with a "cancelled" message. Running
    /// operations are not interrupted.
    pub async fn cancel_all_pending(&self) -> usize {
        let now = self.inner.clock.now();
        let mut cancelled = Vec::new();
        {
            let mut ops = self.inner.ops.lock().await;
            let pending: Vec<OperationId> = ops
                .records
                .values()
                .filter(|r| r.status == OperationStatus::Pending)
                .map(|r| r.id)
                .collect();
            for id in pending {
                if let Some(record) = ops.records.get_mut(&id) {
                    record.status = OperationStatus::Failed;
                    record.error = Some("cancelled".to_string());
                    record.finished_at = Some(now);
                    let key = record.key();
                    ops.live.remove(&key);
                    cancelled.push(id);
                }
            }
        }
        for id in &cancelled {
            self.inner
                .schedule_cleanup(*id, self.inner.config.failure_linger);
        }
        if !cancelled.is_empty() {
            info!("Cancelled {} pending operations", cancelled.len());
        }
        cancelled.len()
    }

    /// Cancel one pending record. Returns false when the record is missing
    /// or already past `Pending`.
    pub async fn cancel_pending(&self, id: OperationId) -> bool {
        let now = self.inner.clock.now();
        let cancelled = {
            let mut ops = self.inner.ops.lock().await;
            match ops.records.get_mut(&id) {
                Some(record) if record.status == OperationStatus::Pending => {
                    record.status = OperationStatus::Failed;
                    record.error = Some("cancelled".to_string());
                    record.finished_at = Some(now);
                    let key = record.key();
                    ops.live.remove(&key);
                    true
                }
                _ => false,
            }
        };
        if cancelled {
            self.inner.schedule_cleanup(id, self.inner.config.failure_linger);
        }
        cancelled
    }

    /// Re-enqueue every failed identity as a fresh record. The original
    /// failed records are left for natural cleanup.
    pub async fn retry_all_failed(&self) -> usize {
        let keys: Vec<OperationKey> = {
            let ops = self.inner.ops.lock().await;
            ops.records
                .values()
                .filter(|r| r.status == OperationStatus::Failed)
                .map(|r| r.key())
                .collect()
        };
        let count = keys.len();
        for key in keys {
            self.enqueue_key(key).await;
        }
        count
    }

    /// Remove all terminal records immediately.
    pub async fn clear_terminal(&self) -> usize {
        let mut ops = self.inner.ops.lock().await;
        let before = ops.records.len();
        ops.records.retain(|_, r| !r.is_terminal());
        before - ops.records.len()
    }

    pub async fn get(&self, id: OperationId) -> Option<OperationRecord> {
        self.inner.ops.lock().await.records.get(&id).cloned()
    }

    /// Snapshot of all live records, oldest first.
    pub async fn snapshot(&self) -> Vec<OperationRecord> {
        let ops = self.inner.ops.lock().await;
        let mut records: Vec<OperationRecord> = ops.records.values().cloned().collect();
        records.sort_by_key(|r| r.started_at);
        records
    }

    /// Report progress on a running operation.
    pub async fn update_progress(&self, id: OperationId, progress: f32) -> bool {
        let mut ops = self.inner.ops.lock().await;
        match ops.records.get_mut(&id) {
            Some(record) if record.status == OperationStatus::Running => {
                record.progress = Some(progress.clamp(0.0, 1.0));
                true
            }
            _ => false,
        }
    }

    pub async fn stats(&self) -> QueueStats {
        let ops = self.inner.ops.lock().await;
        let mut stats = QueueStats {
            pending: 0,
            running: 0,
            completed: 0,
            failed: 0,
            total: 0,
            success_rate: 1.0,
            average_duration_ms: 0,
            estimated_remaining_ms: 0,
        };

        let mut duration_sum_ms: i64 = 0;
        for record in ops.records.values() {
            stats.total += 1;
            match record.status {
                OperationStatus::Pending => stats.pending += 1,
                OperationStatus::Running => stats.running += 1,
                OperationStatus::Completed => {
                    stats.completed += 1;
                    if let Some(d) = record.duration() {
                        duration_sum_ms += d.num_milliseconds().max(0);
                    }
                }
                OperationStatus::Failed => stats.failed += 1,
            }
        }

        let terminal = stats.completed + stats.failed;
        if terminal > 0 {
            stats.success_rate = stats.completed as f64 / terminal as f64;
        }

        stats.average_duration_ms = if stats.completed > 0 {
            (duration_sum_ms / stats.completed as i64).max(0) as u64
        } else {
            self.inner.config.default_op_duration.as_millis() as u64
        };

        stats.estimated_remaining_ms =
            (stats.pending + stats.running) as u64 * stats.average_duration_ms;

        stats
    }

    pub async fn health(&self) -> QueueHealth {
        let now = self.inner.clock.now();
        let stuck_after =
            chrono::Duration::from_std(self.inner.config.stuck_after).unwrap_or_default();
        let ops = self.inner.ops.lock().await;

        let mut oldest_running: Option<chrono::Duration> = None;
        let mut pending = 0;
        let mut running = 0;
        for record in ops.records.values() {
            match record.status {
                OperationStatus::Pending => pending += 1,
                OperationStatus::Running => {
                    running += 1;
                    if let Some(age) = record.running_for(now) {
                        if oldest_running.map(|o| age > o).unwrap_or(true) {
                            oldest_running = Some(age);
                        }
                    }
                }
                _ => {}
            }
        }

        QueueHealth {
            has_stuck_operations: oldest_running.map(|a| a > stuck_after).unwrap_or(false),
            oldest_running_ms: oldest_running.map(|a| a.num_milliseconds()),
            is_draining: pending == 0 && running > 0,
        }
    }
}

impl QueueInner {
    /// Create a pending record, or return the id of the live record already
    /// holding this identity.
    pub(crate) async fn create(
        self: &Arc<Self>,
        key: &OperationKey,
    ) -> std::result::Result<OperationId, OperationId> {
        let now = self.clock.now();
        let mut ops = self.ops.lock().await;
        if let Some(existing) = ops.live.get(key) {
            return Err(*existing);
        }
        let record = OperationRecord::new(key, now);
        let id = record.id;
        ops.live.insert(key.clone(), id);
        ops.records.insert(id, record);
        Ok(id)
    }

    /// Pending -> Running. False when the record was cancelled or removed
    /// in the meantime, in which case the mutation must not run.
    pub(crate) async fn mark_running(self: &Arc<Self>, id: OperationId) -> bool {
        let mut ops = self.ops.lock().await;
        match ops.records.get_mut(&id) {
            Some(record) if record.status == OperationStatus::Pending => {
                record.status = OperationStatus::Running;
                record.run_started_at = Some(self.clock.now());
                true
            }
            _ => false,
        }
    }

    /// Terminal transition. On success the mutated category's cache entry
    /// is forced stale so the next read refetches.
    pub(crate) async fn finish(
        self: &Arc<Self>,
        id: OperationId,
        outcome: std::result::Result<String, String>,
    ) {
        let now = self.clock.now();
        let (category, linger) = {
            let mut ops = self.ops.lock().await;
            let Some(record) = ops.records.get_mut(&id) else {
                return;
            };
            record.finished_at = Some(now);
            let category = record.category;
            let key = record.key();
            let linger = match &outcome {
                Ok(message) => {
                    record.status = OperationStatus::Completed;
                    record.message = Some(message.clone());
                    record.progress = Some(1.0);
                    self.config.success_linger
                }
                Err(error) => {
                    record.status = OperationStatus::Failed;
                    record.error = Some(error.clone());
                    self.config.failure_linger
                }
            };
            ops.live.remove(&key);
            (category, linger)
        };

        match &outcome {
            Ok(_) => {
                // Installed/outdated state changed; force a refetch on the
                // next read while keeping data visible.
                self.cache.clear(category).await;
            }
            Err(error) => warn!("Operation {} failed: {}", id, error),
        }

        self.schedule_cleanup(id, linger);
    }

    pub(crate) async fn execute(self: &Arc<Self>, id: OperationId, key: &OperationKey) {
        if !self.mark_running(id).await {
            return;
        }
        let outcome = self
            .source
            .mutate_package(key.kind, &key.name, key.category)
            .await
            .map_err(|e| e.to_string());
        self.finish(id, outcome).await;
    }

    /// Remove a terminal record after its grace period, unless an explicit
    /// clear already removed it.
    fn schedule_cleanup(self: &Arc<Self>, id: OperationId, linger: Duration) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(linger).await;
            let mut ops = inner.ops.lock().await;
            let remove = ops.records.get(&id).map(|r| r.is_terminal()).unwrap_or(false);
            if remove {
                ops.records.remove(&id);
            }
        });
    }
}
