use super::source::{NetworkQualitySource, NetworkSample};
use super::{NetworkConditions, QualityTier, classify_conditions, classify_latency};
use crate::core::PrefetchPriority;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Interval between active probe cycles.
    pub probe_interval: Duration,
    /// Ceiling on concurrent privileged (network-heavy background)
    /// operations considered by `admits`.
    pub concurrency_ceiling: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(30),
            concurrency_ceiling: 3,
        }
    }
}

/// Current-conditions snapshot exposed to collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkStatus {
    pub connection_type: Option<String>,
    pub tier: QualityTier,
    pub downlink_mbps: Option<f64>,
    pub latency_ms: Option<u64>,
    pub save_data: bool,
}

struct MonitorState {
    conditions: Option<NetworkConditions>,
    tier: QualityTier,
    latency_ms: Option<u64>,
    consecutive_poor: u32,
}

/// Tracks network quality from host signals and an active probe, and
/// answers admission questions for bandwidth-sensitive background work.
///
/// Host metadata sets the tier heuristically; a measured probe round trip
/// overrides it on every probe cycle. Probe failure is treated as poor
/// (fail-closed).
pub struct NetworkQualityMonitor {
    source: Arc<dyn NetworkQualitySource>,
    state: RwLock<MonitorState>,
    active: Arc<AtomicUsize>,
    ceiling: AtomicUsize,
    probe_interval: Duration,
    probe_task: Mutex<Option<JoinHandle<()>>>,
}

impl NetworkQualityMonitor {
    pub fn new(source: Arc<dyn NetworkQualitySource>, config: MonitorConfig) -> Self {
        Self {
            source,
            state: RwLock::new(MonitorState {
                conditions: None,
                // Permissive until the first sample arrives; the probe loop
                // corrects this within one cycle.
                tier: QualityTier::Good,
                latency_ms: None,
                consecutive_poor: 0,
            }),
            active: Arc::new(AtomicUsize::new(0)),
            ceiling: AtomicUsize::new(config.concurrency_ceiling),
            probe_interval: config.probe_interval,
            probe_task: Mutex::new(None),
        }
    }

    /// Host-pushed connection-change notification. Recomputes the tier from
    /// metadata; the next probe cycle may override it with a measurement.
    pub async fn ingest(&self, conditions: NetworkConditions) {
        let tier = classify_conditions(&conditions);
        let mut state = self.state.write().await;
        debug!("Host reported {:?} -> {:?}", conditions.effective_type, tier);
        state.conditions = Some(conditions);
        self.apply_tier(&mut state, tier);
    }

    /// One sampling cycle against the configured source.
    pub async fn poll_once(&self) {
        match self.source.sample().await {
            NetworkSample::Measured { latency_ms } => {
                let tier = classify_latency(latency_ms);
                let mut state = self.state.write().await;
                state.latency_ms = Some(latency_ms);
                self.apply_tier(&mut state, tier);
            }
            NetworkSample::Reported(conditions) => {
                self.ingest(conditions).await;
            }
            NetworkSample::Failed => {
                let mut state = self.state.write().await;
                state.latency_ms = None;
                self.apply_tier(&mut state, QualityTier::Poor);
                warn!("Network probe failed, treating quality as poor");
            }
            NetworkSample::Unavailable => {}
        }
    }

    fn apply_tier(&self, state: &mut MonitorState, tier: QualityTier) {
        state.tier = tier;
        if tier == QualityTier::Poor {
            state.consecutive_poor += 1;
        } else {
            state.consecutive_poor = 0;
        }
    }

    /// Spawn the periodic probe loop. Idempotent: a second call replaces
    /// the previous loop.
    pub async fn start(self: &Arc<Self>) {
        let monitor = Arc::clone(self);
        let interval = self.probe_interval;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                monitor.poll_once().await;
            }
        });

        let mut slot = self.probe_task.lock().await;
        if let Some(previous) = slot.replace(task) {
            previous.abort();
        }
        info!("Network probe loop started ({:?} interval)", interval);
    }

    pub async fn shutdown(&self) {
        if let Some(task) = self.probe_task.lock().await.take() {
            task.abort();
        }
    }

    pub async fn snapshot(&self) -> NetworkStatus {
        let state = self.state.read().await;
        NetworkStatus {
            connection_type: state.conditions.as_ref().map(|c| c.connection_type.clone()),
            tier: state.tier,
            downlink_mbps: state.conditions.as_ref().map(|c| c.downlink_mbps),
            latency_ms: state.latency_ms,
            save_data: state.conditions.as_ref().map(|c| c.save_data).unwrap_or(false),
        }
    }

    pub async fn tier(&self) -> QualityTier {
        self.state.read().await.tier
    }

    /// Number of probe cycles in a row that classified as poor. Used by
    /// queue-health reporting.
    pub async fn consecutive_poor(&self) -> u32 {
        self.state.read().await.consecutive_poor
    }

    /// Whether a background request of the given priority may start right
    /// now. Data-saver is a hard override; capacity and the tier matrix
    /// apply after it.
    pub async fn admits(&self, priority: PrefetchPriority) -> bool {
        let state = self.state.read().await;

        if state.conditions.as_ref().map(|c| c.save_data).unwrap_or(false) {
            return false;
        }

        if self.active.load(Ordering::Acquire) >= self.ceiling.load(Ordering::Acquire) {
            return false;
        }

        match state.tier {
            QualityTier::Excellent => true,
            QualityTier::Good => priority != PrefetchPriority::Low,
            QualityTier::Fair => priority == PrefetchPriority::High,
            QualityTier::Poor => false,
        }
    }

    /// Account one privileged operation against the concurrency ceiling for
    /// the lifetime of the returned guard.
    pub fn privileged_guard(&self) -> PrivilegedGuard {
        self.active.fetch_add(1, Ordering::AcqRel);
        PrivilegedGuard {
            active: Arc::clone(&self.active),
        }
    }

    /// Adjust the privileged-operation ceiling. Applies to subsequent
    /// admission decisions only.
    pub fn set_concurrency_ceiling(&self, ceiling: usize) {
        self.ceiling.store(ceiling.max(1), Ordering::Release);
    }
}

pub struct PrivilegedGuard {
    active: Arc<AtomicUsize>,
}

impl Drop for PrivilegedGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}
