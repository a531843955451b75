use super::behavior::{BehaviorModel, Prediction};
use super::config::PrefetchConfig;
use crate::cache::CacheStore;
use crate::core::{DeckError, PackageCategory, PrefetchPriority, Result};
use crate::network::NetworkQualityMonitor;
use crate::source::{Clock, PackageSource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Cache warming runs at most this often per category.
const WARM_THROTTLE: chrono::Duration = chrono::Duration::seconds(30);

/// Refresh categories predicted to go stale within this window.
const REFRESH_HORIZON: Duration = Duration::from_secs(600);

/// Delay before the first orchestration tick after startup.
const INITIAL_TICK_DELAY: Duration = Duration::from_secs(10);

/// Pause between per-package detail fetches inside one request.
const DETAIL_PACING: Duration = Duration::from_millis(100);

/// Most related packages queued per manual trigger.
const RELATED_CAP: usize = 10;

/// One queued background fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrefetchRequest {
    /// Identity; the queue never holds two requests with the same id.
    pub id: String,
    pub category: PackageCategory,
    /// Explicit package names, or the whole category when absent.
    pub packages: Option<Vec<String>>,
    pub priority: PrefetchPriority,
    /// When set, admission must respect live network conditions.
    pub network_aware: bool,
    pub created_at: DateTime<Utc>,
}

/// Best-effort counters. Prefetch failures land here and nowhere else.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrefetchStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub cancelled_requests: u64,
    pub average_response_time_ms: u64,
}

struct ActiveEntry {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct SchedState {
    queued: VecDeque<PrefetchRequest>,
    active: HashMap<String, ActiveEntry>,
    last_warm: HashMap<PackageCategory, DateTime<Utc>>,
}

struct SchedulerInner {
    source: Arc<dyn PackageSource>,
    cache: Arc<CacheStore>,
    monitor: Arc<NetworkQualityMonitor>,
    behavior: Arc<BehaviorModel>,
    clock: Arc<dyn Clock>,
    config: RwLock<PrefetchConfig>,
    state: Mutex<SchedState>,
    stats: Mutex<PrefetchStats>,
    tick_task: Mutex<Option<JoinHandle<()>>>,
}

/// Admission-controlled queue for non-essential background fetches.
///
/// Requests are admitted in strict priority order, FIFO within a tier,
/// gated by network quality and a bounded active set. Completion of any
/// active request immediately re-drains the queue; there is no polling
/// loop. No ordering guarantee exists for completion.
pub struct PrefetchScheduler {
    inner: Arc<SchedulerInner>,
}

impl PrefetchScheduler {
    pub fn new(
        source: Arc<dyn PackageSource>,
        cache: Arc<CacheStore>,
        monitor: Arc<NetworkQualityMonitor>,
        behavior: Arc<BehaviorModel>,
        clock: Arc<dyn Clock>,
        config: PrefetchConfig,
    ) -> Self {
        let config = config.clamped();
        monitor.set_concurrency_ceiling(config.max_concurrent_requests);
        Self {
            inner: Arc::new(SchedulerInner {
                source,
                cache,
                monitor,
                behavior,
                clock,
                config: RwLock::new(config),
                state: Mutex::new(SchedState {
                    queued: VecDeque::new(),
                    active: HashMap::new(),
                    last_warm: HashMap::new(),
                }),
                stats: Mutex::new(PrefetchStats::default()),
                tick_task: Mutex::new(None),
            }),
        }
    }

    /// Queue a request. Returns false when a request with the same identity
    /// is already queued or active.
    ///
    /// A duplicate submit still drains the queue: the original may have been
    /// parked under admission conditions that have since changed.
    pub async fn submit(&self, request: PrefetchRequest) -> bool {
        let accepted = {
            let mut state = self.inner.state.lock().await;
            let duplicate = state.active.contains_key(&request.id)
                || state.queued.iter().any(|r| r.id == request.id);
            if duplicate {
                debug!("Dropped duplicate prefetch request {}", request.id);
                false
            } else {
                debug!(
                    "Queued prefetch {} ({:?} priority)",
                    request.id, request.priority
                );
                state.queued.push_back(request);
                true
            }
        };
        SchedulerInner::pump(&self.inner).await;
        accepted
    }

    /// Replace the runtime configuration. Applies to subsequent admission
    /// decisions only; already-active requests finish under the old rules.
    pub async fn update_config(&self, config: PrefetchConfig) {
        let config = config.clamped();
        self.inner
            .monitor
            .set_concurrency_ceiling(config.max_concurrent_requests);
        *self.inner.config.write().await = config;
        info!("Prefetch configuration updated");
        SchedulerInner::pump(&self.inner).await;
    }

    pub async fn config(&self) -> PrefetchConfig {
        self.inner.config.read().await.clone()
    }

    pub async fn stats(&self) -> PrefetchStats {
        self.inner.stats.lock().await.clone()
    }

    pub async fn queued_len(&self) -> usize {
        self.inner.state.lock().await.queued.len()
    }

    pub async fn active_len(&self) -> usize {
        self.inner.state.lock().await.active.len()
    }

    /// Whether a background request of this priority would be admitted
    /// right now under the current configuration and network conditions.
    pub async fn should_prefetch(&self, priority: PrefetchPriority) -> bool {
        let config = self.inner.config.read().await.clone();
        if !config.enabled {
            return false;
        }
        let status = self.inner.monitor.snapshot().await;
        if config.respect_save_data && status.save_data {
            return false;
        }
        if config.wifi_only && status.connection_type.as_deref() == Some("cellular") {
            return false;
        }
        self.inner.monitor.admits(priority).await
    }

    /// Abort every active fetch and empty the queue. Cancellation is
    /// cooperative: in-flight I/O is asked to stop and no further state
    /// updates from cancelled requests are applied.
    pub async fn cancel_all(&self) -> usize {
        let mut state = self.inner.state.lock().await;
        let dropped = state.queued.len() + state.active.len();
        let active = state.active.len() as u64;
        state.queued.clear();
        for (_, entry) in state.active.drain() {
            let _ = entry.cancel.send(true);
            entry.handle.abort();
        }
        drop(state);

        if active > 0 {
            self.inner.stats.lock().await.cancelled_requests += active;
        }
        if dropped > 0 {
            info!("Cancelled {} prefetch requests", dropped);
        }
        dropped
    }

    /// Queue the declared dependencies and conflicts of a package as a
    /// low-priority, network-aware request.
    pub async fn prefetch_related(&self, name: &str, category: PackageCategory) -> Result<()> {
        let details = self.inner.source.fetch_package_details(name, category).await?;
        let mut related: Vec<String> = Vec::new();
        for other in details
            .dependencies
            .iter()
            .chain(details.conflicts.iter())
        {
            if other != name && !related.contains(other) {
                related.push(other.clone());
            }
            if related.len() >= RELATED_CAP {
                break;
            }
        }
        if related.is_empty() {
            return Ok(());
        }

        self.submit(PrefetchRequest {
            id: format!("related-{category}-{name}"),
            category,
            packages: Some(related),
            priority: PrefetchPriority::Low,
            network_aware: true,
            created_at: self.inner.clock.now(),
        })
        .await;
        Ok(())
    }

    /// Queue a whole-category refresh for entries that are stale now or
    /// will cross their TTL within the refresh horizon.
    pub async fn refresh_stale(&self) {
        let config = self.inner.config.read().await.clone();
        if !config.enabled || !config.background_refresh_enabled {
            return;
        }
        for category in PackageCategory::ALL {
            if self
                .inner
                .cache
                .will_be_stale_within(category, REFRESH_HORIZON)
                .await
            {
                self.submit(PrefetchRequest {
                    id: format!("refresh-{category}"),
                    category,
                    packages: None,
                    priority: PrefetchPriority::Medium,
                    network_aware: true,
                    created_at: self.inner.clock.now(),
                })
                .await;
            }
        }
    }

    /// Warm the cache with the most-downloaded packages of a category, at
    /// most once per 30 seconds per category.
    pub async fn warm_cache(&self, category: PackageCategory) {
        let config = self.inner.config.read().await.clone();
        if !config.enabled || !config.cache_warming_enabled {
            return;
        }

        let now = self.inner.clock.now();
        {
            let mut state = self.inner.state.lock().await;
            if let Some(last) = state.last_warm.get(&category) {
                if now.signed_duration_since(*last) < WARM_THROTTLE {
                    return;
                }
            }
            state.last_warm.insert(category, now);
        }

        let snapshot = self.inner.cache.get(category).await;
        let request = match snapshot.data {
            Some(data) if !data.is_empty() => {
                let mut popular: Vec<(&str, u64)> = data
                    .iter()
                    .filter(|p| p.downloads_365d >= config.popularity_threshold)
                    .map(|p| (p.name.as_str(), p.downloads_365d))
                    .collect();
                popular.sort_by(|a, b| b.1.cmp(&a.1));
                let names: Vec<String> = popular
                    .into_iter()
                    .take(config.cache_warming_top_n)
                    .map(|(name, _)| name.to_string())
                    .collect();
                if names.is_empty() {
                    return;
                }
                PrefetchRequest {
                    id: format!("warm-{category}"),
                    category,
                    packages: Some(names),
                    priority: PrefetchPriority::Medium,
                    network_aware: true,
                    created_at: now,
                }
            }
            // Nothing cached yet: warming means loading the category.
            _ => PrefetchRequest {
                id: format!("warm-{category}"),
                category,
                packages: None,
                priority: PrefetchPriority::Medium,
                network_aware: true,
                created_at: now,
            },
        };
        self.submit(request).await;
    }

    /// Queue detail fetches for the packages the behavior model predicts
    /// the user will want next.
    pub async fn predictive_prefetch(&self) {
        let config = self.inner.config.read().await.clone();
        if !config.enabled || !config.predictive_enabled {
            return;
        }

        for category in PackageCategory::ALL {
            let predictions = self.inner.behavior.predict(category).await;
            if predictions.is_empty() {
                continue;
            }

            let cached = self.inner.cache.get(category).await.data.unwrap_or_default();
            let mut names: Vec<String> = Vec::new();
            for prediction in predictions {
                match prediction {
                    // A package the user keeps coming back to predicts its
                    // declared dependencies, not itself.
                    Prediction::PackageName { name } => {
                        match self.inner.source.fetch_package_details(&name, category).await {
                            Ok(details) => {
                                for dependency in details.dependencies {
                                    if !names.contains(&dependency) {
                                        names.push(dependency);
                                    }
                                }
                            }
                            Err(error) => {
                                debug!("Could not expand prediction {name}: {error}");
                            }
                        }
                    }
                    // Queries are resolved against what we already know
                    // about the category; a query that matches nothing
                    // cached predicts nothing concrete.
                    Prediction::Query { query } => {
                        let query = query.to_lowercase();
                        for package in cached
                            .iter()
                            .filter(|p| p.name.to_lowercase().contains(&query))
                            .take(2)
                        {
                            if !names.contains(&package.name) {
                                names.push(package.name.clone());
                            }
                        }
                    }
                }
            }
            names.truncate(10);
            if names.is_empty() {
                continue;
            }

            self.submit(PrefetchRequest {
                id: format!("predict-{category}"),
                category,
                packages: Some(names),
                priority: PrefetchPriority::Low,
                network_aware: true,
                created_at: self.inner.clock.now(),
            })
            .await;
        }
    }

    /// One orchestration pass: correctness first (refresh), then warming,
    /// then speculation.
    pub async fn tick(&self) {
        self.refresh_stale().await;
        for category in PackageCategory::ALL {
            self.warm_cache(category).await;
        }
        self.predictive_prefetch().await;
        // Requests parked on an earlier tick stay queued until conditions
        // change; the tick is one of the places that change is observed.
        SchedulerInner::pump(&self.inner).await;
    }

    /// Start the periodic orchestration tick, plus one delayed initial run.
    pub async fn start(self: &Arc<Self>) {
        let interval = {
            let config = self.inner.config.read().await;
            Duration::from_secs(config.tick_interval_seconds.max(1))
        };
        let scheduler = Arc::clone(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep(INITIAL_TICK_DELAY).await;
            scheduler.tick().await;
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                scheduler.tick().await;
            }
        });

        let mut slot = self.inner.tick_task.lock().await;
        if let Some(previous) = slot.replace(task) {
            previous.abort();
        }
        info!("Prefetch orchestration started ({:?} interval)", interval);
    }

    /// Stop the tick loop and cancel all queued and active work.
    pub async fn shutdown(&self) {
        if let Some(task) = self.inner.tick_task.lock().await.take() {
            task.abort();
        }
        self.cancel_all().await;
    }
}

impl SchedulerInner {
    /// Drain the queue into the active set, highest priority first, until
    /// the ceiling is reached or nothing else is eligible.
    async fn pump(inner: &Arc<Self>) {
        loop {
            let config = inner.config.read().await.clone();
            if !config.enabled {
                return;
            }

            let mut state = inner.state.lock().await;
            if state.active.len() >= config.max_concurrent_requests {
                return;
            }

            let mut chosen: Option<usize> = None;
            'tiers: for priority in [
                PrefetchPriority::High,
                PrefetchPriority::Medium,
                PrefetchPriority::Low,
            ] {
                for (idx, request) in state.queued.iter().enumerate() {
                    if request.priority != priority {
                        continue;
                    }
                    if inner.eligible(request, &config).await {
                        chosen = Some(idx);
                        break 'tiers;
                    }
                }
            }

            let Some(idx) = chosen else {
                return;
            };
            let Some(request) = state.queued.remove(idx) else {
                return;
            };
            inner.launch(request, &mut state);
        }
    }

    async fn eligible(&self, request: &PrefetchRequest, config: &PrefetchConfig) -> bool {
        if !request.network_aware {
            return true;
        }
        let status = self.monitor.snapshot().await;
        if config.respect_save_data && status.save_data {
            return false;
        }
        if config.wifi_only && status.connection_type.as_deref() == Some("cellular") {
            return false;
        }
        self.monitor.admits(request.priority).await
    }

    fn launch(self: &Arc<Self>, request: PrefetchRequest, state: &mut SchedState) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let id = request.id.clone();
        let inner = Arc::clone(self);

        debug!("Admitted prefetch {}", id);
        let task_id = id.clone();
        let handle = tokio::spawn(async move {
            let started = Instant::now();
            // The guard must be gone before the final pump, or the monitor
            // counts this finished request against the next admission.
            let outcome = {
                let _guard = inner.monitor.privileged_guard();
                inner.execute(&request, &cancel_rx).await
            };
            let elapsed_ms = started.elapsed().as_millis() as u64;

            {
                let mut stats = inner.stats.lock().await;
                stats.total_requests += 1;
                match &outcome {
                    Ok(()) => {
                        stats.successful_requests += 1;
                        let n = stats.successful_requests + stats.failed_requests;
                        stats.average_response_time_ms =
                            (stats.average_response_time_ms * (n - 1) + elapsed_ms) / n.max(1);
                    }
                    Err(DeckError::Cancelled(_)) => {
                        stats.cancelled_requests += 1;
                    }
                    Err(e) => {
                        stats.failed_requests += 1;
                        // Failures stay in the counters; nothing reaches the user.
                        warn!("Prefetch {} failed: {}", request.id, e);
                    }
                }
            }

            inner.state.lock().await.active.remove(&task_id);
            SchedulerInner::pump(&inner).await;
        });

        state.active.insert(
            id,
            ActiveEntry {
                cancel: cancel_tx,
                handle,
            },
        );
    }

    async fn execute(
        &self,
        request: &PrefetchRequest,
        cancel: &watch::Receiver<bool>,
    ) -> Result<()> {
        match &request.packages {
            Some(names) => {
                let mut fetched = 0usize;
                for name in names {
                    if *cancel.borrow() {
                        return Err(DeckError::Cancelled(request.id.clone()));
                    }
                    match self
                        .source
                        .fetch_package_details(name, request.category)
                        .await
                    {
                        Ok(_) => fetched += 1,
                        Err(e) => debug!("Prefetch of {} skipped: {}", name, e),
                    }
                    tokio::time::sleep(DETAIL_PACING).await;
                }
                if fetched == 0 && !names.is_empty() {
                    return Err(DeckError::Fetch(format!(
                        "all {} detail fetches for {} failed",
                        names.len(),
                        request.id
                    )));
                }
                Ok(())
            }
            None => {
                let set = self.source.fetch_package_set(request.category).await?;
                if *cancel.borrow() {
                    return Err(DeckError::Cancelled(request.id.clone()));
                }
                self.cache.put(request.category, set).await;
                Ok(())
            }
        }
    }
}
