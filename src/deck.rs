use crate::cache::{CacheConfig, CacheSnapshot, CacheStore};
use crate::core::{MutationKind, PackageCategory, PackageSet, PrefetchPriority, Result};
use crate::network::{
    ActiveProbeSource, MonitorConfig, NetworkConditions, NetworkQualityMonitor,
    NetworkQualitySource, NetworkStatus,
};
use crate::prefetch::{
    BehaviorAction, BehaviorModel, PrefetchConfig, PrefetchScheduler, PrefetchStats,
};
use crate::queue::{
    BatchItemResult, BatchOptions, OperationId, OperationQueue, OperationRecord, QueueConfig,
    QueueHealth, QueueStats,
};
use crate::source::{Clock, PackageSource, SystemClock};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Builder for [`PackageDeck`]. Everything with a side effect is injected;
/// only the package source is mandatory.
pub struct DeckBuilder {
    source: Arc<dyn PackageSource>,
    clock: Arc<dyn Clock>,
    network_source: Option<Arc<dyn NetworkQualitySource>>,
    persist_dir: Option<PathBuf>,
    cache_config: CacheConfig,
    queue_config: QueueConfig,
    monitor_config: MonitorConfig,
    prefetch_config: Option<PrefetchConfig>,
}

impl DeckBuilder {
    pub fn new(source: Arc<dyn PackageSource>) -> Self {
        Self {
            source,
            clock: Arc::new(SystemClock),
            network_source: None,
            persist_dir: None,
            cache_config: CacheConfig::default(),
            queue_config: QueueConfig::default(),
            monitor_config: MonitorConfig::default(),
            prefetch_config: None,
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn network_source(mut self, source: Arc<dyn NetworkQualitySource>) -> Self {
        self.network_source = Some(source);
        self
    }

    /// Directory for the durable cache and config documents. Without it
    /// everything is in-memory and nothing survives a restart.
    pub fn persist_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.persist_dir = Some(dir.into());
        self
    }

    pub fn cache_config(mut self, config: CacheConfig) -> Self {
        self.cache_config = config;
        self
    }

    pub fn queue_config(mut self, config: QueueConfig) -> Self {
        self.queue_config = config;
        self
    }

    pub fn monitor_config(mut self, config: MonitorConfig) -> Self {
        self.monitor_config = config;
        self
    }

    /// Explicit prefetch configuration, overriding any persisted document.
    pub fn prefetch_config(mut self, config: PrefetchConfig) -> Self {
        self.prefetch_config = Some(config);
        self
    }

    /// Wire the components together, restoring persisted state when a
    /// directory was configured. Background loops are not started; call
    /// [`PackageDeck::start`] for that.
    pub async fn build(self) -> PackageDeck {
        let cache = Arc::new(CacheStore::new(self.clock.clone(), self.cache_config));
        let prefetch_config = match (&self.prefetch_config, &self.persist_dir) {
            (Some(config), _) => config.clone(),
            (None, Some(dir)) => PrefetchConfig::load(dir),
            (None, None) => PrefetchConfig::default(),
        };
        if let Some(dir) = &self.persist_dir {
            cache.load(dir).await;
        }

        let network_source: Arc<dyn NetworkQualitySource> = self
            .network_source
            .unwrap_or_else(|| Arc::new(ActiveProbeSource::default()));
        let monitor = Arc::new(NetworkQualityMonitor::new(
            network_source,
            self.monitor_config,
        ));

        let queue = Arc::new(OperationQueue::new(
            self.source.clone(),
            cache.clone(),
            self.clock.clone(),
            self.queue_config,
        ));
        let behavior = Arc::new(BehaviorModel::new(self.clock.clone()));
        let prefetch = Arc::new(PrefetchScheduler::new(
            self.source.clone(),
            cache.clone(),
            monitor.clone(),
            behavior.clone(),
            self.clock.clone(),
            prefetch_config,
        ));

        PackageDeck {
            source: self.source,
            cache,
            monitor,
            queue,
            behavior,
            prefetch,
            persist_dir: self.persist_dir,
        }
    }
}

/// The orchestration core behind a package-manager front-end: decides when
/// background fetches run, tracks every mutation's lifecycle, and keeps a
/// time-bounded cache of fetched results.
///
/// UI collaborators enqueue work and read snapshots; nothing in here is
/// fatal to the process. Mutation and prefetch traffic run in isolated
/// concurrency pools so background optimization can never starve
/// user-initiated installs.
pub struct PackageDeck {
    source: Arc<dyn PackageSource>,
    cache: Arc<CacheStore>,
    monitor: Arc<NetworkQualityMonitor>,
    queue: Arc<OperationQueue>,
    behavior: Arc<BehaviorModel>,
    prefetch: Arc<PrefetchScheduler>,
    persist_dir: Option<PathBuf>,
}

impl PackageDeck {
    /// Start the network probe loop and the prefetch orchestration tick.
    pub async fn start(&self) {
        self.monitor.start().await;
        self.prefetch.start().await;
        info!("Package deck started");
    }

    /// Stop background loops, cancel outstanding prefetches, and persist
    /// durable state. In-flight operation and prefetch state is not
    /// persisted; it always resets on restart.
    pub async fn shutdown(&self) {
        self.prefetch.shutdown().await;
        self.monitor.shutdown().await;
        if let Some(dir) = &self.persist_dir {
            self.cache.save(dir).await;
            self.prefetch.config().await.save(dir);
        }
        info!("Package deck shut down");
    }

    // --- mutations ---

    /// Enqueue a mutation and return its operation id immediately. The UI
    /// polls or subscribes for status through [`operations`](Self::operations).
    pub async fn enqueue_mutation(
        &self,
        kind: MutationKind,
        name: &str,
        category: PackageCategory,
    ) -> OperationId {
        self.queue.enqueue(kind, name, category).await
    }

    /// Enqueue the bulk "update all" mutation for a category.
    pub async fn enqueue_update_all(&self, category: PackageCategory) -> OperationId {
        self.queue.enqueue_update_all(category).await
    }

    /// Run one mutation kind over many packages in bounded windows.
    pub async fn run_batch<F>(
        &self,
        kind: MutationKind,
        items: Vec<(String, PackageCategory)>,
        options: BatchOptions,
        progress: F,
    ) -> Vec<BatchItemResult>
    where
        F: FnMut(usize, usize) + Send,
    {
        self.queue.run_batch(kind, items, options, progress).await
    }

    pub async fn operations(&self) -> Vec<OperationRecord> {
        self.queue.snapshot().await
    }

    pub async fn queue_stats(&self) -> QueueStats {
        self.queue.stats().await
    }

    pub async fn queue_health(&self) -> QueueHealth {
        self.queue.health().await
    }

    pub async fn cancel_all_pending(&self) -> usize {
        self.queue.cancel_all_pending().await
    }

    pub async fn retry_all_failed(&self) -> usize {
        self.queue.retry_all_failed().await
    }

    pub async fn clear_terminal_operations(&self) -> usize {
        self.queue.clear_terminal().await
    }

    // --- reads ---

    /// Load a category's package set, serving from the cache while it is
    /// fresh. On a fetch failure any previously cached data is served in
    /// its place; only a cold cache surfaces the error.
    pub async fn load_packages(&self, category: PackageCategory) -> Result<PackageSet> {
        let snapshot = self.cache.get(category).await;
        match (snapshot.stale, snapshot.data) {
            (false, Some(data)) => Ok(data),
            (_, cached) => match self.source.fetch_package_set(category).await {
                Ok(set) => {
                    self.cache.put(category, set.clone()).await;
                    Ok(set)
                }
                Err(error) => match cached {
                    Some(data) => {
                        warn!("Fetch of {} failed, serving stale data: {}", category, error);
                        Ok(data)
                    }
                    None => Err(error),
                },
            },
        }
    }

    /// Search a category, answering repeated queries from the per-category
    /// search cache while the category itself is fresh.
    pub async fn search(&self, category: PackageCategory, query: &str) -> Result<PackageSet> {
        if let Some(hit) = self.cache.search_hit(category, query).await {
            debug!("Search '{}' in {} served from cache", query, category);
            return Ok(hit);
        }
        let results = self.source.search_packages(category, query).await?;
        self.cache.put_search(category, query, results.clone()).await;
        Ok(results)
    }

    pub async fn cache_snapshot(&self, category: PackageCategory) -> CacheSnapshot {
        self.cache.get(category).await
    }

    pub async fn clear_cache(&self, category: PackageCategory) {
        self.cache.clear(category).await;
    }

    pub async fn clear_all_caches(&self) {
        self.cache.clear_all().await;
    }

    // --- behavior & prefetch ---

    /// Feed one observed user action into the prediction model. An install
    /// signal additionally queues a related-package prefetch.
    pub async fn record_behavior(&self, category: PackageCategory, action: BehaviorAction) {
        if let BehaviorAction::Install { name } = &action {
            let prefetch = self.prefetch.clone();
            let name = name.clone();
            tokio::spawn(async move {
                if let Err(e) = prefetch.prefetch_related(&name, category).await {
                    // Best-effort; the install itself is unaffected.
                    warn!("Related-package prefetch for {} failed: {}", name, e);
                }
            });
        }
        self.behavior.record(category, action).await;
    }

    pub async fn prefetch_related(&self, name: &str, category: PackageCategory) -> Result<()> {
        self.prefetch.prefetch_related(name, category).await
    }

    pub async fn prefetch_stats(&self) -> PrefetchStats {
        self.prefetch.stats().await
    }

    pub async fn should_prefetch(&self, priority: PrefetchPriority) -> bool {
        self.prefetch.should_prefetch(priority).await
    }

    pub async fn cancel_all_prefetch(&self) -> usize {
        self.prefetch.cancel_all().await
    }

    /// Replace the prefetch configuration. Applies to subsequent admission
    /// decisions only, and is persisted when a directory was configured.
    pub async fn update_prefetch_config(&self, config: PrefetchConfig) {
        self.prefetch.update_config(config).await;
        if let Some(dir) = &self.persist_dir {
            self.prefetch.config().await.save(dir);
        }
    }

    pub async fn prefetch_config(&self) -> PrefetchConfig {
        self.prefetch.config().await
    }

    // --- network ---

    pub async fn network_status(&self) -> NetworkStatus {
        self.monitor.snapshot().await
    }

    /// Host-pushed connection-change notification.
    pub async fn report_network_conditions(&self, conditions: NetworkConditions) {
        self.monitor.ingest(conditions).await;
    }
}
