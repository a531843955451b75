use async_trait::async_trait;
use pkgdeck::source::{PackageSource, SystemClock};
use pkgdeck::{
    CacheConfig, CacheStore, DeckError, MutationKind, OperationQueue, OperationStatus, Package,
    PackageCategory, PackageDetails, PackageSet, QueueConfig, Result,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

/// Mutations block until the release gate opens; names starting with "bad"
/// then fail.
struct GatedSource {
    release: watch::Receiver<bool>,
    mutate_calls: AtomicUsize,
}

impl GatedSource {
    fn new(open: bool) -> (Arc<Self>, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(open);
        (
            Arc::new(Self {
                release: rx,
                mutate_calls: AtomicUsize::new(0),
            }),
            tx,
        )
    }

    fn mutate_calls(&self) -> usize {
        self.mutate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PackageSource for GatedSource {
    async fn fetch_package_set(&self, _category: PackageCategory) -> Result<PackageSet> {
        Ok(Vec::new())
    }

    async fn search_packages(
        &self,
        _category: PackageCategory,
        _query: &str,
    ) -> Result<PackageSet> {
        Ok(Vec::new())
    }

    async fn fetch_package_details(
        &self,
        name: &str,
        _category: PackageCategory,
    ) -> Result<PackageDetails> {
        Ok(PackageDetails {
            name: name.to_string(),
            dependencies: Vec::new(),
            conflicts: Vec::new(),
        })
    }

    async fn mutate_package(
        &self,
        kind: MutationKind,
        name: &str,
        _category: PackageCategory,
    ) -> Result<String> {
        self.mutate_calls.fetch_add(1, Ordering::SeqCst);
        let mut release = self.release.clone();
        while !*release.borrow() {
            release
                .changed()
                .await
                .map_err(|_| DeckError::Cancelled(name.to_string()))?;
        }
        if name.starts_with("bad") {
            return Err(DeckError::Mutation(format!("{name} refused")));
        }
        Ok(format!("{kind} {name} done"))
    }
}

fn package(name: &str, category: PackageCategory) -> Package {
    Package {
        name: name.to_string(),
        version: "1.0.0".to_string(),
        description: String::new(),
        installed: false,
        outdated: false,
        homepage: String::new(),
        dependencies: Vec::new(),
        conflicts: Vec::new(),
        downloads_365d: 0,
        category,
    }
}

fn queue_with(source: Arc<GatedSource>, config: QueueConfig) -> (OperationQueue, Arc<CacheStore>) {
    let clock = Arc::new(SystemClock);
    let cache = Arc::new(CacheStore::new(clock.clone(), CacheConfig::default()));
    let queue = OperationQueue::new(source, cache.clone(), clock, config);
    (queue, cache)
}

async fn wait_for<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..300 {
        if condition().await {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 3 seconds");
}

#[tokio::test]
async fn duplicate_enqueue_coalesces_onto_live_operation() {
    let (source, _gate) = GatedSource::new(false);
    let (queue, _) = queue_with(source.clone(), QueueConfig::default());

    let first = queue
        .enqueue(MutationKind::Install, "wget", PackageCategory::Formula)
        .await;
    wait_for(|| async {
        queue
            .get(first)
            .await
            .map(|r| r.status == OperationStatus::Running)
            .unwrap_or(false)
    })
    .await;

    let second = queue
        .enqueue(MutationKind::Install, "wget", PackageCategory::Formula)
        .await;
    assert_eq!(first, second);
    assert_eq!(queue.snapshot().await.len(), 1);
    assert_eq!(source.mutate_calls(), 1);

    let strict = queue
        .enqueue_strict(MutationKind::Install, "wget", PackageCategory::Formula)
        .await;
    assert!(matches!(strict, Err(DeckError::DuplicateOperation(_))));
}

#[tokio::test]
async fn same_package_different_kind_is_not_a_duplicate() {
    let (source, _gate) = GatedSource::new(false);
    let (queue, _) = queue_with(source, QueueConfig::default());

    let install = queue
        .enqueue(MutationKind::Install, "wget", PackageCategory::Formula)
        .await;
    let update = queue
        .enqueue(MutationKind::Update, "wget", PackageCategory::Formula)
        .await;
    assert_ne!(install, update);
    assert_eq!(queue.snapshot().await.len(), 2);
}

#[tokio::test]
async fn completed_identity_can_be_enqueued_again() {
    let (source, _gate) = GatedSource::new(true);
    let (queue, _) = queue_with(source, QueueConfig::default());

    let first = queue
        .enqueue(MutationKind::Install, "jq", PackageCategory::Formula)
        .await;
    wait_for(|| async {
        queue
            .get(first)
            .await
            .map(|r| r.status == OperationStatus::Completed)
            .unwrap_or(true)
    })
    .await;

    let second = queue
        .enqueue(MutationKind::Install, "jq", PackageCategory::Formula)
        .await;
    assert_ne!(first, second);
}

#[tokio::test]
async fn success_forces_cache_stale_while_data_stays_visible() {
    let (source, _gate) = GatedSource::new(true);
    let (queue, cache) = queue_with(source, QueueConfig::default());
    let category = PackageCategory::Formula;
    cache.put(category, vec![package("wget", category)]).await;
    assert!(!cache.get(category).await.stale);

    let id = queue.enqueue(MutationKind::Install, "wget", category).await;
    wait_for(|| async { cache.get(category).await.stale }).await;

    let snapshot = cache.get(category).await;
    assert_eq!(snapshot.data.unwrap()[0].name, "wget");

    let record = queue.get(id).await.unwrap();
    assert_eq!(record.status, OperationStatus::Completed);
    assert_eq!(record.progress, Some(1.0));
    assert!(record.finished_at.is_some());
}

#[tokio::test]
async fn failure_keeps_cache_fresh_and_records_the_error() {
    let (source, _gate) = GatedSource::new(true);
    let (queue, cache) = queue_with(source, QueueConfig::default());
    let category = PackageCategory::Formula;
    cache.put(category, vec![package("wget", category)]).await;

    let id = queue
        .enqueue(MutationKind::Install, "bad-pkg", category)
        .await;
    wait_for(|| async {
        queue
            .get(id)
            .await
            .map(|r| r.status == OperationStatus::Failed)
            .unwrap_or(false)
    })
    .await;

    let record = queue.get(id).await.unwrap();
    assert!(record.error.as_deref().unwrap_or("").contains("refused"));
    assert!(!cache.get(category).await.stale);
}

#[tokio::test]
async fn cancel_all_pending_leaves_running_untouched() {
    let (source, gate) = GatedSource::new(false);
    let config = QueueConfig {
        max_running: 1,
        ..QueueConfig::default()
    };
    let (queue, _) = queue_with(source.clone(), config);
    let category = PackageCategory::Formula;

    let running = queue.enqueue(MutationKind::Install, "wget", category).await;
    wait_for(|| async {
        queue
            .get(running)
            .await
            .map(|r| r.status == OperationStatus::Running)
            .unwrap_or(false)
    })
    .await;
    let pending_a = queue.enqueue(MutationKind::Install, "jq", category).await;
    let pending_b = queue.enqueue(MutationKind::Install, "fd", category).await;

    assert_eq!(queue.cancel_all_pending().await, 2);
    for id in [pending_a, pending_b] {
        let record = queue.get(id).await.unwrap();
        assert_eq!(record.status, OperationStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("cancelled"));
    }
    assert_eq!(
        queue.get(running).await.unwrap().status,
        OperationStatus::Running
    );

    // Cancelled operations never reach the source once their runner wakes.
    let _ = gate.send(true);
    wait_for(|| async {
        queue
            .get(running)
            .await
            .map(|r| r.status == OperationStatus::Completed)
            .unwrap_or(true)
    })
    .await;
    sleep(Duration::from_millis(50)).await;
    assert_eq!(source.mutate_calls(), 1);
}

#[tokio::test]
async fn retry_all_failed_enqueues_fresh_records() {
    let (source, _gate) = GatedSource::new(true);
    let (queue, _) = queue_with(source, QueueConfig::default());
    let category = PackageCategory::Formula;

    let failed = queue
        .enqueue(MutationKind::Install, "bad-pkg", category)
        .await;
    wait_for(|| async {
        queue
            .get(failed)
            .await
            .map(|r| r.status == OperationStatus::Failed)
            .unwrap_or(false)
    })
    .await;

    assert_eq!(queue.retry_all_failed().await, 1);
    let names: Vec<_> = queue
        .snapshot()
        .await
        .into_iter()
        .filter(|r| r.name == "bad-pkg")
        .collect();
    assert!(names.len() >= 2);
    assert!(names.iter().any(|r| r.id != failed));
}

#[tokio::test]
async fn clear_terminal_removes_only_finished_records() {
    let (source, _gate) = GatedSource::new(false);
    let config = QueueConfig {
        max_running: 1,
        ..QueueConfig::default()
    };
    let (queue, _) = queue_with(source, config);
    let category = PackageCategory::Formula;

    let running = queue.enqueue(MutationKind::Install, "wget", category).await;
    wait_for(|| async {
        queue
            .get(running)
            .await
            .map(|r| r.status == OperationStatus::Running)
            .unwrap_or(false)
    })
    .await;

    // With the single run slot held, this one stays pending until cancelled.
    let doomed = queue.enqueue(MutationKind::Install, "fd", category).await;
    assert!(queue.cancel_pending(doomed).await);
    wait_for(|| async {
        queue
            .get(doomed)
            .await
            .map(|r| r.is_terminal())
            .unwrap_or(true)
    })
    .await;

    let removed = queue.clear_terminal().await;
    assert!(removed >= 1);
    assert!(queue.snapshot().await.iter().all(|r| !r.is_terminal()));
}

#[tokio::test]
async fn stats_are_derived_from_the_live_record_set() {
    let (source, _gate) = GatedSource::new(true);
    let (queue, _) = queue_with(source, QueueConfig::default());
    let category = PackageCategory::Formula;

    // Empty queue: optimistic success rate, default ETA baseline.
    let empty = queue.stats().await;
    assert_eq!(empty.total, 0);
    assert_eq!(empty.success_rate, 1.0);
    assert_eq!(empty.average_duration_ms, 30_000);
    assert_eq!(empty.estimated_remaining_ms, 0);

    let ok = queue.enqueue(MutationKind::Install, "wget", category).await;
    let bad = queue
        .enqueue(MutationKind::Install, "bad-pkg", category)
        .await;
    wait_for(|| async {
        let a = queue.get(ok).await.map(|r| r.is_terminal()).unwrap_or(true);
        let b = queue.get(bad).await.map(|r| r.is_terminal()).unwrap_or(true);
        a && b
    })
    .await;

    let stats = queue.stats().await;
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 1);
    assert!((stats.success_rate - 0.5).abs() < f64::EPSILON);
}

#[tokio::test]
async fn progress_updates_apply_only_to_running_operations() {
    let (source, gate) = GatedSource::new(false);
    let (queue, _) = queue_with(source, QueueConfig::default());
    let category = PackageCategory::Formula;

    let id = queue.enqueue(MutationKind::Install, "wget", category).await;
    wait_for(|| async {
        queue
            .get(id)
            .await
            .map(|r| r.status == OperationStatus::Running)
            .unwrap_or(false)
    })
    .await;

    assert!(queue.update_progress(id, 1.7).await);
    assert_eq!(queue.get(id).await.unwrap().progress, Some(1.0));
    assert!(queue.update_progress(id, 0.4).await);

    let _ = gate.send(true);
    wait_for(|| async {
        queue
            .get(id)
            .await
            .map(|r| r.status == OperationStatus::Completed)
            .unwrap_or(true)
    })
    .await;
    assert!(!queue.update_progress(id, 0.9).await);
}

#[tokio::test]
async fn health_reports_draining_when_only_running_remains() {
    let (source, _gate) = GatedSource::new(false);
    let config = QueueConfig {
        max_running: 2,
        ..QueueConfig::default()
    };
    let (queue, _) = queue_with(source, config);
    let category = PackageCategory::Formula;

    let a = queue.enqueue(MutationKind::Install, "wget", category).await;
    let b = queue.enqueue(MutationKind::Install, "jq", category).await;
    wait_for(|| async {
        let a = queue
            .get(a)
            .await
            .map(|r| r.status == OperationStatus::Running)
            .unwrap_or(false);
        let b = queue
            .get(b)
            .await
            .map(|r| r.status == OperationStatus::Running)
            .unwrap_or(false);
        a && b
    })
    .await;

    let health = queue.health().await;
    assert!(health.is_draining);
    assert!(!health.has_stuck_operations);
    assert!(health.oldest_running_ms.is_some());
}
