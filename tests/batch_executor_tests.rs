use async_trait::async_trait;
use pkgdeck::source::{PackageSource, SystemClock};
use pkgdeck::{
    BatchOptions, CacheConfig, CacheStore, DeckError, MutationKind, OperationQueue,
    PackageCategory, PackageDetails, PackageSet, QueueConfig, Result,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Tracks how many mutations run at once; names starting with "bad" fail.
#[derive(Default)]
struct CountingSource {
    current: AtomicUsize,
    max_seen: AtomicUsize,
    total_calls: AtomicUsize,
}

impl CountingSource {
    fn max_concurrent(&self) -> usize {
        self.max_seen.load(Ordering::SeqCst)
    }

    fn total_calls(&self) -> usize {
        self.total_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PackageSource for CountingSource {
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
        _kind: MutationKind,
        name: &str,
        _category: PackageCategory,
    ) -> Result<String> {
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);

        if name.starts_with("bad") {
            Err(DeckError::Mutation(format!("{name} refused")))
        } else {
            Ok(format!("{name} done"))
        }
    }
}

fn queue_with(source: Arc<CountingSource>) -> OperationQueue {
    let clock = Arc::new(SystemClock);
    let cache = Arc::new(CacheStore::new(clock.clone(), CacheConfig::default()));
    OperationQueue::new(source, cache, clock, QueueConfig::default())
}

fn items(names: &[&str]) -> Vec<(String, PackageCategory)> {
    names
        .iter()
        .map(|n| (n.to_string(), PackageCategory::Formula))
        .collect()
}

#[tokio::test]
async fn window_size_bounds_concurrency() {
    let source = Arc::new(CountingSource::default());
    let queue = queue_with(source.clone());

    let results = queue
        .run_batch(
            MutationKind::Install,
            items(&["a", "b", "c", "d", "e"]),
            BatchOptions {
                window_size: 2,
                continue_on_error: true,
            },
            |_, _| {},
        )
        .await;

    assert_eq!(results.len(), 5);
    assert!(results.iter().all(|r| r.success));
    assert!(source.max_concurrent() <= 2);
    assert_eq!(source.total_calls(), 5);
}

#[tokio::test]
async fn progress_fires_once_per_item() {
    let source = Arc::new(CountingSource::default());
    let queue = queue_with(source);
    let seen: Arc<Mutex<Vec<(usize, usize)>>> = Arc::new(Mutex::new(Vec::new()));

    let seen_cb = seen.clone();
    queue
        .run_batch(
            MutationKind::Install,
            items(&["a", "b", "c", "d"]),
            BatchOptions::default(),
            move |done, total| {
                if let Ok(mut seen) = seen_cb.lock() {
                    seen.push((done, total));
                }
            },
        )
        .await;

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 4);
    assert!(seen.iter().all(|(_, total)| *total == 4));
    let mut dones: Vec<usize> = seen.iter().map(|(done, _)| *done).collect();
    dones.sort_unstable();
    assert_eq!(dones, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn failure_stops_later_windows_when_not_continuing() {
    let source = Arc::new(CountingSource::default());
    let queue = queue_with(source.clone());

    let results = queue
        .run_batch(
            MutationKind::Install,
            items(&["a", "bad-b", "c", "d", "e"]),
            BatchOptions {
                window_size: 2,
                continue_on_error: false,
            },
            |_, _| {},
        )
        .await;

    // The failing window is finished in full; later windows never start.
    assert_eq!(results.len(), 2);
    assert_eq!(results.iter().filter(|r| r.success).count(), 1);
    assert_eq!(source.total_calls(), 2);

    let failed = results.iter().find(|r| !r.success).unwrap();
    assert_eq!(failed.name, "bad-b");
    assert!(failed.error.as_deref().unwrap_or("").contains("refused"));
}

#[tokio::test]
async fn failures_are_reported_but_do_not_stop_the_batch_by_default() {
    let source = Arc::new(CountingSource::default());
    let queue = queue_with(source.clone());

    let results = queue
        .run_batch(
            MutationKind::Uninstall,
            items(&["a", "bad-b", "c", "d", "e"]),
            BatchOptions {
                window_size: 2,
                continue_on_error: true,
            },
            |_, _| {},
        )
        .await;

    assert_eq!(results.len(), 5);
    assert_eq!(results.iter().filter(|r| r.success).count(), 4);
    assert_eq!(source.total_calls(), 5);
}

#[tokio::test]
async fn empty_batch_returns_no_results() {
    let source = Arc::new(CountingSource::default());
    let queue = queue_with(source);
    let fired = AtomicUsize::new(0);

    let results = queue
        .run_batch(
            MutationKind::Install,
            Vec::new(),
            BatchOptions::default(),
            |_, _| {
                fired.fetch_add(1, Ordering::SeqCst);
            },
        )
        .await;

    assert!(results.is_empty());
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn duplicate_item_in_one_window_fails_the_copy() {
    let source = Arc::new(CountingSource::default());
    let queue = queue_with(source.clone());

    let results = queue
        .run_batch(
            MutationKind::Install,
            items(&["wget", "wget"]),
            BatchOptions {
                window_size: 2,
                continue_on_error: true,
            },
            |_, _| {},
        )
        .await;

    assert_eq!(results.len(), 2);
    assert_eq!(results.iter().filter(|r| r.success).count(), 1);
    let rejected = results.iter().find(|r| !r.success).unwrap();
    assert!(
        rejected
            .error
            .as_deref()
            .unwrap_or("")
            .contains("already in flight")
    );
    assert_eq!(source.total_calls(), 1);
}
