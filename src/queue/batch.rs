use super::{OperationKey, OperationQueue};
use crate::core::{MutationKind, PackageCategory};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;

#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Items dispatched concurrently per window; the whole window is
    /// awaited before the next one starts.
    pub window_size: usize,
    /// When false, a failure anywhere in a window stops all later windows.
    pub continue_on_error: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            window_size: 3,
            continue_on_error: true,
        }
    }
}

/// Outcome for one attempted batch item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItemResult {
    pub name: String,
    pub category: PackageCategory,
    pub success: bool,
    pub error: Option<String>,
}

impl OperationQueue {
    /// Run one mutation kind over a list of packages in fixed-size
    /// concurrent windows.
    ///
    /// Every attempted item yields exactly one result. The progress
    /// callback fires after every item settles, not only at window
    /// boundaries. With `continue_on_error` unset, windows after the first
    /// failure are never attempted and their items carry no results.
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
        let total = items.len();
        let window = options.window_size.max(1);
        let settled = AtomicUsize::new(0);
        let progress = Mutex::new(progress);

        info!(
            "Starting {} batch of {} items (window {})",
            kind, total, window
        );

        let mut results: Vec<BatchItemResult> = Vec::with_capacity(total);

        for chunk in items.chunks(window) {
            let futures = chunk.iter().map(|(name, category)| {
                let inner = &self.inner;
                let settled = &settled;
                let progress = &progress;
                async move {
                    let key = OperationKey::new(kind, name.clone(), *category);
                    let outcome = match inner.create(&key).await {
                        Err(_) => Err("operation already in flight".to_string()),
                        Ok(id) => {
                            inner.execute(id, &key).await;
                            match inner.ops.lock().await.records.get(&id) {
                                Some(record) if record.error.is_none() => Ok(()),
                                Some(record) => Err(record
                                    .error
                                    .clone()
                                    .unwrap_or_else(|| "unknown error".to_string())),
                                // Record already lingered out; treat as done.
                                None => Ok(()),
                            }
                        }
                    };

                    let done = settled.fetch_add(1, Ordering::SeqCst) + 1;
                    if let Ok(mut cb) = progress.lock() {
                        cb(done, total);
                    }

                    BatchItemResult {
                        name: name.clone(),
                        category: *category,
                        success: outcome.is_ok(),
                        error: outcome.err(),
                    }
                }
            });

            let window_results = futures::future::join_all(futures).await;
            let window_failed = window_results.iter().any(|r| !r.success);
            results.extend(window_results);

            if window_failed && !options.continue_on_error {
                info!("Batch aborted after failure; remaining windows skipped");
                break;
            }
        }

        results
    }
}
