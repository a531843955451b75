use crate::core::{PackageCategory, PackageSet};
use crate::source::Clock;
use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// Cache store configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Time-to-live shared across both categories.
    pub ttl: Duration,
    /// Bound on the per-category recent-search cache.
    pub search_cache_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300), // 5 minutes
            search_cache_size: 16,
        }
    }
}

/// Read-only view of one category entry, computed at call time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub category: PackageCategory,
    pub data: Option<PackageSet>,
    pub last_fetch: Option<DateTime<Utc>>,
    pub stale: bool,
    pub age_minutes: Option<i64>,
}

struct CategoryEntry {
    data: Option<PackageSet>,
    last_fetch: Option<DateTime<Utc>>,
    searches: LruCache<String, PackageSet>,
}

impl CategoryEntry {
    fn new(search_cache_size: usize) -> Self {
        let cap = NonZeroUsize::new(search_cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            data: None,
            last_fetch: None,
            searches: LruCache::new(cap),
        }
    }
}

/// Per-category holder of the last-fetched package set with TTL-based
/// staleness.
///
/// Staleness is always recomputed from the injected clock at call time,
/// never stored as a derived boolean. `clear` follows a
/// stale-while-revalidate posture: the data stays readable while the entry
/// reports stale, until the next successful `put` overwrites it.
pub struct CacheStore {
    clock: Arc<dyn Clock>,
    ttl: Duration,
    entries: RwLock<HashMap<PackageCategory, CategoryEntry>>,
}

impl CacheStore {
    pub fn new(clock: Arc<dyn Clock>, config: CacheConfig) -> Self {
        let mut entries = HashMap::new();
        for category in PackageCategory::ALL {
            entries.insert(category, CategoryEntry::new(config.search_cache_size));
        }

        Self {
            clock,
            ttl: config.ttl,
            entries: RwLock::new(entries),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn is_stale(&self, last_fetch: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match last_fetch {
            None => true,
            Some(fetched_at) => {
                let ttl = chrono::Duration::from_std(self.ttl).unwrap_or_default();
                now.signed_duration_since(fetched_at) >= ttl
            }
        }
    }

    /// Snapshot the entry for a category.
    pub async fn get(&self, category: PackageCategory) -> CacheSnapshot {
        let now = self.clock.now();
        let entries = self.entries.read().await;
        let entry = entries.get(&category);

        let data = entry.and_then(|e| e.data.clone());
        let last_fetch = entry.and_then(|e| e.last_fetch);

        CacheSnapshot {
            category,
            stale: self.is_stale(last_fetch, now),
            age_minutes: last_fetch.map(|t| now.signed_duration_since(t).num_minutes()),
            data,
            last_fetch,
        }
    }

    /// Overwrite the category's data and freshness timestamp. This is the
    /// only mutator of freshness.
    pub async fn put(&self, category: PackageCategory, data: PackageSet) {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(&category) {
            debug!("Cached {} {} packages", data.len(), category);
            entry.data = Some(data);
            entry.last_fetch = Some(now);
        }
    }

    /// Remember a search result for the category.
    pub async fn put_search(&self, category: PackageCategory, query: &str, results: PackageSet) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(&category) {
            entry.searches.put(query.to_string(), results);
        }
    }

    /// Look up a recent search result. Returns nothing when the category
    /// entry itself is stale, so expired data is never served.
    pub async fn search_hit(&self, category: PackageCategory, query: &str) -> Option<PackageSet> {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(&category)?;
        if self.is_stale(entry.last_fetch, now) {
            return None;
        }
        entry.searches.get(query).cloned()
    }

    /// Force the category stale without discarding visible data. Idempotent.
    pub async fn clear(&self, category: PackageCategory) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(&category) {
            entry.last_fetch = None;
            entry.searches.clear();
            debug!("Cleared cache freshness for {}", category);
        }
    }

    pub async fn clear_all(&self) {
        for category in PackageCategory::ALL {
            self.clear(category).await;
        }
    }

    /// Predictive staleness: true when the entry is stale now or will cross
    /// its TTL within `window`.
    pub async fn will_be_stale_within(&self, category: PackageCategory, window: Duration) -> bool {
        let now = self.clock.now();
        let horizon = now + chrono::Duration::from_std(window).unwrap_or_default();
        let entries = self.entries.read().await;
        let last_fetch = entries.get(&category).and_then(|e| e.last_fetch);
        self.is_stale(last_fetch, horizon)
    }

    pub(crate) async fn export(&self, category: PackageCategory) -> (Option<PackageSet>, Option<DateTime<Utc>>) {
        let entries = self.entries.read().await;
        match entries.get(&category) {
            Some(entry) => (entry.data.clone(), entry.last_fetch),
            None => (None, None),
        }
    }

    pub(crate) async fn restore(
        &self,
        category: PackageCategory,
        data: Option<PackageSet>,
        last_fetch: Option<DateTime<Utc>>,
    ) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(&category) {
            entry.data = data;
            entry.last_fetch = last_fetch;
        }
    }
}
