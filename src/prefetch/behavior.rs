//! Session-scoped model of user behavior, bucketed by time of day.
//!
//! Buckets accumulate monotonically while the process runs but each list
//! inside a bucket is capped to a recent window, so memory stays bounded
//! regardless of session length.

use crate::core::PackageCategory;
use crate::source::Clock;
use chrono::{Datelike, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Most recent entries kept per bucket list.
const RECENT_CAP: usize = 20;

/// Total predictions returned per query.
const PREDICTION_CAP: usize = 10;

/// Hours on either side of "now" whose buckets count as matching.
const HOUR_WINDOW: u32 = 2;

/// One observed user action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum BehaviorAction {
    Search { query: String },
    View { name: String },
    Install { name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct BucketKey {
    category: PackageCategory,
    hour: u32,
    weekday: u32,
}

#[derive(Debug, Default)]
struct BehaviorBucket {
    queries: VecDeque<String>,
    viewed: VecDeque<String>,
    installed: VecDeque<String>,
    frequency: u64,
}

impl BehaviorBucket {
    fn push(list: &mut VecDeque<String>, value: String) {
        if list.len() >= RECENT_CAP {
            list.pop_front();
        }
        list.push_back(value);
    }
}

/// A likely-next interest derived from past behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Prediction {
    Query { query: String },
    PackageName { name: String },
}

pub struct BehaviorModel {
    clock: Arc<dyn Clock>,
    buckets: Mutex<HashMap<BucketKey, BehaviorBucket>>,
}

impl BehaviorModel {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn key_for_now(&self, category: PackageCategory) -> BucketKey {
        let now = self.clock.now();
        BucketKey {
            category,
            hour: now.hour(),
            weekday: now.weekday().num_days_from_monday(),
        }
    }

    /// Record an action into the bucket for the current hour/weekday.
    pub async fn record(&self, category: PackageCategory, action: BehaviorAction) {
        let key = self.key_for_now(category);
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets.entry(key).or_default();
        bucket.frequency += 1;
        match action {
            BehaviorAction::Search { query } => BehaviorBucket::push(&mut bucket.queries, query),
            BehaviorAction::View { name } => BehaviorBucket::push(&mut bucket.viewed, name),
            BehaviorAction::Install { name } => BehaviorBucket::push(&mut bucket.installed, name),
        }
    }

    /// Predict likely-next queries and package names for the current time
    /// slot: buckets on the same weekday within the hour window, with
    /// frequency above one, ranked by how often an entry recurs.
    pub async fn predict(&self, category: PackageCategory) -> Vec<Prediction> {
        let now = self.clock.now();
        let hour = now.hour();
        let weekday = now.weekday().num_days_from_monday();

        let mut query_counts: HashMap<String, usize> = HashMap::new();
        let mut name_counts: HashMap<String, usize> = HashMap::new();

        let buckets = self.buckets.lock().await;
        for offset in -(HOUR_WINDOW as i32)..=(HOUR_WINDOW as i32) {
            let bucket_hour = ((hour as i32 + offset).rem_euclid(24)) as u32;
            let key = BucketKey {
                category,
                hour: bucket_hour,
                weekday,
            };
            let Some(bucket) = buckets.get(&key) else {
                continue;
            };
            if bucket.frequency <= 1 {
                continue;
            }
            for query in &bucket.queries {
                *query_counts.entry(query.clone()).or_insert(0) += 1;
            }
            for name in bucket.viewed.iter().chain(bucket.installed.iter()) {
                *name_counts.entry(name.clone()).or_insert(0) += 1;
            }
        }
        drop(buckets);

        let mut ranked_queries: Vec<(String, usize)> = query_counts.into_iter().collect();
        ranked_queries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let mut ranked_names: Vec<(String, usize)> = name_counts.into_iter().collect();
        ranked_names.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let mut predictions = Vec::new();
        for (name, _) in ranked_names {
            if predictions.len() >= PREDICTION_CAP {
                break;
            }
            predictions.push(Prediction::PackageName { name });
        }
        for (query, _) in ranked_queries {
            if predictions.len() >= PREDICTION_CAP {
                break;
            }
            predictions.push(Prediction::Query { query });
        }
        predictions
    }
}
