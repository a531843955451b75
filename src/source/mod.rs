//! Injected capability seams.
//!
//! The scheduler core never talks to the package manager or the wall clock
//! directly. Both are injected so tests can supply fakes and the embedding
//! application decides how data is actually obtained.

use crate::core::{MutationKind, PackageCategory, PackageDetails, PackageSet, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Mutex;

/// The external package data source.
///
/// `fetch_package_set` and `search_packages` are idempotent and may be slow.
/// A successful `mutate_package` implies the package's installed/outdated
/// state has changed, so callers invalidate caches for the category.
#[async_trait]
pub trait PackageSource: Send + Sync {
    async fn fetch_package_set(&self, category: PackageCategory) -> Result<PackageSet>;

    async fn search_packages(&self, category: PackageCategory, query: &str)
    -> Result<PackageSet>;

    async fn fetch_package_details(
        &self,
        name: &str,
        category: PackageCategory,
    ) -> Result<PackageDetails>;

    async fn mutate_package(
        &self,
        kind: MutationKind,
        name: &str,
        category: PackageCategory,
    ) -> Result<String>;
}

/// Wall-clock source. Staleness math always goes through this so tests can
/// drive time explicitly.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock advanced by hand. Intended for tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, delta: chrono::Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += delta;
        }
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        if let Ok(mut now) = self.now.lock() {
            *now = instant;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
            .lock()
            .map(|now| *now)
            .unwrap_or_else(|poisoned| *poisoned.into_inner())
    }
}
