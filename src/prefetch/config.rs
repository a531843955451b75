use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use tracing::{debug, warn};

/// Runtime-adjustable prefetch configuration. Changes apply to subsequent
/// admission decisions only, never retroactively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrefetchConfig {
    pub enabled: bool,
    /// Active-request ceiling, clamped to 1..=10.
    pub max_concurrent_requests: usize,
    /// Block network-aware requests on cellular connections.
    pub wifi_only: bool,
    /// Honor the user's data-saving preference as a hard override.
    pub respect_save_data: bool,
    /// Minimum yearly downloads for a package to count as popular.
    pub popularity_threshold: u64,
    /// Packages warmed per category.
    pub cache_warming_top_n: usize,
    pub cache_warming_enabled: bool,
    pub predictive_enabled: bool,
    pub background_refresh_enabled: bool,
    /// Orchestration tick interval in seconds.
    pub tick_interval_seconds: u64,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrent_requests: 3,
            wifi_only: false,
            respect_save_data: true,
            popularity_threshold: 1000,
            cache_warming_top_n: 20,
            cache_warming_enabled: true,
            predictive_enabled: true,
            background_refresh_enabled: true,
            tick_interval_seconds: 90,
        }
    }
}

const CONFIG_FILE: &str = "prefetch_config.json";

impl PrefetchConfig {
    pub fn clamped(mut self) -> Self {
        self.max_concurrent_requests = self.max_concurrent_requests.clamp(1, 10);
        self
    }

    /// Write the config document atomically. Failures are logged and
    /// swallowed; configuration is best-effort durable.
    pub fn save(&self, dir: &Path) {
        let write = || -> std::io::Result<()> {
            std::fs::create_dir_all(dir)?;
            let bytes = serde_json::to_vec_pretty(self)?;
            let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
            tmp.write_all(&bytes)?;
            tmp.persist(dir.join(CONFIG_FILE))?;
            Ok(())
        };
        match write() {
            Ok(()) => debug!("Persisted prefetch config"),
            Err(e) => warn!("Failed to persist prefetch config: {}", e),
        }
    }

    /// Load a previously saved config, falling back to defaults when the
    /// document is missing or unreadable.
    pub fn load(dir: &Path) -> Self {
        let path = dir.join(CONFIG_FILE);
        match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<PrefetchConfig>(&bytes) {
                Ok(config) => config.clamped(),
                Err(e) => {
                    warn!("Unreadable prefetch config, using defaults: {}", e);
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_bounds_concurrency() {
        let config = PrefetchConfig {
            max_concurrent_requests: 50,
            ..PrefetchConfig::default()
        };
        assert_eq!(config.clamped().max_concurrent_requests, 10);

        let config = PrefetchConfig {
            max_concurrent_requests: 0,
            ..PrefetchConfig::default()
        };
        assert_eq!(config.clamped().max_concurrent_requests, 1);
    }

    #[test]
    fn load_round_trips_and_survives_garbage() {
        let dir = tempfile::tempdir().unwrap();

        let config = PrefetchConfig {
            wifi_only: true,
            popularity_threshold: 5000,
            ..PrefetchConfig::default()
        };
        config.save(dir.path());

        let loaded = PrefetchConfig::load(dir.path());
        assert!(loaded.wifi_only);
        assert_eq!(loaded.popularity_threshold, 5000);

        std::fs::write(dir.path().join(CONFIG_FILE), b"not json").unwrap();
        let fallback = PrefetchConfig::load(dir.path());
        assert!(!fallback.wifi_only);
    }
}
