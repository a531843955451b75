use super::NetworkConditions;
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::debug;

/// One observation of network conditions.
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkSample {
    /// Metadata pushed by the host platform.
    Reported(NetworkConditions),
    /// A timed round trip against the probe endpoint.
    Measured { latency_ms: u64 },
    /// The source had nothing to report.
    Unavailable,
    /// The probe itself failed. Treated as poor quality downstream.
    Failed,
}

/// Where network-condition samples come from. Two implementations exist:
/// host-reported platform signals and an active latency probe.
#[async_trait]
pub trait NetworkQualitySource: Send + Sync {
    async fn sample(&self) -> NetworkSample;
}

/// Samples whatever the embedding host last pushed through its handle.
pub struct HostReportedSource {
    rx: watch::Receiver<Option<NetworkConditions>>,
}

/// Handle the host uses to push connection-change notifications.
#[derive(Clone)]
pub struct HostConditionsHandle {
    tx: watch::Sender<Option<NetworkConditions>>,
}

impl HostConditionsHandle {
    pub fn update(&self, conditions: NetworkConditions) {
        let _ = self.tx.send(Some(conditions));
    }
}

impl HostReportedSource {
    pub fn new() -> (Self, HostConditionsHandle) {
        let (tx, rx) = watch::channel(None);
        (Self { rx }, HostConditionsHandle { tx })
    }
}

#[async_trait]
impl NetworkQualitySource for HostReportedSource {
    async fn sample(&self) -> NetworkSample {
        match self.rx.borrow().clone() {
            Some(conditions) => NetworkSample::Reported(conditions),
            None => NetworkSample::Unavailable,
        }
    }
}

/// Measures wall-clock latency of a tiny HEAD request against a known
/// lightweight endpoint.
pub struct ActiveProbeSource {
    client: reqwest::Client,
    endpoint: String,
}

pub const DEFAULT_PROBE_ENDPOINT: &str = "https://www.gstatic.com/generate_204";

impl ActiveProbeSource {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .user_agent("pkgdeck/0.1")
            .build()
            .unwrap_or_default();

        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

impl Default for ActiveProbeSource {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_ENDPOINT)
    }
}

#[async_trait]
impl NetworkQualitySource for ActiveProbeSource {
    async fn sample(&self) -> NetworkSample {
        let started = Instant::now();
        match self.client.head(&self.endpoint).send().await {
            Ok(response) if response.status().is_success() || response.status().as_u16() == 204 => {
                let latency_ms = started.elapsed().as_millis() as u64;
                debug!("Network probe round trip: {}ms", latency_ms);
                NetworkSample::Measured { latency_ms }
            }
            Ok(response) => {
                debug!("Network probe returned {}", response.status());
                NetworkSample::Failed
            }
            Err(e) => {
                debug!("Network probe failed: {}", e);
                NetworkSample::Failed
            }
        }
    }
}
