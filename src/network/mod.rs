mod monitor;
mod source;

pub use monitor::{MonitorConfig, NetworkQualityMonitor, NetworkStatus, PrivilegedGuard};
pub use source::{
    ActiveProbeSource, HostConditionsHandle, HostReportedSource, NetworkQualitySource,
    NetworkSample,
};

use serde::{Deserialize, Serialize};

/// Coarse classification of current network conditions. Ordered so that
/// better tiers compare greater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Poor,
    Fair,
    Good,
    Excellent,
}

/// Host-reported connection metadata, in the shape platform connection
/// APIs advertise it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConditions {
    pub connection_type: String,
    pub effective_type: String,
    pub downlink_mbps: f64,
    pub rtt_ms: u32,
    pub save_data: bool,
}

/// Classify advertised connection metadata into a tier.
///
/// Excellent requires a high-bandwidth class plus measured-looking numbers;
/// anything in the 2g band is poor regardless of the rest.
pub(crate) fn classify_conditions(conditions: &NetworkConditions) -> QualityTier {
    match conditions.effective_type.as_str() {
        "slow-2g" | "2g" => QualityTier::Poor,
        "3g" => QualityTier::Fair,
        "4g" | "5g" | "wifi" | "ethernet" => {
            if conditions.downlink_mbps > 5.0 && conditions.rtt_ms < 100 {
                QualityTier::Excellent
            } else {
                QualityTier::Good
            }
        }
        _ => {
            if conditions.downlink_mbps > 5.0 && conditions.rtt_ms < 100 {
                QualityTier::Excellent
            } else if conditions.downlink_mbps > 2.0 {
                QualityTier::Good
            } else if conditions.downlink_mbps > 0.5 {
                QualityTier::Fair
            } else {
                QualityTier::Poor
            }
        }
    }
}

/// Classify a measured round-trip latency into a tier. Active measurement
/// takes precedence over advertised metadata.
pub(crate) fn classify_latency(latency_ms: u64) -> QualityTier {
    if latency_ms < 100 {
        QualityTier::Excellent
    } else if latency_ms < 300 {
        QualityTier::Good
    } else if latency_ms < 1000 {
        QualityTier::Fair
    } else {
        QualityTier::Poor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conditions(effective_type: &str, downlink: f64, rtt: u32) -> NetworkConditions {
        NetworkConditions {
            connection_type: "wifi".to_string(),
            effective_type: effective_type.to_string(),
            downlink_mbps: downlink,
            rtt_ms: rtt,
            save_data: false,
        }
    }

    #[test]
    fn fast_wifi_is_excellent() {
        assert_eq!(
            classify_conditions(&conditions("wifi", 20.0, 30)),
            QualityTier::Excellent
        );
    }

    #[test]
    fn slow_4g_is_good_not_excellent() {
        assert_eq!(
            classify_conditions(&conditions("4g", 3.0, 150)),
            QualityTier::Good
        );
    }

    #[test]
    fn low_bandwidth_classes_are_fair_or_poor() {
        assert_eq!(classify_conditions(&conditions("3g", 1.0, 300)), QualityTier::Fair);
        assert_eq!(classify_conditions(&conditions("2g", 0.2, 900)), QualityTier::Poor);
    }

    #[test]
    fn latency_thresholds() {
        assert_eq!(classify_latency(99), QualityTier::Excellent);
        assert_eq!(classify_latency(100), QualityTier::Good);
        assert_eq!(classify_latency(299), QualityTier::Good);
        assert_eq!(classify_latency(999), QualityTier::Fair);
        assert_eq!(classify_latency(1000), QualityTier::Poor);
    }

    #[test]
    fn tiers_order_by_quality() {
        assert!(QualityTier::Excellent > QualityTier::Good);
        assert!(QualityTier::Good > QualityTier::Fair);
        assert!(QualityTier::Fair > QualityTier::Poor);
    }
}
