//! Cache health classification for statistics/health endpoints.

use crate::core::types::StoreStats;
use serde::{Deserialize, Serialize};

/// Overall cache health
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Serving, but hit rate is low or size is close to the bound
    Degraded,
    /// Storage unavailable
    Unhealthy,
}

/// Thresholds for `classify_health`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthThresholds {
    /// Hit rate below this is degraded
    pub min_hit_rate: f64,
    /// Hit rate is only judged after this many requests
    pub min_requests: u64,
    /// Size at or above this share of `max_size_bytes` is degraded
    pub size_warning_ratio: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            min_hit_rate: 0.2,
            min_requests: 100,
            size_warning_ratio: 0.9,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub reasons: Vec<String>,
    pub hit_rate: f64,
    /// `size_bytes / max_size_bytes`, when a bound is configured
    pub size_ratio: Option<f64>,
}

impl HealthReport {
    pub fn unhealthy(reason: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            reasons: vec![reason.into()],
            hit_rate: 0.0,
            size_ratio: None,
        }
    }
}

/// Classify store health from its statistics.
///
/// Never returns `Unhealthy`: that is reserved for a failing stats query.
pub fn classify_health(stats: &StoreStats, thresholds: &HealthThresholds) -> HealthReport {
    let mut reasons = Vec::new();

    if stats.requests >= thresholds.min_requests && stats.hit_rate < thresholds.min_hit_rate {
        reasons.push(format!(
            "hit rate {:.1}% below {:.1}%",
            stats.hit_rate * 100.0,
            thresholds.min_hit_rate * 100.0
        ));
    }

    let size_ratio = stats
        .max_size_bytes
        .filter(|max| *max > 0)
        .map(|max| stats.size_bytes as f64 / max as f64);
    if let Some(ratio) = size_ratio.filter(|ratio| *ratio >= thresholds.size_warning_ratio) {
        reasons.push(format!("size at {:.1}% of configured maximum", ratio * 100.0));
    }

    let status = if reasons.is_empty() {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    };

    HealthReport {
        status,
        reasons,
        hit_rate: stats.hit_rate,
        size_ratio,
    }
}
