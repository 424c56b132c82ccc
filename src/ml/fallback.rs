//! Rule-based stand-ins used when trained artifacts are unavailable.
//!
//! The thresholds and weights are operational constants without a derivation;
//! they live in the `[models.fallback]` config section.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::features::{FEATURE_COUNT, FEATURE_NAMES, JITTER, LATENCY, PACKET_LOSS, THROUGHPUT};
use crate::ml::Explanation;

/// Version tag reported by predictions served from the fallback bank.
pub const FALLBACK_MODEL_VERSION: &str = "fallback-v1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Violation when latency (ms) exceeds this.
    pub risk_latency_ms: f64,
    /// Violation when packet loss (%) exceeds this.
    pub risk_packet_loss_pct: f64,
    /// Violation when throughput (Mbps) drops below this.
    pub risk_min_throughput_mbps: f64,
    /// Latency mapped to a full risk share.
    pub risk_latency_scale: f64,
    pub risk_packet_loss_scale: f64,
    /// Throughput at or above which the throughput risk share is zero.
    pub risk_throughput_scale: f64,

    pub anomaly_latency_ms: f64,
    pub anomaly_packet_loss_pct: f64,
    pub anomaly_jitter_ms: f64,
    pub anomaly_latency_scale: f64,
    pub anomaly_packet_loss_scale: f64,
    pub anomaly_jitter_scale: f64,

    /// Heuristic importance per feature, in canonical order.
    pub explanation_weights: [f64; FEATURE_COUNT],
    /// Divisor normalizing raw values before weighting (result clamped to 1).
    pub explanation_scale: f64,
    pub explanation_base_value: f64,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            risk_latency_ms: 10.0,
            risk_packet_loss_pct: 5.0,
            risk_min_throughput_mbps: 1.0,
            risk_latency_scale: 20.0,
            risk_packet_loss_scale: 10.0,
            risk_throughput_scale: 2.0,

            anomaly_latency_ms: 20.0,
            anomaly_packet_loss_pct: 15.0,
            anomaly_jitter_ms: 5.0,
            anomaly_latency_scale: 30.0,
            anomaly_packet_loss_scale: 20.0,
            anomaly_jitter_scale: 10.0,

            explanation_weights: [0.1, 0.15, 0.2, 0.25, 0.25, 0.05],
            explanation_scale: 10.0,
            explanation_base_value: 0.5,
        }
    }
}

/// Threshold rules on latency, packet loss and throughput.
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackClassifier {
    pub rules: FallbackConfig,
}

impl FallbackClassifier {
    pub fn predict(&self, x: &[f64; FEATURE_COUNT]) -> bool {
        let r = &self.rules;
        x[LATENCY] > r.risk_latency_ms
            || x[PACKET_LOSS] > r.risk_packet_loss_pct
            || x[THROUGHPUT] < r.risk_min_throughput_mbps
    }

    /// Mean of three clamped risk shares.
    pub fn predict_proba(&self, x: &[f64; FEATURE_COUNT]) -> f64 {
        let r = &self.rules;
        let latency_risk = (x[LATENCY] / r.risk_latency_scale).min(1.0);
        let loss_risk = (x[PACKET_LOSS] / r.risk_packet_loss_scale).min(1.0);
        let throughput_risk =
            ((r.risk_throughput_scale - x[THROUGHPUT]) / r.risk_throughput_scale).max(0.0);
        ((latency_risk + loss_risk + throughput_risk) / 3.0).clamp(0.0, 1.0)
    }
}

/// Fixed thresholds on latency, packet loss and jitter over unscaled features.
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackDetector {
    pub rules: FallbackConfig,
}

impl FallbackDetector {
    pub fn predict(&self, x: &[f64; FEATURE_COUNT]) -> bool {
        let r = &self.rules;
        x[LATENCY] > r.anomaly_latency_ms
            || x[PACKET_LOSS] > r.anomaly_packet_loss_pct
            || x[JITTER] > r.anomaly_jitter_ms
    }

    /// Normality in [-1, 1]; higher is more normal.
    pub fn decision_function(&self, x: &[f64; FEATURE_COUNT]) -> f64 {
        let r = &self.rules;
        let load = (x[LATENCY] / r.anomaly_latency_scale
            + x[PACKET_LOSS] / r.anomaly_packet_loss_scale
            + x[JITTER] / r.anomaly_jitter_scale)
            / 3.0;
        (1.0 - load).clamp(-1.0, 1.0)
    }
}

/// Weighted-magnitude attribution with a fixed base value.
pub fn heuristic_explanation(x: &[f64; FEATURE_COUNT], rules: &FallbackConfig) -> Explanation {
    let mut per_feature_contribution = BTreeMap::new();
    for (i, name) in FEATURE_NAMES.iter().enumerate() {
        let normalized = (x[i] / rules.explanation_scale).min(1.0);
        per_feature_contribution.insert(name.to_string(), normalized * rules.explanation_weights[i]);
    }
    Explanation {
        per_feature_contribution,
        base_value: rules.explanation_base_value,
    }
}
