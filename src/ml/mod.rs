//! SLA risk scoring and anomaly detection pipeline.
//!
//! The pipeline is split into small model components (scaler, classifier,
//! detector, explainer) that each exist in a `Trained` and a `Fallback`
//! variant. [`bundle::ModelBundle`] assembles them from an artifact
//! directory and [`predictor::SlaPredictor`] serves them.

pub mod anomaly;
pub mod artifacts;
pub mod boosting;
pub mod bundle;
pub mod classifier;
pub mod explain;
pub mod fallback;
pub mod forest;
pub mod isolation;
pub mod metrics;
pub mod predictor;
pub mod scaler;
pub mod tree;

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::bundle::ModelBundle;
pub use self::predictor::{LoadState, ModelInventory, SlaPredictor};

#[derive(Debug, Error)]
pub enum ModelError {
    /// Artifact file or model directory not present. Recoverable.
    #[error("model artifact '{name}' not found at {}", path.display())]
    ArtifactMissing { name: String, path: PathBuf },

    /// Artifact present but unreadable or inconsistent. Recoverable.
    #[error("model artifact '{name}' is corrupt: {reason}")]
    ArtifactCorrupt { name: String, reason: String },

    /// A serving method was called before `load()` completed.
    #[error("models not loaded")]
    ModelsNotLoaded,

    #[error("invalid feature vector: {0}")]
    InvalidFeatureVector(String),
}

/// Output of the risk classifier for one vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskPrediction {
    pub label: bool,
    pub probability: f64,
    pub confidence: f64,
    pub model_version: String,
}

/// Output of the anomaly detector for one vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyResult {
    pub is_anomaly: bool,
    pub score: f64,
    pub explanation: String,
}

/// Per-feature attribution of the risk model's raw output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub per_feature_contribution: BTreeMap<String, f64>,
    pub base_value: f64,
}

impl Explanation {
    /// Contributions in canonical feature order.
    pub fn ordered_values(&self) -> Vec<f64> {
        crate::features::FEATURE_NAMES
            .iter()
            .map(|name| {
                self.per_feature_contribution
                    .get(*name)
                    .copied()
                    .unwrap_or(0.0)
            })
            .collect()
    }

    /// `base_value` plus every contribution.
    pub fn reconstructed_output(&self) -> f64 {
        self.base_value + self.per_feature_contribution.values().sum::<f64>()
    }
}

/// Serving-time constants that have no derivation beyond operational
/// tuning. Exposed through the `[models.scoring]` config section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Probability above which a trained classifier reports a violation.
    pub decision_threshold: f64,
    /// Lower bound of the reported confidence for trained models.
    pub confidence_floor: f64,
    /// Upper bound of the reported confidence for trained models.
    pub confidence_ceiling: f64,
    /// Confidence reported by the fallback classifier.
    pub fallback_confidence: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            decision_threshold: 0.5,
            confidence_floor: 0.85,
            confidence_ceiling: 0.95,
            fallback_confidence: 0.85,
        }
    }
}

impl ScoringConfig {
    /// Margin-based pseudo confidence, `floor` at p = 0.5 and `ceiling` at p = 0 or 1.
    ///
    /// Not a calibrated interval.
    pub fn confidence_for(&self, probability: f64) -> f64 {
        let margin = (2.0 * probability - 1.0).abs().min(1.0);
        let c = self.confidence_floor + (self.confidence_ceiling - self.confidence_floor) * margin;
        c.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_bounds() {
        let s = ScoringConfig::default();
        assert!((s.confidence_for(0.5) - 0.85).abs() < 1e-12);
        assert!((s.confidence_for(1.0) - 0.95).abs() < 1e-12);
        assert!((s.confidence_for(0.0) - 0.95).abs() < 1e-12);
        for i in 0..=100 {
            let c = s.confidence_for(i as f64 / 100.0);
            assert!((0.85..=0.95).contains(&c));
        }
    }

    #[test]
    fn test_explanation_helpers() {
        let mut contributions = BTreeMap::new();
        for (i, name) in crate::features::FEATURE_NAMES.iter().enumerate() {
            contributions.insert(name.to_string(), i as f64);
        }
        let e = Explanation {
            per_feature_contribution: contributions,
            base_value: 0.5,
        };
        assert_eq!(e.ordered_values(), vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!((e.reconstructed_output() - 15.5).abs() < 1e-12);
    }
}
