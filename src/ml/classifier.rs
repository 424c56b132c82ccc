//! SLA violation risk classifier.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::features::FEATURE_COUNT;
use crate::ml::boosting::GradientBoosting;
use crate::ml::fallback::{FallbackClassifier, FALLBACK_MODEL_VERSION};
use crate::ml::forest::RandomForest;
use crate::ml::{RiskPrediction, ScoringConfig};

/// Model families the trainer produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum ClassifierModel {
    RandomForest(RandomForest),
    GradientBoosting(GradientBoosting),
}

impl ClassifierModel {
    pub fn family(&self) -> &'static str {
        match self {
            ClassifierModel::RandomForest(_) => "random_forest",
            ClassifierModel::GradientBoosting(_) => "gradient_boosting",
        }
    }

    pub fn predict_proba(&self, x: &[f64; FEATURE_COUNT]) -> f64 {
        match self {
            ClassifierModel::RandomForest(m) => m.predict_proba(x),
            ClassifierModel::GradientBoosting(m) => m.predict_proba(x),
        }
    }

    /// Bias and per-feature contributions of the raw output
    /// (probability for forests, log-odds for boosting).
    pub fn contributions(&self, x: &[f64; FEATURE_COUNT]) -> (f64, [f64; FEATURE_COUNT]) {
        match self {
            ClassifierModel::RandomForest(m) => m.contributions(x),
            ClassifierModel::GradientBoosting(m) => m.contributions(x),
        }
    }

    pub fn feature_importances(&self) -> [f64; FEATURE_COUNT] {
        match self {
            ClassifierModel::RandomForest(m) => m.feature_importances,
            ClassifierModel::GradientBoosting(m) => m.feature_importances,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        match self {
            ClassifierModel::RandomForest(m) => m.validate(),
            ClassifierModel::GradientBoosting(m) => m.validate(),
        }
    }
}

/// Classifier artifact as written by the trainer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedClassifier {
    pub model_version: String,
    pub trained_at: DateTime<Utc>,
    /// ROC-AUC on the held-out split.
    pub auc: f64,
    pub model: ClassifierModel,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RiskClassifier {
    Trained(TrainedClassifier),
    Fallback(FallbackClassifier),
}

impl RiskClassifier {
    pub fn is_fallback(&self) -> bool {
        matches!(self, RiskClassifier::Fallback(_))
    }

    pub fn model_version(&self) -> &str {
        match self {
            RiskClassifier::Trained(t) => &t.model_version,
            RiskClassifier::Fallback(_) => FALLBACK_MODEL_VERSION,
        }
    }

    /// Score one (unscaled) vector.
    ///
    /// Trained models label by `probability > decision_threshold`; the
    /// fallback labels by its own threshold rules, which need not agree with
    /// its probability.
    pub fn predict(&self, x: &[f64; FEATURE_COUNT], scoring: &ScoringConfig) -> RiskPrediction {
        match self {
            RiskClassifier::Trained(t) => {
                let probability = t.model.predict_proba(x);
                RiskPrediction {
                    label: probability > scoring.decision_threshold,
                    probability,
                    confidence: scoring.confidence_for(probability),
                    model_version: t.model_version.clone(),
                }
            }
            RiskClassifier::Fallback(f) => RiskPrediction {
                label: f.predict(x),
                probability: f.predict_proba(x),
                confidence: scoring.fallback_confidence,
                model_version: FALLBACK_MODEL_VERSION.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::fallback::FallbackConfig;
    use crate::ml::forest::ForestParams;

    fn trained() -> RiskClassifier {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..60 {
            let latency = i as f64 * 0.5;
            x.push([100.0, 50.0, 10.0, 1.0, latency, 1.0]);
            y.push(latency > 15.0);
        }
        let forest = RandomForest::fit(
            &x,
            &y,
            &ForestParams {
                n_estimators: 10,
                max_depth: 4,
                max_features: Some(FEATURE_COUNT),
                seed: 1,
            },
        );
        RiskClassifier::Trained(TrainedClassifier {
            model_version: "v1.0".to_string(),
            trained_at: Utc::now(),
            auc: 1.0,
            model: ClassifierModel::RandomForest(forest),
        })
    }

    #[test]
    fn test_trained_label_follows_threshold() {
        let c = trained();
        let scoring = ScoringConfig::default();
        for latency in [0.0, 10.0, 15.0, 15.5, 20.0, 29.0] {
            let p = c.predict(&[100.0, 50.0, 10.0, 1.0, latency, 1.0], &scoring);
            assert!((0.0..=1.0).contains(&p.probability));
            assert_eq!(p.label, p.probability > 0.5);
            assert!((0.85..=0.95).contains(&p.confidence));
            assert_eq!(p.model_version, "v1.0");
        }
    }

    #[test]
    fn test_fallback_reports_fixed_confidence() {
        let c = RiskClassifier::Fallback(FallbackClassifier {
            rules: FallbackConfig::default(),
        });
        let p = c.predict(&[100.0, 20.0, 10.0, 1.0, 5.0, 0.5], &ScoringConfig::default());
        assert!(!p.label);
        assert_eq!(p.confidence, 0.85);
        assert_eq!(p.model_version, FALLBACK_MODEL_VERSION);
        assert!(c.is_fallback());
    }

    #[test]
    fn test_artifact_round_trips_with_family_tag() {
        let RiskClassifier::Trained(t) = trained() else {
            unreachable!()
        };
        let json = serde_json::to_string(&t).unwrap();
        assert!(json.contains("\"family\":\"random_forest\""));
        let back: TrainedClassifier = serde_json::from_str(&json).unwrap();
        assert_eq!(back.model.family(), "random_forest");
        assert!(back.model.validate().is_ok());
    }
}
