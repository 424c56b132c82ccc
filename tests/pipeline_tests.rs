//! Train on synthetic telemetry, then serve the artifacts end to end.

use std::path::Path;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use slawatch::features::{FeatureVector, FEATURE_NAMES};
use slawatch::ml::artifacts;
use slawatch::ml::classifier::RiskClassifier;
use slawatch::ml::boosting::BoostingParams;
use slawatch::ml::fallback::{FallbackConfig, FALLBACK_MODEL_VERSION};
use slawatch::ml::forest::ForestParams;
use slawatch::ml::isolation::IsolationParams;
use slawatch::ml::{ModelError, ScoringConfig, SlaPredictor};
use slawatch::train::{self, Dataset, TrainOptions};

fn synthetic(n: usize, seed: u64) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let rows = (0..n)
        .map(|_| {
            let bandwidth = rng.gen_range(50.0..200.0);
            [
                bandwidth,
                bandwidth * rng.gen_range(0.35..1.0),
                rng.gen_range(0.0..85.0),
                rng.gen_range(0.0..6.5),
                rng.gen_range(0.0..20.0),
                rng.gen_range(0.0..3.5),
            ]
        })
        .collect();
    Dataset { rows }
}

fn quick_options() -> TrainOptions {
    TrainOptions {
        forest: ForestParams {
            n_estimators: 12,
            max_depth: 6,
            ..ForestParams::default()
        },
        boosting: BoostingParams {
            n_estimators: 15,
            max_depth: 3,
            ..BoostingParams::default()
        },
        isolation: IsolationParams {
            n_estimators: 20,
            ..IsolationParams::default()
        },
        ..TrainOptions::default()
    }
}

fn train_into(dir: &Path) {
    let models = train::train(&synthetic(300, 11), &quick_options()).unwrap();
    train::save(&models, dir).unwrap();
}

fn serve_from(dir: &Path) -> SlaPredictor {
    let p = SlaPredictor::new(dir, ScoringConfig::default(), FallbackConfig::default());
    p.load();
    p
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

#[test]
fn test_trained_artifacts_load_without_fallback() {
    let dir = tempfile::tempdir().unwrap();
    train_into(dir.path());
    let p = serve_from(dir.path());

    let bundle = p.bundle().unwrap();
    assert!(!bundle.classifier.is_fallback());
    assert!(!bundle.detector.is_fallback());
    assert!(!bundle.explainer.is_fallback());

    let inventory = p.describe_loaded_models();
    assert!(inventory.loaded);
    for name in [
        artifacts::SLA_PREDICTOR,
        artifacts::ANOMALY_DETECTOR,
        artifacts::SCALER_STANDARD,
        artifacts::SHAP_EXPLAINER,
        artifacts::RF_BASELINE,
        artifacts::GB_PRODUCTION,
    ] {
        assert!(
            inventory.available_models.iter().any(|m| m == name),
            "missing {} in {:?}",
            name,
            inventory.available_models
        );
    }
    assert_eq!(inventory.feature_names, FEATURE_NAMES.to_vec());
}

#[test]
fn test_trained_scores_are_bounded_and_consistent() {
    let dir = tempfile::tempdir().unwrap();
    train_into(dir.path());
    let p = serve_from(dir.path());
    let scoring = ScoringConfig::default();
    let log_odds = match &p.bundle().unwrap().classifier {
        RiskClassifier::Trained(t) => t.model.family() == "gradient_boosting",
        RiskClassifier::Fallback(_) => panic!("expected a trained classifier"),
    };

    for row in synthetic(50, 99).rows {
        let v = FeatureVector::from_array(row);
        let risk = p.predict_risk(&v).unwrap();
        assert!((0.0..=1.0).contains(&risk.probability));
        assert!((0.0..=1.0).contains(&risk.confidence));
        assert_eq!(risk.label, risk.probability > scoring.decision_threshold);
        assert_eq!(risk.model_version, "v1.0");

        let anomaly = p.detect_anomaly(&v).unwrap();
        assert!((0.0..=1.0).contains(&anomaly.score));

        let e = p.explain(&v).unwrap();
        assert_eq!(e.per_feature_contribution.len(), FEATURE_NAMES.len());
        let recon = e.reconstructed_output();
        let reconstructed_p = if log_odds { sigmoid(recon) } else { recon };
        assert!((reconstructed_p - risk.probability).abs() < 1e-6);
    }
}

#[test]
fn test_predictions_are_deterministic_across_loads() {
    let dir = tempfile::tempdir().unwrap();
    train_into(dir.path());
    let a = serve_from(dir.path());
    let b = serve_from(dir.path());

    let v = FeatureVector::new(80.0, 30.0, 60.0, 4.0, 17.0, 2.5);
    assert_eq!(a.predict_risk(&v).unwrap(), b.predict_risk(&v).unwrap());
    assert_eq!(a.detect_anomaly(&v).unwrap(), b.detect_anomaly(&v).unwrap());
    assert_eq!(a.explain(&v).unwrap(), b.explain(&v).unwrap());
}

#[test]
fn test_load_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    train_into(dir.path());
    let p = SlaPredictor::new(dir.path(), ScoringConfig::default(), FallbackConfig::default());
    let first = p.load();
    let second = p.load();
    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn test_serving_before_load_fails() {
    let dir = tempfile::tempdir().unwrap();
    let p = SlaPredictor::new(dir.path(), ScoringConfig::default(), FallbackConfig::default());
    let v = FeatureVector::new(100.0, 20.0, 10.0, 1.0, 5.0, 0.5);
    assert!(matches!(p.predict_risk(&v), Err(ModelError::ModelsNotLoaded)));
    assert!(!p.describe_loaded_models().loaded);
}

#[test]
fn test_corrupt_feature_order_forces_fallback() {
    let dir = tempfile::tempdir().unwrap();
    train_into(dir.path());
    let mut reordered: Vec<String> = FEATURE_NAMES.iter().map(|s| s.to_string()).collect();
    reordered.swap(0, 1);
    artifacts::write_artifact(dir.path(), artifacts::FEATURE_NAMES, &reordered).unwrap();

    let p = serve_from(dir.path());
    let risk = p
        .predict_risk(&FeatureVector::new(50.0, 5.0, 90.0, 8.0, 25.0, 6.0))
        .unwrap();
    assert_eq!(risk.model_version, FALLBACK_MODEL_VERSION);
    assert!(risk.label);
}

#[test]
fn test_missing_directory_serves_fallback_examples() {
    let dir = tempfile::tempdir().unwrap();
    let p = serve_from(&dir.path().join("absent"));

    let healthy = FeatureVector::new(100.0, 20.0, 10.0, 1.0, 5.0, 0.5);
    let risk = p.predict_risk(&healthy).unwrap();
    assert!(!risk.label);
    assert!(!p.detect_anomaly(&healthy).unwrap().is_anomaly);

    let degraded = FeatureVector::new(50.0, 5.0, 90.0, 8.0, 25.0, 6.0);
    assert!(p.predict_risk(&degraded).unwrap().label);
    assert!(p.detect_anomaly(&degraded).unwrap().is_anomaly);
}
