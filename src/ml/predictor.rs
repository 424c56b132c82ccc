//! Load-once, predict-many serving facade.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::features::{FeatureVector, FEATURE_NAMES};
use crate::ml::bundle::ModelBundle;
use crate::ml::fallback::FallbackConfig;
use crate::ml::{AnomalyResult, Explanation, ModelError, RiskPrediction, ScoringConfig};

/// Lifecycle of the facade. There is no failed state: a load that finds no
/// usable artifacts still reaches `Ready` with fallback components.
#[derive(Debug, Clone)]
pub enum LoadState {
    Uninitialized,
    Loading,
    Ready(Arc<ModelBundle>),
}

impl LoadState {
    pub fn name(&self) -> &'static str {
        match self {
            LoadState::Uninitialized => "uninitialized",
            LoadState::Loading => "loading",
            LoadState::Ready(_) => "ready",
        }
    }
}

/// What `describe_loaded_models` reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInventory {
    pub loaded: bool,
    pub available_models: Vec<String>,
    pub feature_names: Vec<String>,
    pub model_directory: String,
}

pub struct SlaPredictor {
    model_dir: PathBuf,
    scoring: ScoringConfig,
    rules: FallbackConfig,
    state: RwLock<LoadState>,
    load_lock: Mutex<()>,
}

impl SlaPredictor {
    pub fn new(model_dir: impl Into<PathBuf>, scoring: ScoringConfig, rules: FallbackConfig) -> Self {
        Self {
            model_dir: model_dir.into(),
            scoring,
            rules,
            state: RwLock::new(LoadState::Uninitialized),
            load_lock: Mutex::new(()),
        }
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    pub fn state(&self) -> LoadState {
        self.state.read().clone()
    }

    /// Load the bundle. Later calls return the bundle built by the first one.
    pub fn load(&self) -> Arc<ModelBundle> {
        let _guard = self.load_lock.lock();
        if let LoadState::Ready(bundle) = &*self.state.read() {
            return bundle.clone();
        }

        *self.state.write() = LoadState::Loading;
        let started = Instant::now();
        let bundle = Arc::new(ModelBundle::load(
            &self.model_dir,
            self.scoring.clone(),
            self.rules.clone(),
        ));
        info!(
            dir = %self.model_dir.display(),
            classifier = bundle.classifier.model_version(),
            fallback_classifier = bundle.classifier.is_fallback(),
            fallback_detector = bundle.detector.is_fallback(),
            fallback_explainer = bundle.explainer.is_fallback(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Models ready"
        );
        *self.state.write() = LoadState::Ready(bundle.clone());
        bundle
    }

    pub fn bundle(&self) -> Result<Arc<ModelBundle>, ModelError> {
        match &*self.state.read() {
            LoadState::Ready(bundle) => Ok(bundle.clone()),
            _ => Err(ModelError::ModelsNotLoaded),
        }
    }

    pub fn predict_risk(&self, v: &FeatureVector) -> Result<RiskPrediction, ModelError> {
        let bundle = self.bundle()?;
        v.validate()?;
        Ok(bundle.predict_risk(v))
    }

    pub fn detect_anomaly(&self, v: &FeatureVector) -> Result<AnomalyResult, ModelError> {
        let bundle = self.bundle()?;
        v.validate()?;
        Ok(bundle.detect_anomaly(v))
    }

    pub fn explain(&self, v: &FeatureVector) -> Result<Explanation, ModelError> {
        let bundle = self.bundle()?;
        v.validate()?;
        Ok(bundle.explain(v))
    }

    /// Works in any state.
    pub fn describe_loaded_models(&self) -> ModelInventory {
        let model_directory = self.model_dir.display().to_string();
        match &*self.state.read() {
            LoadState::Ready(bundle) => ModelInventory {
                loaded: true,
                available_models: bundle.available_models.clone(),
                feature_names: bundle.feature_names.clone(),
                model_directory,
            },
            _ => ModelInventory {
                loaded: false,
                available_models: Vec::new(),
                feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
                model_directory,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::fallback::FALLBACK_MODEL_VERSION;

    fn predictor() -> (tempfile::TempDir, SlaPredictor) {
        let dir = tempfile::tempdir().unwrap();
        let p = SlaPredictor::new(
            dir.path().join("models"),
            ScoringConfig::default(),
            FallbackConfig::default(),
        );
        (dir, p)
    }

    #[test]
    fn test_serving_before_load_fails() {
        let (_dir, p) = predictor();
        let v = FeatureVector::new(100.0, 20.0, 10.0, 1.0, 5.0, 0.5);
        assert!(matches!(p.predict_risk(&v), Err(ModelError::ModelsNotLoaded)));
        assert!(matches!(p.detect_anomaly(&v), Err(ModelError::ModelsNotLoaded)));
        assert!(matches!(p.explain(&v), Err(ModelError::ModelsNotLoaded)));

        let inv = p.describe_loaded_models();
        assert!(!inv.loaded);
        assert!(inv.available_models.is_empty());
        assert_eq!(p.state().name(), "uninitialized");
    }

    #[test]
    fn test_load_is_idempotent() {
        let (_dir, p) = predictor();
        let first = p.load();
        let second = p.load();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(p.state().name(), "ready");
        assert!(p.describe_loaded_models().loaded);
    }

    #[test]
    fn test_fallback_end_to_end() {
        let (_dir, p) = predictor();
        p.load();

        let healthy = FeatureVector::new(100.0, 20.0, 10.0, 1.0, 5.0, 0.5);
        let risk = p.predict_risk(&healthy).unwrap();
        assert!(!risk.label);
        assert!(risk.probability < 0.5);
        assert_eq!(risk.model_version, FALLBACK_MODEL_VERSION);
        assert!(!p.detect_anomaly(&healthy).unwrap().is_anomaly);

        let degraded = FeatureVector::new(50.0, 5.0, 90.0, 8.0, 25.0, 6.0);
        assert!(p.predict_risk(&degraded).unwrap().label);
        assert!(p.detect_anomaly(&degraded).unwrap().is_anomaly);
    }

    #[test]
    fn test_invalid_vector_rejected_after_load() {
        let (_dir, p) = predictor();
        p.load();
        let bad = FeatureVector::new(100.0, 20.0, 150.0, 1.0, 5.0, 0.5);
        assert!(matches!(
            p.predict_risk(&bad),
            Err(ModelError::InvalidFeatureVector(_))
        ));
    }

    #[test]
    fn test_concurrent_predictions_share_bundle() {
        let (_dir, p) = predictor();
        let p = Arc::new(p);
        p.load();
        let v = FeatureVector::new(100.0, 20.0, 10.0, 1.0, 5.0, 0.5);
        let expected = p.predict_risk(&v).unwrap();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let p = p.clone();
                std::thread::spawn(move || p.predict_risk(&v).unwrap())
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), expected);
        }
    }
}
