//! Assembly of the serving components from an artifact directory.

use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::features::{FeatureVector, FEATURE_NAMES};
use crate::ml::anomaly::AnomalyDetector;
use crate::ml::artifacts::{self, read_artifact};
use crate::ml::classifier::{RiskClassifier, TrainedClassifier};
use crate::ml::explain::{Explainer, ExplainerArtifact, TreeExplainer};
use crate::ml::fallback::{FallbackClassifier, FallbackConfig, FallbackDetector};
use crate::ml::isolation::IsolationForest;
use crate::ml::scaler::{Scaler, StandardScaler};
use crate::ml::{AnomalyResult, Explanation, ModelError, RiskPrediction, ScoringConfig};

/// Immutable set of models shared by every request.
#[derive(Debug, Clone)]
pub struct ModelBundle {
    pub classifier: RiskClassifier,
    pub detector: AnomalyDetector,
    pub scaler: Scaler,
    pub explainer: Explainer,
    pub feature_names: Vec<String>,
    pub available_models: Vec<String>,
    pub model_directory: PathBuf,
    pub scoring: ScoringConfig,
}

impl ModelBundle {
    /// Every component from the fallback bank.
    pub fn fallback(dir: &Path, scoring: ScoringConfig, rules: FallbackConfig) -> Self {
        Self {
            classifier: RiskClassifier::Fallback(FallbackClassifier {
                rules: rules.clone(),
            }),
            detector: AnomalyDetector::Fallback(FallbackDetector {
                rules: rules.clone(),
            }),
            scaler: Scaler::Identity,
            explainer: Explainer::Heuristic(rules),
            feature_names: canonical_names(),
            available_models: vec![
                artifacts::ANOMALY_DETECTOR.to_string(),
                artifacts::SLA_PREDICTOR.to_string(),
            ],
            model_directory: dir.to_path_buf(),
            scoring,
        }
    }

    /// Load whatever trained artifacts exist in `dir`.
    ///
    /// Never fails: each component that is missing or corrupt is replaced by
    /// its fallback variant and the replacement is logged.
    pub fn load(dir: &Path, scoring: ScoringConfig, rules: FallbackConfig) -> Self {
        let mut bundle = Self::fallback(dir, scoring, rules.clone());

        if !dir.is_dir() {
            warn!(dir = %dir.display(), "Model directory not found, serving fallback models");
            return bundle;
        }

        match read_artifact::<Vec<String>>(dir, artifacts::FEATURE_NAMES) {
            Ok(names) if names.iter().map(String::as_str).eq(FEATURE_NAMES) => {}
            Ok(names) => {
                error!(
                    dir = %dir.display(),
                    found = ?names,
                    expected = ?FEATURE_NAMES,
                    "Feature order of trained models differs from the feature contract, serving fallback models"
                );
                return bundle;
            }
            Err(e) => {
                if report(&e) {
                    return bundle;
                }
            }
        }

        if let Some(trained) = load_component::<TrainedClassifier, _>(dir, artifacts::SLA_PREDICTOR, |c| {
            c.model.validate()
        }) {
            info!(
                version = %trained.model_version,
                family = trained.model.family(),
                auc = trained.auc,
                "Loaded risk classifier"
            );
            bundle.explainer = load_explainer(dir, &trained, rules.clone());
            bundle.classifier = RiskClassifier::Trained(trained);
        }

        let scaler = load_component::<StandardScaler, _>(dir, artifacts::SCALER_STANDARD, |s| {
            if s.is_consistent() {
                Ok(())
            } else {
                Err("scaler has non-finite or non-positive statistics".to_string())
            }
        });
        let forest = load_component::<IsolationForest, _>(dir, artifacts::ANOMALY_DETECTOR, |f| f.validate());

        match (forest, scaler) {
            (Some(forest), Some(scaler)) => {
                info!(trees = forest.trees.len(), "Loaded anomaly detector");
                bundle.scaler = Scaler::Standard(scaler.clone());
                bundle.detector = AnomalyDetector::Trained { forest, scaler };
            }
            (Some(_), None) => {
                error!("Anomaly detector requires the standard scaler, serving fallback detector");
            }
            (None, Some(scaler)) => {
                bundle.scaler = Scaler::Standard(scaler);
            }
            (None, None) => {}
        }

        bundle.available_models = bundle.inventory_names(dir);
        bundle
    }

    fn inventory_names(&self, dir: &Path) -> Vec<String> {
        let mut names = vec![
            artifacts::SLA_PREDICTOR.to_string(),
            artifacts::ANOMALY_DETECTOR.to_string(),
        ];
        if !self.scaler.is_fallback() {
            names.push(artifacts::SCALER_STANDARD.to_string());
        }
        if !self.explainer.is_fallback() {
            names.push(artifacts::SHAP_EXPLAINER.to_string());
        }
        for audit in [artifacts::RF_BASELINE, artifacts::GB_PRODUCTION] {
            if artifacts::artifact_exists(dir, audit) {
                names.push(audit.to_string());
            }
        }
        names.sort();
        names
    }

    /// True when every component came from the fallback bank.
    pub fn is_fallback(&self) -> bool {
        self.classifier.is_fallback()
            && self.detector.is_fallback()
            && self.scaler.is_fallback()
            && self.explainer.is_fallback()
    }

    pub fn predict_risk(&self, v: &FeatureVector) -> RiskPrediction {
        self.classifier.predict(&v.to_array(), &self.scoring)
    }

    pub fn detect_anomaly(&self, v: &FeatureVector) -> AnomalyResult {
        self.detector.detect(v)
    }

    pub fn explain(&self, v: &FeatureVector) -> Explanation {
        self.explainer.explain(&v.to_array())
    }
}

fn canonical_names() -> Vec<String> {
    FEATURE_NAMES.iter().map(|s| s.to_string()).collect()
}

/// Log an artifact failure at the right level. Returns true when the failure
/// should abort loading of trained models altogether.
fn report(e: &ModelError) -> bool {
    match e {
        ModelError::ArtifactMissing { name, path } => {
            warn!(artifact = %name, path = %path.display(), "Model artifact missing, using fallback");
            false
        }
        ModelError::ArtifactCorrupt { name, reason } => {
            error!(artifact = %name, reason = %reason, "Model artifact corrupt, using fallback");
            name == artifacts::FEATURE_NAMES
        }
        other => {
            error!(error = %other, "Unexpected error while loading models");
            false
        }
    }
}

fn load_component<T, F>(dir: &Path, name: &str, check: F) -> Option<T>
where
    T: serde::de::DeserializeOwned,
    F: FnOnce(&T) -> Result<(), String>,
{
    let value = match read_artifact::<T>(dir, name) {
        Ok(v) => v,
        Err(e) => {
            report(&e);
            return None;
        }
    };
    if let Err(reason) = check(&value) {
        report(&ModelError::ArtifactCorrupt {
            name: name.to_string(),
            reason,
        });
        return None;
    }
    debug!(artifact = name, "Artifact loaded");
    Some(value)
}

fn load_explainer(dir: &Path, classifier: &TrainedClassifier, rules: FallbackConfig) -> Explainer {
    let artifact = match read_artifact::<ExplainerArtifact>(dir, artifacts::SHAP_EXPLAINER) {
        Ok(a) => a,
        Err(ModelError::ArtifactMissing { .. }) => {
            warn!("Explainer artifact missing, deriving it from the risk classifier");
            ExplainerArtifact::for_classifier(classifier)
        }
        Err(e) => {
            report(&e);
            return Explainer::Heuristic(rules);
        }
    };
    if let Err(reason) = artifact.check_against(classifier) {
        report(&ModelError::ArtifactCorrupt {
            name: artifacts::SHAP_EXPLAINER.to_string(),
            reason,
        });
        return Explainer::Heuristic(rules);
    }
    Explainer::TreePath(TreeExplainer {
        artifact,
        model: classifier.model.clone(),
    })
}
