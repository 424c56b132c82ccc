//! Per-feature attribution of the risk score.
//!
//! The tree-path explainer walks every tree of the production classifier and
//! credits each split's change in node value to the split feature. The
//! per-tree root values sum into the base value, so base value plus
//! contributions reproduces the classifier's raw output exactly.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::features::{FEATURE_COUNT, FEATURE_NAMES};
use crate::ml::classifier::{ClassifierModel, TrainedClassifier};
use crate::ml::fallback::{heuristic_explanation, FallbackConfig};
use crate::ml::Explanation;

/// Raw output the attribution is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputSpace {
    Probability,
    LogOdds,
}

impl OutputSpace {
    pub fn for_model(model: &ClassifierModel) -> Self {
        match model {
            ClassifierModel::RandomForest(_) => OutputSpace::Probability,
            ClassifierModel::GradientBoosting(_) => OutputSpace::LogOdds,
        }
    }
}

/// `shap_explainer` artifact: ties the explainer to one classifier build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplainerArtifact {
    pub model_version: String,
    pub family: String,
    pub output: OutputSpace,
    pub expected_value: f64,
    pub feature_names: Vec<String>,
}

impl ExplainerArtifact {
    pub fn for_classifier(classifier: &TrainedClassifier) -> Self {
        let (expected_value, _) = classifier.model.contributions(&[0.0; FEATURE_COUNT]);
        Self {
            model_version: classifier.model_version.clone(),
            family: classifier.model.family().to_string(),
            output: OutputSpace::for_model(&classifier.model),
            expected_value,
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Reject an artifact written for a different classifier build.
    pub fn check_against(&self, classifier: &TrainedClassifier) -> Result<(), String> {
        if self.model_version != classifier.model_version {
            return Err(format!(
                "explainer built for model {}, classifier is {}",
                self.model_version, classifier.model_version
            ));
        }
        if self.family != classifier.model.family() {
            return Err(format!(
                "explainer built for {}, classifier is {}",
                self.family,
                classifier.model.family()
            ));
        }
        if self.feature_names.len() != FEATURE_COUNT
            || self.feature_names.iter().zip(FEATURE_NAMES).any(|(a, b)| a != b)
        {
            return Err("explainer feature order differs from the feature contract".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TreeExplainer {
    pub artifact: ExplainerArtifact,
    pub model: ClassifierModel,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Explainer {
    TreePath(TreeExplainer),
    Heuristic(FallbackConfig),
}

impl Explainer {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Explainer::Heuristic(_))
    }

    pub fn explain(&self, x: &[f64; FEATURE_COUNT]) -> Explanation {
        match self {
            Explainer::TreePath(t) => {
                let (base_value, contributions) = t.model.contributions(x);
                let per_feature_contribution: BTreeMap<String, f64> = FEATURE_NAMES
                    .iter()
                    .zip(contributions)
                    .map(|(name, c)| (name.to_string(), c))
                    .collect();
                Explanation {
                    per_feature_contribution,
                    base_value,
                }
            }
            Explainer::Heuristic(rules) => heuristic_explanation(x, rules),
        }
    }
}
