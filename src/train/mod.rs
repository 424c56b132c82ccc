//! Offline training of the scoring pipeline.
//!
//! Produces every artifact [`crate::ml::ModelBundle`] loads: the production
//! classifier (best of a random forest and a boosted ensemble by held-out
//! ROC-AUC), both candidates for audit, the isolation forest with its
//! scaler, the explainer metadata and a training report.

pub mod dataset;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::features::{FEATURE_COUNT, FEATURE_NAMES};
use crate::ml::artifacts::{self, write_artifact};
use crate::ml::boosting::{BoostingParams, GradientBoosting};
use crate::ml::classifier::{ClassifierModel, TrainedClassifier};
use crate::ml::explain::ExplainerArtifact;
use crate::ml::forest::{ForestParams, RandomForest};
use crate::ml::isolation::{IsolationForest, IsolationParams};
use crate::ml::metrics::{roc_auc, ClassificationReport};
use crate::ml::scaler::StandardScaler;

pub use self::dataset::Dataset;

#[derive(Debug, Clone)]
pub struct TrainOptions {
    pub model_version: String,
    pub seed: u64,
    pub test_fraction: f64,
    /// Share of rows randomly flagged as violations on top of the rules.
    pub label_noise: f64,
    pub forest: ForestParams,
    pub boosting: BoostingParams,
    pub isolation: IsolationParams,
    /// Tune the boosted candidate with a cross-validated grid search first.
    pub grid_search: bool,
    pub cv_folds: usize,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            model_version: "v1.0".to_string(),
            seed: 42,
            test_fraction: 0.2,
            label_noise: 0.1,
            forest: ForestParams::default(),
            boosting: BoostingParams::default(),
            isolation: IsolationParams::default(),
            grid_search: false,
            cv_folds: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateScore {
    pub family: String,
    pub auc: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSearchResult {
    pub best_params: BoostingParams,
    pub best_cv_auc: f64,
    pub evaluated: usize,
}

/// `training_report` artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub model_version: String,
    pub trained_at: DateTime<Utc>,
    pub records: usize,
    pub train_rows: usize,
    pub test_rows: usize,
    pub violation_rate: f64,
    pub chosen_family: String,
    pub best_auc: f64,
    pub candidates: Vec<CandidateScore>,
    pub classification_report: ClassificationReport,
    pub feature_importances: BTreeMap<String, f64>,
    pub grid_search: Option<GridSearchResult>,
}

/// Everything a training run produces, before it is written to disk.
#[derive(Debug, Clone)]
pub struct TrainedModels {
    pub production: TrainedClassifier,
    pub rf_baseline: TrainedClassifier,
    pub gb_production: TrainedClassifier,
    pub detector: IsolationForest,
    pub scaler: StandardScaler,
    pub explainer: ExplainerArtifact,
    pub report: TrainingReport,
}

pub fn train(ds: &Dataset, opts: &TrainOptions) -> Result<TrainedModels> {
    if ds.len() < 10 {
        bail!("need at least 10 records to train, got {}", ds.len());
    }
    let started = Instant::now();
    let trained_at = Utc::now();

    let y = dataset::synthesize_labels(&ds.rows, opts.label_noise, opts.seed);
    let violation_rate = y.iter().filter(|&&v| v).count() as f64 / y.len() as f64;
    info!(
        records = ds.len(),
        violation_rate = %format!("{:.2}%", violation_rate * 100.0),
        "Prepared labels"
    );
    if violation_rate == 0.0 || violation_rate == 1.0 {
        bail!("labels contain a single class; cannot train a classifier");
    }

    let (train_idx, test_idx) = dataset::stratified_split(&y, opts.test_fraction, opts.seed);
    let x_train = dataset::select(&ds.rows, &train_idx);
    let y_train = dataset::select(&y, &train_idx);
    let x_test = dataset::select(&ds.rows, &test_idx);
    let y_test = dataset::select(&y, &test_idx);

    let scaler = StandardScaler::fit(&x_train);
    let x_train_scaled: Vec<[f64; FEATURE_COUNT]> = x_train.iter().map(|r| scaler.transform(r)).collect();

    info!(trees = opts.forest.n_estimators, depth = opts.forest.max_depth, "Training random forest");
    let rf = RandomForest::fit(&x_train, &y_train, &opts.forest);
    let rf_auc = auc_of(&x_test, &y_test, |x| rf.predict_proba(x));
    info!(auc = %format!("{:.4}", rf_auc), "Random forest scored");

    let grid = if opts.grid_search {
        Some(grid_search(&x_train, &y_train, &opts.boosting, opts.cv_folds, opts.seed))
    } else {
        None
    };
    let gb_params = grid
        .as_ref()
        .map(|g| g.best_params.clone())
        .unwrap_or_else(|| opts.boosting.clone());

    info!(
        rounds = gb_params.n_estimators,
        depth = gb_params.max_depth,
        learning_rate = gb_params.learning_rate,
        "Training gradient boosting"
    );
    let gb = GradientBoosting::fit(&x_train, &y_train, &gb_params);
    let gb_auc = auc_of(&x_test, &y_test, |x| gb.predict_proba(x));
    info!(auc = %format!("{:.4}", gb_auc), "Gradient boosting scored");

    let wrap = |model: ClassifierModel, auc: f64| TrainedClassifier {
        model_version: opts.model_version.clone(),
        trained_at,
        auc,
        model,
    };
    let rf_baseline = wrap(ClassifierModel::RandomForest(rf), rf_auc);
    let gb_production = wrap(ClassifierModel::GradientBoosting(gb), gb_auc);

    // ties keep the forest
    let production = if gb_auc > rf_auc {
        gb_production.clone()
    } else {
        rf_baseline.clone()
    };
    info!(
        family = production.model.family(),
        auc = %format!("{:.4}", production.auc),
        "Selected production classifier"
    );

    let y_pred: Vec<bool> = x_test
        .iter()
        .map(|x| production.model.predict_proba(x) > 0.5)
        .collect();
    let classification_report = ClassificationReport::new(&y_test, &y_pred);
    log_report(&classification_report);

    let importances = production.model.feature_importances();
    let feature_importances: BTreeMap<String, f64> = FEATURE_NAMES
        .iter()
        .zip(importances)
        .map(|(n, v)| (n.to_string(), v))
        .collect();
    let mut ranked: Vec<(&str, f64)> = FEATURE_NAMES.iter().copied().zip(importances).collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    for (name, importance) in &ranked {
        info!(feature = *name, importance = %format!("{:.4}", importance), "Feature importance");
    }

    info!(trees = opts.isolation.n_estimators, "Training isolation forest");
    let detector = IsolationForest::fit(&x_train_scaled, &opts.isolation);
    let explainer = ExplainerArtifact::for_classifier(&production);

    let report = TrainingReport {
        model_version: opts.model_version.clone(),
        trained_at,
        records: ds.len(),
        train_rows: x_train.len(),
        test_rows: x_test.len(),
        violation_rate,
        chosen_family: production.model.family().to_string(),
        best_auc: production.auc,
        candidates: vec![
            CandidateScore {
                family: rf_baseline.model.family().to_string(),
                auc: rf_auc,
            },
            CandidateScore {
                family: gb_production.model.family().to_string(),
                auc: gb_auc,
            },
        ],
        classification_report,
        feature_importances,
        grid_search: grid,
    };

    info!(elapsed_ms = started.elapsed().as_millis() as u64, "Training complete");
    Ok(TrainedModels {
        production,
        rf_baseline,
        gb_production,
        detector,
        scaler,
        explainer,
        report,
    })
}

/// Write every artifact into `dir`.
pub fn save(models: &TrainedModels, dir: &Path) -> Result<Vec<PathBuf>> {
    let feature_names: Vec<String> = FEATURE_NAMES.iter().map(|s| s.to_string()).collect();
    let written = vec![
        write_artifact(dir, artifacts::FEATURE_NAMES, &feature_names)?,
        write_artifact(dir, artifacts::SCALER_STANDARD, &models.scaler)?,
        write_artifact(dir, artifacts::RF_BASELINE, &models.rf_baseline)?,
        write_artifact(dir, artifacts::GB_PRODUCTION, &models.gb_production)?,
        write_artifact(dir, artifacts::ANOMALY_DETECTOR, &models.detector)?,
        write_artifact(dir, artifacts::SHAP_EXPLAINER, &models.explainer)?,
        write_artifact(dir, artifacts::TRAINING_REPORT, &models.report)?,
        // the production classifier last so a reader never pairs it with stale companions
        write_artifact(dir, artifacts::SLA_PREDICTOR, &models.production)?,
    ];
    for path in &written {
        info!(path = %path.display(), "Saved artifact");
    }
    Ok(written)
}

/// Load a CSV, train and save. Returns the report.
pub fn run(data_path: &Path, model_dir: &Path, opts: &TrainOptions) -> Result<TrainingReport> {
    info!(data = %data_path.display(), models = %model_dir.display(), "Starting training pipeline");
    let ds = Dataset::load_csv(data_path)?;
    let models = train(&ds, opts)?;
    save(&models, model_dir)?;
    info!(
        family = %models.report.chosen_family,
        auc = %format!("{:.4}", models.report.best_auc),
        "Training pipeline completed"
    );
    Ok(models.report)
}

fn auc_of<F>(x: &[[f64; FEATURE_COUNT]], y: &[bool], predict: F) -> f64
where
    F: Fn(&[f64; FEATURE_COUNT]) -> f64,
{
    let scores: Vec<f64> = x.iter().map(predict).collect();
    roc_auc(y, &scores)
}

fn log_report(r: &ClassificationReport) {
    for (class, m) in [("no_violation", &r.no_violation), ("violation", &r.violation)] {
        info!(
            class,
            precision = %format!("{:.2}", m.precision),
            recall = %format!("{:.2}", m.recall),
            f1 = %format!("{:.2}", m.f1),
            support = m.support,
            "Classification report"
        );
    }
    info!(accuracy = %format!("{:.4}", r.accuracy), "Classification report");
}

/// Boosting hyperparameters explored by [`grid_search`].
pub const GRID_N_ESTIMATORS: [usize; 3] = [50, 100, 200];
pub const GRID_MAX_DEPTH: [usize; 3] = [3, 6, 9];
pub const GRID_LEARNING_RATE: [f64; 3] = [0.01, 0.1, 0.2];
pub const GRID_SUBSAMPLE: [f64; 3] = [0.8, 0.9, 1.0];

/// Exhaustive search over the boosting grid scored by mean k-fold ROC-AUC.
/// The first combination wins ties.
pub fn grid_search(
    x: &[[f64; FEATURE_COUNT]],
    y: &[bool],
    base: &BoostingParams,
    folds: usize,
    seed: u64,
) -> GridSearchResult {
    let mut candidates = Vec::new();
    for &n_estimators in &GRID_N_ESTIMATORS {
        for &max_depth in &GRID_MAX_DEPTH {
            for &learning_rate in &GRID_LEARNING_RATE {
                for &subsample in &GRID_SUBSAMPLE {
                    candidates.push(BoostingParams {
                        n_estimators,
                        max_depth,
                        learning_rate,
                        subsample,
                        ..base.clone()
                    });
                }
            }
        }
    }
    search(x, y, candidates, folds, seed)
}

fn search(
    x: &[[f64; FEATURE_COUNT]],
    y: &[bool],
    candidates: Vec<BoostingParams>,
    folds: usize,
    seed: u64,
) -> GridSearchResult {
    let folds = dataset::stratified_folds(y, folds, seed);
    info!(candidates = candidates.len(), folds = folds.len(), "Running grid search");

    let evaluated = candidates.len();
    let mut best: Option<(BoostingParams, f64)> = None;
    for params in candidates {
        let mut total = 0.0;
        for held_out in &folds {
            let mut is_held = vec![false; y.len()];
            for &i in held_out {
                is_held[i] = true;
            }
            let train_idx: Vec<usize> = (0..y.len()).filter(|&i| !is_held[i]).collect();
            let model = GradientBoosting::fit(
                &dataset::select(x, &train_idx),
                &dataset::select(y, &train_idx),
                &params,
            );
            total += auc_of(&dataset::select(x, held_out), &dataset::select(y, held_out), |r| {
                model.predict_proba(r)
            });
        }
        let score = total / folds.len() as f64;
        if best.as_ref().map_or(true, |(_, s)| score > *s) {
            best = Some((params, score));
        }
    }

    match best {
        Some((best_params, best_cv_auc)) => {
            info!(
                rounds = best_params.n_estimators,
                depth = best_params.max_depth,
                learning_rate = best_params.learning_rate,
                subsample = best_params.subsample,
                cv_auc = %format!("{:.4}", best_cv_auc),
                "Grid search finished"
            );
            GridSearchResult {
                best_params,
                best_cv_auc,
                evaluated,
            }
        }
        None => {
            warn!("Grid search had no candidates, keeping defaults");
            GridSearchResult {
                best_params: BoostingParams::default(),
                best_cv_auc: 0.5,
                evaluated: 0,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

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

    fn quick() -> TrainOptions {
        TrainOptions {
            forest: ForestParams {
                n_estimators: 10,
                max_depth: 5,
                ..ForestParams::default()
            },
            boosting: BoostingParams {
                n_estimators: 10,
                max_depth: 3,
                ..BoostingParams::default()
            },
            isolation: IsolationParams {
                n_estimators: 10,
                ..IsolationParams::default()
            },
            ..TrainOptions::default()
        }
    }

    #[test]
    fn test_train_selects_higher_auc() {
        let models = train(&synthetic(300, 1), &quick()).unwrap();
        let r = &models.report;
        assert_eq!(r.records, 300);
        assert_eq!(r.train_rows + r.test_rows, 300);
        let rf = r.candidates[0].auc;
        let gb = r.candidates[1].auc;
        assert_eq!(r.best_auc, rf.max(gb));
        if gb > rf {
            assert_eq!(r.chosen_family, "gradient_boosting");
        } else {
            assert_eq!(r.chosen_family, "random_forest");
        }
        assert!(r.best_auc > 0.7);
        assert_eq!(r.feature_importances.len(), FEATURE_COUNT);
        assert!(models.explainer.check_against(&models.production).is_ok());
    }

    #[test]
    fn test_too_small_dataset_rejected() {
        assert!(train(&synthetic(5, 1), &quick()).is_err());
    }

    #[test]
    fn test_training_is_reproducible() {
        let ds = synthetic(200, 9);
        let a = train(&ds, &quick()).unwrap();
        let b = train(&ds, &quick()).unwrap();
        assert_eq!(a.production.model, b.production.model);
        assert_eq!(a.detector, b.detector);
        assert_eq!(a.scaler, b.scaler);
    }

    #[test]
    fn test_search_picks_best_candidate() {
        let ds = synthetic(150, 4);
        let y = dataset::synthesize_labels(&ds.rows, 0.0, 42);
        let weak = BoostingParams {
            n_estimators: 1,
            max_depth: 1,
            learning_rate: 0.01,
            ..BoostingParams::default()
        };
        let strong = BoostingParams {
            n_estimators: 20,
            max_depth: 4,
            ..BoostingParams::default()
        };
        let result = search(&ds.rows, &y, vec![weak, strong.clone()], 3, 42);
        assert_eq!(result.evaluated, 2);
        assert_eq!(result.best_params, strong);
        assert!(result.best_cv_auc > 0.5);
    }

    #[test]
    fn test_grid_has_all_combinations() {
        assert_eq!(
            GRID_N_ESTIMATORS.len() * GRID_MAX_DEPTH.len() * GRID_LEARNING_RATE.len() * GRID_SUBSAMPLE.len(),
            81
        );
    }
}
