//! Bagged classification forest with balanced class weights.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::features::FEATURE_COUNT;
use crate::ml::tree::{self, ClassWeights, Tree, TreeParams};

#[derive(Debug, Clone)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    /// Features examined per split; `None` uses `sqrt(FEATURE_COUNT)`.
    pub max_features: Option<usize>,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: 10,
            max_features: None,
            seed: 42,
        }
    }
}

/// Each tree's leaves hold the weighted share of the violation class; the
/// forest averages them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    pub trees: Vec<Tree>,
    pub feature_importances: [f64; FEATURE_COUNT],
}

impl RandomForest {
    pub fn fit(x: &[[f64; FEATURE_COUNT]], y: &[bool], params: &ForestParams) -> Self {
        let n = x.len();
        let positives = y.iter().filter(|&&v| v).count();
        let negatives = n - positives;

        // balanced: n / (n_classes * class_count)
        let w_pos = if positives > 0 { n as f64 / (2.0 * positives as f64) } else { 0.0 };
        let w_neg = if negatives > 0 { n as f64 / (2.0 * negatives as f64) } else { 0.0 };
        let stats: Vec<ClassWeights> = y
            .iter()
            .map(|&label| {
                if label {
                    ClassWeights { neg: 0.0, pos: w_pos }
                } else {
                    ClassWeights { neg: w_neg, pos: 0.0 }
                }
            })
            .collect();

        let tree_params = TreeParams {
            max_depth: params.max_depth,
            min_samples_split: 2,
            min_child_weight: 0.0,
            lambda: 0.0,
            max_features: Some(
                params
                    .max_features
                    .unwrap_or_else(|| (FEATURE_COUNT as f64).sqrt() as usize),
            ),
        };

        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut trees = Vec::with_capacity(params.n_estimators);
        let mut gains = [0.0; FEATURE_COUNT];

        for _ in 0..params.n_estimators {
            let sample: Vec<usize> = if n == 0 {
                Vec::new()
            } else {
                (0..n).map(|_| rng.gen_range(0..n)).collect()
            };
            if sample.is_empty() {
                break;
            }
            let grown = tree::grow(x, &stats, sample, &tree_params, &mut rng);
            let tree_total: f64 = grown.gains.iter().sum();
            if tree_total > 0.0 {
                for j in 0..FEATURE_COUNT {
                    gains[j] += grown.gains[j] / tree_total;
                }
            }
            trees.push(grown.tree);
        }

        Self {
            trees,
            feature_importances: normalize(gains),
        }
    }

    /// Mean violation probability across trees.
    pub fn predict_proba(&self, x: &[f64; FEATURE_COUNT]) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.trees.iter().map(|t| t.predict(x)).sum();
        (sum / self.trees.len() as f64).clamp(0.0, 1.0)
    }

    /// Averaged path contributions; the returned bias plus contributions equals `predict_proba`.
    pub fn contributions(&self, x: &[f64; FEATURE_COUNT]) -> (f64, [f64; FEATURE_COUNT]) {
        let mut out = [0.0; FEATURE_COUNT];
        if self.trees.is_empty() {
            return (0.0, out);
        }
        let mut bias = 0.0;
        for t in &self.trees {
            bias += t.contributions(x, &mut out);
        }
        let k = self.trees.len() as f64;
        for v in out.iter_mut() {
            *v /= k;
        }
        (bias / k, out)
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.trees.is_empty() {
            return Err("forest has no trees".to_string());
        }
        for (i, t) in self.trees.iter().enumerate() {
            t.validate().map_err(|e| format!("tree {}: {}", i, e))?;
        }
        Ok(())
    }
}

pub(crate) fn normalize(mut v: [f64; FEATURE_COUNT]) -> [f64; FEATURE_COUNT] {
    let total: f64 = v.iter().sum();
    if total > 0.0 {
        for x in v.iter_mut() {
            *x /= total;
        }
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset() -> (Vec<[f64; FEATURE_COUNT]>, Vec<bool>) {
        let mut rng = StdRng::seed_from_u64(3);
        let mut x = Vec::new();
        let mut y = Vec::new();
        for _ in 0..300 {
            let latency: f64 = rng.gen_range(0.0..30.0);
            let loss: f64 = rng.gen_range(0.0..10.0);
            x.push([100.0, rng.gen_range(30.0..90.0), rng.gen_range(0.0..60.0), loss, latency, 1.0]);
            y.push(latency > 15.0 || loss > 5.0);
        }
        (x, y)
    }

    fn small() -> ForestParams {
        ForestParams {
            n_estimators: 15,
            max_depth: 6,
            ..ForestParams::default()
        }
    }

    #[test]
    fn test_forest_learns_thresholds() {
        let (x, y) = dataset();
        let forest = RandomForest::fit(&x, &y, &small());
        assert_eq!(forest.trees.len(), 15);
        assert!(forest.validate().is_ok());

        let calm = [100.0, 60.0, 10.0, 1.0, 5.0, 1.0];
        let bad = [100.0, 60.0, 10.0, 8.0, 25.0, 1.0];
        assert!(forest.predict_proba(&calm) < 0.5);
        assert!(forest.predict_proba(&bad) > 0.5);

        // latency and loss carry the signal
        let imp = forest.feature_importances;
        assert!(imp[4] + imp[3] > 0.5);
        assert!((imp.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_forest_fit_is_reproducible() {
        let (x, y) = dataset();
        let a = RandomForest::fit(&x, &y, &small());
        let b = RandomForest::fit(&x, &y, &small());
        assert_eq!(a, b);
    }

    #[test]
    fn test_forest_contributions_are_additive() {
        let (x, y) = dataset();
        let forest = RandomForest::fit(&x, &y, &small());
        for row in x.iter().take(20) {
            let (bias, c) = forest.contributions(row);
            let total = bias + c.iter().sum::<f64>();
            assert!((total - forest.predict_proba(row)).abs() < 1e-9);
        }
    }
}
