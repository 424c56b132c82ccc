//! Gradient boosted trees with logistic loss and second-order leaf weights.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::features::FEATURE_COUNT;
use crate::ml::forest::normalize;
use crate::ml::tree::{self, GradientPair, Tree, TreeParams};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostingParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub learning_rate: f64,
    /// Row fraction sampled (without replacement) per round.
    pub subsample: f64,
    pub lambda: f64,
    pub min_child_weight: f64,
    pub seed: u64,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: 6,
            learning_rate: 0.1,
            subsample: 1.0,
            lambda: 1.0,
            min_child_weight: 1.0,
            seed: 42,
        }
    }
}

/// Trees store leaf weights already multiplied by the learning rate, so the
/// margin is `base_margin + sum(tree outputs)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoosting {
    pub base_margin: f64,
    pub trees: Vec<Tree>,
    pub feature_importances: [f64; FEATURE_COUNT],
}

pub(crate) fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

impl GradientBoosting {
    pub fn fit(x: &[[f64; FEATURE_COUNT]], y: &[bool], params: &BoostingParams) -> Self {
        let n = x.len();
        let tree_params = TreeParams {
            max_depth: params.max_depth,
            min_samples_split: 2,
            min_child_weight: params.min_child_weight,
            lambda: params.lambda,
            max_features: None,
        };

        let base_margin = 0.0;
        let mut margins = vec![base_margin; n];
        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut trees = Vec::with_capacity(params.n_estimators);
        let mut gains = [0.0; FEATURE_COUNT];
        let mut all: Vec<usize> = (0..n).collect();
        let take = ((n as f64) * params.subsample.clamp(0.0, 1.0)).round() as usize;

        for _ in 0..params.n_estimators {
            if n == 0 {
                break;
            }
            let stats: Vec<GradientPair> = margins
                .iter()
                .zip(y)
                .map(|(&m, &label)| {
                    let p = sigmoid(m);
                    let target = if label { 1.0 } else { 0.0 };
                    GradientPair {
                        grad: p - target,
                        hess: (p * (1.0 - p)).max(1e-16),
                    }
                })
                .collect();

            let rows = if take >= n {
                all.clone()
            } else {
                all.shuffle(&mut rng);
                all[..take.max(1)].to_vec()
            };

            let mut grown = tree::grow(x, &stats, rows, &tree_params, &mut rng);
            shrink(&mut grown.tree, params.learning_rate);
            for j in 0..FEATURE_COUNT {
                gains[j] += grown.gains[j];
            }
            for (i, row) in x.iter().enumerate() {
                margins[i] += grown.tree.predict(row);
            }
            trees.push(grown.tree);
        }

        Self {
            base_margin,
            trees,
            feature_importances: normalize(gains),
        }
    }

    /// Raw log-odds output.
    pub fn margin(&self, x: &[f64; FEATURE_COUNT]) -> f64 {
        self.base_margin + self.trees.iter().map(|t| t.predict(x)).sum::<f64>()
    }

    pub fn predict_proba(&self, x: &[f64; FEATURE_COUNT]) -> f64 {
        sigmoid(self.margin(x)).clamp(0.0, 1.0)
    }

    /// Path contributions in margin space; bias plus contributions equals `margin`.
    pub fn contributions(&self, x: &[f64; FEATURE_COUNT]) -> (f64, [f64; FEATURE_COUNT]) {
        let mut out = [0.0; FEATURE_COUNT];
        let mut bias = self.base_margin;
        for t in &self.trees {
            bias += t.contributions(x, &mut out);
        }
        (bias, out)
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if !self.base_margin.is_finite() {
            return Err("non-finite base margin".to_string());
        }
        if self.trees.is_empty() {
            return Err("boosted model has no trees".to_string());
        }
        for (i, t) in self.trees.iter().enumerate() {
            t.validate().map_err(|e| format!("tree {}: {}", i, e))?;
        }
        Ok(())
    }
}

fn shrink(tree: &mut Tree, eta: f64) {
    use crate::ml::tree::Node;
    for node in tree.nodes.iter_mut() {
        match node {
            Node::Split { value, .. } | Node::Leaf { value, .. } => *value *= eta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn dataset() -> (Vec<[f64; FEATURE_COUNT]>, Vec<bool>) {
        let mut rng = StdRng::seed_from_u64(11);
        let mut x = Vec::new();
        let mut y = Vec::new();
        for _ in 0..300 {
            let latency: f64 = rng.gen_range(0.0..30.0);
            let jitter: f64 = rng.gen_range(0.0..6.0);
            x.push([100.0, 60.0, 20.0, 1.0, latency, jitter]);
            y.push(latency > 15.0 || jitter > 3.0);
        }
        (x, y)
    }

    fn small() -> BoostingParams {
        BoostingParams {
            n_estimators: 30,
            max_depth: 3,
            ..BoostingParams::default()
        }
    }

    #[test]
    fn test_boosting_fits_rules() {
        let (x, y) = dataset();
        let model = GradientBoosting::fit(&x, &y, &small());
        assert_eq!(model.trees.len(), 30);
        assert!(model.validate().is_ok());

        assert!(model.predict_proba(&[100.0, 60.0, 20.0, 1.0, 4.0, 1.0]) < 0.5);
        assert!(model.predict_proba(&[100.0, 60.0, 20.0, 1.0, 25.0, 1.0]) > 0.5);
        assert!(model.predict_proba(&[100.0, 60.0, 20.0, 1.0, 4.0, 5.0]) > 0.5);
    }

    #[test]
    fn test_contributions_sum_to_margin() {
        let (x, y) = dataset();
        let model = GradientBoosting::fit(&x, &y, &small());
        for row in x.iter().take(25) {
            let (bias, c) = model.contributions(row);
            assert!((bias + c.iter().sum::<f64>() - model.margin(row)).abs() < 1e-9);
        }
    }

    #[test]
    fn test_subsampled_fit_is_reproducible() {
        let (x, y) = dataset();
        let params = BoostingParams {
            subsample: 0.8,
            ..small()
        };
        assert_eq!(
            GradientBoosting::fit(&x, &y, &params),
            GradientBoosting::fit(&x, &y, &params)
        );
    }

    #[test]
    fn test_sigmoid() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-12);
        assert!(sigmoid(10.0) > 0.99);
        assert!(sigmoid(-10.0) < 0.01);
    }
}
