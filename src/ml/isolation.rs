//! Isolation forest outlier model.
//!
//! Leaves store the full path length (`depth + c(leaf size)`) so scoring is a
//! plain tree walk per estimator.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::features::FEATURE_COUNT;
use crate::ml::tree::{Node, Tree};

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

#[derive(Debug, Clone)]
pub struct IsolationParams {
    pub n_estimators: usize,
    pub max_samples: usize,
    /// Expected share of anomalies in the training data.
    pub contamination: f64,
    pub seed: u64,
}

impl Default for IsolationParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_samples: 256,
            contamination: 0.1,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationForest {
    pub trees: Vec<Tree>,
    /// Subsample size each tree was grown on.
    pub sample_size: usize,
    /// Score threshold at the contamination quantile of the training scores.
    pub offset: f64,
    pub contamination: f64,
}

/// Average path length of an unsuccessful BST search over `n` points.
pub(crate) fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

impl IsolationForest {
    pub fn fit(x: &[[f64; FEATURE_COUNT]], params: &IsolationParams) -> Self {
        let n = x.len();
        let sample_size = params.max_samples.min(n).max(1);
        let max_depth = (sample_size as f64).log2().ceil().max(1.0) as usize;
        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut trees = Vec::with_capacity(params.n_estimators);

        if n > 0 {
            let mut all: Vec<usize> = (0..n).collect();
            for _ in 0..params.n_estimators {
                all.shuffle(&mut rng);
                let sample = all[..sample_size].to_vec();
                let mut nodes = Vec::new();
                grow_isolation(x, sample, 0, max_depth, &mut rng, &mut nodes);
                trees.push(Tree { nodes });
            }
        }

        let mut model = Self {
            trees,
            sample_size,
            offset: -0.5,
            contamination: params.contamination,
        };
        if n > 0 {
            let mut scores: Vec<f64> = x.iter().map(|row| model.score_samples(row)).collect();
            scores.sort_by(|a, b| a.total_cmp(b));
            model.offset = percentile(&scores, params.contamination * 100.0);
        }
        model
    }

    /// Negated anomaly score in [-1, 0]; lower is more abnormal.
    pub fn score_samples(&self, x: &[f64; FEATURE_COUNT]) -> f64 {
        if self.trees.is_empty() {
            return -0.5;
        }
        let mean_path: f64 =
            self.trees.iter().map(|t| t.predict(x)).sum::<f64>() / self.trees.len() as f64;
        let c = average_path_length(self.sample_size);
        if c <= 0.0 {
            return -0.5;
        }
        -(2f64.powf(-mean_path / c))
    }

    /// Signed distance to the contamination threshold; negative means anomalous.
    pub fn decision_function(&self, x: &[f64; FEATURE_COUNT]) -> f64 {
        self.score_samples(x) - self.offset
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.trees.is_empty() {
            return Err("isolation forest has no trees".to_string());
        }
        if self.sample_size == 0 || !self.offset.is_finite() {
            return Err("isolation forest has inconsistent parameters".to_string());
        }
        for (i, t) in self.trees.iter().enumerate() {
            t.validate().map_err(|e| format!("tree {}: {}", i, e))?;
        }
        Ok(())
    }
}

fn grow_isolation(
    x: &[[f64; FEATURE_COUNT]],
    mut rows: Vec<usize>,
    depth: usize,
    max_depth: usize,
    rng: &mut StdRng,
    nodes: &mut Vec<Node>,
) -> usize {
    let id = nodes.len();
    let size = rows.len();
    let leaf = Node::Leaf {
        value: depth as f64 + average_path_length(size),
        cover: size as f64,
    };
    nodes.push(leaf);
    if depth >= max_depth || size <= 1 {
        return id;
    }

    let mut features: Vec<usize> = (0..FEATURE_COUNT).collect();
    features.shuffle(rng);
    let mut chosen = None;
    for f in features {
        let (lo, hi) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &r| {
            (lo.min(x[r][f]), hi.max(x[r][f]))
        });
        if hi > lo {
            chosen = Some((f, lo, hi));
            break;
        }
    }
    let Some((feature, lo, hi)) = chosen else {
        return id;
    };

    let mut threshold = rng.gen_range(lo..hi);
    if threshold >= hi {
        threshold = lo;
    }
    let right_rows: Vec<usize> = rows.iter().copied().filter(|&r| x[r][feature] > threshold).collect();
    rows.retain(|&r| x[r][feature] <= threshold);

    let left = grow_isolation(x, rows, depth + 1, max_depth, rng, nodes);
    let right = grow_isolation(x, right_rows, depth + 1, max_depth, rng, nodes);
    nodes[id] = Node::Split {
        feature,
        threshold,
        left,
        right,
        value: 0.0,
        cover: size as f64,
    };
    id
}

/// Linear-interpolated percentile of an ascending slice.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}
