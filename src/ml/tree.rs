//! Binary decision trees shared by the forest and boosting models.
//!
//! Trees are stored as a flat node arena rooted at index 0. Every node keeps
//! the value a prediction would take if it stopped there, which is what the
//! path attribution in [`Tree::contributions`] walks over.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::features::FEATURE_COUNT;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
        value: f64,
        cover: f64,
    },
    Leaf {
        value: f64,
        cover: f64,
    },
}

impl Node {
    pub fn value(&self) -> f64 {
        match self {
            Node::Split { value, .. } | Node::Leaf { value, .. } => *value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

impl Tree {
    /// Leaf value reached by `x`. Samples go left when `x[feature] <= threshold`.
    pub fn predict(&self, x: &[f64; FEATURE_COUNT]) -> f64 {
        let mut id = 0;
        loop {
            match &self.nodes[id] {
                Node::Leaf { value, .. } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    id = if x[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    /// Add each split's change in node value to the split feature and return the root value.
    ///
    /// `root value + sum(contributions added)` equals `predict(x)`.
    pub fn contributions(&self, x: &[f64; FEATURE_COUNT], out: &mut [f64; FEATURE_COUNT]) -> f64 {
        let bias = self.nodes[0].value();
        let mut id = 0;
        while let Node::Split {
            feature,
            threshold,
            left,
            right,
            value,
            ..
        } = &self.nodes[id]
        {
            let next = if x[*feature] <= *threshold { *left } else { *right };
            out[*feature] += self.nodes[next].value() - value;
            id = next;
        }
        bias
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], id: usize) -> usize {
            match &nodes[id] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        if self.nodes.is_empty() {
            0
        } else {
            walk(&self.nodes, 0)
        }
    }

    /// Structural check run on deserialized artifacts.
    ///
    /// Children must point forward in the arena so traversal terminates.
    pub fn validate(&self) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }
        for (id, node) in self.nodes.iter().enumerate() {
            if !node.value().is_finite() {
                return Err(format!("node {} has a non-finite value", id));
            }
            if let Node::Split {
                feature,
                threshold,
                left,
                right,
                ..
            } = node
            {
                if *feature >= FEATURE_COUNT {
                    return Err(format!("node {} splits on unknown feature {}", id, feature));
                }
                if threshold.is_nan() {
                    return Err(format!("node {} has a NaN threshold", id));
                }
                for child in [*left, *right] {
                    if child <= id || child >= self.nodes.len() {
                        return Err(format!("node {} has invalid child {}", id, child));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Growth limits for [`grow`].
#[derive(Debug, Clone)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_split: usize,
    /// Minimum [`SplitStats::weight`] on each side of a split.
    pub min_child_weight: f64,
    /// L2 penalty on leaf values (second-order statistics only).
    pub lambda: f64,
    /// Features examined per split; `None` examines all of them.
    pub max_features: Option<usize>,
}

/// Additive per-sample statistics a split criterion is computed from.
pub(crate) trait SplitStats: Copy + Default {
    fn add(&mut self, other: &Self);
    fn minus(&self, other: &Self) -> Self;
    fn weight(&self) -> f64;
    /// Node quality; a split's gain is `score(left) + score(right) - score(parent)`.
    fn score(&self, params: &TreeParams) -> f64;
    fn leaf_value(&self, params: &TreeParams) -> f64;
}

/// Weighted class counts scored by (negated, weighted) Gini impurity.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ClassWeights {
    pub neg: f64,
    pub pos: f64,
}

impl SplitStats for ClassWeights {
    fn add(&mut self, other: &Self) {
        self.neg += other.neg;
        self.pos += other.pos;
    }

    fn minus(&self, other: &Self) -> Self {
        Self {
            neg: self.neg - other.neg,
            pos: self.pos - other.pos,
        }
    }

    fn weight(&self) -> f64 {
        self.neg + self.pos
    }

    fn score(&self, _params: &TreeParams) -> f64 {
        let w = self.weight();
        if w <= 0.0 {
            return 0.0;
        }
        (self.neg * self.neg + self.pos * self.pos) / w - w
    }

    fn leaf_value(&self, _params: &TreeParams) -> f64 {
        let w = self.weight();
        if w <= 0.0 {
            0.0
        } else {
            self.pos / w
        }
    }
}

/// Gradient and hessian sums of the logistic loss.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct GradientPair {
    pub grad: f64,
    pub hess: f64,
}

impl SplitStats for GradientPair {
    fn add(&mut self, other: &Self) {
        self.grad += other.grad;
        self.hess += other.hess;
    }

    fn minus(&self, other: &Self) -> Self {
        Self {
            grad: self.grad - other.grad,
            hess: self.hess - other.hess,
        }
    }

    fn weight(&self) -> f64 {
        self.hess
    }

    fn score(&self, params: &TreeParams) -> f64 {
        self.grad * self.grad / (self.hess + params.lambda)
    }

    fn leaf_value(&self, params: &TreeParams) -> f64 {
        -self.grad / (self.hess + params.lambda)
    }
}

pub(crate) struct GrownTree {
    pub tree: Tree,
    /// Total split gain credited to each feature.
    pub gains: [f64; FEATURE_COUNT],
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

/// Grow a tree over the rows selected by `indices` (duplicates allowed, as in a bootstrap).
pub(crate) fn grow<S: SplitStats>(
    x: &[[f64; FEATURE_COUNT]],
    stats: &[S],
    mut indices: Vec<usize>,
    params: &TreeParams,
    rng: &mut StdRng,
) -> GrownTree {
    let mut builder = Builder {
        x,
        stats,
        params,
        rng,
        nodes: Vec::new(),
        gains: [0.0; FEATURE_COUNT],
    };
    builder.build(&mut indices, 0);
    GrownTree {
        tree: Tree {
            nodes: builder.nodes,
        },
        gains: builder.gains,
    }
}

struct Builder<'a, S> {
    x: &'a [[f64; FEATURE_COUNT]],
    stats: &'a [S],
    params: &'a TreeParams,
    rng: &'a mut StdRng,
    nodes: Vec<Node>,
    gains: [f64; FEATURE_COUNT],
}

impl<'a, S: SplitStats> Builder<'a, S> {
    fn build(&mut self, idx: &mut [usize], depth: usize) -> usize {
        let mut total = S::default();
        for &i in idx.iter() {
            total.add(&self.stats[i]);
        }
        let value = total.leaf_value(self.params);
        let cover = total.weight();
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf { value, cover });

        if depth >= self.params.max_depth || idx.len() < self.params.min_samples_split.max(2) {
            return id;
        }
        let Some(split) = self.best_split(idx, &total) else {
            return id;
        };

        let mut mid = 0;
        for k in 0..idx.len() {
            if self.x[idx[k]][split.feature] <= split.threshold {
                idx.swap(k, mid);
                mid += 1;
            }
        }
        let (l, r) = idx.split_at_mut(mid);
        let left = self.build(l, depth + 1);
        let right = self.build(r, depth + 1);

        self.gains[split.feature] += split.gain;
        self.nodes[id] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
            value,
            cover,
        };
        id
    }

    fn best_split(&mut self, idx: &[usize], total: &S) -> Option<SplitCandidate> {
        let mut features: Vec<usize> = (0..FEATURE_COUNT).collect();
        if let Some(k) = self.params.max_features {
            features.shuffle(&mut *self.rng);
            features.truncate(k.clamp(1, FEATURE_COUNT));
        }

        let parent_score = total.score(self.params);
        let mut best: Option<SplitCandidate> = None;
        let mut order: Vec<usize> = idx.to_vec();

        for &f in &features {
            order.sort_by(|&a, &b| self.x[a][f].total_cmp(&self.x[b][f]));

            let mut left = S::default();
            for k in 0..order.len() - 1 {
                left.add(&self.stats[order[k]]);
                let here = self.x[order[k]][f];
                let next = self.x[order[k + 1]][f];
                if here >= next {
                    continue;
                }
                let right = total.minus(&left);
                if left.weight() < self.params.min_child_weight
                    || right.weight() < self.params.min_child_weight
                {
                    continue;
                }
                let gain = left.score(self.params) + right.score(self.params) - parent_score;
                if gain <= 1e-12 {
                    continue;
                }
                if best.as_ref().map_or(true, |b| gain > b.gain) {
                    let mut threshold = here + (next - here) / 2.0;
                    if threshold >= next {
                        threshold = here;
                    }
                    best = Some(SplitCandidate {
                        feature: f,
                        threshold,
                        gain,
                    });
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn params() -> TreeParams {
        TreeParams {
            max_depth: 4,
            min_samples_split: 2,
            min_child_weight: 0.0,
            lambda: 1.0,
            max_features: None,
        }
    }

    fn latency_data() -> (Vec<[f64; FEATURE_COUNT]>, Vec<ClassWeights>) {
        let mut x = Vec::new();
        let mut s = Vec::new();
        for i in 0..40 {
            let latency = i as f64;
            x.push([100.0, 50.0, 10.0, 1.0, latency, 0.5]);
            let positive = latency > 15.0;
            s.push(ClassWeights {
                neg: if positive { 0.0 } else { 1.0 },
                pos: if positive { 1.0 } else { 0.0 },
            });
        }
        (x, s)
    }

    #[test]
    fn test_grow_separates_on_latency() {
        let (x, s) = latency_data();
        let mut rng = StdRng::seed_from_u64(7);
        let grown = grow(&x, &s, (0..x.len()).collect(), &params(), &mut rng);
        let tree = grown.tree;
        assert!(tree.validate().is_ok());

        match &tree.nodes[0] {
            Node::Split { feature, threshold, .. } => {
                assert_eq!(*feature, 4);
                assert!((*threshold - 15.5).abs() < 1e-9);
            }
            other => panic!("expected a split at the root, got {:?}", other),
        }
        assert_eq!(tree.predict(&[100.0, 50.0, 10.0, 1.0, 15.0, 0.5]), 0.0);
        assert_eq!(tree.predict(&[100.0, 50.0, 10.0, 1.0, 16.0, 0.5]), 1.0);
        assert!(grown.gains[4] > 0.0);
        assert_eq!(grown.gains[0], 0.0);
    }

    #[test]
    fn test_contributions_reconstruct_prediction() {
        let (x, s) = latency_data();
        let mut rng = StdRng::seed_from_u64(7);
        let tree = grow(&x, &s, (0..x.len()).collect(), &params(), &mut rng).tree;

        for row in &x {
            let mut out = [0.0; FEATURE_COUNT];
            let bias = tree.contributions(row, &mut out);
            let total = bias + out.iter().sum::<f64>();
            assert!((total - tree.predict(row)).abs() < 1e-12);
        }
    }

    #[test]
    fn test_pure_node_stays_leaf() {
        let x = vec![[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], [2.0, 3.0, 4.0, 5.0, 6.0, 7.0]];
        let s = vec![ClassWeights { neg: 1.0, pos: 0.0 }; 2];
        let mut rng = StdRng::seed_from_u64(1);
        let tree = grow(&x, &s, vec![0, 1], &params(), &mut rng).tree;
        assert_eq!(tree.nodes.len(), 1);
        assert_eq!(tree.depth(), 0);
    }

    #[test]
    fn test_newton_leaf_values() {
        let p = params();
        let g = GradientPair { grad: -2.0, hess: 1.0 };
        assert!((g.leaf_value(&p) - 1.0).abs() < 1e-12);
        assert!((g.score(&p) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_validate_rejects_backward_child() {
        let tree = Tree {
            nodes: vec![Node::Split {
                feature: 0,
                threshold: 1.0,
                left: 0,
                right: 0,
                value: 0.0,
                cover: 1.0,
            }],
        };
        assert!(tree.validate().is_err());
    }
}
