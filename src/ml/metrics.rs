//! Evaluation metrics for the binary risk classifier.

use serde::{Deserialize, Serialize};

/// Area under the ROC curve via the rank statistic, with ties averaged.
///
/// Returns 0.5 when only one class is present.
pub fn roc_auc(y_true: &[bool], scores: &[f64]) -> f64 {
    let n = y_true.len().min(scores.len());
    let positives = y_true[..n].iter().filter(|&&y| y).count();
    let negatives = n - positives;
    if positives == 0 || negatives == 0 {
        return 0.5;
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut rank_sum_pos = 0.0;
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        // ranks are 1-based; tied block shares the mean rank
        let mean_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            if y_true[idx] {
                rank_sum_pos += mean_rank;
            }
        }
        i = j + 1;
    }

    let p = positives as f64;
    (rank_sum_pos - p * (p + 1.0) / 2.0) / (p * negatives as f64)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub true_negative: usize,
    pub false_positive: usize,
    pub false_negative: usize,
    pub true_positive: usize,
}

impl ConfusionMatrix {
    pub fn from_labels(y_true: &[bool], y_pred: &[bool]) -> Self {
        let mut m = Self::default();
        for (&t, &p) in y_true.iter().zip(y_pred) {
            match (t, p) {
                (false, false) => m.true_negative += 1,
                (false, true) => m.false_positive += 1,
                (true, false) => m.false_negative += 1,
                (true, true) => m.true_positive += 1,
            }
        }
        m
    }

    pub fn total(&self) -> usize {
        self.true_negative + self.false_positive + self.false_negative + self.true_positive
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

impl ClassMetrics {
    fn new(tp: usize, fp: usize, fn_: usize) -> Self {
        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        Self {
            precision,
            recall,
            f1,
            support: tp + fn_,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub no_violation: ClassMetrics,
    pub violation: ClassMetrics,
    pub accuracy: f64,
    pub confusion: ConfusionMatrix,
}

impl ClassificationReport {
    pub fn new(y_true: &[bool], y_pred: &[bool]) -> Self {
        let c = ConfusionMatrix::from_labels(y_true, y_pred);
        Self {
            no_violation: ClassMetrics::new(c.true_negative, c.false_negative, c.false_positive),
            violation: ClassMetrics::new(c.true_positive, c.false_positive, c.false_negative),
            accuracy: ratio(c.true_positive + c.true_negative, c.total()),
            confusion: c,
        }
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auc_perfect_and_inverted() {
        let y = [false, false, true, true];
        assert_eq!(roc_auc(&y, &[0.1, 0.2, 0.8, 0.9]), 1.0);
        assert_eq!(roc_auc(&y, &[0.9, 0.8, 0.2, 0.1]), 0.0);
    }

    #[test]
    fn test_auc_ties_count_half() {
        let y = [false, true];
        assert_eq!(roc_auc(&y, &[0.5, 0.5]), 0.5);
        // one of four pairs tied, three ordered correctly
        let y = [false, false, true, true];
        assert!((roc_auc(&y, &[0.1, 0.6, 0.6, 0.9]) - 0.875).abs() < 1e-12);
    }

    #[test]
    fn test_auc_single_class() {
        assert_eq!(roc_auc(&[true, true], &[0.2, 0.9]), 0.5);
    }

    #[test]
    fn test_report() {
        let y_true = [true, true, false, false, true];
        let y_pred = [true, false, false, true, true];
        let r = ClassificationReport::new(&y_true, &y_pred);
        assert_eq!(r.confusion.true_positive, 2);
        assert_eq!(r.confusion.false_negative, 1);
        assert_eq!(r.confusion.false_positive, 1);
        assert_eq!(r.confusion.true_negative, 1);
        assert!((r.accuracy - 0.6).abs() < 1e-12);
        assert!((r.violation.precision - 2.0 / 3.0).abs() < 1e-12);
        assert!((r.violation.recall - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(r.violation.support, 3);
        assert_eq!(r.no_violation.support, 2);
        assert!((r.no_violation.precision - 0.5).abs() < 1e-12);
    }
}
