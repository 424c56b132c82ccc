//! Per-feature standardization.

use serde::{Deserialize, Serialize};

use crate::features::FEATURE_COUNT;

/// Statistics captured from the training split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub means: [f64; FEATURE_COUNT],
    pub stds: [f64; FEATURE_COUNT],
}

impl StandardScaler {
    /// Fit mean and population standard deviation per feature.
    ///
    /// A feature with zero spread keeps a scale of 1 so `transform` only centers it.
    pub fn fit(rows: &[[f64; FEATURE_COUNT]]) -> Self {
        let mut means = [0.0; FEATURE_COUNT];
        let mut stds = [1.0; FEATURE_COUNT];
        if rows.is_empty() {
            return Self { means, stds };
        }
        let n = rows.len() as f64;

        for row in rows {
            for (m, v) in means.iter_mut().zip(row) {
                *m += v;
            }
        }
        for m in means.iter_mut() {
            *m /= n;
        }

        let mut var = [0.0; FEATURE_COUNT];
        for row in rows {
            for j in 0..FEATURE_COUNT {
                var[j] += (row[j] - means[j]).powi(2);
            }
        }
        for j in 0..FEATURE_COUNT {
            let sd = (var[j] / n).sqrt();
            stds[j] = if sd > f64::EPSILON { sd } else { 1.0 };
        }

        Self { means, stds }
    }

    pub fn transform(&self, x: &[f64; FEATURE_COUNT]) -> [f64; FEATURE_COUNT] {
        let mut out = [0.0; FEATURE_COUNT];
        for j in 0..FEATURE_COUNT {
            out[j] = (x[j] - self.means[j]) / self.stds[j];
        }
        out
    }

    pub(crate) fn is_consistent(&self) -> bool {
        self.means.iter().all(|m| m.is_finite())
            && self.stds.iter().all(|s| s.is_finite() && *s > 0.0)
    }
}

/// Scaler in front of the anomaly detector.
#[derive(Debug, Clone, PartialEq)]
pub enum Scaler {
    Standard(StandardScaler),
    /// Pass-through used by the fallback bank.
    Identity,
}

impl Scaler {
    pub fn transform(&self, x: &[f64; FEATURE_COUNT]) -> [f64; FEATURE_COUNT] {
        match self {
            Scaler::Standard(s) => s.transform(x),
            Scaler::Identity => *x,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Scaler::Identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_transform_centers_and_scales() {
        let rows = vec![
            [1.0, 10.0, 5.0, 0.0, 2.0, 7.0],
            [3.0, 30.0, 5.0, 0.0, 4.0, 7.0],
        ];
        let s = StandardScaler::fit(&rows);
        assert_eq!(s.means[0], 2.0);
        assert_eq!(s.stds[0], 1.0);
        assert_eq!(s.means[1], 20.0);
        assert_eq!(s.stds[1], 10.0);
        // constant column keeps unit scale
        assert_eq!(s.stds[2], 1.0);

        let t = s.transform(&rows[1]);
        assert!((t[0] - 1.0).abs() < 1e-12);
        assert!((t[1] - 1.0).abs() < 1e-12);
        assert_eq!(t[2], 0.0);
    }

    #[test]
    fn test_identity_is_pass_through() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        assert_eq!(Scaler::Identity.transform(&x), x);
        assert!(Scaler::Identity.is_fallback());
    }

    #[test]
    fn test_transform_is_pure() {
        let s = StandardScaler::fit(&[[1.0; 6], [3.0; 6], [5.0; 6]]);
        let x = [2.0; 6];
        assert_eq!(s.transform(&x), s.transform(&x));
    }
}
