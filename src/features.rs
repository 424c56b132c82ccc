//! The fixed six-metric feature contract shared by training and serving.
//!
//! Every model in the pipeline consumes features in the order declared by
//! [`FEATURE_NAMES`]. Artifacts record that order at training time and the
//! loader refuses artifacts whose order differs.

use serde::{Deserialize, Serialize};

use crate::ml::ModelError;

/// Number of features in a [`FeatureVector`].
pub const FEATURE_COUNT: usize = 6;

/// Canonical feature order. Index `i` of [`FeatureVector::to_array`] is `FEATURE_NAMES[i]`.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "bandwidth",
    "throughput",
    "congestion",
    "packet_loss",
    "latency",
    "jitter",
];

pub const BANDWIDTH: usize = 0;
pub const THROUGHPUT: usize = 1;
pub const CONGESTION: usize = 2;
pub const PACKET_LOSS: usize = 3;
pub const LATENCY: usize = 4;
pub const JITTER: usize = 5;

/// One telemetry sample as model input.
///
/// Units: bandwidth and throughput in Mbps, congestion and packet loss in
/// percent, latency and jitter in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureVector {
    pub bandwidth: f64,
    pub throughput: f64,
    pub congestion: f64,
    pub packet_loss: f64,
    pub latency: f64,
    pub jitter: f64,
}

impl FeatureVector {
    pub fn new(
        bandwidth: f64,
        throughput: f64,
        congestion: f64,
        packet_loss: f64,
        latency: f64,
        jitter: f64,
    ) -> Self {
        Self {
            bandwidth,
            throughput,
            congestion,
            packet_loss,
            latency,
            jitter,
        }
    }

    /// Build a vector from an ordered slice, rejecting the wrong arity.
    pub fn from_slice(values: &[f64]) -> Result<Self, ModelError> {
        if values.len() != FEATURE_COUNT {
            return Err(ModelError::InvalidFeatureVector(format!(
                "expected {} values, got {}",
                FEATURE_COUNT,
                values.len()
            )));
        }
        let v = Self::from_array([
            values[0], values[1], values[2], values[3], values[4], values[5],
        ]);
        v.validate()?;
        Ok(v)
    }

    pub fn from_array(a: [f64; FEATURE_COUNT]) -> Self {
        Self::new(a[0], a[1], a[2], a[3], a[4], a[5])
    }

    pub fn to_array(&self) -> [f64; FEATURE_COUNT] {
        [
            self.bandwidth,
            self.throughput,
            self.congestion,
            self.packet_loss,
            self.latency,
            self.jitter,
        ]
    }

    /// Check value ranges: every metric finite and non-negative, percentages at most 100.
    pub fn validate(&self) -> Result<(), ModelError> {
        for (name, value) in FEATURE_NAMES.iter().zip(self.to_array()) {
            if !value.is_finite() {
                return Err(ModelError::InvalidFeatureVector(format!(
                    "{} must be finite, got {}",
                    name, value
                )));
            }
            if value < 0.0 {
                return Err(ModelError::InvalidFeatureVector(format!(
                    "{} must be non-negative, got {}",
                    name, value
                )));
            }
        }
        if self.congestion > 100.0 {
            return Err(ModelError::InvalidFeatureVector(format!(
                "congestion is a percentage, got {}",
                self.congestion
            )));
        }
        if self.packet_loss > 100.0 {
            return Err(ModelError::InvalidFeatureVector(format!(
                "packet_loss is a percentage, got {}",
                self.packet_loss
            )));
        }
        Ok(())
    }
}

/// Owned copy of [`FEATURE_NAMES`], the form artifacts and API responses carry.
pub fn feature_names() -> Vec<String> {
    FEATURE_NAMES.iter().map(|s| s.to_string()).collect()
}
