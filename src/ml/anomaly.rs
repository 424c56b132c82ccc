//! Anomaly scoring over the feature vector.

use crate::features::{FeatureVector, FEATURE_COUNT};
use crate::ml::fallback::FallbackDetector;
use crate::ml::isolation::IsolationForest;
use crate::ml::scaler::StandardScaler;
use crate::ml::AnomalyResult;

/// Raw detector output before the [0, 1] transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawAnomaly {
    pub is_anomaly: bool,
    /// Normality; negative or low means anomalous.
    pub raw_score: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnomalyDetector {
    /// Isolation forest trained on standardized features, paired with its scaler.
    Trained {
        forest: IsolationForest,
        scaler: StandardScaler,
    },
    /// Threshold rules over raw features.
    Fallback(FallbackDetector),
}

impl AnomalyDetector {
    pub fn is_fallback(&self) -> bool {
        matches!(self, AnomalyDetector::Fallback(_))
    }

    /// Score an unscaled vector. The trained variant standardizes first.
    pub fn predict(&self, x: &[f64; FEATURE_COUNT]) -> RawAnomaly {
        match self {
            AnomalyDetector::Trained { forest, scaler } => {
                let raw_score = forest.decision_function(&scaler.transform(x));
                RawAnomaly {
                    is_anomaly: raw_score < 0.0,
                    raw_score,
                }
            }
            AnomalyDetector::Fallback(d) => RawAnomaly {
                is_anomaly: d.predict(x),
                raw_score: d.decision_function(x),
            },
        }
    }

    pub fn detect(&self, v: &FeatureVector) -> AnomalyResult {
        let raw = self.predict(&v.to_array());
        AnomalyResult {
            is_anomaly: raw.is_anomaly,
            score: anomaly_score(raw.raw_score),
            explanation: describe_anomaly(v, raw.is_anomaly),
        }
    }
}

/// Map a normality score onto [0, 1] where higher is more anomalous.
pub fn anomaly_score(raw_score: f64) -> f64 {
    ((1.0 - raw_score) / 2.0).clamp(0.0, 1.0)
}

/// Human-readable summary of which metrics look wrong.
pub fn describe_anomaly(v: &FeatureVector, is_anomaly: bool) -> String {
    if !is_anomaly {
        return "Network metrics are within normal parameters".to_string();
    }

    let mut findings = Vec::new();
    if v.latency > 15.0 {
        findings.push(format!("High latency detected ({:.1}ms)", v.latency));
    }
    if v.packet_loss > 5.0 {
        findings.push(format!("High packet loss detected ({:.1}%)", v.packet_loss));
    }
    if v.jitter > 5.0 {
        findings.push(format!("High jitter detected ({:.1}ms)", v.jitter));
    }
    if v.congestion > 80.0 {
        findings.push(format!("High network congestion ({:.1}%)", v.congestion));
    }
    if v.throughput < v.bandwidth * 0.3 {
        findings.push("Low throughput efficiency".to_string());
    }

    if findings.is_empty() {
        "Anomalous pattern detected in network metrics".to_string()
    } else {
        findings.join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::fallback::FallbackConfig;

    fn fallback() -> AnomalyDetector {
        AnomalyDetector::Fallback(FallbackDetector {
            rules: FallbackConfig::default(),
        })
    }

    #[test]
    fn test_score_transform_bounds() {
        assert_eq!(anomaly_score(1.0), 0.0);
        assert_eq!(anomaly_score(-1.0), 1.0);
        assert_eq!(anomaly_score(0.0), 0.5);
        assert_eq!(anomaly_score(3.0), 0.0);
        assert_eq!(anomaly_score(-3.0), 1.0);
    }

    #[test]
    fn test_fallback_score_monotone_in_latency() {
        let d = fallback();
        let mut last_score = -1.0;
        let mut seen_anomaly = false;
        for step in 0..60 {
            let v = FeatureVector::new(100.0, 20.0, 10.0, 1.0, step as f64, 0.5);
            let r = d.detect(&v);
            assert!((0.0..=1.0).contains(&r.score));
            assert!(r.score >= last_score);
            // once flagged, stays flagged as latency grows
            if seen_anomaly {
                assert!(r.is_anomaly);
            }
            seen_anomaly |= r.is_anomaly;
            last_score = r.score;
        }
        assert!(seen_anomaly);
    }

    #[test]
    fn test_explanations() {
        let healthy = FeatureVector::new(100.0, 20.0, 10.0, 1.0, 5.0, 0.5);
        let r = fallback().detect(&healthy);
        assert!(!r.is_anomaly);
        assert_eq!(r.explanation, "Network metrics are within normal parameters");

        let degraded = FeatureVector::new(50.0, 5.0, 90.0, 8.0, 25.0, 6.0);
        let r = fallback().detect(&degraded);
        assert!(r.is_anomaly);
        assert!(r.explanation.contains("High latency detected (25.0ms)"));
        assert!(r.explanation.contains("High packet loss detected (8.0%)"));
        assert!(r.explanation.contains("High jitter detected (6.0ms)"));
        assert!(r.explanation.contains("High network congestion (90.0%)"));
        assert!(r.explanation.contains("Low throughput efficiency"));
    }

    #[test]
    fn test_generic_explanation_when_no_rule_fires() {
        let v = FeatureVector::new(100.0, 80.0, 10.0, 1.0, 5.0, 0.5);
        assert_eq!(
            describe_anomaly(&v, true),
            "Anomalous pattern detected in network metrics"
        );
    }
}
