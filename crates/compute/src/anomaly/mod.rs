//! Anomaly detection over metric series and span durations.
//!
//! Sub-modules:
//! - [`metric`]: single-method detector (z-score, MAD, isolation, percentile)
//! - [`hybrid`]: multi-method classification of metric buckets and spans

pub mod hybrid;
pub mod metric;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use hybrid::{
    classify_buckets, detect_bucket_anomalies, detect_field, detect_span_anomalies,
    FieldDetection, HybridAnomaly, HybridAnomalyDetector, HybridDetectionResult, HybridOptions,
    HybridThresholds, OperationGroup, SignalKind, SpanAnomalyResult, SpanDurationAnomaly,
};
pub use metric::{
    compare_anomaly_patterns, detect, remove_seasonality, AnomalyDetectionResult, AnomalyPatternComparison,
    DetectionMethod, DetectorConfig, MetricAnomalyDetector, PeriodComparison, ThresholdBand,
};

/// Shape of a detected anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    Spike,
    Dip,
    Pattern,
    LevelShift,
}

/// A single anomalous point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anomaly {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    /// In `[0, 1]`.
    pub score: f64,
    #[serde(rename = "type")]
    pub anomaly_type: AnomalyType,
    /// Method-specific detail (z-score, threshold, expected value, ...).
    pub metadata: Value,
}

/// Coarse severity bucket from an absolute z-score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn from_z(z: f64) -> Self {
        let z = z.abs();
        if z > 4.0 {
            Severity::Critical
        } else if z > 3.0 {
            Severity::High
        } else if z > 2.0 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_buckets() {
        assert_eq!(Severity::from_z(-4.5), Severity::Critical);
        assert_eq!(Severity::from_z(3.2), Severity::High);
        assert_eq!(Severity::from_z(2.5), Severity::Medium);
        assert_eq!(Severity::from_z(0.1), Severity::Low);
    }

    #[test]
    fn anomaly_type_serializes_snake_case() {
        assert_eq!(serde_json::to_value(AnomalyType::LevelShift).unwrap(), "level_shift");
    }
}
