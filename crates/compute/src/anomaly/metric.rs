//! Single-method anomaly detector over a metric series.
//!
//! Sensitivity is in `[0, 1]`; higher values lower the z/MAD thresholds
//! and the isolation cut-off. "Isolation" here is a neighbor-distance
//! heuristic, not an isolation forest.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use tracelens_core::{SearchBackend, TimeRange, TimeSeriesPoint};

use super::{Anomaly, AnomalyType};
use crate::query::{fetch_metric_series, MetricQuery};
use crate::stats::{self, Summary};
use crate::timeseries::{detect_change_points, ChangeKind};

/// Modified z-score constant (0.6745 = Φ⁻¹(0.75)).
const MAD_SCALE: f64 = 0.6745;

/// Rate delta (percentage points) above which two periods differ significantly.
const SIGNIFICANT_RATE_CHANGE: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMethod {
    #[default]
    Zscore,
    Mad,
    Isolation,
    Percentile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub method: DetectionMethod,
    pub sensitivity: f64,
    /// Minimum present points before detection runs; also the isolation radius.
    pub window_size: usize,
    pub remove_seasonality: bool,
    /// Period (in buckets) used for seasonality removal.
    pub seasonality_period: usize,
    /// Also report level shifts found by the change-point scan.
    pub detect_level_shifts: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            method: DetectionMethod::Zscore,
            sensitivity: 0.5,
            window_size: 5,
            remove_seasonality: false,
            seasonality_period: 24,
            detect_level_shifts: false,
        }
    }
}

impl DetectorConfig {
    fn sensitivity(&self) -> f64 {
        self.sensitivity.clamp(0.0, 1.0)
    }

    /// z threshold in `[1, 3]`.
    pub fn z_threshold(&self) -> f64 {
        3.0 - self.sensitivity() * 2.0
    }

    /// Modified z threshold in `[1.5, 3.5]`.
    pub fn mad_threshold(&self) -> f64 {
        3.5 - self.sensitivity() * 2.0
    }
}

/// `mean ± z * stdDev`, reported for display regardless of method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdBand {
    pub upper: f64,
    pub lower: f64,
    pub z: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyDetectionResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,
    pub method: DetectionMethod,
    pub sensitivity: f64,
    pub total_points: usize,
    pub anomalies: Vec<Anomaly>,
    /// Percent of present points flagged.
    pub anomaly_rate: f64,
    pub statistics: Summary,
    pub thresholds: ThresholdBand,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AnomalyDetectionResult {
    fn empty(config: &DetectorConfig) -> Self {
        Self {
            metric: None,
            method: config.method,
            sensitivity: config.sensitivity(),
            total_points: 0,
            anomalies: Vec::new(),
            anomaly_rate: 0.0,
            statistics: Summary::default(),
            thresholds: ThresholdBand {
                upper: 0.0,
                lower: 0.0,
                z: config.z_threshold(),
            },
            message: None,
            error: None,
        }
    }

    pub fn failed(config: &DetectorConfig, metric: &str, error: impl Into<String>) -> Self {
        let mut result = Self::empty(config);
        result.metric = Some(metric.to_string());
        result.error = Some(error.into());
        result
    }
}

/// Subtract each value's phase mean and add back the global mean.
pub fn remove_seasonality(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period * 2 {
        return values.to_vec();
    }
    let global = stats::mean(values);
    let phase_means: Vec<f64> = (0..period)
        .map(|offset| {
            let phase: Vec<f64> = values.iter().skip(offset).step_by(period).copied().collect();
            stats::mean(&phase)
        })
        .collect();
    values
        .iter()
        .enumerate()
        .map(|(i, v)| v - phase_means[i % period] + global)
        .collect()
}

/// Detect anomalies in `series` with the configured method.
pub fn detect(series: &[TimeSeriesPoint], config: &DetectorConfig) -> AnomalyDetectionResult {
    let points: Vec<(DateTime<Utc>, f64)> = series
        .iter()
        .filter_map(|p| p.value.map(|v| (p.timestamp, v)))
        .collect();

    let mut result = AnomalyDetectionResult::empty(config);
    result.total_points = points.len();

    if points.len() < config.window_size.max(2) {
        result.message = Some(format!(
            "insufficient data: {} points, need at least {}",
            points.len(),
            config.window_size.max(2)
        ));
        return result;
    }

    let raw: Vec<f64> = points.iter().map(|(_, v)| *v).collect();
    let values = if config.remove_seasonality {
        remove_seasonality(&raw, config.seasonality_period)
    } else {
        raw.clone()
    };

    let statistics = Summary::of(&values);
    let z = config.z_threshold();
    result.thresholds = ThresholdBand {
        upper: statistics.mean + z * statistics.std_dev,
        lower: statistics.mean - z * statistics.std_dev,
        z,
    };

    let mut anomalies = match config.method {
        DetectionMethod::Zscore => zscore_anomalies(&points, &values, &statistics, config),
        DetectionMethod::Mad => mad_anomalies(&points, &values, config),
        DetectionMethod::Isolation => isolation_anomalies(&points, &values, config),
        DetectionMethod::Percentile => percentile_anomalies(&points, &values, config),
    };

    if config.detect_level_shifts {
        anomalies.extend(level_shift_anomalies(series));
        anomalies.sort_by_key(|a| a.timestamp);
    }

    result.anomaly_rate = anomalies.len() as f64 / points.len() as f64 * 100.0;
    result.statistics = statistics;
    result.anomalies = anomalies;

    debug!(
        method = ?config.method,
        points = points.len(),
        anomalies = result.anomalies.len(),
        "metric anomaly detection complete"
    );
    result
}

fn direction(value: f64, reference: f64) -> AnomalyType {
    if value > reference {
        AnomalyType::Spike
    } else {
        AnomalyType::Dip
    }
}

fn zscore_anomalies(
    points: &[(DateTime<Utc>, f64)],
    values: &[f64],
    statistics: &Summary,
    config: &DetectorConfig,
) -> Vec<Anomaly> {
    let threshold = config.z_threshold();
    if statistics.std_dev <= f64::EPSILON {
        return Vec::new();
    }
    points
        .iter()
        .zip(values)
        .filter_map(|(&(timestamp, value), &v)| {
            let z = statistics.z_score(v);
            (z.abs() > threshold).then(|| Anomaly {
                timestamp,
                value,
                score: (z.abs() / (2.0 * threshold)).min(1.0),
                anomaly_type: direction(v, statistics.mean),
                metadata: json!({
                    "zScore": z,
                    "threshold": threshold,
                    "mean": statistics.mean,
                    "stdDev": statistics.std_dev,
                    "adjustedValue": v,
                }),
            })
        })
        .collect()
}

fn mad_anomalies(
    points: &[(DateTime<Utc>, f64)],
    values: &[f64],
    config: &DetectorConfig,
) -> Vec<Anomaly> {
    let threshold = config.mad_threshold();
    let median = stats::median(values);
    let mad = stats::mad(values);
    if mad <= f64::EPSILON {
        return Vec::new();
    }
    points
        .iter()
        .zip(values)
        .filter_map(|(&(timestamp, value), &v)| {
            let modified_z = MAD_SCALE * (v - median) / mad;
            (modified_z.abs() > threshold).then(|| Anomaly {
                timestamp,
                value,
                score: (modified_z.abs() / (2.0 * threshold)).min(1.0),
                anomaly_type: direction(v, median),
                metadata: json!({
                    "modifiedZScore": modified_z,
                    "threshold": threshold,
                    "median": median,
                    "mad": mad,
                }),
            })
        })
        .collect()
}

fn isolation_anomalies(
    points: &[(DateTime<Utc>, f64)],
    values: &[f64],
    config: &DetectorConfig,
) -> Vec<Anomaly> {
    let n = values.len();
    let radius = config.window_size.max(1);
    let cutoff = 1.0 - config.sensitivity();
    let mut anomalies = Vec::new();

    for i in 1..n.saturating_sub(1) {
        let lo = i.saturating_sub(radius);
        let hi = (i + radius).min(n - 1);
        let neighbors: Vec<f64> = (lo..=hi).filter(|&j| j != i).map(|j| values[j]).collect();
        let distances: Vec<f64> = neighbors.iter().map(|v| (values[i] - v).abs()).collect();
        let max_distance = distances.iter().copied().fold(0.0, f64::max);
        if max_distance <= f64::EPSILON {
            continue;
        }
        let isolation = stats::mean(&distances) / max_distance;
        if isolation > cutoff {
            let neighborhood_mean = stats::mean(&neighbors);
            anomalies.push(Anomaly {
                timestamp: points[i].0,
                value: points[i].1,
                score: isolation.min(1.0),
                anomaly_type: AnomalyType::Pattern,
                metadata: json!({
                    "isolationScore": isolation,
                    "cutoff": cutoff,
                    "neighborhoodMean": neighborhood_mean,
                    "direction": direction(values[i], neighborhood_mean),
                }),
            });
        }
    }
    anomalies
}

fn percentile_anomalies(
    points: &[(DateTime<Utc>, f64)],
    values: &[f64],
    config: &DetectorConfig,
) -> Vec<Anomaly> {
    let tail = (1.0 - config.sensitivity()) / 2.0;
    let sorted = stats::sorted(values);
    let lower = stats::percentile(&sorted, tail * 100.0);
    let upper = stats::percentile(&sorted, (1.0 - tail) * 100.0);
    let width = upper - lower;

    points
        .iter()
        .zip(values)
        .filter_map(|(&(timestamp, value), &v)| {
            let beyond = if v > upper {
                v - upper
            } else if v < lower {
                lower - v
            } else {
                return None;
            };
            let score = if width > f64::EPSILON {
                (beyond / width).min(1.0)
            } else {
                1.0
            };
            Some(Anomaly {
                timestamp,
                value,
                score,
                anomaly_type: if v > upper { AnomalyType::Spike } else { AnomalyType::Dip },
                metadata: json!({
                    "lowerBound": lower,
                    "upperBound": upper,
                    "lowerPercentile": tail * 100.0,
                    "upperPercentile": (1.0 - tail) * 100.0,
                }),
            })
        })
        .collect()
}

/// First index of each run of consecutive level-change points.
fn level_shift_anomalies(series: &[TimeSeriesPoint]) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();
    let mut last_index: Option<usize> = None;

    for cp in detect_change_points(series) {
        if cp.kind == ChangeKind::Variance {
            continue;
        }
        let continues_run = last_index.is_some_and(|prev| cp.index == prev + 1);
        last_index = Some(cp.index);
        if continues_run {
            continue;
        }
        let scale = cp.before_mean.abs().max(cp.after_mean.abs()).max(f64::EPSILON);
        anomalies.push(Anomaly {
            timestamp: cp.timestamp,
            value: cp.after_mean,
            score: (cp.magnitude.abs() / scale).min(1.0),
            anomaly_type: AnomalyType::LevelShift,
            metadata: json!({
                "beforeMean": cp.before_mean,
                "afterMean": cp.after_mean,
                "direction": cp.kind,
            }),
        });
    }
    anomalies
}

/// Difference between two periods' anomaly results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyPatternComparison {
    pub current_rate: f64,
    pub previous_rate: f64,
    /// Percentage points.
    pub rate_change: f64,
    pub current_types: Vec<AnomalyType>,
    pub previous_types: Vec<AnomalyType>,
    pub new_types: Vec<AnomalyType>,
    pub resolved_types: Vec<AnomalyType>,
    pub significant_change: bool,
}

/// Compare the anomaly-type sets and rates of two detection results.
pub fn compare_anomaly_patterns(
    current: &AnomalyDetectionResult,
    previous: &AnomalyDetectionResult,
) -> AnomalyPatternComparison {
    let types = |r: &AnomalyDetectionResult| -> BTreeSet<AnomalyType> {
        r.anomalies.iter().map(|a| a.anomaly_type).collect()
    };
    let (now, before) = (types(current), types(previous));
    let rate_change = current.anomaly_rate - previous.anomaly_rate;

    AnomalyPatternComparison {
        current_rate: current.anomaly_rate,
        previous_rate: previous.anomaly_rate,
        rate_change,
        current_types: now.iter().copied().collect(),
        previous_types: before.iter().copied().collect(),
        new_types: now.difference(&before).copied().collect(),
        resolved_types: before.difference(&now).copied().collect(),
        significant_change: rate_change.abs() > SIGNIFICANT_RATE_CHANGE,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodComparison {
    pub current: AnomalyDetectionResult,
    pub previous: AnomalyDetectionResult,
    pub comparison: AnomalyPatternComparison,
}

/// Backend-driven detector; the backend is injected at construction.
pub struct MetricAnomalyDetector {
    backend: Arc<dyn SearchBackend>,
    config: DetectorConfig,
}

impl MetricAnomalyDetector {
    pub fn new(backend: Arc<dyn SearchBackend>, config: DetectorConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Fetch and score one metric. Fetch failures produce an empty result with `error`.
    pub async fn detect(&self, query: &MetricQuery) -> AnomalyDetectionResult {
        match fetch_metric_series(self.backend.as_ref(), query).await {
            Ok(series) => {
                let mut result = detect(&series, &self.config);
                result.metric = Some(query.metric.clone());
                info!(
                    metric = %query.metric,
                    anomalies = result.anomalies.len(),
                    "metric anomalies detected"
                );
                result
            }
            Err(e) => {
                warn!(metric = %query.metric, error = %e, "metric fetch failed, skipping");
                AnomalyDetectionResult::failed(&self.config, &query.metric, e.to_string())
            }
        }
    }

    /// Score several metrics; fetches run concurrently.
    pub async fn detect_multiple(&self, queries: &[MetricQuery]) -> Vec<AnomalyDetectionResult> {
        join_all(queries.iter().map(|q| self.detect(q))).await
    }

    /// Score `query` and the same metric over `previous`, then compare.
    pub async fn compare_periods(&self, query: &MetricQuery, previous: TimeRange) -> PeriodComparison {
        let previous_query = MetricQuery {
            range: previous,
            ..query.clone()
        };
        let (current, previous) = futures::join!(self.detect(query), self.detect(&previous_query));
        let comparison = compare_anomaly_patterns(&current, &previous);
        PeriodComparison {
            current,
            previous,
            comparison,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn minute_series(values: &[f64]) -> Vec<TimeSeriesPoint> {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| TimeSeriesPoint::new(t0 + Duration::minutes(i as i64), *v))
            .collect()
    }

    fn config(method: DetectionMethod, sensitivity: f64) -> DetectorConfig {
        DetectorConfig {
            method,
            sensitivity,
            ..DetectorConfig::default()
        }
    }

    #[test]
    fn zscore_flags_spike() {
        let result = detect(
            &minute_series(&[10.0, 10.0, 10.0, 10.0, 100.0]),
            &config(DetectionMethod::Zscore, 0.95),
        );
        assert_eq!(result.anomalies.len(), 1);
        let a = &result.anomalies[0];
        assert_eq!(a.value, 100.0);
        assert_eq!(a.anomaly_type, AnomalyType::Spike);
        // z = 2, threshold = 1.1
        assert!((a.score - 2.0 / 2.2).abs() < 1e-9);
        assert!((result.anomaly_rate - 20.0).abs() < 1e-9);
        assert!((result.thresholds.z - 1.1).abs() < 1e-9);
    }

    #[test]
    fn thresholds_follow_sensitivity() {
        assert!((config(DetectionMethod::Zscore, 0.0).z_threshold() - 3.0).abs() < 1e-12);
        assert!((config(DetectionMethod::Zscore, 1.0).z_threshold() - 1.0).abs() < 1e-12);
        assert!((config(DetectionMethod::Mad, 0.5).mad_threshold() - 2.5).abs() < 1e-12);
    }

    #[test]
    fn mad_flags_dip() {
        let values = [50.0, 51.0, 49.0, 50.0, 52.0, 48.0, 50.0, 5.0, 51.0, 49.0];
        let result = detect(&minute_series(&values), &config(DetectionMethod::Mad, 0.5));
        assert_eq!(result.anomalies.len(), 1);
        assert_eq!(result.anomalies[0].value, 5.0);
        assert_eq!(result.anomalies[0].anomaly_type, AnomalyType::Dip);
    }

    #[test]
    fn isolation_flags_isolated_point() {
        let mut values = vec![20.0; 15];
        values[7] = 80.0;
        let result = detect(&minute_series(&values), &config(DetectionMethod::Isolation, 0.5));
        assert_eq!(result.anomalies.len(), 1);
        assert_eq!(result.anomalies[0].value, 80.0);
        assert_eq!(result.anomalies[0].anomaly_type, AnomalyType::Pattern);
        assert!((result.anomalies[0].score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn percentile_band_edges() {
        let values: Vec<f64> = (0..=100).map(f64::from).collect();
        // sensitivity 0.8 -> band [10th, 90th] = [10, 90]
        let result = detect(&minute_series(&values), &config(DetectionMethod::Percentile, 0.8));
        let dips = result.anomalies.iter().filter(|a| a.anomaly_type == AnomalyType::Dip).count();
        let spikes = result.anomalies.iter().filter(|a| a.anomaly_type == AnomalyType::Spike).count();
        assert_eq!(dips, 10);
        assert_eq!(spikes, 10);
        let top = result.anomalies.iter().find(|a| a.value == 100.0).unwrap();
        assert!((top.score - 10.0 / 80.0).abs() < 1e-6);
    }

    #[test]
    fn insufficient_data_is_soft() {
        let result = detect(&minute_series(&[1.0, 2.0]), &DetectorConfig::default());
        assert!(result.anomalies.is_empty());
        assert!(result.message.is_some());
        assert!(result.error.is_none());
    }

    #[test]
    fn seasonality_removal_flattens_cycle() {
        let values: Vec<f64> = (0..8).map(|i| if i % 2 == 0 { 10.0 } else { 20.0 }).collect();
        let adjusted = remove_seasonality(&values, 2);
        assert!(adjusted.iter().all(|v| (v - 15.0).abs() < 1e-9));
    }

    #[test]
    fn level_shifts_reported_once_per_run() {
        let mut values = vec![10.0; 20];
        values.extend(vec![40.0; 20]);
        let result = detect(
            &minute_series(&values),
            &DetectorConfig {
                detect_level_shifts: true,
                ..DetectorConfig::default()
            },
        );
        let shifts: Vec<_> = result
            .anomalies
            .iter()
            .filter(|a| a.anomaly_type == AnomalyType::LevelShift)
            .collect();
        assert_eq!(shifts.len(), 1);
    }

    #[test]
    fn pattern_comparison_flags_rate_jump() {
        let cfg = DetectorConfig::default();
        let mut current = AnomalyDetectionResult::empty(&cfg);
        current.anomaly_rate = 25.0;
        current.anomalies.push(Anomaly {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            value: 1.0,
            score: 0.5,
            anomaly_type: AnomalyType::Spike,
            metadata: json!({}),
        });
        let mut previous = AnomalyDetectionResult::empty(&cfg);
        previous.anomaly_rate = 10.0;
        previous.anomalies.push(Anomaly {
            anomaly_type: AnomalyType::Dip,
            ..current.anomalies[0].clone()
        });

        let cmp = compare_anomaly_patterns(&current, &previous);
        assert!(cmp.significant_change);
        assert!((cmp.rate_change - 15.0).abs() < 1e-9);
        assert_eq!(cmp.new_types, vec![AnomalyType::Spike]);
        assert_eq!(cmp.resolved_types, vec![AnomalyType::Dip]);

        previous.anomaly_rate = 20.0;
        assert!(!compare_anomaly_patterns(&current, &previous).significant_change);
    }
}
