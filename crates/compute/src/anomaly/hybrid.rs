//! Multi-method classification: every point is checked against an absolute
//! threshold, a z-score, a percentile cut, the IQR fence and (metrics only)
//! the bucket-to-bucket rate of change. A point is anomalous when at least
//! one signal fires.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use tracelens_core::{numeric_fields, spans_from_response, SearchBackend, Span, TimeRange, TimeSeriesPoint};

use super::Severity;
use crate::query::{document_sample_body, fetch_metric_series, parse_hit_sources, span_search_body, MetricQuery};
use crate::stats::{self, Summary};

/// Percentile tiers reported as `percentile_rank`.
const RANK_TIERS: [f64; 6] = [25.0, 50.0, 75.0, 90.0, 95.0, 99.0];

/// Minimum spans per operation before group thresholds are computed.
pub const MIN_GROUP_SAMPLES: usize = 5;

/// Documents sampled for numeric field discovery.
const DISCOVERY_SAMPLE: usize = 20;

/// Name fragments that disqualify a field from discovery.
const DISCOVERY_EXCLUDED: [&str; 3] = ["timestamp", "id", "time"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Absolute,
    Zscore,
    Percentile,
    Iqr,
    RateOfChange,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HybridOptions {
    /// Absolute threshold; the series mean when unset.
    pub threshold: Option<f64>,
    pub z_threshold: f64,
    pub percentile: f64,
    /// Percent change between consecutive buckets.
    pub change_threshold: f64,
    pub max_results: usize,
}

impl Default for HybridOptions {
    fn default() -> Self {
        Self {
            threshold: None,
            z_threshold: 3.0,
            percentile: 95.0,
            change_threshold: 50.0,
            max_results: 50,
        }
    }
}

/// Thresholds resolved against one population of values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HybridThresholds {
    pub absolute: f64,
    pub z_score: f64,
    pub percentile: f64,
    pub percentile_value: f64,
    pub iqr_upper: f64,
    pub change_percent: f64,
}

impl HybridThresholds {
    fn resolve(summary: &Summary, sorted: &[f64], options: &HybridOptions) -> Self {
        Self {
            absolute: options.threshold.unwrap_or(summary.mean),
            z_score: options.z_threshold,
            percentile: options.percentile,
            percentile_value: stats::percentile(sorted, options.percentile),
            iqr_upper: summary.p75 + 1.5 * summary.iqr,
            change_percent: options.change_threshold,
        }
    }

    fn signals(&self, value: f64, z: f64) -> Vec<SignalKind> {
        let mut fired = Vec::new();
        if value > self.absolute {
            fired.push(SignalKind::Absolute);
        }
        if z.abs() > self.z_score {
            fired.push(SignalKind::Zscore);
        }
        if value > self.percentile_value {
            fired.push(SignalKind::Percentile);
        }
        if value > self.iqr_upper {
            fired.push(SignalKind::Iqr);
        }
        fired
    }
}

/// Highest tier in [`RANK_TIERS`] whose percentile `value` strictly exceeds.
fn percentile_rank(sorted: &[f64], value: f64) -> f64 {
    RANK_TIERS
        .iter()
        .rev()
        .find(|&&p| value > stats::percentile(sorted, p))
        .copied()
        .unwrap_or(0.0)
}

/// One classified bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HybridAnomaly {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub z_score: f64,
    pub percentile_rank: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_percent: Option<f64>,
    pub detection_methods: Vec<SignalKind>,
    pub is_anomaly: bool,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

/// Classify every present point of `series`. `is_anomaly` is set exactly
/// when `detection_methods` is non-empty.
pub fn classify_buckets(series: &[TimeSeriesPoint], options: &HybridOptions) -> (Vec<HybridAnomaly>, Summary, HybridThresholds) {
    let points: Vec<(DateTime<Utc>, f64)> = series
        .iter()
        .filter_map(|p| p.value.map(|v| (p.timestamp, v)))
        .collect();
    let values: Vec<f64> = points.iter().map(|(_, v)| *v).collect();
    let summary = Summary::of(&values);
    let sorted = stats::sorted(&values);
    let thresholds = HybridThresholds::resolve(&summary, &sorted, options);

    let mut previous: Option<f64> = None;
    let classified = points
        .iter()
        .map(|&(timestamp, value)| {
            let z = summary.z_score(value);
            let mut methods = thresholds.signals(value, z);

            let change_percent = previous
                .filter(|prev| prev.abs() > f64::EPSILON)
                .map(|prev| (value - prev) / prev.abs() * 100.0);
            if change_percent.is_some_and(|c| c.abs() > options.change_threshold) {
                methods.push(SignalKind::RateOfChange);
            }
            previous = Some(value);

            HybridAnomaly {
                timestamp,
                value,
                z_score: z,
                percentile_rank: percentile_rank(&sorted, value),
                change_percent,
                is_anomaly: !methods.is_empty(),
                detection_methods: methods,
                severity: Severity::from_z(z),
                field: None,
            }
        })
        .collect();

    (classified, summary, thresholds)
}

fn rank_by_z<T>(items: &mut Vec<T>, z: impl Fn(&T) -> f64, max_results: usize) {
    items.sort_by(|a, b| z(b).abs().total_cmp(&z(a).abs()));
    items.truncate(max_results);
}

/// Anomalous buckets only, largest |z| first, capped at `max_results`.
pub fn detect_bucket_anomalies(series: &[TimeSeriesPoint], options: &HybridOptions) -> Vec<HybridAnomaly> {
    let (classified, _, _) = classify_buckets(series, options);
    let mut anomalies: Vec<HybridAnomaly> = classified.into_iter().filter(|a| a.is_anomaly).collect();
    rank_by_z(&mut anomalies, |a| a.z_score, options.max_results);
    anomalies
}

/// Per-field detail of a hybrid run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDetection {
    pub field: String,
    pub total_points: usize,
    pub anomaly_count: usize,
    pub statistics: Summary,
    pub thresholds: HybridThresholds,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HybridDetectionResult {
    pub fields: Vec<FieldDetection>,
    pub anomalies: Vec<HybridAnomaly>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Run the hybrid classifier over one already fetched field series.
pub fn detect_field(field: &str, series: &[TimeSeriesPoint], options: &HybridOptions) -> (FieldDetection, Vec<HybridAnomaly>) {
    let (classified, statistics, thresholds) = classify_buckets(series, options);
    let total_points = classified.len();
    let mut anomalies: Vec<HybridAnomaly> = classified
        .into_iter()
        .filter(|a| a.is_anomaly)
        .map(|mut a| {
            a.field = Some(field.to_string());
            a
        })
        .collect();
    let anomaly_count = anomalies.len();
    rank_by_z(&mut anomalies, |a| a.z_score, options.max_results);

    let detection = FieldDetection {
        field: field.to_string(),
        total_points,
        anomaly_count,
        statistics,
        thresholds,
        error: None,
    };
    (detection, anomalies)
}

/// One anomalous span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanDurationAnomaly {
    pub trace_id: String,
    pub span_id: String,
    pub service: String,
    pub operation: String,
    pub duration: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    pub z_score: f64,
    pub percentile_rank: f64,
    pub detection_methods: Vec<SignalKind>,
    pub is_anomaly: bool,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationGroup {
    pub operation: String,
    pub samples: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anomaly_count: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanAnomalyResult {
    pub total_spans: usize,
    pub analyzed_groups: Vec<OperationGroup>,
    /// Groups below [`MIN_GROUP_SAMPLES`].
    pub skipped_groups: Vec<OperationGroup>,
    pub anomalies: Vec<SpanDurationAnomaly>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SpanAnomalyResult {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            total_spans: 0,
            analyzed_groups: Vec::new(),
            skipped_groups: Vec::new(),
            anomalies: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// Group spans by operation name and classify durations against each
/// group's own thresholds. Rate of change is not applied to spans.
pub fn detect_span_anomalies(spans: &[Span], options: &HybridOptions) -> SpanAnomalyResult {
    let mut groups: BTreeMap<&str, Vec<&Span>> = BTreeMap::new();
    for span in spans {
        groups.entry(span.name.as_str()).or_default().push(span);
    }

    let mut analyzed_groups = Vec::new();
    let mut skipped_groups = Vec::new();
    let mut anomalies = Vec::new();

    for (operation, members) in groups {
        if members.len() < MIN_GROUP_SAMPLES {
            skipped_groups.push(OperationGroup {
                operation: operation.to_string(),
                samples: members.len(),
                mean_duration: None,
                anomaly_count: None,
            });
            continue;
        }

        let durations: Vec<f64> = members.iter().map(|s| s.duration).collect();
        let summary = Summary::of(&durations);
        let sorted = stats::sorted(&durations);
        let thresholds = HybridThresholds::resolve(&summary, &sorted, options);

        let before = anomalies.len();
        for span in members {
            let z = summary.z_score(span.duration);
            let methods = thresholds.signals(span.duration, z);
            if methods.is_empty() {
                continue;
            }
            anomalies.push(SpanDurationAnomaly {
                trace_id: span.trace_id.clone(),
                span_id: span.span_id.clone(),
                service: span.service.clone(),
                operation: operation.to_string(),
                duration: span.duration,
                start_time: span.start_time,
                z_score: z,
                percentile_rank: percentile_rank(&sorted, span.duration),
                detection_methods: methods,
                is_anomaly: true,
                severity: Severity::from_z(z),
            });
        }

        analyzed_groups.push(OperationGroup {
            operation: operation.to_string(),
            samples: durations.len(),
            mean_duration: Some(summary.mean),
            anomaly_count: Some(anomalies.len() - before),
        });
    }

    rank_by_z(&mut anomalies, |a| a.z_score, options.max_results);
    debug!(
        spans = spans.len(),
        groups = analyzed_groups.len(),
        skipped = skipped_groups.len(),
        anomalies = anomalies.len(),
        "span duration classification complete"
    );

    SpanAnomalyResult {
        total_spans: spans.len(),
        analyzed_groups,
        skipped_groups,
        anomalies,
        error: None,
    }
}

/// Backend-driven hybrid detector for metric fields and span durations.
pub struct HybridAnomalyDetector {
    backend: Arc<dyn SearchBackend>,
}

impl HybridAnomalyDetector {
    pub fn new(backend: Arc<dyn SearchBackend>) -> Self {
        Self { backend }
    }

    /// Numeric fields seen in a sample of metric documents.
    pub async fn discover_fields(&self, range: &TimeRange, filters: &[Value]) -> Vec<String> {
        let body = document_sample_body(range, DISCOVERY_SAMPLE, filters);
        match self.backend.search_metrics(&body).await {
            Ok(response) => numeric_fields(&parse_hit_sources(&response), &DISCOVERY_EXCLUDED),
            Err(e) => {
                warn!(error = %e, "field discovery failed");
                Vec::new()
            }
        }
    }

    /// Classify the buckets of `field`, or of every discovered numeric field
    /// when `field` is `None`. Results across fields are merged and re-ranked.
    pub async fn detect_metric(
        &self,
        field: Option<&str>,
        range: TimeRange,
        interval: &str,
        filters: &[Value],
        options: &HybridOptions,
    ) -> HybridDetectionResult {
        let fields = match field {
            Some(f) => vec![f.to_string()],
            None => self.discover_fields(&range, filters).await,
        };

        let mut result = HybridDetectionResult {
            fields: Vec::with_capacity(fields.len()),
            anomalies: Vec::new(),
            message: None,
            error: None,
        };
        if fields.is_empty() {
            result.message = Some("no numeric fields found to analyze".to_string());
            return result;
        }

        let mut failures = 0;
        for name in &fields {
            let query = MetricQuery {
                metric: name.clone(),
                range,
                interval: interval.to_string(),
                filters: filters.to_vec(),
            };
            match fetch_metric_series(self.backend.as_ref(), &query).await {
                Ok(series) => {
                    let (detection, anomalies) = detect_field(name, &series, options);
                    result.fields.push(detection);
                    result.anomalies.extend(anomalies);
                }
                Err(e) => {
                    warn!(field = %name, error = %e, "hybrid fetch failed, skipping field");
                    failures += 1;
                    result.fields.push(FieldDetection {
                        field: name.clone(),
                        total_points: 0,
                        anomaly_count: 0,
                        statistics: Summary::default(),
                        thresholds: HybridThresholds::resolve(&Summary::default(), &[], options),
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        if failures == fields.len() {
            result.error = Some(format!("all {failures} field fetches failed"));
        }
        rank_by_z(&mut result.anomalies, |a| a.z_score, options.max_results);
        info!(
            fields = fields.len(),
            anomalies = result.anomalies.len(),
            "hybrid metric detection complete"
        );
        result
    }

    /// Fetch spans in `range` and classify their durations per operation.
    pub async fn detect_spans(
        &self,
        range: &TimeRange,
        max_spans: usize,
        filters: &[Value],
        options: &HybridOptions,
    ) -> SpanAnomalyResult {
        let body = span_search_body(range, max_spans, filters);
        match self.backend.search_traces(&body).await {
            Ok(response) => {
                let spans = spans_from_response(&response);
                let result = detect_span_anomalies(&spans, options);
                info!(
                    spans = result.total_spans,
                    anomalies = result.anomalies.len(),
                    "span duration detection complete"
                );
                result
            }
            Err(e) => {
                warn!(error = %e, "span fetch failed");
                SpanAnomalyResult::failed(e.to_string())
            }
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

    fn spike_series() -> Vec<TimeSeriesPoint> {
        let mut values = vec![5.0; 60];
        values[30] = 500.0;
        minute_series(&values)
    }

    fn span(name: &str, id: usize, duration: f64) -> Span {
        Span {
            trace_id: format!("t{id}"),
            span_id: format!("s{id}"),
            parent_span_id: None,
            service: "checkout".into(),
            name: name.into(),
            duration,
            error: false,
            start_time: None,
        }
    }

    #[test]
    fn single_spike_is_flagged_by_zscore_and_iqr() {
        let anomalies = detect_bucket_anomalies(&spike_series(), &HybridOptions::default());
        let top = &anomalies[0];
        assert_eq!(top.value, 500.0);
        assert!(top.detection_methods.contains(&SignalKind::Zscore));
        assert!(top.detection_methods.contains(&SignalKind::Iqr));
        assert_eq!(top.percentile_rank, 99.0);
        assert_eq!(top.severity, Severity::Critical);
    }

    #[test]
    fn anomaly_flag_matches_methods() {
        let (classified, _, _) = classify_buckets(&spike_series(), &HybridOptions::default());
        assert_eq!(classified.len(), 60);
        for point in &classified {
            assert_eq!(point.is_anomaly, !point.detection_methods.is_empty());
        }
        // the drop back to baseline is a rate-of-change signal only
        assert_eq!(classified[31].detection_methods, vec![SignalKind::RateOfChange]);
        assert!(!classified[10].is_anomaly);
    }

    #[test]
    fn explicit_threshold_and_cap() {
        let options = HybridOptions {
            threshold: Some(1.0),
            max_results: 3,
            ..HybridOptions::default()
        };
        let anomalies = detect_bucket_anomalies(&spike_series(), &options);
        assert_eq!(anomalies.len(), 3);
        assert_eq!(anomalies[0].value, 500.0);
    }

    #[test]
    fn first_bucket_has_no_change() {
        let (classified, _, _) = classify_buckets(&minute_series(&[0.0, 10.0, 11.0]), &HybridOptions::default());
        assert!(classified[0].change_percent.is_none());
        // previous value of 0 yields no rate
        assert!(classified[1].change_percent.is_none());
        assert!((classified[2].change_percent.unwrap() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn span_groups_below_floor_are_skipped() {
        let mut spans: Vec<Span> = (0..20).map(|i| span("GET /cart", i, 10.0)).collect();
        spans[7].duration = 400.0;
        spans.extend((20..23).map(|i| span("POST /pay", i, 1000.0)));

        let result = detect_span_anomalies(&spans, &HybridOptions::default());
        assert_eq!(result.total_spans, 23);
        assert_eq!(result.skipped_groups.len(), 1);
        assert_eq!(result.skipped_groups[0].operation, "POST /pay");
        assert_eq!(result.skipped_groups[0].samples, 3);
        assert_eq!(result.anomalies.len(), 1);
        assert_eq!(result.anomalies[0].span_id, "s7");
        assert!(result.anomalies[0].detection_methods.contains(&SignalKind::Zscore));
        assert_eq!(result.analyzed_groups[0].anomaly_count, Some(1));
    }

    #[test]
    fn signal_kinds_serialize_snake_case() {
        assert_eq!(serde_json::to_value(SignalKind::RateOfChange).unwrap(), "rate_of_change");
    }
}
