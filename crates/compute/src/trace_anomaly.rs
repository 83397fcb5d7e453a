//! Whole-trace anomaly detection: latency outliers per (service, root
//! operation), traces containing errors, and rare span-count shapes. Also
//! window-over-window drift and per-span health scoring.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use tracelens_core::{SearchBackend, TimeRange, Trace};

use crate::query::fetch_traces;
use crate::stats::{self, Summary};

/// Minimum traces per (service, operation) group for latency detection.
pub const MIN_LATENCY_GROUP: usize = 5;

/// Spans further than this many standard deviations from the trace mean are slow.
const SPAN_SIGMA: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceDetectionMethod {
    Latency,
    Error,
    Pattern,
    #[default]
    All,
}

impl TraceDetectionMethod {
    fn runs(self, kind: TraceAnomalyKind) -> bool {
        match self {
            Self::All => true,
            Self::Latency => kind == TraceAnomalyKind::Latency,
            Self::Error => kind == TraceAnomalyKind::Error,
            Self::Pattern => kind == TraceAnomalyKind::Pattern,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceAnomalyKind {
    Latency,
    Error,
    Pattern,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceAnomalyOptions {
    pub method: TraceDetectionMethod,
    /// Latency percentile cut within each group.
    pub percentile: f64,
    /// Span counts seen in fewer than this share of traces are unusual.
    pub pattern_threshold: f64,
    pub limit: usize,
    pub include_span_health: bool,
}

impl Default for TraceAnomalyOptions {
    fn default() -> Self {
        Self {
            method: TraceDetectionMethod::All,
            percentile: 95.0,
            pattern_threshold: 0.05,
            limit: 100,
            include_span_health: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceAnomaly {
    pub trace_id: String,
    pub service: String,
    pub operation: String,
    /// Milliseconds.
    pub duration: f64,
    pub span_count: usize,
    pub error_span_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    /// In `[0, 1]`, the highest across `kinds`.
    pub score: f64,
    pub kinds: Vec<TraceAnomalyKind>,
    pub reasons: Vec<String>,
}

impl TraceAnomaly {
    fn new(trace: &Trace, kind: TraceAnomalyKind, score: f64, reason: String) -> Self {
        Self {
            trace_id: trace.trace_id.clone(),
            service: trace.service.clone(),
            operation: trace.operation.clone(),
            duration: trace.duration,
            span_count: trace.spans.len(),
            error_span_count: trace.error_span_count(),
            start_time: trace.start_time,
            score: score.clamp(0.0, 1.0),
            kinds: vec![kind],
            reasons: vec![reason],
        }
    }

    fn merge(&mut self, other: TraceAnomaly) {
        self.score = self.score.max(other.score);
        for kind in other.kinds {
            if !self.kinds.contains(&kind) {
                self.kinds.push(kind);
            }
        }
        self.reasons.extend(other.reasons);
    }
}

/// Traces slower than the `percentile` of their (service, root operation)
/// group. Groups under [`MIN_LATENCY_GROUP`] traces are skipped.
pub fn detect_latency_anomalies(traces: &[Trace], percentile: f64) -> Vec<TraceAnomaly> {
    let mut groups: BTreeMap<(&str, &str), Vec<&Trace>> = BTreeMap::new();
    for trace in traces {
        groups
            .entry((trace.service.as_str(), trace.operation.as_str()))
            .or_default()
            .push(trace);
    }

    let mut anomalies = Vec::new();
    for ((service, operation), members) in groups {
        if members.len() < MIN_LATENCY_GROUP {
            debug!(service, operation, traces = members.len(), "latency group too small");
            continue;
        }
        let sorted = stats::sorted(&members.iter().map(|t| t.duration).collect::<Vec<_>>());
        let threshold = stats::percentile(&sorted, percentile);

        for trace in members.into_iter().filter(|t| t.duration > threshold) {
            let score = if threshold > 0.0 {
                (trace.duration / threshold - 1.0).min(1.0)
            } else {
                1.0
            };
            anomalies.push(TraceAnomaly::new(
                trace,
                TraceAnomalyKind::Latency,
                score,
                format!(
                    "duration {:.1}ms above p{percentile} {:.1}ms for {service} {operation}",
                    trace.duration, threshold
                ),
            ));
        }
    }
    anomalies
}

/// Traces with at least one error span, scored by the error-span fraction.
pub fn detect_error_anomalies(traces: &[Trace]) -> Vec<TraceAnomaly> {
    traces
        .iter()
        .filter_map(|trace| {
            let errors = trace.error_span_count();
            if errors == 0 {
                return None;
            }
            let score = errors as f64 / trace.spans.len().max(1) as f64;
            Some(TraceAnomaly::new(
                trace,
                TraceAnomalyKind::Error,
                score,
                format!("{errors} of {} spans failed", trace.spans.len()),
            ))
        })
        .collect()
}

/// Traces whose span count occurs in fewer than `threshold` of all traces.
pub fn detect_pattern_anomalies(traces: &[Trace], threshold: f64) -> Vec<TraceAnomaly> {
    let total = traces.len();
    if total == 0 {
        return Vec::new();
    }
    let mut frequency: HashMap<usize, usize> = HashMap::new();
    for trace in traces {
        *frequency.entry(trace.spans.len()).or_default() += 1;
    }

    traces
        .iter()
        .filter_map(|trace| {
            let share = frequency[&trace.spans.len()] as f64 / total as f64;
            (share < threshold).then(|| {
                TraceAnomaly::new(
                    trace,
                    TraceAnomalyKind::Pattern,
                    1.0 - share,
                    format!(
                        "span count {} seen in {:.1}% of traces",
                        trace.spans.len(),
                        share * 100.0
                    ),
                )
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceAnomalyResult {
    pub method: TraceDetectionMethod,
    pub total_traces: usize,
    pub anomalies: Vec<TraceAnomaly>,
    /// Anomaly count per kind before the limit was applied.
    pub counts: BTreeMap<TraceAnomalyKind, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_health: Option<Vec<TraceHealth>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TraceAnomalyResult {
    fn failed(method: TraceDetectionMethod, error: impl Into<String>) -> Self {
        Self {
            method,
            total_traces: 0,
            anomalies: Vec::new(),
            counts: BTreeMap::new(),
            span_health: None,
            error: Some(error.into()),
        }
    }
}

/// Run the selected detectors, union by trace id, sort by score and apply `limit`.
pub fn detect_trace_anomalies(traces: &[Trace], options: &TraceAnomalyOptions) -> TraceAnomalyResult {
    let mut found = Vec::new();
    if options.method.runs(TraceAnomalyKind::Latency) {
        found.extend(detect_latency_anomalies(traces, options.percentile));
    }
    if options.method.runs(TraceAnomalyKind::Error) {
        found.extend(detect_error_anomalies(traces));
    }
    if options.method.runs(TraceAnomalyKind::Pattern) {
        found.extend(detect_pattern_anomalies(traces, options.pattern_threshold));
    }

    let mut counts: BTreeMap<TraceAnomalyKind, usize> = BTreeMap::new();
    for anomaly in &found {
        for kind in &anomaly.kinds {
            *counts.entry(*kind).or_default() += 1;
        }
    }

    let mut order: Vec<String> = Vec::new();
    let mut by_trace: HashMap<String, TraceAnomaly> = HashMap::new();
    for anomaly in found {
        match by_trace.get_mut(&anomaly.trace_id) {
            Some(existing) => existing.merge(anomaly),
            None => {
                order.push(anomaly.trace_id.clone());
                by_trace.insert(anomaly.trace_id.clone(), anomaly);
            }
        }
    }
    let mut anomalies: Vec<TraceAnomaly> = order
        .into_iter()
        .filter_map(|id| by_trace.remove(&id))
        .collect();
    anomalies.sort_by(|a, b| b.score.total_cmp(&a.score));
    anomalies.truncate(options.limit);

    let span_health = options.include_span_health.then(|| {
        let mut health: Vec<TraceHealth> = traces
            .iter()
            .map(score_span_health)
            .filter(|h| !h.issues.is_empty())
            .collect();
        health.sort_by(|a, b| a.health_score.total_cmp(&b.health_score));
        health.truncate(options.limit);
        health
    });

    TraceAnomalyResult {
        method: options.method,
        total_traces: traces.len(),
        anomalies,
        counts,
        span_health,
        error: None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanIssueKind {
    SlowSpan,
    Error,
    OrphanedParent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanIssue {
    pub span_id: String,
    pub service: String,
    pub name: String,
    pub duration: f64,
    pub z_score: f64,
    pub kinds: Vec<SpanIssueKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceHealth {
    pub trace_id: String,
    pub span_count: usize,
    /// `1 - anomalous spans / spans`.
    pub health_score: f64,
    pub issues: Vec<SpanIssue>,
}

/// Score each span of `trace` against the trace's own duration distribution.
pub fn score_span_health(trace: &Trace) -> TraceHealth {
    let durations: Vec<f64> = trace.spans.iter().map(|s| s.duration).collect();
    let summary = Summary::of(&durations);
    let ids: HashSet<&str> = trace.spans.iter().map(|s| s.span_id.as_str()).collect();

    let issues: Vec<SpanIssue> = trace
        .spans
        .iter()
        .filter_map(|span| {
            let z = summary.z_score(span.duration);
            let mut kinds = Vec::new();
            if z.abs() > SPAN_SIGMA {
                kinds.push(SpanIssueKind::SlowSpan);
            }
            if span.error {
                kinds.push(SpanIssueKind::Error);
            }
            if span
                .parent_span_id
                .as_deref()
                .is_some_and(|p| !ids.contains(p))
            {
                kinds.push(SpanIssueKind::OrphanedParent);
            }
            (!kinds.is_empty()).then(|| SpanIssue {
                span_id: span.span_id.clone(),
                service: span.service.clone(),
                name: span.name.clone(),
                duration: span.duration,
                z_score: z,
                kinds,
            })
        })
        .collect();

    let span_count = trace.spans.len();
    let health_score = if span_count > 0 {
        1.0 - issues.len() as f64 / span_count as f64
    } else {
        1.0
    };

    TraceHealth {
        trace_id: trace.trace_id.clone(),
        span_count,
        health_score,
        issues,
    }
}

/// Aggregates of one window of traces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowStats {
    pub trace_count: usize,
    pub avg_duration: f64,
    pub p95_duration: f64,
    /// Share of traces with at least one error span.
    pub error_rate: f64,
    pub avg_span_count: f64,
}

impl WindowStats {
    pub fn of(traces: &[Trace]) -> Self {
        if traces.is_empty() {
            return Self::default();
        }
        let durations: Vec<f64> = traces.iter().map(|t| t.duration).collect();
        let spans: Vec<f64> = traces.iter().map(|t| t.spans.len() as f64).collect();
        let failed = traces.iter().filter(|t| t.error_span_count() > 0).count();
        Self {
            trace_count: traces.len(),
            avg_duration: stats::mean(&durations),
            p95_duration: stats::percentile(&stats::sorted(&durations), 95.0),
            error_rate: failed as f64 / traces.len() as f64,
            avg_span_count: stats::mean(&spans),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftMetric {
    Duration,
    ErrorRate,
    Volume,
    SpanCount,
}

/// Current / baseline ratios. `None` when the baseline value is 0 and the
/// current one is not.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftRatios {
    pub duration: Option<f64>,
    pub error_rate: Option<f64>,
    pub volume: Option<f64>,
    pub span_count: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftReport {
    pub current_window: TimeRange,
    pub baseline_window: TimeRange,
    pub current: WindowStats,
    pub baseline: WindowStats,
    pub ratios: DriftRatios,
    pub threshold: f64,
    /// Metrics whose ratio left `[1 / threshold, threshold]`, or appeared from a zero baseline.
    pub drifted: Vec<DriftMetric>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn ratio(current: f64, baseline: f64) -> Option<f64> {
    if baseline.abs() > f64::EPSILON {
        Some(current / baseline)
    } else if current.abs() > f64::EPSILON {
        None
    } else {
        Some(1.0)
    }
}

/// Compare two windows of traces.
pub fn compare_windows(
    current_window: TimeRange,
    current: &[Trace],
    baseline_window: TimeRange,
    baseline: &[Trace],
    threshold: f64,
) -> DriftReport {
    let (now, before) = (WindowStats::of(current), WindowStats::of(baseline));
    let ratios = DriftRatios {
        duration: ratio(now.avg_duration, before.avg_duration),
        error_rate: ratio(now.error_rate, before.error_rate),
        volume: ratio(now.trace_count as f64, before.trace_count as f64),
        span_count: ratio(now.avg_span_count, before.avg_span_count),
    };

    let threshold = threshold.max(1.0);
    let drifted = [
        (DriftMetric::Duration, ratios.duration),
        (DriftMetric::ErrorRate, ratios.error_rate),
        (DriftMetric::Volume, ratios.volume),
        (DriftMetric::SpanCount, ratios.span_count),
    ]
    .into_iter()
    .filter(|(_, r)| match r {
        None => true,
        Some(r) => *r >= threshold || *r <= 1.0 / threshold,
    })
    .map(|(metric, _)| metric)
    .collect();

    DriftReport {
        current_window,
        baseline_window,
        current: now,
        baseline: before,
        ratios,
        threshold,
        drifted,
        error: None,
    }
}

/// Backend-driven trace detector.
pub struct TraceAnomalyDetector {
    backend: Arc<dyn SearchBackend>,
    max_spans: usize,
}

impl TraceAnomalyDetector {
    pub fn new(backend: Arc<dyn SearchBackend>, max_spans: usize) -> Self {
        Self { backend, max_spans }
    }

    pub async fn detect(
        &self,
        range: &TimeRange,
        filters: &[Value],
        options: &TraceAnomalyOptions,
    ) -> TraceAnomalyResult {
        match fetch_traces(self.backend.as_ref(), range, self.max_spans, filters).await {
            Ok(traces) => {
                let result = detect_trace_anomalies(&traces, options);
                info!(
                    traces = result.total_traces,
                    anomalies = result.anomalies.len(),
                    method = ?options.method,
                    "trace anomalies detected"
                );
                result
            }
            Err(e) => {
                warn!(error = %e, "trace fetch failed");
                TraceAnomalyResult::failed(options.method, e.to_string())
            }
        }
    }

    /// Compare the window of length `window` ending at `end` with the one
    /// immediately before it. Both windows are fetched concurrently.
    pub async fn detect_drift(
        &self,
        end: DateTime<Utc>,
        window: Duration,
        filters: &[Value],
        threshold: f64,
    ) -> DriftReport {
        let current_window = TimeRange::ending_at(end, window);
        let baseline_window = current_window.preceding();

        let (current, baseline) = futures::join!(
            fetch_traces(self.backend.as_ref(), &current_window, self.max_spans, filters),
            fetch_traces(self.backend.as_ref(), &baseline_window, self.max_spans, filters),
        );

        match (current, baseline) {
            (Ok(current), Ok(baseline)) => {
                let report = compare_windows(current_window, &current, baseline_window, &baseline, threshold);
                info!(drifted = report.drifted.len(), "trace drift computed");
                report
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "drift window fetch failed");
                let mut report = compare_windows(current_window, &[], baseline_window, &[], threshold);
                report.error = Some(e.to_string());
                report
            }
        }
    }
}
