//! Log stream anomalies: volume spikes against a baseline, keyword hits,
//! numeric outliers, and shifts in message cardinality.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use tracelens_core::{
    as_number, lookup, numeric_fields, present_values, FieldChain, SearchBackend, SearchError,
    TimeRange, TimeSeriesPoint,
};

use crate::query::{count_histogram_body, document_sample_body, parse_count_buckets, parse_hit_sources, TIMESTAMP_FIELD};
use crate::stats::{self, Summary};

pub const MESSAGE: FieldChain = FieldChain(&[
    "message",
    "msg",
    "log.message",
    "body",
    "error.message",
    "event.original",
]);

pub const LEVEL: FieldChain = FieldChain(&[
    "level",
    "log.level",
    "severity",
    "severity_text",
    "SeverityText",
]);

const TIMESTAMP: FieldChain = FieldChain(&[TIMESTAMP_FIELD, "timestamp", "time"]);

/// Keyword confidence multiplier for error/critical severities.
const SEVERITY_BOOST: f64 = 1.5;

/// Fewer values than this and a field is not scored.
const MIN_FIELD_SAMPLES: usize = 10;

const STATISTICAL_EXCLUDED: [&str; 3] = ["id", "count", "index"];

const SIGNIFICANT_TERMS: usize = 10;

fn default_keywords() -> Vec<String> {
    [
        "error",
        "exception",
        "timeout",
        "failed",
        "fatal",
        "panic",
        "refused",
        "unavailable",
        "denied",
        "crash",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogAnomalyOptions {
    pub frequency: bool,
    pub pattern: bool,
    pub statistical: bool,
    pub clustering: bool,
    /// Histogram interval for the frequency method.
    pub interval: String,
    pub baseline_days: i64,
    pub spike_threshold: f64,
    pub keywords: Vec<String>,
    pub z_threshold: f64,
    pub percentile: f64,
    /// Ratio of message cardinalities treated as a shift (and its inverse).
    pub cardinality_threshold: f64,
    pub sample_size: usize,
    pub limit: usize,
}

impl Default for LogAnomalyOptions {
    fn default() -> Self {
        Self {
            frequency: true,
            pattern: true,
            statistical: true,
            clustering: true,
            interval: "1h".to_string(),
            baseline_days: 7,
            spike_threshold: 3.0,
            keywords: default_keywords(),
            z_threshold: 3.0,
            percentile: 99.0,
            cardinality_threshold: 2.0,
            sample_size: 500,
            limit: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogAnomalyKind {
    Frequency,
    Pattern,
    Statistical,
    Clustering,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogAnomaly {
    pub kind: LogAnomalyKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// In `[0, 1]`.
    pub confidence: f64,
    pub description: String,
    pub details: Value,
}

/// Flag intervals of `current` whose count is at least `threshold` times the
/// mean count of `baseline`.
pub fn detect_frequency_anomalies(
    current: &[TimeSeriesPoint],
    baseline: &[TimeSeriesPoint],
    threshold: f64,
) -> Vec<LogAnomaly> {
    let baseline_mean = stats::mean(&present_values(baseline));
    if baseline_mean <= 0.0 {
        debug!("empty log baseline, frequency check skipped");
        return Vec::new();
    }

    current
        .iter()
        .filter_map(|point| {
            let count = point.value?;
            let ratio = count / baseline_mean;
            (ratio >= threshold).then(|| LogAnomaly {
                kind: LogAnomalyKind::Frequency,
                timestamp: Some(point.timestamp),
                confidence: (ratio / (2.0 * threshold)).min(1.0),
                description: format!("log volume {ratio:.1}x the baseline average"),
                details: json!({
                    "count": count,
                    "baselineMean": baseline_mean,
                    "ratio": ratio,
                    "threshold": threshold,
                }),
            })
        })
        .collect()
}

fn is_severe(level: &str) -> bool {
    matches!(
        level.to_lowercase().as_str(),
        "error" | "err" | "critical" | "crit" | "fatal" | "emergency" | "alert"
    )
}

/// Documents whose message contains any of `keywords` (case-insensitive).
pub fn detect_pattern_anomalies(docs: &[Value], keywords: &[String]) -> Vec<LogAnomaly> {
    let keywords: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();

    docs.iter()
        .filter_map(|doc| {
            let message = MESSAGE.string(doc)?;
            let lower = message.to_lowercase();
            let matched: Vec<&str> = keywords
                .iter()
                .filter(|k| lower.contains(k.as_str()))
                .map(String::as_str)
                .collect();
            if matched.is_empty() {
                return None;
            }

            let level = LEVEL.string(doc);
            let mut confidence = (0.4 + 0.1 * (matched.len() - 1) as f64).min(0.9);
            if level.as_deref().is_some_and(is_severe) {
                confidence *= SEVERITY_BOOST;
            }

            Some(LogAnomaly {
                kind: LogAnomalyKind::Pattern,
                timestamp: TIMESTAMP.timestamp(doc),
                confidence: confidence.min(1.0),
                description: format!("message matched {}", matched.join(", ")),
                details: json!({
                    "keywords": matched,
                    "level": level,
                    "message": message,
                }),
            })
        })
        .collect()
}

/// Numeric outliers per discovered field: `|z| > z_threshold` or above the
/// `percentile` of the field.
pub fn detect_statistical_anomalies(docs: &[Value], z_threshold: f64, percentile: f64) -> Vec<LogAnomaly> {
    let mut anomalies = Vec::new();

    for field in numeric_fields(docs, &STATISTICAL_EXCLUDED) {
        let values: Vec<(usize, f64)> = docs
            .iter()
            .enumerate()
            .filter_map(|(i, doc)| lookup(doc, &field).and_then(as_number).map(|v| (i, v)))
            .collect();
        if values.len() < MIN_FIELD_SAMPLES {
            continue;
        }
        let raw: Vec<f64> = values.iter().map(|(_, v)| *v).collect();
        let summary = Summary::of(&raw);
        let cut = stats::percentile(&stats::sorted(&raw), percentile);

        for (i, value) in values {
            let z = summary.z_score(value);
            let by_z = z.abs() > z_threshold;
            let by_percentile = value > cut;
            if !by_z && !by_percentile {
                continue;
            }
            anomalies.push(LogAnomaly {
                kind: LogAnomalyKind::Statistical,
                timestamp: TIMESTAMP.timestamp(&docs[i]),
                confidence: (z.abs() / (2.0 * z_threshold)).clamp(0.1, 1.0),
                description: format!("{field} = {value} is an outlier"),
                details: json!({
                    "field": field,
                    "value": value,
                    "zScore": z,
                    "percentileValue": cut,
                    "mean": summary.mean,
                    "stdDev": summary.std_dev,
                    "byZScore": by_z,
                    "byPercentile": by_percentile,
                }),
            });
        }
    }
    anomalies
}

fn messages(docs: &[Value]) -> Vec<String> {
    docs.iter().filter_map(|d| MESSAGE.string(d)).collect()
}

/// Distinct messages over total messages.
fn cardinality(messages: &[String]) -> f64 {
    if messages.is_empty() {
        return 0.0;
    }
    let distinct: HashSet<&str> = messages.iter().map(String::as_str).collect();
    distinct.len() as f64 / messages.len() as f64
}

fn terms(message: &str) -> impl Iterator<Item = String> + '_ {
    message
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 3 && !t.chars().all(|c| c.is_ascii_digit()))
        .map(str::to_lowercase)
}

/// Terms frequent in `current` but rare in `baseline`, scored
/// `tf(current) * ln((1 + |baseline|) / (1 + df(baseline)))`.
pub fn significant_terms(current: &[String], baseline: &[String], top: usize) -> Vec<(String, f64)> {
    let mut tf: HashMap<String, f64> = HashMap::new();
    let mut total = 0.0;
    for message in current {
        for term in terms(message) {
            *tf.entry(term).or_default() += 1.0;
            total += 1.0;
        }
    }
    if total == 0.0 {
        return Vec::new();
    }

    let mut df: HashMap<String, f64> = HashMap::new();
    for message in baseline {
        let unique: HashSet<String> = terms(message).collect();
        for term in unique {
            *df.entry(term).or_default() += 1.0;
        }
    }
    let n = baseline.len() as f64;

    let mut scored: Vec<(String, f64)> = tf
        .into_iter()
        .map(|(term, count)| {
            let idf = ((1.0 + n) / (1.0 + df.get(&term).copied().unwrap_or(0.0))).ln();
            let score = count / total * idf;
            (term, score)
        })
        .filter(|(_, score)| *score > 0.0)
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    scored.truncate(top);
    scored
}

/// Flag a cardinality shift between the baseline and current message samples.
pub fn detect_cardinality_shift(current: &[Value], baseline: &[Value], threshold: f64) -> Vec<LogAnomaly> {
    let (now, before) = (messages(current), messages(baseline));
    if now.is_empty() || before.is_empty() {
        return Vec::new();
    }
    let (current_card, baseline_card) = (cardinality(&now), cardinality(&before));
    let ratio = current_card / baseline_card;
    let threshold = threshold.max(1.0);
    let direction = if ratio >= threshold {
        "increase"
    } else if ratio <= 1.0 / threshold {
        "decrease"
    } else {
        return Vec::new();
    };

    let shift = if ratio >= 1.0 { ratio } else { 1.0 / ratio };
    let terms: Vec<Value> = significant_terms(&now, &before, SIGNIFICANT_TERMS)
        .into_iter()
        .map(|(term, score)| json!({ "term": term, "score": score }))
        .collect();

    vec![LogAnomaly {
        kind: LogAnomalyKind::Clustering,
        timestamp: None,
        confidence: (shift / (2.0 * threshold)).min(1.0),
        description: format!("message cardinality {direction} ({ratio:.2}x)"),
        details: json!({
            "currentCardinality": current_card,
            "baselineCardinality": baseline_card,
            "ratio": ratio,
            "direction": direction,
            "significantTerms": terms,
        }),
    }]
}

/// Keep the most confident anomaly per (kind, timestamp, description),
/// then order by confidence.
pub fn dedupe_by_confidence(anomalies: Vec<LogAnomaly>, limit: usize) -> Vec<LogAnomaly> {
    let mut best: BTreeMap<(LogAnomalyKind, Option<DateTime<Utc>>, String), LogAnomaly> = BTreeMap::new();
    for anomaly in anomalies {
        let key = (anomaly.kind, anomaly.timestamp, anomaly.description.clone());
        match best.get(&key) {
            Some(existing) if existing.confidence >= anomaly.confidence => {}
            _ => {
                best.insert(key, anomaly);
            }
        }
    }
    let mut out: Vec<LogAnomaly> = best.into_values().collect();
    out.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    out.truncate(limit);
    out
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogAnomalyResult {
    pub range: TimeRange,
    pub baseline: TimeRange,
    pub documents_sampled: usize,
    pub methods: Vec<LogAnomalyKind>,
    pub anomalies: Vec<LogAnomaly>,
    pub counts: BTreeMap<LogAnomalyKind, usize>,
    /// Methods whose fetch failed.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Default)]
struct FetchFailures {
    skipped: Vec<String>,
    last_error: Option<String>,
}

impl FetchFailures {
    fn take<T>(&mut self, method: &str, fetched: Option<Result<T, SearchError>>) -> Option<T> {
        match fetched? {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(method, error = %e, "log fetch failed, skipping method");
                if !self.skipped.iter().any(|m| m == method) {
                    self.skipped.push(method.to_string());
                }
                self.last_error = Some(e.to_string());
                None
            }
        }
    }
}

/// Backend-driven log detector.
pub struct LogAnomalyDetector {
    backend: Arc<dyn SearchBackend>,
}

impl LogAnomalyDetector {
    pub fn new(backend: Arc<dyn SearchBackend>) -> Self {
        Self { backend }
    }

    async fn counts(&self, range: &TimeRange, interval: &str, filters: &[Value]) -> Result<Vec<TimeSeriesPoint>, SearchError> {
        let response = self
            .backend
            .query_logs(&count_histogram_body(range, interval, filters))
            .await?;
        Ok(parse_count_buckets(&response))
    }

    async fn sample(&self, range: &TimeRange, size: usize, filters: &[Value]) -> Result<Vec<Value>, SearchError> {
        let response = self
            .backend
            .query_logs(&document_sample_body(range, size, filters))
            .await?;
        Ok(parse_hit_sources(&response))
    }

    /// Run the enabled methods over `range`. The baseline is the
    /// `baseline_days` immediately before `range.start`. Fetches run
    /// concurrently; a failed fetch skips the methods that need it.
    pub async fn detect(&self, range: &TimeRange, filters: &[Value], options: &LogAnomalyOptions) -> LogAnomalyResult {
        let baseline = TimeRange::ending_at(
            range.start,
            Duration::try_days(options.baseline_days.max(1)).unwrap_or(Duration::MAX),
        );
        let needs_sample = options.pattern || options.statistical || options.clustering;

        let (current_counts, baseline_counts, current_docs, baseline_docs) = futures::join!(
            async {
                if options.frequency {
                    Some(self.counts(range, &options.interval, filters).await)
                } else {
                    None
                }
            },
            async {
                if options.frequency {
                    Some(self.counts(&baseline, &options.interval, filters).await)
                } else {
                    None
                }
            },
            async {
                if needs_sample {
                    Some(self.sample(range, options.sample_size, filters).await)
                } else {
                    None
                }
            },
            async {
                if options.clustering {
                    Some(self.sample(&baseline, options.sample_size, filters).await)
                } else {
                    None
                }
            },
        );

        let mut methods = Vec::new();
        let mut found = Vec::new();
        let mut failures = FetchFailures::default();

        let current_counts = failures.take("frequency", current_counts);
        let baseline_counts = failures.take("frequency", baseline_counts);
        let docs = failures.take("sample", current_docs);
        let baseline_docs = failures.take("clustering", baseline_docs);

        if let (Some(now), Some(before)) = (&current_counts, &baseline_counts) {
            methods.push(LogAnomalyKind::Frequency);
            found.extend(detect_frequency_anomalies(now, before, options.spike_threshold));
        }
        if let Some(docs) = &docs {
            if options.pattern {
                methods.push(LogAnomalyKind::Pattern);
                found.extend(detect_pattern_anomalies(docs, &options.keywords));
            }
            if options.statistical {
                methods.push(LogAnomalyKind::Statistical);
                found.extend(detect_statistical_anomalies(docs, options.z_threshold, options.percentile));
            }
            if let (true, Some(before)) = (options.clustering, &baseline_docs) {
                methods.push(LogAnomalyKind::Clustering);
                found.extend(detect_cardinality_shift(docs, before, options.cardinality_threshold));
            }
        }

        let mut counts: BTreeMap<LogAnomalyKind, usize> = BTreeMap::new();
        for anomaly in &found {
            *counts.entry(anomaly.kind).or_default() += 1;
        }
        let anomalies = dedupe_by_confidence(found, options.limit);

        info!(
            methods = methods.len(),
            anomalies = anomalies.len(),
            skipped = failures.skipped.len(),
            "log anomalies detected"
        );

        LogAnomalyResult {
            range: *range,
            baseline,
            documents_sampled: docs.as_ref().map_or(0, Vec::len),
            error: if methods.is_empty() { failures.last_error } else { None },
            methods,
            anomalies,
            counts,
            skipped: failures.skipped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn hourly(values: &[f64], start: DateTime<Utc>) -> Vec<TimeSeriesPoint> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| TimeSeriesPoint::new(start + Duration::hours(i as i64), *v))
            .collect()
    }

    #[test]
    fn frequency_spike_over_baseline() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let baseline = hourly(&vec![100.0; 7 * 24], t0);
        let current = hourly(&[120.0, 400.0, 90.0], t0 + Duration::days(7));

        let found = detect_frequency_anomalies(&current, &baseline, 3.0);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].details["ratio"], 4.0);
        assert_eq!(found[0].timestamp, Some(t0 + Duration::days(7) + Duration::hours(1)));
    }

    #[test]
    fn empty_baseline_yields_nothing() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(detect_frequency_anomalies(&hourly(&[500.0], t0), &[], 3.0).is_empty());
    }

    #[test]
    fn keywords_with_severity_boost() {
        let docs = vec![
            json!({"message": "Connection TIMEOUT talking to db", "level": "ERROR"}),
            json!({"log": {"message": "request failed with exception"}, "level": "info"}),
            json!({"message": "all good"}),
        ];
        let found = detect_pattern_anomalies(&docs, &default_keywords());
        assert_eq!(found.len(), 2);
        assert!((found[0].confidence - 0.6).abs() < 1e-9);
        assert!((found[1].confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn statistical_skips_id_fields() {
        let mut docs: Vec<Value> = (0..30)
            .map(|i| json!({"latency_ms": 20.0 + (i % 3) as f64, "request_id": i * 1000}))
            .collect();
        docs.push(json!({"latency_ms": 900.0, "request_id": 5}));

        let found = detect_statistical_anomalies(&docs, 3.0, 99.0);
        assert!(!found.is_empty());
        assert!(found.iter().all(|a| a.details["field"] == "latency_ms"));
        assert!(found.iter().any(|a| a.details["value"] == 900.0 && a.details["byZScore"] == true));
    }

    #[test]
    fn cardinality_increase_surfaces_new_terms() {
        let baseline: Vec<Value> = (0..20).map(|_| json!({"message": "user login ok"})).collect();
        let current: Vec<Value> = (0..20)
            .map(|i| json!({"message": format!("disk quota exceeded on volume vol{i}")}))
            .collect();

        let found = detect_cardinality_shift(&current, &baseline, 2.0);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].details["direction"], "increase");
        let terms = found[0].details["significantTerms"].as_array().unwrap();
        assert!(!terms.is_empty());
        assert!(terms.iter().all(|t| t["term"] != "login"));
    }

    #[test]
    fn stable_cardinality_is_quiet() {
        let docs: Vec<Value> = (0..10).map(|i| json!({"message": format!("m{}", i % 5)})).collect();
        assert!(detect_cardinality_shift(&docs, &docs, 2.0).is_empty());
    }

    #[test]
    fn dedupe_keeps_highest_confidence() {
        let a = LogAnomaly {
            kind: LogAnomalyKind::Pattern,
            timestamp: None,
            confidence: 0.4,
            description: "message matched error".into(),
            details: json!({}),
        };
        let b = LogAnomaly {
            confidence: 0.9,
            ..a.clone()
        };
        let out = dedupe_by_confidence(vec![a, b], 10);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].confidence, 0.9);
    }

    #[test]
    fn significant_terms_prefer_new_words() {
        let current = vec!["payment gateway timeout".to_string(), "payment gateway timeout".to_string()];
        let baseline = vec!["payment accepted".to_string()];
        let top = significant_terms(&current, &baseline, 2);
        assert_eq!(top.len(), 2);
        assert!(top.iter().all(|(t, _)| t != "payment"));
    }
}
