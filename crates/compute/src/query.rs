//! Query DSL bodies and response parsing for the search backend.
//!
//! Only the shapes the analyzers need: a date histogram with an `avg`
//! sub-aggregation, a span search, document samples, and count histograms.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use tracelens_core::{
    group_into_traces, spans_from_response, SearchBackend, SearchError, TimeRange,
    TimeSeriesPoint, Trace,
};

/// Timestamp field used for every range filter and histogram.
pub const TIMESTAMP_FIELD: &str = "@timestamp";

/// A metric series request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricQuery {
    /// Numeric field to average per bucket.
    pub metric: String,
    pub range: TimeRange,
    /// Histogram interval, e.g. `1m`, `5m`, `1h`.
    #[serde(default = "default_interval")]
    pub interval: String,
    /// Extra bool filter clauses, passed through.
    #[serde(default)]
    pub filters: Vec<Value>,
}

fn default_interval() -> String {
    "1m".to_string()
}

fn range_filter(range: &TimeRange) -> Value {
    json!({
        "range": {
            TIMESTAMP_FIELD: {
                "gte": range.start.to_rfc3339(),
                "lt": range.end.to_rfc3339(),
            }
        }
    })
}

fn bool_filter(range: &TimeRange, extra: &[Value]) -> Value {
    let mut filters = vec![range_filter(range)];
    filters.extend(extra.iter().cloned());
    json!({ "bool": { "filter": filters } })
}

/// Date histogram over `range` averaging `metric` into `time_series.buckets[*].value`.
pub fn metric_histogram_body(query: &MetricQuery) -> Value {
    json!({
        "size": 0,
        "query": bool_filter(&query.range, &query.filters),
        "aggs": {
            "time_series": {
                "date_histogram": {
                    "field": TIMESTAMP_FIELD,
                    "fixed_interval": query.interval,
                    "min_doc_count": 0,
                    "extended_bounds": {
                        "min": query.range.start.to_rfc3339(),
                        "max": query.range.end.to_rfc3339(),
                    }
                },
                "aggs": {
                    "value": { "avg": { "field": query.metric } }
                }
            }
        }
    })
}

/// Doc-count histogram over `range` for an arbitrary filter.
pub fn count_histogram_body(range: &TimeRange, interval: &str, filters: &[Value]) -> Value {
    json!({
        "size": 0,
        "query": bool_filter(range, filters),
        "aggs": {
            "time_series": {
                "date_histogram": {
                    "field": TIMESTAMP_FIELD,
                    "fixed_interval": interval,
                    "min_doc_count": 0,
                    "extended_bounds": {
                        "min": range.start.to_rfc3339(),
                        "max": range.end.to_rfc3339(),
                    }
                }
            }
        }
    })
}

/// Raw span documents in `range`, oldest first.
pub fn span_search_body(range: &TimeRange, size: usize, filters: &[Value]) -> Value {
    json!({
        "size": size,
        "query": bool_filter(range, filters),
        "sort": [{ TIMESTAMP_FIELD: { "order": "asc", "unmapped_type": "date" } }],
    })
}

/// A plain document sample in `range`, newest first.
pub fn document_sample_body(range: &TimeRange, size: usize, filters: &[Value]) -> Value {
    json!({
        "size": size,
        "query": bool_filter(range, filters),
        "sort": [{ TIMESTAMP_FIELD: { "order": "desc", "unmapped_type": "date" } }],
    })
}

/// `aggregations.time_series.buckets[*]` as points; a missing or null
/// `value.value` becomes a gap.
pub fn parse_metric_buckets(response: &Value) -> Vec<TimeSeriesPoint> {
    histogram_buckets(response)
        .iter()
        .filter_map(|bucket| {
            let timestamp = bucket_timestamp(bucket)?;
            let value = bucket.pointer("/value/value").and_then(Value::as_f64);
            Some(TimeSeriesPoint { timestamp, value })
        })
        .collect()
}

/// `aggregations.time_series.buckets[*].doc_count` as points.
pub fn parse_count_buckets(response: &Value) -> Vec<TimeSeriesPoint> {
    histogram_buckets(response)
        .iter()
        .filter_map(|bucket| {
            let timestamp = bucket_timestamp(bucket)?;
            let count = bucket.get("doc_count").and_then(Value::as_f64).unwrap_or(0.0);
            Some(TimeSeriesPoint::new(timestamp, count))
        })
        .collect()
}

/// `hits.hits[*]._source`.
pub fn parse_hit_sources(response: &Value) -> Vec<Value> {
    response
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .map(|hits| {
            hits.iter()
                .filter_map(|hit| hit.get("_source").cloned())
                .collect()
        })
        .unwrap_or_default()
}

fn histogram_buckets(response: &Value) -> &[Value] {
    response
        .pointer("/aggregations/time_series/buckets")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn bucket_timestamp(bucket: &Value) -> Option<DateTime<Utc>> {
    if let Some(s) = bucket.get("key_as_string").and_then(Value::as_str) {
        if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
            return Some(ts.with_timezone(&Utc));
        }
    }
    bucket
        .get("key")
        .and_then(Value::as_i64)
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

/// Fetch a metric series. Errors propagate so callers can report them.
pub async fn fetch_metric_series(
    backend: &dyn SearchBackend,
    query: &MetricQuery,
) -> Result<Vec<TimeSeriesPoint>, SearchError> {
    let response = backend.search_metrics(&metric_histogram_body(query)).await?;
    let points = parse_metric_buckets(&response);
    debug!(metric = %query.metric, points = points.len(), "fetched metric series");
    Ok(points)
}

/// Fetch spans in `range` and group them into traces.
pub async fn fetch_traces(
    backend: &dyn SearchBackend,
    range: &TimeRange,
    max_spans: usize,
    filters: &[Value],
) -> Result<Vec<Trace>, SearchError> {
    let response = backend
        .search_traces(&span_search_body(range, max_spans, filters))
        .await?;
    let spans = spans_from_response(&response);
    let span_count = spans.len();
    let traces = group_into_traces(spans);
    debug!(spans = span_count, traces = traces.len(), "fetched traces");
    Ok(traces)
}

/// `{"term": {field: value}}`, the filter shape every tool accepts.
pub fn term_filter(field: &str, value: &str) -> Value {
    json!({ "term": { field: value } })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn range() -> TimeRange {
        let end = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        TimeRange::ending_at(end, Duration::hours(1))
    }

    #[test]
    fn histogram_body_shape() {
        let body = metric_histogram_body(&MetricQuery {
            metric: "cpu.usage".into(),
            range: range(),
            interval: "5m".into(),
            filters: vec![term_filter("host", "a")],
        });
        assert_eq!(body["size"], 0);
        assert_eq!(body["aggs"]["time_series"]["date_histogram"]["fixed_interval"], "5m");
        assert_eq!(body["aggs"]["time_series"]["aggs"]["value"]["avg"]["field"], "cpu.usage");
        assert_eq!(body["query"]["bool"]["filter"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn count_histogram_covers_whole_window() {
        let body = count_histogram_body(&range(), "1m", &[]);
        let histogram = &body["aggs"]["time_series"]["date_histogram"];
        assert_eq!(histogram["min_doc_count"], 0);
        assert_eq!(histogram["extended_bounds"]["min"], "2024-06-01T11:00:00+00:00");
        assert_eq!(histogram["extended_bounds"]["max"], "2024-06-01T12:00:00+00:00");
    }

    #[test]
    fn parses_buckets_with_gaps() {
        let response = json!({"aggregations": {"time_series": {"buckets": [
            {"key_as_string": "2024-06-01T11:00:00.000Z", "key": 1717239600000_i64, "doc_count": 3, "value": {"value": 1.5}},
            {"key": 1717239660000_i64, "doc_count": 0, "value": {"value": null}},
        ]}}});
        let points = parse_metric_buckets(&response);
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].value, Some(1.5));
        assert_eq!(points[1].value, None);
        assert_eq!((points[1].timestamp - points[0].timestamp).num_seconds(), 60);

        let counts = parse_count_buckets(&response);
        assert_eq!(counts[0].value, Some(3.0));
        assert_eq!(counts[1].value, Some(0.0));
    }

    #[test]
    fn malformed_response_yields_nothing() {
        assert!(parse_metric_buckets(&json!({"error": "boom"})).is_empty());
        assert!(parse_hit_sources(&json!({})).is_empty());
    }
}
