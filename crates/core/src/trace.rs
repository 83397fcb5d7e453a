//! Span and trace value types plus parsing from raw span documents.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::document::{lookup, FieldChain};

pub const TRACE_ID: FieldChain = FieldChain(&["traceId", "trace_id", "trace.id", "TraceId"]);
pub const SPAN_ID: FieldChain = FieldChain(&["spanId", "span_id", "span.id", "SpanId"]);
pub const PARENT_SPAN_ID: FieldChain =
    FieldChain(&["parentSpanId", "parent_span_id", "parent.id", "ParentSpanId"]);
pub const SERVICE_NAME: FieldChain = FieldChain(&[
    "serviceName",
    "service.name",
    "resource.service.name",
    "process.serviceName",
    "service",
]);
pub const SPAN_NAME: FieldChain = FieldChain(&["name", "operationName", "span.name"]);
pub const START_TIME: FieldChain =
    FieldChain(&["startTime", "start_time", "@timestamp", "timestamp"]);

/// Duration candidates with the factor that converts each to milliseconds.
const DURATION_MS: &[(&str, f64)] = &[
    ("duration", 1.0),
    ("durationInMs", 1.0),
    ("duration_ms", 1.0),
    ("span.duration.us", 0.001),
    ("durationNano", 0.000_001),
];

/// A single traced operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub service: String,
    pub name: String,
    /// Milliseconds.
    pub duration: f64,
    pub error: bool,
    pub start_time: Option<DateTime<Utc>>,
}

impl Span {
    /// Build a span from a raw `_source` document.
    ///
    /// Returns `None` when the document has no trace or span id. Every other
    /// field falls back to a literal default.
    pub fn from_source(source: &Value) -> Option<Self> {
        let trace_id = TRACE_ID.string(source)?;
        let span_id = SPAN_ID.string(source)?;

        let duration = DURATION_MS
            .iter()
            .find_map(|(path, scale)| {
                lookup(source, path)
                    .and_then(crate::document::as_number)
                    .map(|v| v * scale)
                    .filter(|v| v.is_finite())
            })
            .unwrap_or(0.0);

        Some(Self {
            trace_id,
            span_id,
            parent_span_id: PARENT_SPAN_ID.string(source),
            service: SERVICE_NAME
                .string(source)
                .unwrap_or_else(|| "unknown".to_string()),
            name: SPAN_NAME
                .string(source)
                .unwrap_or_else(|| "unknown".to_string()),
            duration,
            error: is_error(source),
            start_time: START_TIME.timestamp(source),
        })
    }

    /// Start plus duration; `None` without a start time or when the end is
    /// not representable.
    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        let micros = self.duration * 1000.0;
        if !micros.is_finite() {
            return None;
        }
        self.start_time?.checked_add_signed(Duration::microseconds(micros as i64))
    }
}

fn is_error(source: &Value) -> bool {
    if let Some(Value::Bool(b)) = lookup(source, "error") {
        return *b;
    }
    if let Some(code) = lookup(source, "status.code") {
        match code {
            Value::Number(n) if n.as_i64() == Some(2) => return true,
            Value::String(s) if s.eq_ignore_ascii_case("error") || s == "STATUS_CODE_ERROR" => {
                return true
            }
            _ => {}
        }
    }
    matches!(lookup(source, "tags.error"), Some(Value::Bool(true)))
}

/// The set of spans sharing a trace id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trace {
    pub trace_id: String,
    pub spans: Vec<Span>,
    /// Milliseconds.
    pub duration: f64,
    /// Service of the root span.
    pub service: String,
    /// Operation name of the root span.
    pub operation: String,
    pub start_time: Option<DateTime<Utc>>,
}

impl Trace {
    /// Assemble a trace from its spans. `spans` must be non-empty.
    pub fn from_spans(trace_id: String, spans: Vec<Span>) -> Self {
        let ids: HashSet<&str> = spans.iter().map(|s| s.span_id.as_str()).collect();
        let root = spans
            .iter()
            .find(|s| match &s.parent_span_id {
                None => true,
                Some(parent) => !ids.contains(parent.as_str()),
            })
            .or_else(|| spans.first());

        let (service, operation, root_duration, root_start) = match root {
            Some(r) => (r.service.clone(), r.name.clone(), r.duration, r.start_time),
            None => ("unknown".to_string(), "unknown".to_string(), 0.0, None),
        };

        let starts: Vec<DateTime<Utc>> = spans.iter().filter_map(|s| s.start_time).collect();
        let duration = if !spans.is_empty() && starts.len() == spans.len() {
            let min_start = starts.iter().min().copied();
            let max_end = spans.iter().filter_map(Span::end_time).max();
            match (min_start, max_end) {
                (Some(start), Some(end)) => {
                    (end - start).num_microseconds().unwrap_or(0) as f64 / 1000.0
                }
                _ => root_duration,
            }
        } else {
            root_duration
        };

        let start_time = starts.iter().min().copied().or(root_start);

        Self {
            trace_id,
            spans,
            duration,
            service,
            operation,
            start_time,
        }
    }

    pub fn error_span_count(&self) -> usize {
        self.spans.iter().filter(|s| s.error).count()
    }

    /// Spans whose parent id does not resolve inside this trace.
    pub fn orphan_spans(&self) -> Vec<&Span> {
        let ids: HashSet<&str> = self.spans.iter().map(|s| s.span_id.as_str()).collect();
        self.spans
            .iter()
            .filter(|s| {
                s.parent_span_id
                    .as_deref()
                    .is_some_and(|parent| !ids.contains(parent))
            })
            .collect()
    }
}

/// Parse `hits.hits[*]._source` of a span search response.
pub fn spans_from_response(response: &Value) -> Vec<Span> {
    let hits = response
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let spans: Vec<Span> = hits
        .iter()
        .filter_map(|hit| hit.get("_source"))
        .filter_map(Span::from_source)
        .collect();

    if spans.len() < hits.len() {
        debug!(
            hits = hits.len(),
            parsed = spans.len(),
            "skipped span documents without trace/span ids"
        );
    }
    spans
}

/// Group spans into traces, preserving first-seen trace order.
pub fn group_into_traces(spans: Vec<Span>) -> Vec<Trace> {
    let mut order: Vec<String> = Vec::new();
    let mut grouped: HashMap<String, Vec<Span>> = HashMap::new();

    for span in spans {
        let entry = grouped.entry(span.trace_id.clone()).or_insert_with(|| {
            order.push(span.trace_id.clone());
            Vec::new()
        });
        entry.push(span);
    }

    order
        .into_iter()
        .filter_map(|id| {
            let spans = grouped.remove(&id)?;
            Some(Trace::from_spans(id, spans))
        })
        .collect()
}
