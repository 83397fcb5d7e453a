//! In-memory backend for tool tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use serde_json::{json, Value};

use tracelens_core::config::AnalysisConfig;
use tracelens_core::{SearchBackend, SearchError};

use crate::tool::{ToolContext, ToolResult};

/// Returns one canned body per index and records every request body.
#[derive(Default)]
pub struct CannedBackend {
    pub metrics: Option<Value>,
    pub traces: Option<Value>,
    pub logs: Option<Value>,
    pub requests: Mutex<Vec<Value>>,
}

impl CannedBackend {
    fn respond(&self, canned: &Option<Value>, body: &Value) -> Result<Value, SearchError> {
        self.requests.lock().unwrap().push(body.clone());
        canned.clone().ok_or(SearchError::Status {
            status: 503,
            body: "unavailable".into(),
        })
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl SearchBackend for CannedBackend {
    async fn search_metrics(&self, body: &Value) -> Result<Value, SearchError> {
        self.respond(&self.metrics, body)
    }

    async fn search_traces(&self, body: &Value) -> Result<Value, SearchError> {
        self.respond(&self.traces, body)
    }

    async fn query_logs(&self, body: &Value) -> Result<Value, SearchError> {
        self.respond(&self.logs, body)
    }
}

pub fn context(backend: Arc<CannedBackend>) -> ToolContext {
    ToolContext::new(backend, AnalysisConfig::default())
}

/// The one-hour window every test input uses.
pub fn window() -> Value {
    json!({
        "start_time": "2024-06-01T11:00:00Z",
        "end_time": "2024-06-01T12:00:00Z",
    })
}

/// `window()` with `extra` keys merged in.
pub fn input(extra: Value) -> Value {
    let mut base = window();
    if let (Some(base), Value::Object(extra)) = (base.as_object_mut(), extra) {
        base.extend(extra);
    }
    base
}

pub fn parse(result: &ToolResult) -> Value {
    serde_json::from_str(&result.content).unwrap()
}

/// One histogram bucket per minute from the window start, plus one sampled document.
pub fn metric_response(values: &[f64]) -> Value {
    let start = Utc.with_ymd_and_hms(2024, 6, 1, 11, 0, 0).unwrap();
    let buckets: Vec<Value> = values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            json!({
                "key": (start + Duration::minutes(i as i64)).timestamp_millis(),
                "doc_count": 1,
                "value": {"value": v},
            })
        })
        .collect();
    json!({
        "hits": {"hits": [{"_source": {"@timestamp": start.to_rfc3339(), "latency": 12.5}}]},
        "aggregations": {"time_series": {"buckets": buckets}}
    })
}

/// `traces` copies of frontend -> checkout -> payments.
pub fn chain_span_response(traces: usize) -> Value {
    let mut hits = Vec::new();
    for t in 0..traces {
        let trace_id = format!("trace-{t}");
        for (id, parent, service, duration) in [
            ("a", None, "frontend", 120.0),
            ("b", Some("a"), "checkout", 80.0),
            ("c", Some("b"), "payments", 40.0),
        ] {
            hits.push(json!({"_source": {
                "traceId": trace_id,
                "spanId": format!("{trace_id}-{id}"),
                "parentSpanId": parent.map(|p| format!("{trace_id}-{p}")),
                "serviceName": service,
                "name": format!("{service} handler"),
                "duration": duration,
            }}));
        }
    }
    json!({"hits": {"hits": hits}})
}
