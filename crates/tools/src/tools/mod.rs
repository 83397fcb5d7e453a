//! One tool per analysis.
//!
//! - **Time series** (`analyze_time_series`, `compare_metrics`)
//! - **Metric anomalies** (`detect_metric_anomalies`, `detect_multi_metric_anomalies`,
//!   `compare_anomaly_periods`)
//! - **Hybrid** (`detect_hybrid_metric_anomalies`, `detect_span_duration_anomalies`)
//! - **Traces** (`analyze_service_dependencies`, `detect_trace_anomalies`,
//!   `detect_realtime_trace_drift`)
//! - **Logs** (`detect_log_anomalies`)

pub mod dependencies;
pub mod hybrid;
pub mod logs;
pub mod metric_anomaly;
pub mod timeseries;
pub mod traces;

use serde::Serialize;
use serde_json::Value;

use crate::tool::{ToolContext, ToolError};

pub use dependencies::AnalyzeServiceDependenciesTool;
pub use hybrid::{DetectHybridMetricAnomaliesTool, DetectSpanDurationAnomaliesTool};
pub use logs::DetectLogAnomaliesTool;
pub use metric_anomaly::{
    CompareAnomalyPeriodsTool, DetectMetricAnomaliesTool, DetectMultiMetricAnomaliesTool,
};
pub use timeseries::{AnalyzeTimeSeriesTool, CompareMetricsTool};
pub use traces::{DetectRealtimeTraceDriftTool, DetectTraceAnomaliesTool};

/// A result tagged with the metric it was computed for.
#[derive(Serialize)]
struct Labeled<'a, T> {
    metric: &'a str,
    #[serde(flatten)]
    result: &'a T,
}

fn positive_usize(input: &Value, key: &str) -> Result<Option<usize>, ToolError> {
    match input.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => match v.as_u64() {
            Some(n) if n > 0 => Ok(Some(n as usize)),
            _ => Err(ToolError::InvalidInput(format!("'{key}' must be a positive integer"))),
        },
    }
}

/// Span fetch size: `max_spans` from the input, else the configured limit.
fn max_spans(input: &Value, context: &ToolContext) -> Result<usize, ToolError> {
    Ok(positive_usize(input, "max_spans")?.unwrap_or(context.analysis.max_trace_spans))
}
