use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use tracelens_compute::{TraceAnomalyDetector, TraceAnomalyOptions};

use crate::input::{
    filters, optional_f64, optional_str, options, parse_duration, parse_time, schema, time_range,
    window_start,
};
use crate::tool::{Tool, ToolContext, ToolDefinition, ToolError, ToolResult};

const DEFAULT_DRIFT_WINDOW: &str = "15m";
const DEFAULT_DRIFT_THRESHOLD: f64 = 2.0;

/// Latency, error and span-count pattern detection over whole traces.
pub struct DetectTraceAnomaliesTool;

#[async_trait]
impl Tool for DetectTraceAnomaliesTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "detect_trace_anomalies".to_string(),
            description: "Find slow, failing or structurally unusual traces, optionally with per-span health scores."
                .to_string(),
            input_schema: schema(
                json!({
                    "method": {"type": "string", "enum": ["latency", "error", "pattern", "all"]},
                    "percentile": {"type": "number", "minimum": 0, "maximum": 100},
                    "pattern_threshold": {"type": "number", "minimum": 0, "maximum": 1, "description": "Span-count share below which a trace shape is unusual"},
                    "limit": {"type": "integer", "minimum": 1},
                    "include_span_health": {"type": "boolean"},
                    "max_spans": {"type": "integer", "minimum": 1}
                }),
                &[],
            ),
        }
    }

    async fn execute(&self, input: Value, context: &ToolContext) -> Result<ToolResult, ToolError> {
        let range = time_range(&input, "1h")?;
        let filters = filters(&input)?;
        let max_spans = super::max_spans(&input, context)?;
        let opts: TraceAnomalyOptions = options(&input)?;
        if !(0.0..=100.0).contains(&opts.percentile) || !(0.0..=1.0).contains(&opts.pattern_threshold) {
            return Err(ToolError::InvalidInput(
                "'percentile' must be in [0, 100] and 'pattern_threshold' in [0, 1]".to_string(),
            ));
        }

        let result = TraceAnomalyDetector::new(context.backend.clone(), max_spans)
            .detect(&range, &filters, &opts)
            .await;
        ToolResult::json(&result)
    }
}

/// Current window against the one right before it.
pub struct DetectRealtimeTraceDriftTool;

#[async_trait]
impl Tool for DetectRealtimeTraceDriftTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "detect_realtime_trace_drift".to_string(),
            description: "Compare trace duration, error rate, volume and span count in the latest window against the preceding window of the same length."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "end_time": {"type": "string", "description": "Window end (RFC 3339); defaults to now"},
                    "window": {"type": "string", "description": "Window length, e.g. '15m'"},
                    "threshold": {"type": "number", "minimum": 1, "description": "Ratio (or its inverse) that counts as drift"},
                    "filters": {"type": "array", "items": {"type": "object"}},
                    "max_spans": {"type": "integer", "minimum": 1}
                },
                "required": []
            }),
        }
    }

    async fn execute(&self, input: Value, context: &ToolContext) -> Result<ToolResult, ToolError> {
        let window = parse_duration(optional_str(&input, "window")?.unwrap_or(DEFAULT_DRIFT_WINDOW))?;
        let end = parse_time(&input, "end_time")?.unwrap_or_else(Utc::now);
        // the baseline window ends where the current one starts
        window_start(window_start(end, window)?, window)?;
        let threshold = optional_f64(&input, "threshold")?.unwrap_or(DEFAULT_DRIFT_THRESHOLD);
        if threshold < 1.0 {
            return Err(ToolError::InvalidInput("'threshold' must be at least 1".to_string()));
        }
        let filters = filters(&input)?;
        let max_spans = super::max_spans(&input, context)?;

        let report = TraceAnomalyDetector::new(context.backend.clone(), max_spans)
            .detect_drift(end, window, &filters, threshold)
            .await;
        ToolResult::json(&report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{chain_span_response, context, input, parse, CannedBackend};
    use std::sync::Arc;

    fn chain_backend() -> Arc<CannedBackend> {
        Arc::new(CannedBackend {
            traces: Some(chain_span_response(6)),
            ..CannedBackend::default()
        })
    }

    #[tokio::test]
    async fn test_uniform_traces_have_no_anomalies() {
        let result = DetectTraceAnomaliesTool
            .execute(input(json!({"include_span_health": true})), &context(chain_backend()))
            .await
            .unwrap();

        let body = parse(&result);
        assert_eq!(body["totalTraces"], 6);
        assert_eq!(body["method"], "all");
        assert!(body["anomalies"].as_array().unwrap().is_empty());
        // only traces with span issues are listed
        assert!(body["spanHealth"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_method_rejected() {
        let err = DetectTraceAnomaliesTool
            .execute(input(json!({"method": "vibes"})), &context(chain_backend()))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_drift_windows_are_adjacent() {
        let backend = chain_backend();
        let result = DetectRealtimeTraceDriftTool
            .execute(
                json!({"end_time": "2024-06-01T12:00:00Z", "window": "30m"}),
                &context(backend.clone()),
            )
            .await
            .unwrap();

        let body = parse(&result);
        assert_eq!(body["currentWindow"]["start"], "2024-06-01T11:30:00Z");
        assert_eq!(body["baselineWindow"]["end"], "2024-06-01T11:30:00Z");
        assert_eq!(body["ratios"]["volume"], 1.0);
        assert!(body["drifted"].as_array().unwrap().is_empty());
        assert_eq!(backend.request_count(), 2);
    }

    #[tokio::test]
    async fn test_drift_window_out_of_range_rejected() {
        let backend = chain_backend();
        for window in ["9999999999999d", "200000000d"] {
            let err = DetectRealtimeTraceDriftTool
                .execute(
                    json!({"end_time": "2024-06-01T12:00:00Z", "window": window}),
                    &context(backend.clone()),
                )
                .await
                .unwrap_err();
            assert!(matches!(err, ToolError::InvalidInput(_)));
        }
        assert_eq!(backend.request_count(), 0);
    }

    #[tokio::test]
    async fn test_drift_threshold_below_one_rejected() {
        let err = DetectRealtimeTraceDriftTool
            .execute(json!({"threshold": 0.5}), &context(chain_backend()))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }
}
