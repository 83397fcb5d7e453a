use async_trait::async_trait;
use serde_json::{json, Value};

use tracelens_compute::anomaly::HybridOptions;
use tracelens_compute::HybridAnomalyDetector;

use crate::input::{filters, interval, optional_str, options, schema, time_range};
use crate::tool::{Tool, ToolContext, ToolDefinition, ToolError, ToolResult};

fn hybrid_properties(extra: Value) -> Value {
    let mut props = json!({
        "threshold": {"type": "number", "description": "Absolute threshold; the mean when omitted"},
        "z_threshold": {"type": "number", "exclusiveMinimum": 0},
        "percentile": {"type": "number", "minimum": 0, "maximum": 100},
        "change_threshold": {"type": "number", "exclusiveMinimum": 0, "description": "Percent change between buckets"},
        "max_results": {"type": "integer", "minimum": 1}
    });
    if let (Some(props), Value::Object(extra)) = (props.as_object_mut(), extra) {
        props.extend(extra);
    }
    props
}

fn hybrid_options(input: &Value) -> Result<HybridOptions, ToolError> {
    let opts: HybridOptions = options(input)?;
    if !(0.0..=100.0).contains(&opts.percentile) || opts.z_threshold <= 0.0 || opts.max_results == 0 {
        return Err(ToolError::InvalidInput(
            "'percentile' must be in [0, 100], 'z_threshold' and 'max_results' positive".to_string(),
        ));
    }
    Ok(opts)
}

/// Multi-signal classification of metric buckets.
pub struct DetectHybridMetricAnomaliesTool;

#[async_trait]
impl Tool for DetectHybridMetricAnomaliesTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "detect_hybrid_metric_anomalies".to_string(),
            description: "Classify metric buckets with absolute, z-score, percentile, IQR and rate-of-change signals. Omit 'field' to scan every numeric field."
                .to_string(),
            input_schema: schema(
                hybrid_properties(json!({
                    "field": {"type": "string", "description": "Numeric field; discovered when omitted"},
                    "interval": {"type": "string"}
                })),
                &[],
            ),
        }
    }

    async fn execute(&self, input: Value, context: &ToolContext) -> Result<ToolResult, ToolError> {
        let field = optional_str(&input, "field")?;
        let range = time_range(&input, "1h")?;
        let interval = interval(&input)?;
        let filters = filters(&input)?;
        let opts = hybrid_options(&input)?;

        let result = HybridAnomalyDetector::new(context.backend.clone())
            .detect_metric(field, range, &interval, &filters, &opts)
            .await;
        ToolResult::json(&result)
    }
}

/// Per-operation span duration classification.
pub struct DetectSpanDurationAnomaliesTool;

#[async_trait]
impl Tool for DetectSpanDurationAnomaliesTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "detect_span_duration_anomalies".to_string(),
            description: "Group spans by operation and flag unusual durations with the hybrid signal set."
                .to_string(),
            input_schema: schema(
                hybrid_properties(json!({
                    "max_spans": {"type": "integer", "minimum": 1, "description": "Span fetch size"}
                })),
                &[],
            ),
        }
    }

    async fn execute(&self, input: Value, context: &ToolContext) -> Result<ToolResult, ToolError> {
        let range = time_range(&input, "1h")?;
        let filters = filters(&input)?;
        let opts = hybrid_options(&input)?;
        let max_spans = super::max_spans(&input, context)?;

        let result = HybridAnomalyDetector::new(context.backend.clone())
            .detect_spans(&range, max_spans, &filters, &opts)
            .await;
        ToolResult::json(&result)
    }
}
