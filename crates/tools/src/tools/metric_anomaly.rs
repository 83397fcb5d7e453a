use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

use tracelens_compute::{AnomalyDetectionResult, DetectorConfig, MetricAnomalyDetector};
use tracelens_core::TimeRange;

use crate::input::{
    metric_query, options, required_str, schema, string_list, time_range, window_start,
};
use crate::tool::{Tool, ToolContext, ToolDefinition, ToolError, ToolResult};

fn detector_properties() -> Value {
    json!({
        "interval": {"type": "string", "description": "Histogram interval, e.g. '1m', '1h'"},
        "method": {"type": "string", "enum": ["zscore", "mad", "isolation", "percentile"]},
        "sensitivity": {"type": "number", "minimum": 0, "maximum": 1, "description": "Higher flags more points"},
        "window_size": {"type": "integer", "minimum": 2},
        "remove_seasonality": {"type": "boolean"},
        "seasonality_period": {"type": "integer", "minimum": 1},
        "detect_level_shifts": {"type": "boolean"}
    })
}

fn with_properties(extra: Value) -> Value {
    let mut props = detector_properties();
    if let (Some(props), Value::Object(extra)) = (props.as_object_mut(), extra) {
        props.extend(extra);
    }
    props
}

/// Detector settings from the input; `sensitivity` falls back to the
/// configured default.
fn detector_config(input: &Value, context: &ToolContext) -> Result<DetectorConfig, ToolError> {
    let mut config: DetectorConfig = options(input)?;
    if input.get("sensitivity").is_none() {
        config.sensitivity = context.analysis.sensitivity;
    }
    if !(0.0..=1.0).contains(&config.sensitivity) {
        return Err(ToolError::InvalidInput("'sensitivity' must be in [0, 1]".to_string()));
    }
    if config.window_size < 2 || config.seasonality_period == 0 {
        return Err(ToolError::InvalidInput(
            "'window_size' must be at least 2 and 'seasonality_period' positive".to_string(),
        ));
    }
    Ok(config)
}

/// Single-metric anomaly detection.
pub struct DetectMetricAnomaliesTool;

#[async_trait]
impl Tool for DetectMetricAnomaliesTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "detect_metric_anomalies".to_string(),
            description: "Detect spikes, dips and level shifts in a metric with z-score, MAD, isolation or percentile scoring."
                .to_string(),
            input_schema: schema(
                with_properties(json!({"metric": {"type": "string"}})),
                &["metric"],
            ),
        }
    }

    async fn execute(&self, input: Value, context: &ToolContext) -> Result<ToolResult, ToolError> {
        let metric = required_str(&input, "metric")?;
        let query = metric_query(&input, metric, time_range(&input, "1h")?)?;
        let config = detector_config(&input, context)?;

        let result = MetricAnomalyDetector::new(context.backend.clone(), config)
            .detect(&query)
            .await;
        ToolResult::json(&result)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MultiMetricReport {
    total_anomalies: usize,
    /// Metrics ordered by anomaly count, highest first.
    ranking: Vec<String>,
    results: Vec<AnomalyDetectionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl MultiMetricReport {
    fn new(results: Vec<AnomalyDetectionResult>) -> Self {
        let mut ranked: Vec<(&str, usize)> = results
            .iter()
            .map(|r| (r.metric.as_deref().unwrap_or_default(), r.anomalies.len()))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));

        let failed = results.iter().filter(|r| r.error.is_some()).count();
        let error = (failed == results.len() && failed > 0)
            .then(|| format!("all {failed} metric fetches failed"));
        Self {
            total_anomalies: results.iter().map(|r| r.anomalies.len()).sum(),
            ranking: ranked.into_iter().map(|(m, _)| m.to_string()).collect(),
            results,
            error,
        }
    }
}

/// Batch detection over several metrics sharing a window and settings.
pub struct DetectMultiMetricAnomaliesTool;

#[async_trait]
impl Tool for DetectMultiMetricAnomaliesTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "detect_multi_metric_anomalies".to_string(),
            description: "Run anomaly detection over several metrics concurrently and rank them by anomaly count."
                .to_string(),
            input_schema: schema(
                with_properties(json!({
                    "metrics": {"type": "array", "items": {"type": "string"}, "minItems": 1}
                })),
                &["metrics"],
            ),
        }
    }

    async fn execute(&self, input: Value, context: &ToolContext) -> Result<ToolResult, ToolError> {
        let metrics = string_list(&input, "metrics")?;
        if metrics.is_empty() {
            return Err(ToolError::InvalidInput("'metrics' must name at least one metric".to_string()));
        }
        let range = time_range(&input, "1h")?;
        let queries = metrics
            .iter()
            .map(|m| metric_query(&input, m, range))
            .collect::<Result<Vec<_>, _>>()?;
        let config = detector_config(&input, context)?;

        let results = MetricAnomalyDetector::new(context.backend.clone(), config)
            .detect_multiple(&queries)
            .await;
        ToolResult::json(&MultiMetricReport::new(results))
    }
}

/// Anomaly pattern change between the window and an earlier one.
pub struct CompareAnomalyPeriodsTool;

#[async_trait]
impl Tool for CompareAnomalyPeriodsTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "compare_anomaly_periods".to_string(),
            description: "Compare a metric's anomaly rate and types between the current window and a previous one (default: the window immediately before)."
                .to_string(),
            input_schema: schema(
                with_properties(json!({
                    "metric": {"type": "string"},
                    "previous_start_time": {"type": "string", "description": "Previous window start (RFC 3339)"},
                    "previous_end_time": {"type": "string", "description": "Previous window end (RFC 3339)"}
                })),
                &["metric"],
            ),
        }
    }

    async fn execute(&self, input: Value, context: &ToolContext) -> Result<ToolResult, ToolError> {
        let metric = required_str(&input, "metric")?;
        let range = time_range(&input, "1h")?;
        let query = metric_query(&input, metric, range)?;
        let previous = previous_range(&input, range)?;
        let config = detector_config(&input, context)?;

        let result = MetricAnomalyDetector::new(context.backend.clone(), config)
            .compare_periods(&query, previous)
            .await;
        ToolResult::json(&result)
    }
}

fn previous_range(input: &Value, current: TimeRange) -> Result<TimeRange, ToolError> {
    let has_start = input.get("previous_start_time").is_some();
    let has_end = input.get("previous_end_time").is_some();
    if !has_start && !has_end {
        window_start(current.start, current.length())?;
        return Ok(current.preceding());
    }
    if has_start != has_end {
        return Err(ToolError::InvalidInput(
            "'previous_start_time' and 'previous_end_time' must be given together".to_string(),
        ));
    }
    let previous = json!({
        "start_time": input["previous_start_time"],
        "end_time": input["previous_end_time"],
    });
    time_range(&previous, "1h")
}
