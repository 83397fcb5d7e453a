use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use tracelens_compute::{AnalysisOptions, TimeSeriesAnalyzer};

use super::Labeled;
use crate::input::{metric_query, options, required_str, schema, time_range};
use crate::tool::{Tool, ToolContext, ToolDefinition, ToolError, ToolResult};

const MAX_FORECAST_PERIODS: usize = 10_000;

/// Trend, seasonality, change points and optional forecast for one metric.
pub struct AnalyzeTimeSeriesTool;

#[async_trait]
impl Tool for AnalyzeTimeSeriesTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "analyze_time_series".to_string(),
            description: "Analyze a metric over time: statistics, trend, seasonality, change points and an optional forecast."
                .to_string(),
            input_schema: schema(
                json!({
                    "metric": {"type": "string", "description": "Numeric field to average per bucket"},
                    "interval": {"type": "string", "description": "Histogram interval, e.g. '1m', '1h'"},
                    "fill": {"type": "string", "enum": ["zero", "previous", "interpolate", "none"]},
                    "smoothing": {"type": "string", "enum": ["sma", "ema", "lowess"]},
                    "smoothing_window": {"type": "integer", "minimum": 1},
                    "detect_seasonality": {"type": "boolean"},
                    "detect_change_points": {"type": "boolean"},
                    "forecast_periods": {"type": "integer", "minimum": 0, "maximum": MAX_FORECAST_PERIODS},
                    "confidence": {"type": "number", "exclusiveMinimum": 0, "exclusiveMaximum": 1}
                }),
                &["metric"],
            ),
        }
    }

    async fn execute(&self, input: Value, context: &ToolContext) -> Result<ToolResult, ToolError> {
        let metric = required_str(&input, "metric")?;
        let range = time_range(&input, "1h")?;
        let query = metric_query(&input, metric, range)?;
        let opts: AnalysisOptions = options(&input)?;
        if !(opts.confidence > 0.0 && opts.confidence < 1.0) {
            return Err(ToolError::InvalidInput("'confidence' must be in (0, 1)".to_string()));
        }
        if opts.forecast_periods > MAX_FORECAST_PERIODS {
            return Err(ToolError::InvalidInput(format!(
                "'forecast_periods' must be at most {MAX_FORECAST_PERIODS}"
            )));
        }

        debug!(metric, interval = %query.interval, "analyzing time series");
        let result = TimeSeriesAnalyzer::new(context.backend.clone())
            .analyze(&query, &opts)
            .await;
        ToolResult::json(&Labeled {
            metric,
            result: &result,
        })
    }
}

/// Correlation and lead/lag between two metrics over the same window.
pub struct CompareMetricsTool;

#[async_trait]
impl Tool for CompareMetricsTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "compare_metrics".to_string(),
            description: "Compare two metrics over the same window: Pearson correlation and which one leads."
                .to_string(),
            input_schema: schema(
                json!({
                    "metric_a": {"type": "string"},
                    "metric_b": {"type": "string"},
                    "interval": {"type": "string"}
                }),
                &["metric_a", "metric_b"],
            ),
        }
    }

    async fn execute(&self, input: Value, context: &ToolContext) -> Result<ToolResult, ToolError> {
        let range = time_range(&input, "1h")?;
        let a = metric_query(&input, required_str(&input, "metric_a")?, range)?;
        let b = metric_query(&input, required_str(&input, "metric_b")?, range)?;

        let result = TimeSeriesAnalyzer::new(context.backend.clone())
            .compare(&a, &b)
            .await;
        ToolResult::json(&result)
    }
}
