use async_trait::async_trait;
use chrono::Duration;
use serde_json::{json, Value};

use tracelens_compute::{LogAnomalyDetector, LogAnomalyOptions};

use crate::input::{filters, interval, options, schema, string_list, time_range, window_start};
use crate::tool::{Tool, ToolContext, ToolDefinition, ToolError, ToolResult};

const METHODS: [&str; 4] = ["frequency", "pattern", "statistical", "clustering"];

/// Resolve options: input keys win, then the configured defaults for the
/// spike threshold and baseline length. `methods`, when given, selects the
/// enabled methods exactly.
fn log_options(input: &Value, context: &ToolContext) -> Result<LogAnomalyOptions, ToolError> {
    let mut opts: LogAnomalyOptions = options(input)?;
    if input.get("spike_threshold").is_none() {
        opts.spike_threshold = context.analysis.log_spike_threshold;
    }
    if input.get("baseline_days").is_none() {
        opts.baseline_days = context.analysis.log_baseline_days;
    }
    if input.get("interval").is_some() {
        opts.interval = interval(input)?;
    }

    if input.get("methods").is_some() {
        let methods = string_list(input, "methods")?;
        if let Some(unknown) = methods.iter().find(|m| !METHODS.contains(&m.as_str())) {
            return Err(ToolError::InvalidInput(format!(
                "unknown method '{unknown}', expected one of: {}",
                METHODS.join(", ")
            )));
        }
        let enabled = |name: &str| methods.iter().any(|m| m == name);
        opts.frequency = enabled("frequency");
        opts.pattern = enabled("pattern");
        opts.statistical = enabled("statistical");
        opts.clustering = enabled("clustering");
    }

    if !(opts.frequency || opts.pattern || opts.statistical || opts.clustering) {
        return Err(ToolError::InvalidInput("at least one detection method must be enabled".to_string()));
    }
    if opts.baseline_days < 1 || opts.spike_threshold <= 0.0 || opts.sample_size == 0 {
        return Err(ToolError::InvalidInput(
            "'baseline_days', 'spike_threshold' and 'sample_size' must be positive".to_string(),
        ));
    }
    Ok(opts)
}

/// Frequency, keyword, statistical and cardinality checks over log documents.
pub struct DetectLogAnomaliesTool;

#[async_trait]
impl Tool for DetectLogAnomaliesTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "detect_log_anomalies".to_string(),
            description: "Detect log volume spikes against a multi-day baseline, error keyword bursts, outlying numeric fields and message cardinality shifts."
                .to_string(),
            input_schema: schema(
                json!({
                    "methods": {"type": "array", "items": {"type": "string", "enum": METHODS}},
                    "interval": {"type": "string", "description": "Histogram interval for volume checks"},
                    "baseline_days": {"type": "integer", "minimum": 1},
                    "spike_threshold": {"type": "number", "exclusiveMinimum": 0},
                    "keywords": {"type": "array", "items": {"type": "string"}},
                    "z_threshold": {"type": "number"},
                    "percentile": {"type": "number", "minimum": 0, "maximum": 100},
                    "cardinality_threshold": {"type": "number", "minimum": 1},
                    "sample_size": {"type": "integer", "minimum": 1},
                    "limit": {"type": "integer", "minimum": 1}
                }),
                &[],
            ),
        }
    }

    async fn execute(&self, input: Value, context: &ToolContext) -> Result<ToolResult, ToolError> {
        let range = time_range(&input, "1h")?;
        let filters = filters(&input)?;
        let opts = log_options(&input, context)?;
        let baseline = Duration::try_days(opts.baseline_days)
            .ok_or_else(|| ToolError::InvalidInput("'baseline_days' is out of range".to_string()))?;
        window_start(range.start, baseline)?;

        let result = LogAnomalyDetector::new(context.backend.clone())
            .detect(&range, &filters, &opts)
            .await;
        ToolResult::json(&result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context, input, parse, CannedBackend};
    use std::sync::Arc;

    fn log_backend() -> Arc<CannedBackend> {
        Arc::new(CannedBackend {
            logs: Some(json!({
                "hits": {"hits": [
                    {"_source": {"@timestamp": "2024-06-01T11:05:00Z", "message": "upstream timeout", "level": "error"}},
                    {"_source": {"@timestamp": "2024-06-01T11:06:00Z", "message": "ok"}},
                ]},
                "aggregations": {"time_series": {"buckets": []}}
            })),
            ..CannedBackend::default()
        })
    }

    #[tokio::test]
    async fn test_pattern_only() {
        let backend = log_backend();
        let mut ctx = context(backend.clone());
        ctx.analysis.log_baseline_days = 2;

        let result = DetectLogAnomaliesTool
            .execute(input(json!({"methods": ["pattern"]})), &ctx)
            .await
            .unwrap();

        let body = parse(&result);
        assert_eq!(body["methods"], json!(["pattern"]));
        assert_eq!(body["anomalies"].as_array().unwrap().len(), 1);
        assert_eq!(body["anomalies"][0]["kind"], "pattern");
        assert_eq!(body["baseline"]["start"], "2024-05-30T11:00:00Z");
        assert_eq!(backend.request_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_method_rejected() {
        let ctx = context(log_backend());
        let err = DetectLogAnomaliesTool
            .execute(input(json!({"methods": ["tarot"]})), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));

        let err = DetectLogAnomaliesTool
            .execute(input(json!({"methods": []})), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_baseline_out_of_range_rejected() {
        let backend = log_backend();
        for days in [i64::MAX, 100_000_000] {
            let err = DetectLogAnomaliesTool
                .execute(input(json!({"baseline_days": days})), &context(backend.clone()))
                .await
                .unwrap_err();
            assert!(matches!(err, ToolError::InvalidInput(_)));
        }
        assert_eq!(backend.request_count(), 0);
    }

    #[tokio::test]
    async fn test_weekly_interval_rejected() {
        let err = DetectLogAnomaliesTool
            .execute(input(json!({"interval": "1w"})), &context(log_backend()))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_all_fetches_failing() {
        let ctx = context(Arc::new(CannedBackend::default()));
        let result = DetectLogAnomaliesTool.execute(input(json!({})), &ctx).await.unwrap();
        assert!(result.is_error);
        assert!(parse(&result)["methods"].as_array().unwrap().is_empty());
    }
}
