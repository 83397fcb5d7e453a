//! Backend-driven time series entry points.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use tracelens_core::SearchBackend;

use super::{analyze, compare_series, AnalysisOptions, SeriesComparison, TimeSeriesAnalysisResult};
use crate::query::{fetch_metric_series, MetricQuery};

/// Comparison of two fetched metrics; `comparison` is `None` when a fetch failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricComparisonResult {
    pub metric_a: String,
    pub metric_b: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison: Option<SeriesComparison>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Fetches metric series and runs the analysis over them.
pub struct TimeSeriesAnalyzer {
    backend: Arc<dyn SearchBackend>,
}

impl TimeSeriesAnalyzer {
    pub fn new(backend: Arc<dyn SearchBackend>) -> Self {
        Self { backend }
    }

    /// Fetch `query` and analyze it. Fetch failures come back as an empty
    /// result with `error` set.
    pub async fn analyze(
        &self,
        query: &MetricQuery,
        options: &AnalysisOptions,
    ) -> TimeSeriesAnalysisResult {
        match fetch_metric_series(self.backend.as_ref(), query).await {
            Ok(series) => {
                let result = analyze(&series, options);
                info!(
                    metric = %query.metric,
                    points = result.total_points,
                    direction = ?result.trend.direction,
                    "time series analyzed"
                );
                result
            }
            Err(e) => {
                warn!(metric = %query.metric, error = %e, "metric fetch failed");
                TimeSeriesAnalysisResult::failed(format!("failed to fetch {}: {e}", query.metric))
            }
        }
    }

    /// Fetch both metrics concurrently and compare them.
    pub async fn compare(&self, a: &MetricQuery, b: &MetricQuery) -> MetricComparisonResult {
        let (left, right) = futures::join!(
            fetch_metric_series(self.backend.as_ref(), a),
            fetch_metric_series(self.backend.as_ref(), b),
        );

        let mut result = MetricComparisonResult {
            metric_a: a.metric.clone(),
            metric_b: b.metric.clone(),
            comparison: None,
            error: None,
        };

        match (left, right) {
            (Ok(sa), Ok(sb)) => {
                result.comparison = Some(compare_series(&sa, &sb));
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(metric_a = %a.metric, metric_b = %b.metric, error = %e, "comparison fetch failed");
                result.error = Some(e.to_string());
            }
        }
        result
    }
}
