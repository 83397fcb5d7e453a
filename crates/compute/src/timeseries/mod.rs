//! Time series analysis: gap filling, smoothing, trend, seasonality,
//! change points, forecasting and two-series comparison.
//!
//! Sub-modules:
//! - [`transform`]: fill and smooth
//! - [`trend`]: least-squares trend
//! - [`seasonality`]: periodic amplitude scan
//! - [`change_points`]: windowed mean/variance shifts
//! - [`forecast`]: trend/seasonal extrapolation with confidence band
//! - [`correlation`]: alignment, Pearson and lead/lag
//! - [`analyzer`]: backend-driven entry points

pub mod analyzer;
pub mod change_points;
pub mod correlation;
pub mod forecast;
pub mod seasonality;
pub mod transform;
pub mod trend;

use serde::{Deserialize, Serialize};
use tracing::debug;

use tracelens_core::{present_values, TimeSeriesPoint};

use crate::stats::{self, Summary};

pub use analyzer::TimeSeriesAnalyzer;
pub use change_points::{detect_change_points, ChangeKind, ChangePoint};
pub use correlation::{compare_series, LagCorrelation, LeadLag, SeriesComparison, SeriesLabel};
pub use forecast::{forecast, z_for_confidence, ForecastPoint};
pub use seasonality::{detect_seasonality, SeasonalityInfo};
pub use transform::{fill_missing, smooth, FillMethod, SmoothingMethod};
pub use trend::{compute_trend, TrendDirection, TrendInfo};

/// Knobs for [`analyze`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisOptions {
    pub fill: FillMethod,
    pub smoothing: Option<SmoothingMethod>,
    pub smoothing_window: usize,
    pub detect_seasonality: bool,
    pub detect_change_points: bool,
    /// Buckets to forecast; 0 disables forecasting.
    pub forecast_periods: usize,
    pub confidence: f64,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            fill: FillMethod::Interpolate,
            smoothing: None,
            smoothing_window: 5,
            detect_seasonality: true,
            detect_change_points: true,
            forecast_periods: 0,
            confidence: 0.95,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeriesAnalysisResult {
    pub total_points: usize,
    pub missing_points: usize,
    pub statistics: Summary,
    pub trend: TrendInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seasonality: Option<SeasonalityInfo>,
    pub change_points: Vec<ChangePoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forecast: Option<Vec<ForecastPoint>>,
    /// The filled (and optionally smoothed) series the analysis ran on.
    pub series: Vec<TimeSeriesPoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TimeSeriesAnalysisResult {
    /// Uniform empty shape carrying an error message.
    pub fn failed(message: impl Into<String>) -> Self {
        let mut result = analyze(&[], &AnalysisOptions::default());
        result.error = Some(message.into());
        result
    }
}

/// Run the full analysis over an already fetched series.
pub fn analyze(series: &[TimeSeriesPoint], options: &AnalysisOptions) -> TimeSeriesAnalysisResult {
    let missing_points = series.iter().filter(|p| p.value.is_none()).count();

    let mut processed = fill_missing(series, options.fill);
    if let Some(method) = options.smoothing {
        processed = smooth(&processed, method, options.smoothing_window);
    }

    let values = present_values(&processed);
    let statistics = Summary::of(&values);
    let trend = compute_trend(&processed);
    let seasonality = options
        .detect_seasonality
        .then(|| detect_seasonality(&processed))
        .flatten();
    let change_points = if options.detect_change_points {
        detect_change_points(&processed)
    } else {
        Vec::new()
    };
    let forecast = (options.forecast_periods > 0).then(|| {
        forecast(
            &processed,
            &trend,
            seasonality.as_ref(),
            options.forecast_periods,
            options.confidence,
        )
    });

    debug!(
        points = series.len(),
        missing = missing_points,
        change_points = change_points.len(),
        "time series analysis complete"
    );

    TimeSeriesAnalysisResult {
        total_points: series.len(),
        missing_points,
        statistics,
        trend,
        seasonality,
        change_points,
        forecast,
        series: processed,
        error: None,
    }
}

/// Median gap between consecutive timestamps, in seconds. 0 for fewer than two points.
pub(crate) fn median_spacing_secs(series: &[TimeSeriesPoint]) -> f64 {
    let gaps: Vec<f64> = series
        .windows(2)
        .map(|w| (w[1].timestamp - w[0].timestamp).num_milliseconds() as f64 / 1000.0)
        .filter(|g| *g > 0.0)
        .collect();
    stats::median(&gaps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn minute_series(values: &[Option<f64>]) -> Vec<TimeSeriesPoint> {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| TimeSeriesPoint {
                timestamp: t0 + Duration::minutes(i as i64),
                value: *v,
            })
            .collect()
    }

    #[test]
    fn analyze_fills_then_fits() {
        let mut values: Vec<Option<f64>> = (0..30).map(|i| Some(i as f64)).collect();
        values[10] = None;
        let result = analyze(
            &minute_series(&values),
            &AnalysisOptions {
                forecast_periods: 2,
                ..AnalysisOptions::default()
            },
        );

        assert_eq!(result.total_points, 30);
        assert_eq!(result.missing_points, 1);
        assert_eq!(result.series[10].value, Some(10.0));
        assert_eq!(result.trend.direction, TrendDirection::Increasing);
        assert!(result.seasonality.is_some());
        let forecast = result.forecast.unwrap();
        assert!((forecast[0].value - 30.0).abs() < 1e-6);
        assert!(result.error.is_none());
    }

    #[test]
    fn failed_result_keeps_shape() {
        let result = TimeSeriesAnalysisResult::failed("backend down");
        assert_eq!(result.total_points, 0);
        assert_eq!(result.statistics, Summary::default());
        assert_eq!(result.error.as_deref(), Some("backend down"));
    }

    #[test]
    fn spacing_is_median_gap() {
        let series = minute_series(&[Some(1.0), Some(2.0), Some(3.0)]);
        assert!((median_spacing_secs(&series) - 60.0).abs() < 1e-9);
        assert_eq!(median_spacing_secs(&series[..1]), 0.0);
    }
}
