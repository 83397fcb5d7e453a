//! Trend extrapolation with a widening confidence band.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use tracelens_core::{present_values, TimeSeriesPoint};

use super::seasonality::{phase_profile, SeasonalityInfo};
use super::trend::TrendInfo;
use super::median_spacing_secs;
use crate::stats;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
}

/// Two-sided z for the supported confidence levels; anything else uses 95%.
pub fn z_for_confidence(confidence: f64) -> f64 {
    const LEVELS: [(f64, f64); 3] = [(0.90, 1.645), (0.95, 1.96), (0.99, 2.576)];
    LEVELS
        .iter()
        .find(|(level, _)| (level - confidence).abs() < 1e-9)
        .map(|(_, z)| *z)
        .unwrap_or(1.96)
}

/// Extrapolate `periods` buckets past the last present point.
///
/// The point forecast is `last + slope * i`, scaled by the seasonal factor
/// of the matching phase when seasonality was detected. The band widens with
/// `stdError = stdDev * sqrt(1 + 1/n + i²/n)`.
pub fn forecast(
    series: &[TimeSeriesPoint],
    trend: &TrendInfo,
    seasonality: Option<&SeasonalityInfo>,
    periods: usize,
    confidence: f64,
) -> Vec<ForecastPoint> {
    let values = present_values(series);
    let Some(last_point) = series.iter().rev().find(|p| p.value.is_some()) else {
        return Vec::new();
    };
    let last_value = last_point.value.unwrap_or_default();

    let n = values.len() as f64;
    let std_dev = stats::std_dev(&values);
    let z = z_for_confidence(confidence);

    let spacing = median_spacing_secs(series);
    let step = if spacing > 0.0 {
        Duration::milliseconds((spacing * 1000.0) as i64)
    } else {
        Duration::minutes(1)
    };

    let seasonal = seasonality
        .filter(|s| s.detected)
        .and_then(|s| s.period_length)
        .filter(|&p| p > 0)
        .map(|p| {
            let overall = stats::mean(&values);
            let profile = phase_profile(&values, p);
            (p, overall, profile)
        });

    // stops early once a timestamp is no longer representable
    (1..=periods)
        .map_while(|i| {
            let offset = step.checked_mul(i32::try_from(i).ok()?)?;
            let timestamp = last_point.timestamp.checked_add_signed(offset)?;
            let fi = i as f64;
            let mut value = last_value + trend.slope * fi;

            if let Some((period, overall, profile)) = &seasonal {
                if overall.abs() > f64::EPSILON {
                    let offset = (values.len() - 1 + i) % period;
                    value *= profile[offset] / overall;
                }
            }

            let std_error = std_dev * (1.0 + 1.0 / n + fi * fi / n).sqrt();
            Some(ForecastPoint {
                timestamp,
                value,
                lower_bound: value - z * std_error,
                upper_bound: value + z * std_error,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeseries::trend::compute_trend;
    use chrono::TimeZone;

    fn minute_series(values: &[f64]) -> Vec<TimeSeriesPoint> {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| TimeSeriesPoint::new(t0 + Duration::minutes(i as i64), *v))
            .collect()
    }

    #[test]
    fn z_table() {
        assert_eq!(z_for_confidence(0.90), 1.645);
        assert_eq!(z_for_confidence(0.99), 2.576);
        assert_eq!(z_for_confidence(0.5), 1.96);
    }

    #[test]
    fn linear_extrapolation_with_widening_band() {
        let series = minute_series(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let trend = compute_trend(&series);
        let out = forecast(&series, &trend, None, 3, 0.95);

        assert_eq!(out.len(), 3);
        assert!((out[0].value - 6.0).abs() < 1e-9);
        assert!((out[2].value - 8.0).abs() < 1e-9);
        assert_eq!(out[0].timestamp, series[4].timestamp + Duration::minutes(1));

        let width0 = out[0].upper_bound - out[0].lower_bound;
        let width2 = out[2].upper_bound - out[2].lower_bound;
        assert!(width2 > width0);

        // std = sqrt(2), n = 5, i = 1: se = sqrt(2) * sqrt(1 + 0.2 + 0.2)
        let expected = 1.96 * 2f64.sqrt() * 1.4f64.sqrt();
        assert!((out[0].upper_bound - 6.0 - expected).abs() < 1e-9);
    }

    #[test]
    fn seasonal_factor_scales_forecast() {
        // period 2 profile: [10, 30], overall 20
        let series = minute_series(&[10.0, 30.0, 10.0, 30.0]);
        let flat = TrendInfo {
            slope: 0.0,
            ..compute_trend(&minute_series(&[1.0, 1.0]))
        };
        let seasonality = SeasonalityInfo {
            detected: true,
            period: Some("1h".into()),
            period_length: Some(2),
            strength: Some(0.6),
            components: None,
        };
        let out = forecast(&series, &flat, Some(&seasonality), 2, 0.95);
        // next index 4 -> phase 0 -> factor 0.5; index 5 -> phase 1 -> factor 1.5
        assert!((out[0].value - 15.0).abs() < 1e-9);
        assert!((out[1].value - 45.0).abs() < 1e-9);
    }

    #[test]
    fn forecast_stops_at_last_representable_instant() {
        let last = DateTime::<Utc>::MAX_UTC - Duration::seconds(90);
        let series = vec![
            TimeSeriesPoint::new(last - Duration::minutes(1), 1.0),
            TimeSeriesPoint::new(last, 2.0),
        ];
        let trend = compute_trend(&series);
        let out = forecast(&series, &trend, None, 5, 0.95);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].timestamp, last + Duration::minutes(1));
    }

    #[test]
    fn empty_series_has_no_forecast() {
        let trend = compute_trend(&[]);
        assert!(forecast(&[], &trend, None, 5, 0.95).is_empty());
    }
}
