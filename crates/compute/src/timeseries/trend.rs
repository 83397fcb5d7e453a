//! Least-squares trend over the present points of a series.

use serde::{Deserialize, Serialize};
use tracing::debug;

use tracelens_core::TimeSeriesPoint;

/// Slopes with an absolute value at or below this are reported as stable.
const STABLE_SLOPE: f64 = 0.01;

/// Direction of a fitted trend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

/// Least-squares line through a series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendInfo {
    pub direction: TrendDirection,
    /// `min(|R²|, 1)`.
    pub strength: f64,
    /// Value units per minute.
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
    /// Percent change from the first to the last present value.
    pub change_rate: f64,
}

impl TrendInfo {
    fn flat() -> Self {
        Self {
            direction: TrendDirection::Stable,
            strength: 0.0,
            slope: 0.0,
            intercept: 0.0,
            r_squared: 0.0,
            change_rate: 0.0,
        }
    }
}

/// Fit `value = intercept + slope * minutes_since_first_point` by ordinary
/// least squares over the present points.
pub fn compute_trend(series: &[TimeSeriesPoint]) -> TrendInfo {
    let points: Vec<(f64, f64)> = match series.iter().find(|p| p.value.is_some()) {
        Some(first) => series
            .iter()
            .filter_map(|p| {
                let minutes = (p.timestamp - first.timestamp).num_milliseconds() as f64 / 60_000.0;
                p.value.map(|v| (minutes, v))
            })
            .collect(),
        None => Vec::new(),
    };

    if points.len() < 2 {
        let mut flat = TrendInfo::flat();
        if let Some(&(_, v)) = points.first() {
            flat.intercept = v;
        }
        return flat;
    }

    let n = points.len() as f64;
    let sum_x: f64 = points.iter().map(|(x, _)| x).sum();
    let sum_y: f64 = points.iter().map(|(_, y)| y).sum();
    let sum_xy: f64 = points.iter().map(|(x, y)| x * y).sum();
    let sum_xx: f64 = points.iter().map(|(x, _)| x * x).sum();

    let denom = n * sum_xx - sum_x * sum_x;
    let slope = if denom.abs() <= f64::EPSILON {
        0.0
    } else {
        (n * sum_xy - sum_x * sum_y) / denom
    };
    let intercept = (sum_y - slope * sum_x) / n;

    let mean_y = sum_y / n;
    let ss_tot: f64 = points.iter().map(|(_, y)| (y - mean_y).powi(2)).sum();
    let ss_res: f64 = points
        .iter()
        .map(|(x, y)| (y - (intercept + slope * x)).powi(2))
        .sum();
    let r_squared = if ss_tot <= f64::EPSILON {
        0.0
    } else {
        1.0 - ss_res / ss_tot
    };

    let first = points[0].1;
    let last = points[points.len() - 1].1;
    let change_rate = if first == 0.0 {
        0.0
    } else {
        (last - first) / first * 100.0
    };

    let direction = if slope.abs() <= STABLE_SLOPE {
        TrendDirection::Stable
    } else if slope > 0.0 {
        TrendDirection::Increasing
    } else {
        TrendDirection::Decreasing
    };

    debug!(points = points.len(), slope, r_squared, "trend fitted");

    TrendInfo {
        direction,
        strength: r_squared.abs().min(1.0),
        slope,
        intercept,
        r_squared,
        change_rate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn minute_series(values: &[f64]) -> Vec<TimeSeriesPoint> {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| TimeSeriesPoint::new(t0 + Duration::minutes(i as i64), *v))
            .collect()
    }

    #[test]
    fn constant_series_is_stable() {
        let trend = compute_trend(&minute_series(&[7.0; 30]));
        assert_eq!(trend.direction, TrendDirection::Stable);
        assert!(trend.slope.abs() < 1e-9);
        assert_eq!(trend.change_rate, 0.0);
    }

    #[test]
    fn linear_increase() {
        let values: Vec<f64> = (0..20).map(|i| 10.0 + 2.0 * i as f64).collect();
        let trend = compute_trend(&minute_series(&values));
        assert_eq!(trend.direction, TrendDirection::Increasing);
        assert!((trend.slope - 2.0).abs() < 1e-9);
        assert!((trend.intercept - 10.0).abs() < 1e-9);
        assert!((trend.r_squared - 1.0).abs() < 1e-9);
        assert!((trend.strength - 1.0).abs() < 1e-9);
        // (48 - 10) / 10 * 100
        assert!((trend.change_rate - 380.0).abs() < 1e-9);
    }

    #[test]
    fn decreasing_uses_minutes_not_indices() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let series: Vec<TimeSeriesPoint> = (0..10)
            .map(|i| TimeSeriesPoint::new(t0 + Duration::minutes(5 * i), 100.0 - 10.0 * i as f64))
            .collect();
        let trend = compute_trend(&series);
        assert_eq!(trend.direction, TrendDirection::Decreasing);
        assert!((trend.slope + 2.0).abs() < 1e-9);
    }

    #[test]
    fn too_few_points() {
        let trend = compute_trend(&minute_series(&[3.0]));
        assert_eq!(trend.direction, TrendDirection::Stable);
        assert_eq!(trend.intercept, 3.0);
        assert_eq!(compute_trend(&[]).slope, 0.0);
    }
}
