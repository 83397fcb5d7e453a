//! Mean and variance shifts between adjacent windows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tracelens_core::TimeSeriesPoint;

use crate::stats;

/// What shifted at a change point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Increase,
    Decrease,
    Variance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePoint {
    /// Index among the present points.
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    pub kind: ChangeKind,
    /// Mean delta for level changes, std-dev ratio for variance changes.
    pub magnitude: f64,
    pub before_mean: f64,
    pub after_mean: f64,
    pub before_std_dev: f64,
    pub after_std_dev: f64,
}

/// Window size used for a series of `len` present points.
pub fn window_size(len: usize) -> usize {
    (len / 10).max(10)
}

/// Compare the window before each interior index with the window after it.
///
/// A level change is flagged when `|after_mean - before_mean| > 2 * before_std`,
/// a variance change when `after_std / before_std` leaves `[0.5, 2]`. Both
/// can fire at the same index. The variance check needs a non-flat
/// "before" window.
pub fn detect_change_points(series: &[TimeSeriesPoint]) -> Vec<ChangePoint> {
    let points: Vec<(DateTime<Utc>, f64)> = series
        .iter()
        .filter_map(|p| p.value.map(|v| (p.timestamp, v)))
        .collect();
    let n = points.len();
    let w = window_size(n);
    if n < 2 * w {
        return Vec::new();
    }

    let values: Vec<f64> = points.iter().map(|(_, v)| *v).collect();
    let mut changes = Vec::new();

    for i in w..=(n - w) {
        let before = &values[i - w..i];
        let after = &values[i..i + w];
        let (before_mean, after_mean) = (stats::mean(before), stats::mean(after));
        let (before_std, after_std) = (stats::std_dev(before), stats::std_dev(after));
        let delta = after_mean - before_mean;

        let base = ChangePoint {
            index: i,
            timestamp: points[i].0,
            kind: ChangeKind::Increase,
            magnitude: delta,
            before_mean,
            after_mean,
            before_std_dev: before_std,
            after_std_dev: after_std,
        };

        if delta.abs() > 2.0 * before_std {
            changes.push(ChangePoint {
                kind: if delta > 0.0 {
                    ChangeKind::Increase
                } else {
                    ChangeKind::Decrease
                },
                ..base.clone()
            });
        }

        if before_std > f64::EPSILON {
            let ratio = after_std / before_std;
            if !(0.5..=2.0).contains(&ratio) {
                changes.push(ChangePoint {
                    kind: ChangeKind::Variance,
                    magnitude: ratio,
                    ..base
                });
            }
        }
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn minute_series(values: &[f64]) -> Vec<TimeSeriesPoint> {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| TimeSeriesPoint::new(t0 + Duration::minutes(i as i64), *v))
            .collect()
    }

    #[test]
    fn window_floor() {
        assert_eq!(window_size(30), 10);
        assert_eq!(window_size(250), 25);
    }

    #[test]
    fn level_shift_is_flagged_at_boundary() {
        let mut values = vec![10.0; 20];
        values.extend(vec![50.0; 20]);
        let changes = detect_change_points(&minute_series(&values));

        let at_boundary: Vec<_> = changes.iter().filter(|c| c.index == 20).collect();
        assert_eq!(at_boundary.len(), 1);
        assert_eq!(at_boundary[0].kind, ChangeKind::Increase);
        assert!((at_boundary[0].magnitude - 40.0).abs() < 1e-9);
        assert!(!changes.iter().any(|c| c.kind == ChangeKind::Decrease));
    }

    #[test]
    fn variance_and_level_can_both_fire() {
        let mut values: Vec<f64> = (0..10).map(|i| if i % 2 == 0 { 10.0 } else { 11.0 }).collect();
        values.extend((0..10).map(|i| if i % 2 == 0 { 0.0 } else { 100.0 }));
        let changes = detect_change_points(&minute_series(&values));
        let kinds: Vec<ChangeKind> = changes.iter().filter(|c| c.index == 10).map(|c| c.kind).collect();
        assert_eq!(kinds, vec![ChangeKind::Increase, ChangeKind::Variance]);
    }

    #[test]
    fn short_or_flat_series_has_none() {
        assert!(detect_change_points(&minute_series(&[1.0; 19])).is_empty());
        assert!(detect_change_points(&minute_series(&[1.0; 40])).is_empty());
    }
}
