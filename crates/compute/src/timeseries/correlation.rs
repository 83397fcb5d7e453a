//! Two-series alignment, correlation and lead/lag detection.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tracelens_core::TimeSeriesPoint;

use crate::stats;

/// Largest lag scanned regardless of series length.
const MAX_LAG: usize = 20;

/// Minimum |correlation| before a lead/lag relationship is reported.
const LEAD_LAG_CORRELATION: f64 = 0.5;

/// Correlations closer than this are treated as equal when picking the best lag.
const TIE_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SeriesLabel {
    SeriesA,
    SeriesB,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LagCorrelation {
    /// Positive: series B trails series A by this many buckets.
    pub lag: i64,
    pub correlation: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadLag {
    pub leader: SeriesLabel,
    pub follower: SeriesLabel,
    pub lag_buckets: usize,
    pub correlation: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesComparison {
    pub aligned_points: usize,
    pub correlation: f64,
    /// Sorted by correlation, highest first.
    pub lag_correlations: Vec<LagCorrelation>,
    pub best_lag: i64,
    pub best_correlation: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lead_lag: Option<LeadLag>,
}

/// Align two series on their common timestamps (gaps dropped).
pub fn align(a: &[TimeSeriesPoint], b: &[TimeSeriesPoint]) -> Vec<(DateTime<Utc>, f64, f64)> {
    let left: BTreeMap<DateTime<Utc>, f64> = a
        .iter()
        .filter_map(|p| p.value.map(|v| (p.timestamp, v)))
        .collect();
    let right: BTreeMap<DateTime<Utc>, f64> = b
        .iter()
        .filter_map(|p| p.value.map(|v| (p.timestamp, v)))
        .collect();

    left.into_iter()
        .filter_map(|(ts, va)| right.get(&ts).map(|vb| (ts, va, *vb)))
        .collect()
}

/// Correlation of `a[i]` with `b[i + lag]` over the overlapping range.
fn lagged_correlation(a: &[f64], b: &[f64], lag: i64) -> Option<f64> {
    let n = a.len();
    let shift = lag.unsigned_abs() as usize;
    if shift >= n || n - shift < 3 {
        return None;
    }
    let (xs, ys) = if lag >= 0 {
        (&a[..n - shift], &b[shift..])
    } else {
        (&a[shift..], &b[..n - shift])
    };
    Some(stats::pearson(xs, ys))
}

/// Compare two series: Pearson correlation on aligned points plus a
/// cross-correlation scan over lags `[-min(20, n/4), +min(20, n/4)]`.
pub fn compare_series(a: &[TimeSeriesPoint], b: &[TimeSeriesPoint]) -> SeriesComparison {
    let aligned = align(a, b);
    let xs: Vec<f64> = aligned.iter().map(|(_, x, _)| *x).collect();
    let ys: Vec<f64> = aligned.iter().map(|(_, _, y)| *y).collect();
    let n = xs.len();

    let correlation = stats::pearson(&xs, &ys);
    let max_lag = MAX_LAG.min(n / 4) as i64;

    let mut lag_correlations: Vec<LagCorrelation> = (-max_lag..=max_lag)
        .filter_map(|lag| {
            lagged_correlation(&xs, &ys, lag).map(|correlation| LagCorrelation { lag, correlation })
        })
        .collect();
    lag_correlations.sort_by(|l, r| r.correlation.total_cmp(&l.correlation));

    // Among (near-)ties for the top correlation prefer the smallest shift.
    let best = lag_correlations.first().map(|top| {
        lag_correlations
            .iter()
            .take_while(|lc| top.correlation - lc.correlation <= TIE_TOLERANCE)
            .min_by_key(|lc| lc.lag.abs())
            .unwrap_or(top)
            .clone()
    });
    let (best_lag, best_correlation) = best
        .map(|lc| (lc.lag, lc.correlation))
        .unwrap_or((0, correlation));

    let lead_lag = (best_correlation.abs() >= LEAD_LAG_CORRELATION && best_lag != 0).then(|| {
        let (leader, follower) = if best_lag > 0 {
            (SeriesLabel::SeriesA, SeriesLabel::SeriesB)
        } else {
            (SeriesLabel::SeriesB, SeriesLabel::SeriesA)
        };
        LeadLag {
            leader,
            follower,
            lag_buckets: best_lag.unsigned_abs() as usize,
            correlation: best_correlation,
        }
    });

    SeriesComparison {
        aligned_points: n,
        correlation,
        lag_correlations,
        best_lag,
        best_correlation,
        lead_lag,
    }
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

    fn wave(len: usize, shift: usize) -> Vec<f64> {
        (0..len)
            .map(|i| {
                let x = i as f64 - shift as f64;
                (x * 0.7).sin() * 10.0 + (x * 0.23).cos() * 4.0
            })
            .collect()
    }

    #[test]
    fn self_comparison_is_perfect_at_lag_zero() {
        let series = minute_series(&wave(60, 0));
        let cmp = compare_series(&series, &series);
        assert_eq!(cmp.aligned_points, 60);
        assert!((cmp.correlation - 1.0).abs() < 1e-9);
        assert_eq!(cmp.best_lag, 0);
        assert!(cmp.lead_lag.is_none());
        assert_eq!(cmp.lag_correlations.len(), 2 * 15 + 1);
    }

    #[test]
    fn linear_ramp_prefers_zero_lag_on_ties() {
        let ramp: Vec<f64> = (0..40).map(|i| i as f64).collect();
        let series = minute_series(&ramp);
        let cmp = compare_series(&series, &series);
        assert_eq!(cmp.best_lag, 0);
    }

    #[test]
    fn detects_leader() {
        let a = minute_series(&wave(80, 0));
        let b = minute_series(&wave(80, 3));
        let cmp = compare_series(&a, &b);
        assert_eq!(cmp.best_lag, 3);
        let lead = cmp.lead_lag.unwrap();
        assert_eq!(lead.leader, SeriesLabel::SeriesA);
        assert_eq!(lead.lag_buckets, 3);
    }

    #[test]
    fn aligns_on_common_timestamps_only() {
        let a = minute_series(&[1.0, 2.0, 3.0, 4.0]);
        let mut b = minute_series(&[9.0, 8.0, 7.0, 6.0]);
        b[1].value = None;
        let aligned = align(&a, &b[1..]);
        assert_eq!(aligned.len(), 2);
        assert_eq!(aligned[0].1, 3.0);
        assert_eq!(aligned[0].2, 7.0);
    }

    #[test]
    fn empty_inputs() {
        let cmp = compare_series(&[], &[]);
        assert_eq!(cmp.aligned_points, 0);
        assert_eq!(cmp.correlation, 0.0);
        assert!(cmp.lag_correlations.is_empty());
    }
}
