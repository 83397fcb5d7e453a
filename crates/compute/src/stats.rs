//! Statistics kernel shared by every analyzer.
//!
//! All functions accept arbitrary slices and never panic: empty input
//! yields zeros. Variance and standard deviation are population statistics.

use serde::{Deserialize, Serialize};

/// Summary statistics of a numeric sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub variance: f64,
    pub min: f64,
    pub max: f64,
    pub p25: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    pub iqr: f64,
}

impl Summary {
    pub fn of(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let sorted = sorted(values);
        let mean = mean(values);
        let variance = variance_around(values, mean);
        let p25 = percentile(&sorted, 25.0);
        let p75 = percentile(&sorted, 75.0);

        Self {
            count: values.len(),
            mean,
            median: percentile(&sorted, 50.0),
            std_dev: variance.sqrt(),
            variance,
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            p25,
            p75,
            p90: percentile(&sorted, 90.0),
            p95: percentile(&sorted, 95.0),
            p99: percentile(&sorted, 99.0),
            iqr: p75 - p25,
        }
    }

    /// z-score of `value` against this sample; 0 when there is no spread.
    pub fn z_score(&self, value: f64) -> f64 {
        z_score(value, self.mean, self.std_dev)
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub fn variance(values: &[f64]) -> f64 {
    variance_around(values, mean(values))
}

fn variance_around(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
}

pub fn std_dev(values: &[f64]) -> f64 {
    variance(values).sqrt()
}

pub fn median(values: &[f64]) -> f64 {
    percentile(&sorted(values), 50.0)
}

/// Copy and sort ascending. NaNs sort last.
pub fn sorted(values: &[f64]) -> Vec<f64> {
    let mut v = values.to_vec();
    v.sort_by(f64::total_cmp);
    v
}

/// Interpolated-rank percentile over an ascending slice.
///
/// `index = (p / 100) * (n - 1)`; the result blends the two bracketing
/// values linearly. `p` is clamped to `[0, 100]`.
pub fn percentile(sorted_values: &[f64], p: f64) -> f64 {
    let n = sorted_values.len();
    if n == 0 {
        return 0.0;
    }
    if n == 1 {
        return sorted_values[0];
    }
    let index = (p.clamp(0.0, 100.0) / 100.0) * (n - 1) as f64;
    let lower = index.floor() as usize;
    let upper = index.ceil() as usize;
    let weight = index - lower as f64;
    sorted_values[lower] * (1.0 - weight) + sorted_values[upper] * weight
}

/// Interquartile range `p75 - p25` over an ascending slice.
pub fn iqr(sorted_values: &[f64]) -> f64 {
    percentile(sorted_values, 75.0) - percentile(sorted_values, 25.0)
}

/// Median absolute deviation from the median.
pub fn mad(values: &[f64]) -> f64 {
    let med = median(values);
    let deviations: Vec<f64> = values.iter().map(|v| (v - med).abs()).collect();
    median(&deviations)
}

/// Compute z-score for a value against a baseline.
pub fn z_score(value: f64, mean: f64, stddev: f64) -> f64 {
    if stddev <= f64::EPSILON {
        return 0.0;
    }
    (value - mean) / stddev
}

/// Pearson correlation of two equally long samples. 0 when either has no spread.
pub fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return 0.0;
    }
    let (a, b) = (&a[..n], &b[..n]);
    let (ma, mb) = (mean(a), mean(b));

    let mut cov = 0.0;
    let mut va = 0.0;
    let mut vb = 0.0;
    for i in 0..n {
        let da = a[i] - ma;
        let db = b[i] - mb;
        cov += da * db;
        va += da * da;
        vb += db * db;
    }

    let denom = (va * vb).sqrt();
    if denom <= f64::EPSILON {
        return 0.0;
    }
    (cov / denom).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_50_matches_median_definition() {
        let even = sorted(&[4.0, 1.0, 3.0, 2.0]);
        assert!((percentile(&even, 50.0) - 2.5).abs() < 1e-10);

        let odd = sorted(&[9.0, 1.0, 5.0]);
        assert!((percentile(&odd, 50.0) - 5.0).abs() < 1e-10);
        assert!((median(&[9.0, 1.0, 5.0, 7.0]) - 6.0).abs() < 1e-10);
    }

    #[test]
    fn percentile_interpolates_between_ranks() {
        let v = [10.0, 20.0, 30.0, 40.0, 50.0];
        // index = 0.9 * 4 = 3.6 -> 40 + 0.6 * 10
        assert!((percentile(&v, 90.0) - 46.0).abs() < 1e-10);
        assert_eq!(percentile(&v, 0.0), 10.0);
        assert_eq!(percentile(&v, 100.0), 50.0);
        assert!((iqr(&v) - 20.0).abs() < 1e-10);
    }

    #[test]
    fn empty_input_is_all_zero() {
        let s = Summary::of(&[]);
        assert_eq!(s, Summary::default());
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(std_dev(&[]), 0.0);
        assert_eq!(percentile(&[], 95.0), 0.0);
    }

    #[test]
    fn summary_population_std() {
        let s = Summary::of(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(s.count, 8);
        assert!((s.mean - 5.0).abs() < 1e-10);
        assert!((s.std_dev - 2.0).abs() < 1e-10);
        assert_eq!(s.min, 2.0);
        assert_eq!(s.max, 9.0);
    }

    #[test]
    fn mad_ignores_outlier() {
        let m = mad(&[1.0, 2.0, 3.0, 4.0, 100.0]);
        assert!((m - 1.0).abs() < 1e-10);
    }

    #[test]
    fn pearson_extremes() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [2.0, 4.0, 6.0, 8.0];
        let c = [8.0, 6.0, 4.0, 2.0];
        assert!((pearson(&a, &b) - 1.0).abs() < 1e-10);
        assert!((pearson(&a, &c) + 1.0).abs() < 1e-10);
        assert_eq!(pearson(&a, &[5.0; 4]), 0.0);
    }

    #[test]
    fn z_score_basic() {
        assert!((z_score(10.0, 5.0, 2.0) - 2.5).abs() < 1e-10);
        assert_eq!(z_score(5.0, 5.0, 0.0), 0.0);
    }
}
