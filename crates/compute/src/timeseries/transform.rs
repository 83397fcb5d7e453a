//! Gap filling and smoothing.

use serde::{Deserialize, Serialize};

use tracelens_core::TimeSeriesPoint;

/// How gaps (`None` values) are filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FillMethod {
    Zero,
    Previous,
    #[default]
    Interpolate,
    None,
}

/// Smoothing kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmoothingMethod {
    /// Centered simple moving average.
    Sma,
    /// Exponential moving average, alpha = 2 / (window + 1).
    Ema,
    /// Not a real LOWESS: falls back to the centered moving average.
    Lowess,
}

/// Fill gaps according to `method`.
///
/// `Previous` carries the last seen value forward; leading gaps become 0.
/// `Interpolate` blends linearly (by index) between the nearest present
/// neighbors, uses the one available neighbor at the edges, and 0 when the
/// series has no values at all.
pub fn fill_missing(series: &[TimeSeriesPoint], method: FillMethod) -> Vec<TimeSeriesPoint> {
    match method {
        FillMethod::None => series.to_vec(),
        FillMethod::Zero => series
            .iter()
            .map(|p| TimeSeriesPoint {
                timestamp: p.timestamp,
                value: Some(p.value.unwrap_or(0.0)),
            })
            .collect(),
        FillMethod::Previous => {
            let mut last = 0.0;
            series
                .iter()
                .map(|p| {
                    if let Some(v) = p.value {
                        last = v;
                    }
                    TimeSeriesPoint {
                        timestamp: p.timestamp,
                        value: Some(last),
                    }
                })
                .collect()
        }
        FillMethod::Interpolate => interpolate(series),
    }
}

fn interpolate(series: &[TimeSeriesPoint]) -> Vec<TimeSeriesPoint> {
    let n = series.len();
    // Nearest present index at or before / at or after each position.
    let mut prev: Vec<Option<usize>> = vec![None; n];
    let mut next: Vec<Option<usize>> = vec![None; n];

    let mut last = None;
    for i in 0..n {
        if series[i].value.is_some() {
            last = Some(i);
        }
        prev[i] = last;
    }
    let mut upcoming = None;
    for i in (0..n).rev() {
        if series[i].value.is_some() {
            upcoming = Some(i);
        }
        next[i] = upcoming;
    }

    series
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let value = match p.value {
                Some(v) => v,
                None => {
                    let before = prev[i].and_then(|j| series[j].value.map(|v| (j, v)));
                    let after = next[i].and_then(|k| series[k].value.map(|v| (k, v)));
                    match (before, after) {
                        (Some((j, vj)), Some((k, vk))) => {
                            vj + (vk - vj) * (i - j) as f64 / (k - j) as f64
                        }
                        (Some((_, v)), None) | (None, Some((_, v))) => v,
                        (None, None) => 0.0,
                    }
                }
            };
            TimeSeriesPoint {
                timestamp: p.timestamp,
                value: Some(value),
            }
        })
        .collect()
}

/// Smooth present values; gaps stay gaps.
pub fn smooth(
    series: &[TimeSeriesPoint],
    method: SmoothingMethod,
    window: usize,
) -> Vec<TimeSeriesPoint> {
    let window = window.max(1);
    match method {
        SmoothingMethod::Sma | SmoothingMethod::Lowess => centered_average(series, window),
        SmoothingMethod::Ema => exponential_average(series, window),
    }
}

fn centered_average(series: &[TimeSeriesPoint], window: usize) -> Vec<TimeSeriesPoint> {
    let half = window / 2;
    let n = series.len();
    series
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let value = p.value.and_then(|_| {
                let lo = i.saturating_sub(half);
                let hi = (i + half).min(n.saturating_sub(1));
                let present: Vec<f64> = series[lo..=hi].iter().filter_map(|q| q.value).collect();
                if present.is_empty() {
                    None
                } else {
                    Some(present.iter().sum::<f64>() / present.len() as f64)
                }
            });
            TimeSeriesPoint {
                timestamp: p.timestamp,
                value,
            }
        })
        .collect()
}

fn exponential_average(series: &[TimeSeriesPoint], window: usize) -> Vec<TimeSeriesPoint> {
    let alpha = 2.0 / (window as f64 + 1.0);
    let mut ema: Option<f64> = None;
    series
        .iter()
        .map(|p| {
            let value = p.value.map(|x| {
                let next = match ema {
                    Some(prev) => alpha * x + (1.0 - alpha) * prev,
                    None => x,
                };
                ema = Some(next);
                next
            });
            TimeSeriesPoint {
                timestamp: p.timestamp,
                value,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn series(values: &[Option<f64>]) -> Vec<TimeSeriesPoint> {
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

    fn values(points: &[TimeSeriesPoint]) -> Vec<Option<f64>> {
        points.iter().map(|p| p.value).collect()
    }

    #[test]
    fn interpolate_middle_gap() {
        let filled = fill_missing(&series(&[Some(1.0), None, Some(3.0)]), FillMethod::Interpolate);
        assert_eq!(values(&filled), vec![Some(1.0), Some(2.0), Some(3.0)]);
    }

    #[test]
    fn interpolate_edges_and_empty() {
        let filled = fill_missing(
            &series(&[None, Some(4.0), None, None, Some(10.0), None]),
            FillMethod::Interpolate,
        );
        assert_eq!(
            values(&filled),
            vec![Some(4.0), Some(4.0), Some(6.0), Some(8.0), Some(10.0), Some(10.0)]
        );

        let all_gaps = fill_missing(&series(&[None, None]), FillMethod::Interpolate);
        assert_eq!(values(&all_gaps), vec![Some(0.0), Some(0.0)]);
    }

    #[test]
    fn zero_previous_and_none() {
        let s = series(&[None, Some(2.0), None]);
        assert_eq!(values(&fill_missing(&s, FillMethod::Zero)), vec![Some(0.0), Some(2.0), Some(0.0)]);
        assert_eq!(
            values(&fill_missing(&s, FillMethod::Previous)),
            vec![Some(0.0), Some(2.0), Some(2.0)]
        );
        assert_eq!(values(&fill_missing(&s, FillMethod::None)), values(&s));
    }

    #[test]
    fn sma_is_centered() {
        let s = series(&[Some(1.0), Some(2.0), Some(3.0), Some(4.0), Some(5.0)]);
        let out = values(&smooth(&s, SmoothingMethod::Sma, 3));
        assert_eq!(out, vec![Some(1.5), Some(2.0), Some(3.0), Some(4.0), Some(4.5)]);
        assert_eq!(values(&smooth(&s, SmoothingMethod::Lowess, 3)), out);
    }

    #[test]
    fn ema_uses_window_alpha() {
        let s = series(&[Some(10.0), Some(20.0), None, Some(20.0)]);
        let out = values(&smooth(&s, SmoothingMethod::Ema, 3));
        // alpha = 0.5
        assert_eq!(out, vec![Some(10.0), Some(15.0), None, Some(17.5)]);
    }
}
