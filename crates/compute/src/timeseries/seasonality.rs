//! Coarse periodicity scan.
//!
//! Not spectral analysis: each candidate period is scored by the spread of
//! its phase-averaged profile relative to the largest absolute value.

use serde::{Deserialize, Serialize};

use tracelens_core::{present_values, TimeSeriesPoint};

use super::median_spacing_secs;
use crate::stats;

/// Minimum number of present points before seasonality is evaluated.
pub const MIN_POINTS: usize = 24;

/// Candidate periods in bucket units, scanned in this order.
const CANDIDATE_PERIODS: [usize; 3] = [24, 7, 30];

/// Profiles weaker than this are reported as not seasonal.
const DETECTION_STRENGTH: f64 = 0.1;

const PERIOD_NAMES: [(&str, f64); 4] = [
    ("1h", 3_600.0),
    ("1d", 86_400.0),
    ("1w", 604_800.0),
    ("1M", 2_592_000.0),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeasonalityInfo {
    pub detected: bool,
    /// Calendar name of the best candidate (`1h`, `1d`, `1w`, `1M`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,
    /// Best candidate period in buckets.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strength: Option<f64>,
    /// Phase-averaged profile of the detected period.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub components: Option<Vec<f64>>,
}

/// Scan candidate periods. `None` when fewer than [`MIN_POINTS`] values are present.
pub fn detect_seasonality(series: &[TimeSeriesPoint]) -> Option<SeasonalityInfo> {
    let values = present_values(series);
    if values.len() < MIN_POINTS {
        return None;
    }

    let max_abs = values.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));

    let mut best: Option<(usize, f64, Vec<f64>)> = None;
    for &period in &CANDIDATE_PERIODS {
        if values.len() < period * 2 {
            continue;
        }
        let profile = phase_profile(&values, period);
        let max = profile.iter().copied().fold(f64::MIN, f64::max);
        let min = profile.iter().copied().fold(f64::MAX, f64::min);
        let strength = if max_abs > f64::EPSILON {
            (max - min) / max_abs
        } else {
            0.0
        };
        if best.as_ref().map_or(true, |(_, s, _)| strength > *s) {
            best = Some((period, strength, profile));
        }
    }

    let Some((period, strength, profile)) = best else {
        return Some(SeasonalityInfo {
            detected: false,
            period: None,
            period_length: None,
            strength: None,
            components: None,
        });
    };

    if strength < DETECTION_STRENGTH {
        return Some(SeasonalityInfo {
            detected: false,
            period: None,
            period_length: None,
            strength: Some(strength),
            components: None,
        });
    }

    Some(SeasonalityInfo {
        detected: true,
        period: Some(period_name(period, median_spacing_secs(series))),
        period_length: Some(period),
        strength: Some(strength),
        components: Some(profile),
    })
}

/// Mean of every `period`-th value starting at each phase offset.
pub(crate) fn phase_profile(values: &[f64], period: usize) -> Vec<f64> {
    (0..period)
        .map(|offset| {
            let phase: Vec<f64> = values.iter().skip(offset).step_by(period).copied().collect();
            stats::mean(&phase)
        })
        .collect()
}

/// Closest calendar name for `period` buckets of `spacing_secs` each.
fn period_name(period: usize, spacing_secs: f64) -> String {
    if spacing_secs <= 0.0 {
        return match period {
            24 => "1d",
            7 => "1w",
            _ => "1M",
        }
        .to_string();
    }
    let span = spacing_secs * period as f64;
    PERIOD_NAMES
        .iter()
        .min_by(|a, b| {
            let da = (span / a.1).ln().abs();
            let db = (span / b.1).ln().abs();
            da.total_cmp(&db)
        })
        .map(|(name, _)| name.to_string())
        .unwrap_or_else(|| "1d".to_string())
}
