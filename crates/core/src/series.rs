use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// One bucket of a metric time series. `None` marks a gap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub value: Option<f64>,
}

impl TimeSeriesPoint {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self {
            timestamp,
            value: Some(value),
        }
    }

    pub fn gap(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            value: None,
        }
    }
}

/// Values of the non-gap points, in order.
pub fn present_values(series: &[TimeSeriesPoint]) -> Vec<f64> {
    series.iter().filter_map(|p| p.value).collect()
}

/// Half-open query window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The window of length `length` ending at `end`. The start clamps to
    /// the earliest representable instant.
    pub fn ending_at(end: DateTime<Utc>, length: Duration) -> Self {
        Self {
            start: end
                .checked_sub_signed(length)
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            end,
        }
    }

    pub fn length(&self) -> Duration {
        self.end - self.start
    }

    /// The window of the same length immediately before this one.
    pub fn preceding(&self) -> Self {
        Self::ending_at(self.start, self.length())
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }
}
