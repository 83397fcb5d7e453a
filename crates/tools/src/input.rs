//! Input parsing shared by every tool.
//!
//! Tool inputs are snake_case JSON objects. A time window is given either
//! as explicit `start_time`/`end_time` (RFC 3339) or as a `lookback` such as
//! `"15m"` ending at `end_time` (default: now). Extra bool filter clauses go
//! in `filters`.

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};

use tracelens_compute::MetricQuery;
use tracelens_core::TimeRange;

use crate::tool::ToolError;

pub const DEFAULT_INTERVAL: &str = "1m";

fn invalid(msg: impl Into<String>) -> ToolError {
    ToolError::InvalidInput(msg.into())
}

pub fn required_str<'a>(input: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    optional_str(input, key)?.ok_or_else(|| invalid(format!("missing '{key}' field")))
}

/// `None` when absent or null, an error when present with the wrong type.
pub fn optional_str<'a>(input: &'a Value, key: &str) -> Result<Option<&'a str>, ToolError> {
    match input.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(Some(s.as_str())),
        Some(_) => Err(invalid(format!("'{key}' must be a non-empty string"))),
    }
}

pub fn optional_f64(input: &Value, key: &str) -> Result<Option<f64>, ToolError> {
    match input.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| invalid(format!("'{key}' must be a number"))),
    }
}

pub fn string_list(input: &Value, key: &str) -> Result<Vec<String>, ToolError> {
    let Some(items) = input.get(key) else {
        return Ok(Vec::new());
    };
    let items = items
        .as_array()
        .ok_or_else(|| invalid(format!("'{key}' must be an array of strings")))?;
    items
        .iter()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| invalid(format!("'{key}' must be an array of strings")))
        })
        .collect()
}

/// Bool filter clauses from `filters`; each must be a JSON object.
pub fn filters(input: &Value) -> Result<Vec<Value>, ToolError> {
    match input.get("filters") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) if items.iter().all(Value::is_object) => Ok(items.clone()),
        Some(_) => Err(invalid("'filters' must be an array of query clauses")),
    }
}

/// Parse `30s`, `15m`, `1h`, `7d` or `2w`.
pub fn parse_duration(s: &str) -> Result<Duration, ToolError> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| invalid(format!("duration '{s}' has no unit")))?;
    let (amount, unit) = s.split_at(split);
    let amount: i64 = amount
        .parse()
        .map_err(|_| invalid(format!("duration '{s}' has no amount")))?;
    if amount <= 0 {
        return Err(invalid(format!("duration '{s}' must be positive")));
    }
    let duration = match unit {
        "s" => Duration::try_seconds(amount),
        "m" => Duration::try_minutes(amount),
        "h" => Duration::try_hours(amount),
        "d" => Duration::try_days(amount),
        "w" => Duration::try_weeks(amount),
        other => return Err(invalid(format!("unknown duration unit '{other}' in '{s}'"))),
    };
    duration.ok_or_else(|| invalid(format!("duration '{s}' is out of range")))
}

/// `end - length`, or an error when that falls outside the representable range.
pub fn window_start(end: DateTime<Utc>, length: Duration) -> Result<DateTime<Utc>, ToolError> {
    end.checked_sub_signed(length)
        .ok_or_else(|| invalid("window reaches outside the supported time range"))
}

/// RFC 3339 timestamp (or `now`) under `key`.
pub fn parse_time(input: &Value, key: &str) -> Result<Option<DateTime<Utc>>, ToolError> {
    let Some(raw) = optional_str(input, key)? else {
        return Ok(None);
    };
    if raw.eq_ignore_ascii_case("now") {
        return Ok(Some(Utc::now()));
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| Some(ts.with_timezone(&Utc)))
        .map_err(|e| invalid(format!("'{key}' is not an RFC 3339 timestamp: {e}")))
}

/// The analysis window described by `start_time`, `end_time` and `lookback`.
pub fn time_range(input: &Value, default_lookback: &str) -> Result<TimeRange, ToolError> {
    let end = parse_time(input, "end_time")?.unwrap_or_else(Utc::now);
    let start = match parse_time(input, "start_time")? {
        Some(start) => start,
        None => {
            let lookback = optional_str(input, "lookback")?.unwrap_or(default_lookback);
            window_start(end, parse_duration(lookback)?)?
        }
    };
    if start >= end {
        return Err(invalid("'start_time' must be before 'end_time'"));
    }
    Ok(TimeRange::new(start, end))
}

/// Histogram interval; the duration grammar without weeks, which
/// `fixed_interval` does not accept.
pub fn interval(input: &Value) -> Result<String, ToolError> {
    let interval = optional_str(input, "interval")?.unwrap_or(DEFAULT_INTERVAL);
    if interval.trim_end().ends_with('w') {
        return Err(invalid(format!("interval '{interval}' must use s, m, h or d units")));
    }
    parse_duration(interval)?;
    Ok(interval.to_string())
}

pub fn metric_query(input: &Value, metric: &str, range: TimeRange) -> Result<MetricQuery, ToolError> {
    Ok(MetricQuery {
        metric: metric.to_string(),
        range,
        interval: interval(input)?,
        filters: filters(input)?,
    })
}

/// Deserialize an options struct from the same input object. Unknown keys
/// are ignored; absent keys take the struct's defaults.
pub fn options<T: DeserializeOwned>(input: &Value) -> Result<T, ToolError> {
    serde_json::from_value(input.clone()).map_err(|e| invalid(format!("invalid options: {e}")))
}

/// Object schema with the shared window and filter properties merged in.
pub fn schema(properties: Value, required: &[&str]) -> Value {
    let mut merged = Map::new();
    merged.insert(
        "start_time".into(),
        json!({"type": "string", "description": "Window start (RFC 3339)"}),
    );
    merged.insert(
        "end_time".into(),
        json!({"type": "string", "description": "Window end (RFC 3339 or 'now'); defaults to now"}),
    );
    merged.insert(
        "lookback".into(),
        json!({"type": "string", "description": "Window length when start_time is absent, e.g. '15m', '1h', '7d'"}),
    );
    merged.insert(
        "filters".into(),
        json!({"type": "array", "items": {"type": "object"}, "description": "Extra bool filter clauses"}),
    );
    if let Value::Object(props) = properties {
        merged.extend(props);
    }
    json!({
        "type": "object",
        "properties": merged,
        "required": required,
    })
}
