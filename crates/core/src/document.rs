//! Schema-tolerant access to raw search documents.
//!
//! Source documents arrive with field names that drift between
//! OpenTelemetry exporter versions (`serviceName`, `service.name`,
//! `resource.service.name`, ...). A [`FieldChain`] lists the candidate
//! paths in priority order and returns the first one present.

use std::collections::BTreeSet;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

/// Resolve a dotted path inside a JSON document.
///
/// Handles both nested objects (`{"service": {"name": ..}}`) and flattened
/// keys (`{"service.name": ..}`), as well as mixtures of the two.
pub fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let obj = doc.as_object()?;
    if let Some(v) = obj.get(path) {
        return Some(v);
    }
    for (i, _) in path.match_indices('.') {
        let (head, tail) = (&path[..i], &path[i + 1..]);
        if let Some(child) = obj.get(head) {
            if let Some(v) = lookup(child, tail) {
                return Some(v);
            }
        }
    }
    None
}

/// Ordered list of candidate field paths.
#[derive(Debug, Clone, Copy)]
pub struct FieldChain(pub &'static [&'static str]);

impl FieldChain {
    /// First non-null value along the chain.
    pub fn first<'a>(&self, doc: &'a Value) -> Option<&'a Value> {
        self.0
            .iter()
            .filter_map(|path| lookup(doc, path))
            .find(|v| !v.is_null())
    }

    /// First value that can be rendered as a non-empty string.
    pub fn string(&self, doc: &Value) -> Option<String> {
        self.0
            .iter()
            .filter_map(|path| lookup(doc, path))
            .find_map(|v| match v {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
    }

    /// First value that parses as a number.
    pub fn number(&self, doc: &Value) -> Option<f64> {
        self.0
            .iter()
            .filter_map(|path| lookup(doc, path))
            .find_map(as_number)
    }

    /// First value that parses as a timestamp.
    pub fn timestamp(&self, doc: &Value) -> Option<DateTime<Utc>> {
        self.0
            .iter()
            .filter_map(|path| lookup(doc, path))
            .find_map(parse_timestamp)
    }
}

/// Numbers and numeric strings.
pub fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// RFC 3339 strings or epoch numbers (milliseconds, or microseconds when
/// the magnitude says so).
pub fn parse_timestamp(v: &Value) -> Option<DateTime<Utc>> {
    match v {
        Value::String(s) => {
            if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
                return Some(ts.with_timezone(&Utc));
            }
            s.trim().parse::<f64>().ok().and_then(epoch_to_datetime)
        }
        Value::Number(n) => n.as_f64().and_then(epoch_to_datetime),
        _ => None,
    }
}

fn epoch_to_datetime(raw: f64) -> Option<DateTime<Utc>> {
    let millis = if raw.abs() >= 1e14 { raw / 1000.0 } else { raw };
    Utc.timestamp_millis_opt(millis as i64).single()
}

/// Collect dotted paths of every numeric leaf across a document sample.
///
/// A path is skipped when its lowercase form contains any of `excluded`.
/// The result is sorted for stable output.
pub fn numeric_fields(docs: &[Value], excluded: &[&str]) -> Vec<String> {
    let mut fields = BTreeSet::new();
    for doc in docs {
        collect_numeric(doc, String::new(), &mut fields);
    }
    fields
        .into_iter()
        .filter(|path| {
            let lower = path.to_lowercase();
            !excluded.iter().any(|ex| lower.contains(ex))
        })
        .collect()
}

fn collect_numeric(value: &Value, prefix: String, out: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                collect_numeric(child, path, out);
            }
        }
        Value::Number(_) if !prefix.is_empty() => {
            out.insert(prefix);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lookup_nested_and_flat() {
        let nested = json!({"service": {"name": "checkout"}});
        let flat = json!({"service.name": "cart"});
        let mixed = json!({"resource": {"service.name": "auth"}});

        assert_eq!(lookup(&nested, "service.name"), Some(&json!("checkout")));
        assert_eq!(lookup(&flat, "service.name"), Some(&json!("cart")));
        assert_eq!(lookup(&mixed, "resource.service.name"), Some(&json!("auth")));
        assert!(lookup(&nested, "service.version").is_none());
    }

    #[test]
    fn chain_returns_first_present() {
        const SERVICE: FieldChain = FieldChain(&["serviceName", "service.name", "service"]);
        let doc = json!({"serviceName": null, "service": {"name": "api"}});
        assert_eq!(SERVICE.string(&doc).as_deref(), Some("api"));

        let empty = json!({"other": 1});
        assert!(SERVICE.string(&empty).is_none());
    }

    #[test]
    fn chain_number_accepts_strings() {
        const DURATION: FieldChain = FieldChain(&["duration", "durationInMs"]);
        assert_eq!(DURATION.number(&json!({"durationInMs": "12.5"})), Some(12.5));
        assert_eq!(DURATION.number(&json!({"duration": 3})), Some(3.0));
    }

    #[test]
    fn timestamps_from_strings_and_epochs() {
        let a = parse_timestamp(&json!("2024-03-01T10:00:00Z")).unwrap();
        let b = parse_timestamp(&json!(1_709_287_200_000_i64)).unwrap();
        let c = parse_timestamp(&json!(1_709_287_200_000_000_i64)).unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn numeric_field_discovery_skips_excluded() {
        let docs = vec![
            json!({"latency": 10, "user_id": 4, "@timestamp": 1, "http": {"status": 200}, "msg": "x"}),
            json!({"bytes": 512.0}),
        ];
        let fields = numeric_fields(&docs, &["timestamp", "id", "time"]);
        assert_eq!(fields, vec!["bytes", "http.status", "latency"]);
    }
}
