use std::env;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_parse<T: FromStr>(profile: &str, key: &str, default: T) -> T {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub search: SearchConfig,
    pub indices: IndexConfig,
    pub analysis: AnalysisConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `TRACELENS_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let profile = env_or("TRACELENS_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Result<Self, ConfigError> {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Ok(Self {
            profile: p.to_string(),
            search: SearchConfig::from_env_profiled(p)?,
            indices: IndexConfig::from_env_profiled(p),
            analysis: AnalysisConfig::from_env_profiled(p),
        })
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  search:   url={}, flavor={}, auth={}", self.search.url, self.search.flavor, self.search.has_auth());
        tracing::info!(
            "  indices:  metrics={}, traces={}, logs={}",
            self.indices.metrics, self.indices.traces, self.indices.logs
        );
        tracing::info!(
            "  analysis: sensitivity={}, spike_threshold={}, baseline_days={}",
            self.analysis.sensitivity, self.analysis.log_spike_threshold, self.analysis.log_baseline_days
        );
    }

    /// Return a redacted view safe for tool responses (no secrets).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "search": {
                "url": self.search.url,
                "flavor": self.search.flavor.to_string(),
                "timeout_ms": self.search.timeout_ms,
                "authenticated": self.search.has_auth(),
            },
            "indices": {
                "metrics": self.indices.metrics,
                "traces": self.indices.traces,
                "logs": self.indices.logs,
            },
            "analysis": self.analysis,
        })
    }
}

// ── Search backend ────────────────────────────────────────────

/// Which engine the backend speaks to. Both accept the same query DSL subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchFlavor {
    Elasticsearch,
    OpenSearch,
}

impl fmt::Display for SearchFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchFlavor::Elasticsearch => write!(f, "elasticsearch"),
            SearchFlavor::OpenSearch => write!(f, "opensearch"),
        }
    }
}

impl FromStr for SearchFlavor {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "elasticsearch" | "elastic" | "es" => Ok(SearchFlavor::Elasticsearch),
            "opensearch" | "os" => Ok(SearchFlavor::OpenSearch),
            _ => Err(ConfigError::Invalid {
                key: "SEARCH_FLAVOR".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub url: String,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub flavor: SearchFlavor,
    pub timeout_ms: u64,
}

impl SearchConfig {
    fn from_env_profiled(p: &str) -> Result<Self, ConfigError> {
        let flavor = profiled_env_or(p, "SEARCH_FLAVOR", "elasticsearch").parse()?;
        let url = profiled_env_or(p, "SEARCH_URL", "http://localhost:9200");
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::Invalid {
                key: "SEARCH_URL".to_string(),
                value: url,
            });
        }
        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            username: profiled_env_opt(p, "SEARCH_USERNAME"),
            password: profiled_env_opt(p, "SEARCH_PASSWORD"),
            flavor,
            timeout_ms: profiled_env_parse(p, "SEARCH_TIMEOUT_MS", 30_000),
        })
    }

    pub fn has_auth(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9200".to_string(),
            username: None,
            password: None,
            flavor: SearchFlavor::Elasticsearch,
            timeout_ms: 30_000,
        }
    }
}

// ── Indices ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    pub metrics: String,
    pub traces: String,
    pub logs: String,
}

impl IndexConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            metrics: profiled_env_or(p, "METRICS_INDEX", "metrics-*"),
            traces: profiled_env_or(p, "TRACES_INDEX", "traces-*"),
            logs: profiled_env_or(p, "LOGS_INDEX", "logs-*"),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            metrics: "metrics-*".to_string(),
            traces: "traces-*".to_string(),
            logs: "logs-*".to_string(),
        }
    }
}

// ── Analysis defaults ─────────────────────────────────────────

/// Defaults applied when a tool call leaves a knob unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub sensitivity: f64,
    pub log_spike_threshold: f64,
    pub log_baseline_days: i64,
    pub max_trace_spans: usize,
    pub dependency_max_depth: usize,
}

impl AnalysisConfig {
    fn from_env_profiled(p: &str) -> Self {
        let defaults = Self::default();
        Self {
            sensitivity: profiled_env_parse(p, "ANOMALY_SENSITIVITY", defaults.sensitivity)
                .clamp(0.0, 1.0),
            log_spike_threshold: profiled_env_parse(p, "LOG_SPIKE_THRESHOLD", defaults.log_spike_threshold),
            log_baseline_days: profiled_env_parse(p, "LOG_BASELINE_DAYS", defaults.log_baseline_days),
            max_trace_spans: profiled_env_parse(p, "MAX_TRACE_SPANS", defaults.max_trace_spans),
            dependency_max_depth: profiled_env_parse(p, "DEPENDENCY_MAX_DEPTH", defaults.dependency_max_depth),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            sensitivity: 0.5,
            log_spike_threshold: 3.0,
            log_baseline_days: 7,
            max_trace_spans: 10_000,
            dependency_max_depth: 10,
        }
    }
}
