use thiserror::Error;

/// Failures talking to the search backend.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Search backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode search response: {0}")]
    Decode(String),

    #[error("Search request timed out after {0}ms")]
    Timeout(u64),

    #[error("No search backend configured")]
    NotConfigured,
}

/// Invalid configuration values.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    Invalid { key: String, value: String },
}
