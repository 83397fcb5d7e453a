//! Search backend collaborator.
//!
//! Analyzers only depend on this trait, keeping them free of any HTTP
//! client. The `tracelens-search` crate implements it against an
//! Elasticsearch or OpenSearch cluster.

use serde_json::Value;

use crate::error::SearchError;

/// Executes query DSL bodies against the metric, trace, and log indices.
///
/// Each method takes a complete `_search` request body and returns the raw
/// response JSON. Index selection belongs to the implementation.
#[async_trait::async_trait]
pub trait SearchBackend: Send + Sync {
    /// Run a (usually aggregation-only) query against the metrics index.
    async fn search_metrics(&self, body: &Value) -> Result<Value, SearchError>;

    /// Run a span document query against the traces index.
    async fn search_traces(&self, body: &Value) -> Result<Value, SearchError>;

    /// Run an arbitrary query against the logs index. Results are passed through.
    async fn query_logs(&self, body: &Value) -> Result<Value, SearchError>;
}
