use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use tracelens_core::config::AnalysisConfig;
use tracelens_core::SearchBackend;

/// Describes a tool's interface to the protocol host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name (e.g., "detect_metric_anomalies")
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// JSON Schema describing the expected input
    pub input_schema: Value,
}

/// Result of executing a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Pretty-printed JSON of the analysis result
    pub content: String,
    /// Whether the analysis degraded (a backend fetch failed)
    pub is_error: bool,
}

impl ToolResult {
    /// Serialize `value` as the result content. The result is flagged as an
    /// error when the serialized object carries a top-level `error`.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, ToolError> {
        let value = serde_json::to_value(value)
            .map_err(|e| ToolError::ExecutionFailed(format!("JSON serialization failed: {e}")))?;
        let is_error = value.get("error").is_some_and(|e| !e.is_null());
        Ok(Self {
            content: serde_json::to_string_pretty(&value)
                .map_err(|e| ToolError::ExecutionFailed(format!("JSON serialization failed: {e}")))?,
            is_error,
        })
    }
}

/// Shared state handed to every tool call.
#[derive(Clone)]
pub struct ToolContext {
    pub backend: Arc<dyn SearchBackend>,
    /// Defaults for knobs a call leaves unset.
    pub analysis: AnalysisConfig,
}

impl ToolContext {
    pub fn new(backend: Arc<dyn SearchBackend>, analysis: AnalysisConfig) -> Self {
        Self { backend, analysis }
    }
}

/// All tools implement this trait.
///
/// Tools are object-safe, Send + Sync, and async.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Returns the tool's definition (name, description, JSON Schema).
    fn definition(&self) -> ToolDefinition;

    /// Execute the tool with the given JSON input.
    async fn execute(&self, input: Value, context: &ToolContext) -> Result<ToolResult, ToolError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl fmt::Display for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.description)
    }
}
