use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

use tracelens_compute::{DependencyAnalysis, ServiceDependencyAnalyzer};

use crate::input::{filters, schema, time_range};
use crate::mermaid;
use crate::tool::{Tool, ToolContext, ToolDefinition, ToolError, ToolResult};

#[derive(Serialize)]
struct DependencyReport {
    #[serde(flatten)]
    analysis: DependencyAnalysis,
    #[serde(skip_serializing_if = "Option::is_none")]
    mermaid: Option<String>,
}

/// Service map, centrality, critical paths and bottlenecks from spans.
pub struct AnalyzeServiceDependenciesTool;

#[async_trait]
impl Tool for AnalyzeServiceDependenciesTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "analyze_service_dependencies".to_string(),
            description: "Build the service dependency graph from trace spans and report centrality, critical paths, bottlenecks and communities."
                .to_string(),
            input_schema: schema(
                json!({
                    "max_spans": {"type": "integer", "minimum": 1},
                    "max_depth": {"type": "integer", "minimum": 1, "description": "Longest dependency path explored"},
                    "include_mermaid": {"type": "boolean", "description": "Also render the graph as a mermaid flowchart"}
                }),
                &[],
            ),
        }
    }

    async fn execute(&self, input: Value, context: &ToolContext) -> Result<ToolResult, ToolError> {
        let range = time_range(&input, "1h")?;
        let filters = filters(&input)?;
        let max_spans = super::max_spans(&input, context)?;
        let max_depth = super::positive_usize(&input, "max_depth")?
            .unwrap_or(context.analysis.dependency_max_depth);
        let include_mermaid = match input.get("include_mermaid") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(_) => return Err(ToolError::InvalidInput("'include_mermaid' must be a boolean".to_string())),
        };

        let analysis = ServiceDependencyAnalyzer::new(context.backend.clone())
            .with_limits(max_spans, max_depth)
            .analyze(&range, &filters)
            .await;
        let mermaid = (include_mermaid && analysis.error.is_none()).then(|| mermaid::render(&analysis.graph));
        ToolResult::json(&DependencyReport { analysis, mermaid })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{chain_span_response, context, input, parse, CannedBackend};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_chain_dependencies_with_mermaid() {
        let backend = Arc::new(CannedBackend {
            traces: Some(chain_span_response(4)),
            ..CannedBackend::default()
        });
        let result = AnalyzeServiceDependenciesTool
            .execute(input(json!({"include_mermaid": true})), &context(backend))
            .await
            .unwrap();

        let body = parse(&result);
        assert_eq!(body["metrics"]["nodeCount"], 3);
        assert_eq!(body["entryPoints"], json!(["frontend"]));
        assert_eq!(
            body["criticalPaths"][0]["services"],
            json!(["frontend", "checkout", "payments"])
        );
        let diagram = body["mermaid"].as_str().unwrap();
        assert!(diagram.starts_with("graph LR"));
        assert!(diagram.contains("4 calls, 0.0% err"));
    }

    #[tokio::test]
    async fn test_mermaid_omitted_by_default() {
        let backend = Arc::new(CannedBackend {
            traces: Some(chain_span_response(2)),
            ..CannedBackend::default()
        });
        let result = AnalyzeServiceDependenciesTool
            .execute(input(json!({})), &context(backend))
            .await
            .unwrap();
        assert!(parse(&result).get("mermaid").is_none());
    }

    #[tokio::test]
    async fn test_invalid_depth() {
        let ctx = context(Arc::new(CannedBackend::default()));
        let err = AnalyzeServiceDependenciesTool
            .execute(input(json!({"max_depth": 0})), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_fetch_failure_reported() {
        let ctx = context(Arc::new(CannedBackend::default()));
        let result = AnalyzeServiceDependenciesTool
            .execute(input(json!({"include_mermaid": true})), &ctx)
            .await
            .unwrap();
        assert!(result.is_error);
        assert!(parse(&result).get("mermaid").is_none());
    }
}
