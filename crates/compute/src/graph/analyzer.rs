use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use tracelens_core::{SearchBackend, TimeRange, Trace};

use super::{
    build_service_graph, compute_centrality, detect_communities, entry_points, find_bottlenecks,
    find_critical_paths, find_paths, graph_metrics, Bottleneck, CommunityDetection,
    DependencyPath, GraphMetrics, NodeCentrality, ServiceGraph, DEFAULT_DEPENDENCY_DEPTH,
};
use crate::query::fetch_traces;

/// Everything derived from one service graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyAnalysis {
    pub graph: ServiceGraph,
    pub metrics: GraphMetrics,
    pub centrality: Vec<NodeCentrality>,
    pub entry_points: Vec<String>,
    pub critical_paths: Vec<DependencyPath>,
    pub dependency_paths: Vec<DependencyPath>,
    pub bottlenecks: Vec<Bottleneck>,
    pub communities: CommunityDetection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DependencyAnalysis {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Build the graph from `traces` and derive every metric.
pub fn analyze_traces(traces: &[Trace], max_depth: usize) -> DependencyAnalysis {
    let graph = build_service_graph(traces);
    let centrality = compute_centrality(&graph);
    let bottlenecks = find_bottlenecks(&graph, &centrality);

    DependencyAnalysis {
        metrics: graph_metrics(&graph),
        entry_points: entry_points(&graph),
        critical_paths: find_critical_paths(&graph),
        dependency_paths: find_paths(&graph, max_depth),
        communities: detect_communities(&graph),
        centrality,
        bottlenecks,
        graph,
        error: None,
    }
}

pub struct ServiceDependencyAnalyzer {
    backend: Arc<dyn SearchBackend>,
    max_spans: usize,
    max_depth: usize,
}

impl ServiceDependencyAnalyzer {
    pub fn new(backend: Arc<dyn SearchBackend>) -> Self {
        Self {
            backend,
            max_spans: 10_000,
            max_depth: DEFAULT_DEPENDENCY_DEPTH,
        }
    }

    pub fn with_limits(mut self, max_spans: usize, max_depth: usize) -> Self {
        self.max_spans = max_spans;
        self.max_depth = max_depth;
        self
    }

    /// Fetch spans in `range` and analyze the resulting graph. A failed
    /// fetch yields an empty analysis with `error` set.
    pub async fn analyze(&self, range: &TimeRange, filters: &[Value]) -> DependencyAnalysis {
        let traces = match fetch_traces(self.backend.as_ref(), range, self.max_spans, filters).await {
            Ok(traces) => traces,
            Err(e) => {
                warn!(error = %e, "trace fetch failed, returning empty graph");
                return DependencyAnalysis::failed(e.to_string());
            }
        };

        let analysis = analyze_traces(&traces, self.max_depth);
        info!(
            traces = traces.len(),
            services = analysis.metrics.node_count,
            edges = analysis.metrics.edge_count,
            critical_paths = analysis.critical_paths.len(),
            "service dependencies analyzed"
        );
        analysis
    }
}
