//! Service dependency graph built from trace spans, plus the metrics
//! derived from it.
//!
//! Sub-modules:
//! - [`build`]: node/edge aggregation over spans
//! - [`metrics`]: degree, density, diameter, components
//! - [`centrality`]: degree, approximate betweenness, closeness, PageRank, clustering
//! - [`paths`]: critical and dependency paths from entry points
//! - [`bottlenecks`]: fan-in / latency / error ranking
//! - [`communities`]: deterministic greedy modularity
//! - [`analyzer`]: backend-driven entry point

pub mod analyzer;
pub mod bottlenecks;
pub mod build;
pub mod centrality;
pub mod communities;
pub mod metrics;
pub mod paths;

pub use analyzer::{DependencyAnalysis, ServiceDependencyAnalyzer};
pub use bottlenecks::{find_bottlenecks, Bottleneck, BottleneckReason};
pub use build::{build_service_graph, GraphEdge, ServiceGraph, ServiceNode};
pub use centrality::{compute_centrality, NodeCentrality};
pub use communities::{detect_communities, Community, CommunityDetection};
pub use metrics::{graph_metrics, GraphMetrics};
pub use paths::{
    entry_points, find_critical_paths, find_paths, DependencyPath, CRITICAL_PATH_DEPTH,
    DEFAULT_DEPENDENCY_DEPTH,
};
