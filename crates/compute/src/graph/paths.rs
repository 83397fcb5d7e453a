//! Entry points and the call paths walked from them.

use serde::{Deserialize, Serialize};

use super::build::{Adjacency, ServiceGraph};

/// Depth cap for critical path search.
pub const CRITICAL_PATH_DEPTH: usize = 5;

/// Default depth cap for dependency path enumeration.
pub const DEFAULT_DEPENDENCY_DEPTH: usize = 10;

/// Upper bound on paths returned by either search.
const MAX_PATHS: usize = 100;

/// A caller → callee chain from an entry-point service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyPath {
    pub services: Vec<String>,
    /// Minimum call count over the path's edges.
    pub bottleneck_calls: u64,
    pub total_calls: u64,
    pub total_errors: u64,
    /// Sum of edge mean durations, milliseconds.
    pub total_latency: f64,
    pub criticality: f64,
}

impl DependencyPath {
    fn from_edges(graph: &ServiceGraph, adj: &Adjacency<'_>, nodes: &[usize], edges: &[usize]) -> Self {
        let services = nodes.iter().map(|&i| adj.names[i].to_string()).collect();
        let bottleneck_calls = edges
            .iter()
            .map(|&e| graph.edges[e].call_count)
            .min()
            .unwrap_or(0);
        let total_calls: u64 = edges.iter().map(|&e| graph.edges[e].call_count).sum();
        let total_errors: u64 = edges.iter().map(|&e| graph.edges[e].error_count).sum();
        let total_latency: f64 = edges.iter().map(|&e| graph.edges[e].avg_duration).sum();
        let error_share = if total_calls > 0 {
            total_errors as f64 / total_calls as f64
        } else {
            0.0
        };

        Self {
            services,
            bottleneck_calls,
            total_calls,
            total_errors,
            total_latency,
            criticality: bottleneck_calls as f64 * (1.0 + error_share) * edges.len() as f64,
        }
    }
}

/// Services nothing calls.
pub fn entry_points(graph: &ServiceGraph) -> Vec<String> {
    let adj = Adjacency::new(graph);
    (0..adj.len())
        .filter(|&i| adj.incoming[i].is_empty())
        .map(|i| adj.names[i].to_string())
        .collect()
}

/// Every path from an entry point to a leaf, or cut at `max_depth` hops.
/// Cycles end a path; single-service paths are dropped.
pub fn find_paths(graph: &ServiceGraph, max_depth: usize) -> Vec<DependencyPath> {
    let adj = Adjacency::new(graph);
    let mut paths = Vec::new();

    for start in (0..adj.len()).filter(|&i| adj.incoming[i].is_empty()) {
        let mut nodes = vec![start];
        let mut edges = Vec::new();
        walk(graph, &adj, max_depth, &mut nodes, &mut edges, &mut paths);
        if paths.len() >= MAX_PATHS {
            break;
        }
    }
    paths.truncate(MAX_PATHS);
    paths
}

fn walk(
    graph: &ServiceGraph,
    adj: &Adjacency<'_>,
    max_depth: usize,
    nodes: &mut Vec<usize>,
    edges: &mut Vec<usize>,
    out: &mut Vec<DependencyPath>,
) {
    if out.len() >= MAX_PATHS {
        return;
    }
    let Some(&current) = nodes.last() else {
        return;
    };

    let next: Vec<(usize, usize)> = if edges.len() < max_depth {
        adj.outgoing[current]
            .iter()
            .filter_map(|&e| {
                let target = *adj.index.get(graph.edges[e].target.as_str())?;
                (!nodes.contains(&target)).then_some((e, target))
            })
            .collect()
    } else {
        Vec::new()
    };

    if next.is_empty() {
        if !edges.is_empty() {
            out.push(DependencyPath::from_edges(graph, adj, nodes, edges));
        }
        return;
    }

    for (e, target) in next {
        nodes.push(target);
        edges.push(e);
        walk(graph, adj, max_depth, nodes, edges, out);
        nodes.pop();
        edges.pop();
    }
}

/// Paths capped at [`CRITICAL_PATH_DEPTH`], most critical first.
pub fn find_critical_paths(graph: &ServiceGraph) -> Vec<DependencyPath> {
    let mut paths = find_paths(graph, CRITICAL_PATH_DEPTH);
    paths.sort_by(|a, b| b.criticality.total_cmp(&a.criticality));
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::build::build_service_graph;
    use crate::graph::build::tests::{chain_traces, span};
    use tracelens_core::Trace;

    #[test]
    fn linear_chain_has_one_critical_path() {
        let graph = build_service_graph(&chain_traces(4));
        let paths = find_critical_paths(&graph);
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].services, vec!["A", "B", "C"]);
        assert_eq!(paths[0].bottleneck_calls, 4);
        assert_eq!(paths[0].total_errors, 1);
        assert_eq!(entry_points(&graph), vec!["A"]);
    }

    #[test]
    fn depth_cap_cuts_paths() {
        let graph = build_service_graph(&chain_traces(1));
        let paths = find_paths(&graph, 1);
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].services, vec!["A", "B"]);
    }

    #[test]
    fn branches_yield_one_path_each() {
        let t = "t";
        let trace = Trace::from_spans(
            t.into(),
            vec![
                span(t, "gw", None, "gateway", 1.0, false),
                span(t, "u", Some("gw"), "users", 1.0, false),
                span(t, "o", Some("gw"), "orders", 1.0, true),
                span(t, "d", Some("o"), "db", 1.0, false),
            ],
        );
        let paths = find_critical_paths(&build_service_graph(&[trace]));
        assert_eq!(paths.len(), 2);
        // the longer path with an error ranks first
        assert_eq!(paths[0].services, vec!["gateway", "orders", "db"]);
        assert_eq!(paths[1].services, vec!["gateway", "users"]);
    }

    #[test]
    fn pure_cycle_has_no_entry_point() {
        let t = "t";
        // A -> B and B -> A via two separate call chains
        let trace = Trace::from_spans(
            t.into(),
            vec![
                span(t, "a1", Some("b0"), "A", 1.0, false),
                span(t, "b0", Some("a1"), "B", 1.0, false),
            ],
        );
        let graph = build_service_graph(&[trace]);
        assert!(find_paths(&graph, DEFAULT_DEPENDENCY_DEPTH).is_empty());
    }
}
