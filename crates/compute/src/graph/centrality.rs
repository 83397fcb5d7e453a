//! Per-service centrality: degree, edge share, downstream closeness,
//! PageRank and local clustering.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use serde::{Deserialize, Serialize};

use super::build::{Adjacency, ServiceGraph};

const DAMPING: f64 = 0.85;
const PAGERANK_ITERATIONS: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeCentrality {
    pub service: String,
    pub fan_in: usize,
    pub fan_out: usize,
    /// `(fan_in + fan_out) / (2 * (n - 1))`
    pub degree: f64,
    /// Share of all edges touching the service. An approximation, not
    /// shortest-path betweenness.
    pub betweenness: f64,
    pub closeness: f64,
    pub pagerank: f64,
    pub clustering_coefficient: f64,
}

/// All centrality measures, one entry per service in name order.
pub fn compute_centrality(graph: &ServiceGraph) -> Vec<NodeCentrality> {
    let adj = Adjacency::new(graph);
    let n = adj.len();
    if n == 0 {
        return Vec::new();
    }

    let total_edges = adj.endpoints.len();
    let ranks = pagerank(&adj, DAMPING, PAGERANK_ITERATIONS);

    (0..n)
        .map(|i| {
            let fan_in = adj.incoming[i].len();
            let fan_out = adj.outgoing[i].len();
            let degree = if n > 1 {
                (fan_in + fan_out) as f64 / (2.0 * (n as f64 - 1.0))
            } else {
                0.0
            };
            let touching = adj
                .endpoints
                .iter()
                .filter(|&&(s, t)| s == i || t == i)
                .count();
            let betweenness = if total_edges > 0 {
                touching as f64 / total_edges as f64
            } else {
                0.0
            };

            NodeCentrality {
                service: adj.names[i].to_string(),
                fan_in,
                fan_out,
                degree,
                betweenness,
                closeness: closeness(graph, &adj, i),
                pagerank: ranks[i],
                clustering_coefficient: clustering_coefficient(&adj, i),
            }
        })
        .collect()
}

/// A priority queue entry for Dijkstra's algorithm.
///
/// Uses reversed ordering so `BinaryHeap` (a max-heap) behaves as a min-heap.
#[derive(Debug, Clone)]
struct State {
    distance: f64,
    node: usize,
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.distance.total_cmp(&other.distance) == Ordering::Equal
    }
}

impl Eq for State {}

impl Ord for State {
    fn cmp(&self, other: &Self) -> Ordering {
        other.distance.total_cmp(&self.distance)
    }
}

impl PartialOrd for State {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Single-source Dijkstra over outgoing edges with unit weights.
fn shortest_distances(graph: &ServiceGraph, adj: &Adjacency<'_>, source: usize) -> Vec<f64> {
    let mut dist = vec![f64::INFINITY; adj.len()];
    let mut heap = BinaryHeap::new();
    dist[source] = 0.0;
    heap.push(State {
        distance: 0.0,
        node: source,
    });

    while let Some(State { distance, node }) = heap.pop() {
        if distance > dist[node] {
            continue;
        }
        for next in adj.successors(graph, node) {
            let candidate = distance + 1.0;
            if candidate < dist[next] {
                dist[next] = candidate;
                heap.push(State {
                    distance: candidate,
                    node: next,
                });
            }
        }
    }
    dist
}

/// Reachable downstream services divided by the summed distance to them.
/// 0 for services that call nothing.
fn closeness(graph: &ServiceGraph, adj: &Adjacency<'_>, node: usize) -> f64 {
    let (reached, total) = shortest_distances(graph, adj, node)
        .into_iter()
        .enumerate()
        .filter(|&(i, d)| i != node && d.is_finite())
        .fold((0usize, 0.0), |(count, sum), (_, d)| (count + 1, sum + d));
    if total > 0.0 {
        reached as f64 / total
    } else {
        0.0
    }
}

/// Power-iteration PageRank. Rank held by services with no outgoing calls
/// is spread evenly so scores keep summing to 1.
fn pagerank(adj: &Adjacency<'_>, damping: f64, iterations: usize) -> Vec<f64> {
    let n = adj.len();
    let initial = 1.0 / n as f64;
    let mut scores = vec![initial; n];
    let base = (1.0 - damping) / n as f64;

    for _ in 0..iterations {
        let dangling: f64 = (0..n)
            .filter(|&i| adj.outgoing[i].is_empty())
            .map(|i| scores[i])
            .sum();
        let mut next = vec![base + damping * dangling / n as f64; n];
        for &(s, t) in &adj.endpoints {
            next[t] += damping * scores[s] / adj.outgoing[s].len() as f64;
        }
        scores = next;
    }
    scores
}

/// Fraction of neighbor pairs that are themselves connected, ignoring direction.
fn clustering_coefficient(adj: &Adjacency<'_>, node: usize) -> f64 {
    let neighbors: Vec<usize> = adj.neighbors[node].iter().copied().collect();
    let k = neighbors.len();
    if k < 2 {
        return 0.0;
    }
    let mut links = 0usize;
    for (i, &a) in neighbors.iter().enumerate() {
        for &b in &neighbors[i + 1..] {
            if adj.neighbors[a].contains(&b) {
                links += 1;
            }
        }
    }
    links as f64 / (k * (k - 1) / 2) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::build::build_service_graph;
    use crate::graph::build::tests::{chain_traces, span};
    use tracelens_core::Trace;

    fn by_service<'a>(c: &'a [NodeCentrality], name: &str) -> &'a NodeCentrality {
        c.iter().find(|n| n.service == name).unwrap()
    }

    #[test]
    fn chain_centrality() {
        let graph = build_service_graph(&chain_traces(3));
        let c = compute_centrality(&graph);
        assert_eq!(c.len(), 3);

        let b = by_service(&c, "B");
        assert_eq!((b.fan_in, b.fan_out), (1, 1));
        assert!((b.degree - 0.5).abs() < 1e-12);
        assert!((b.betweenness - 1.0).abs() < 1e-12);
        assert!((by_service(&c, "A").betweenness - 0.5).abs() < 1e-12);

        // A reaches B at 1 and C at 2
        assert!((by_service(&c, "A").closeness - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(by_service(&c, "C").closeness, 0.0);

        let total: f64 = c.iter().map(|n| n.pagerank).sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!(by_service(&c, "C").pagerank > by_service(&c, "A").pagerank);
    }

    #[test]
    fn triangle_is_fully_clustered() {
        let t = "t";
        let trace = Trace::from_spans(
            t.into(),
            vec![
                span(t, "a", None, "A", 1.0, false),
                span(t, "b", Some("a"), "B", 1.0, false),
                span(t, "c", Some("b"), "C", 1.0, false),
                span(t, "c2", Some("a"), "C", 1.0, false),
            ],
        );
        let c = compute_centrality(&build_service_graph(&[trace]));
        for node in &c {
            assert!((node.clustering_coefficient - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn empty_graph_has_no_centrality() {
        assert!(compute_centrality(&ServiceGraph::default()).is_empty());
    }
}
