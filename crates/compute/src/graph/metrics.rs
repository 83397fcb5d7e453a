use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use super::build::{Adjacency, ServiceGraph};

/// Structural summary of a service graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphMetrics {
    pub node_count: usize,
    pub edge_count: usize,
    /// Mean of fan-in + fan-out.
    pub avg_degree: f64,
    /// `edges / (n * (n - 1))`
    pub density: f64,
    /// Longest shortest directed path, in hops.
    pub diameter: usize,
    pub connected_components: usize,
    pub orphan_spans: usize,
}

pub fn graph_metrics(graph: &ServiceGraph) -> GraphMetrics {
    let adj = Adjacency::new(graph);
    let n = adj.len();
    let e = adj.endpoints.len();

    let avg_degree = if n > 0 { 2.0 * e as f64 / n as f64 } else { 0.0 };
    let density = if n > 1 {
        e as f64 / (n as f64 * (n as f64 - 1.0))
    } else {
        0.0
    };

    GraphMetrics {
        node_count: n,
        edge_count: e,
        avg_degree,
        density,
        diameter: diameter(graph, &adj),
        connected_components: count_connected_components(&adj),
        orphan_spans: graph.orphan_spans,
    }
}

/// Hop distances from `source` along outgoing edges; `None` when unreachable.
pub(crate) fn bfs_distances(graph: &ServiceGraph, adj: &Adjacency<'_>, source: usize) -> Vec<Option<usize>> {
    let mut dist = vec![None; adj.len()];
    let mut queue = VecDeque::new();
    dist[source] = Some(0);
    queue.push_back(source);

    while let Some(node) = queue.pop_front() {
        let d = dist[node].unwrap_or(0);
        for next in adj.successors(graph, node) {
            if dist[next].is_none() {
                dist[next] = Some(d + 1);
                queue.push_back(next);
            }
        }
    }
    dist
}

fn diameter(graph: &ServiceGraph, adj: &Adjacency<'_>) -> usize {
    (0..adj.len())
        .flat_map(|s| bfs_distances(graph, adj, s).into_iter().flatten())
        .max()
        .unwrap_or(0)
}

/// Union-Find (disjoint set) with path compression and union by rank.
struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            self.parent[x] = self.find(self.parent[x]);
        }
        self.parent[x]
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

/// Count connected components treating edges as undirected.
fn count_connected_components(adj: &Adjacency<'_>) -> usize {
    let n = adj.len();
    let mut uf = UnionFind::new(n);
    for &(s, t) in &adj.endpoints {
        uf.union(s, t);
    }
    (0..n).map(|i| uf.find(i)).collect::<HashSet<_>>().len()
}
