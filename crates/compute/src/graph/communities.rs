use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::build::{Adjacency, ServiceGraph};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Community {
    pub id: usize,
    pub services: Vec<String>,
    /// Calls between members.
    pub internal_calls: u64,
    /// Calls crossing the community boundary.
    pub external_calls: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunityDetection {
    pub communities: Vec<Community>,
    pub modularity: f64,
}

/// Greedy modularity merge (Clauset-Newman-Moore style) on the undirected
/// call graph weighted by call count.
///
/// Every service starts alone; the pair of connected communities with the
/// largest modularity gain is merged until no merge improves modularity.
/// Ties go to the pair with the smallest community ids, so the result is
/// reproducible.
pub fn detect_communities(graph: &ServiceGraph) -> CommunityDetection {
    let adj = Adjacency::new(graph);
    let n = adj.len();
    if n == 0 {
        return CommunityDetection::default();
    }

    // Symmetric weights between nodes, self-loops skipped.
    let mut weight: BTreeMap<(usize, usize), f64> = BTreeMap::new();
    for (e, &(s, t)) in adj.endpoints.iter().enumerate() {
        if s == t {
            continue;
        }
        let w = graph.edges[e].call_count as f64;
        *weight.entry((s.min(t), s.max(t))).or_default() += w;
    }
    let total: f64 = weight.values().sum();

    let mut membership: Vec<usize> = (0..n).collect();
    if total <= 0.0 {
        return assemble(graph, &adj, &membership, 0.0);
    }
    let two_m = 2.0 * total;

    let mut degree = vec![0.0; n];
    for (&(a, b), &w) in &weight {
        degree[a] += w;
        degree[b] += w;
    }

    // e[(i, j)] with i < j: fraction of edge ends between communities i and j.
    let mut between: BTreeMap<(usize, usize), f64> =
        weight.iter().map(|(&k, &w)| (k, w / two_m)).collect();
    let mut share: BTreeMap<usize, f64> = (0..n).map(|i| (i, degree[i] / two_m)).collect();

    loop {
        let mut best: Option<((usize, usize), f64)> = None;
        for (&(i, j), &e_ij) in &between {
            let gain = 2.0 * (e_ij - share[&i] * share[&j]);
            if gain > 1e-12 && best.map_or(true, |(_, g)| gain > g + 1e-12) {
                best = Some(((i, j), gain));
            }
        }
        let Some(((keep, absorb), _)) = best else {
            break;
        };

        for m in membership.iter_mut() {
            if *m == absorb {
                *m = keep;
            }
        }
        let absorbed_share = share.remove(&absorb).unwrap_or(0.0);
        *share.entry(keep).or_default() += absorbed_share;

        let mut merged: BTreeMap<(usize, usize), f64> = BTreeMap::new();
        for (&(i, j), &e) in &between {
            let a = if i == absorb { keep } else { i };
            let b = if j == absorb { keep } else { j };
            if a == b {
                continue;
            }
            *merged.entry((a.min(b), a.max(b))).or_default() += e;
        }
        between = merged;
    }

    let modularity = modularity(&weight, &degree, &membership, two_m);
    debug!(services = n, modularity, "communities detected");
    assemble(graph, &adj, &membership, modularity)
}

fn modularity(weight: &BTreeMap<(usize, usize), f64>, degree: &[f64], membership: &[usize], two_m: f64) -> f64 {
    let internal: f64 = weight
        .iter()
        .filter(|(&(a, b), _)| membership[a] == membership[b])
        .map(|(_, &w)| 2.0 * w)
        .sum();
    let mut community_degree: BTreeMap<usize, f64> = BTreeMap::new();
    for (i, &d) in degree.iter().enumerate() {
        *community_degree.entry(membership[i]).or_default() += d;
    }
    internal / two_m
        - community_degree
            .values()
            .map(|d| (d / two_m).powi(2))
            .sum::<f64>()
}

fn assemble(graph: &ServiceGraph, adj: &Adjacency<'_>, membership: &[usize], modularity: f64) -> CommunityDetection {
    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (node, &c) in membership.iter().enumerate() {
        groups.entry(c).or_default().push(node);
    }

    let communities = groups
        .into_values()
        .enumerate()
        .map(|(id, members)| {
            let mut internal_calls = 0;
            let mut external_calls = 0;
            for (e, &(s, t)) in adj.endpoints.iter().enumerate() {
                let (s_in, t_in) = (members.contains(&s), members.contains(&t));
                if s_in && t_in {
                    internal_calls += graph.edges[e].call_count;
                } else if s_in || t_in {
                    external_calls += graph.edges[e].call_count;
                }
            }
            Community {
                id,
                services: members.iter().map(|&i| adj.names[i].to_string()).collect(),
                internal_calls,
                external_calls,
            }
        })
        .collect();

    CommunityDetection {
        communities,
        modularity,
    }
}
