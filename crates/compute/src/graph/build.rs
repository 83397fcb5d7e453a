use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use tracelens_core::{Span, Trace};

/// Per-service aggregate over every span the service emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceNode {
    pub name: String,
    pub request_count: u64,
    pub error_count: u64,
    /// Milliseconds, running mean.
    pub avg_duration: f64,
    /// Running mean of the per-span error indicator.
    pub error_rate: f64,
    pub operations: BTreeSet<String>,
}

impl ServiceNode {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            request_count: 0,
            error_count: 0,
            avg_duration: 0.0,
            error_rate: 0.0,
            operations: BTreeSet::new(),
        }
    }

    fn record(&mut self, span: &Span) {
        self.request_count += 1;
        let n = self.request_count as f64;
        let err = if span.error { 1.0 } else { 0.0 };
        self.avg_duration = running_mean(self.avg_duration, span.duration, n);
        self.error_rate = running_mean(self.error_rate, err, n);
        if span.error {
            self.error_count += 1;
        }
        self.operations.insert(span.name.clone());
    }
}

/// Caller → callee aggregate, built from child spans whose parent lives in
/// a different service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub call_count: u64,
    pub error_count: u64,
    /// Mean duration of the callee spans, milliseconds.
    pub avg_duration: f64,
    pub error_rate: f64,
}

impl GraphEdge {
    fn new(source: &str, target: &str) -> Self {
        Self {
            source: source.to_string(),
            target: target.to_string(),
            call_count: 0,
            error_count: 0,
            avg_duration: 0.0,
            error_rate: 0.0,
        }
    }

    fn record(&mut self, child: &Span) {
        self.call_count += 1;
        let n = self.call_count as f64;
        let err = if child.error { 1.0 } else { 0.0 };
        self.avg_duration = running_mean(self.avg_duration, child.duration, n);
        self.error_rate = running_mean(self.error_rate, err, n);
        if child.error {
            self.error_count += 1;
        }
    }
}

/// `(old * (n - 1) + x) / n`
fn running_mean(old: f64, x: f64, n: f64) -> f64 {
    (old * (n - 1.0) + x) / n
}

/// Service call graph for one query window. Nodes and edges are ordered by
/// name so every derived metric is reproducible.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceGraph {
    pub nodes: BTreeMap<String, ServiceNode>,
    pub edges: Vec<GraphEdge>,
    /// Spans whose parent id did not resolve inside their trace.
    pub orphan_spans: usize,
    pub trace_count: usize,
    pub span_count: usize,
}

/// Build the service graph by streaming over every span of every trace.
pub fn build_service_graph(traces: &[Trace]) -> ServiceGraph {
    let mut nodes: BTreeMap<String, ServiceNode> = BTreeMap::new();
    let mut edges: BTreeMap<(String, String), GraphEdge> = BTreeMap::new();
    let mut orphan_spans = 0;
    let mut span_count = 0;

    for trace in traces {
        let by_id: HashMap<&str, &Span> = trace
            .spans
            .iter()
            .map(|s| (s.span_id.as_str(), s))
            .collect();

        for span in &trace.spans {
            span_count += 1;
            nodes
                .entry(span.service.clone())
                .or_insert_with(|| ServiceNode::new(&span.service))
                .record(span);

            let Some(parent_id) = span.parent_span_id.as_deref() else {
                continue;
            };
            let Some(parent) = by_id.get(parent_id) else {
                orphan_spans += 1;
                continue;
            };
            if parent.service != span.service {
                edges
                    .entry((parent.service.clone(), span.service.clone()))
                    .or_insert_with(|| GraphEdge::new(&parent.service, &span.service))
                    .record(span);
            }
        }
    }

    if orphan_spans > 0 {
        warn!(orphan_spans, "spans reference parents outside their trace");
    }
    debug!(
        traces = traces.len(),
        services = nodes.len(),
        edges = edges.len(),
        "service graph built"
    );

    ServiceGraph {
        nodes,
        edges: edges.into_values().collect(),
        orphan_spans,
        trace_count: traces.len(),
        span_count,
    }
}

/// Dense index view of a [`ServiceGraph`] used by the graph algorithms.
pub struct Adjacency<'a> {
    pub names: Vec<&'a str>,
    pub index: HashMap<&'a str, usize>,
    /// Outgoing edge indices (into `ServiceGraph::edges`) per node.
    pub outgoing: Vec<Vec<usize>>,
    pub incoming: Vec<Vec<usize>>,
    /// Undirected neighbor sets, self-loops excluded.
    pub neighbors: Vec<BTreeSet<usize>>,
    /// `(source, target)` node indices per edge.
    pub endpoints: Vec<(usize, usize)>,
}

impl<'a> Adjacency<'a> {
    pub fn new(graph: &'a ServiceGraph) -> Self {
        let names: Vec<&str> = graph.nodes.keys().map(String::as_str).collect();
        let index: HashMap<&str, usize> = names.iter().enumerate().map(|(i, &n)| (n, i)).collect();
        let n = names.len();

        let mut outgoing = vec![Vec::new(); n];
        let mut incoming = vec![Vec::new(); n];
        let mut neighbors = vec![BTreeSet::new(); n];
        let mut endpoints = Vec::with_capacity(graph.edges.len());

        for (e, edge) in graph.edges.iter().enumerate() {
            let (Some(&s), Some(&t)) = (index.get(edge.source.as_str()), index.get(edge.target.as_str())) else {
                continue;
            };
            outgoing[s].push(e);
            incoming[t].push(e);
            if s != t {
                neighbors[s].insert(t);
                neighbors[t].insert(s);
            }
            endpoints.push((s, t));
        }

        Self {
            names,
            index,
            outgoing,
            incoming,
            neighbors,
            endpoints,
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Downstream node indices of `node`.
    pub fn successors(&self, graph: &ServiceGraph, node: usize) -> Vec<usize> {
        self.outgoing[node]
            .iter()
            .filter_map(|&e| self.index.get(graph.edges[e].target.as_str()).copied())
            .collect()
    }
}
