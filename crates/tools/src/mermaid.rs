//! Mermaid flowchart rendering for service graphs.

use std::collections::HashMap;
use std::fmt::Write;

use tracelens_compute::graph::ServiceGraph;

/// Services with an error rate above this get the `failing` class.
const FAILING_ERROR_RATE: f64 = 0.1;

/// Escape a label for use inside a quoted mermaid string.
pub fn escape_label(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for c in label.chars() {
        match c {
            '"' => out.push_str("#quot;"),
            '<' => out.push_str("#lt;"),
            '>' => out.push_str("#gt;"),
            '|' => out.push_str("#124;"),
            '\n' | '\r' => out.push(' '),
            c => out.push(c),
        }
    }
    out
}

/// Render `graph` as a left-to-right flowchart. Node ids are positional
/// (`n0`, `n1`, ...) so arbitrary service names never break the syntax.
pub fn render(graph: &ServiceGraph) -> String {
    let mut out = String::from("graph LR\n");
    let ids: HashMap<&str, String> = graph
        .nodes
        .keys()
        .enumerate()
        .map(|(i, name)| (name.as_str(), format!("n{i}")))
        .collect();

    let mut failing = Vec::new();
    for (name, node) in &graph.nodes {
        let id = &ids[name.as_str()];
        let _ = writeln!(out, "    {id}[\"{}\"]", escape_label(name));
        if node.error_rate > FAILING_ERROR_RATE {
            failing.push(id.as_str());
        }
    }

    for edge in &graph.edges {
        let (Some(source), Some(target)) = (ids.get(edge.source.as_str()), ids.get(edge.target.as_str())) else {
            continue;
        };
        let _ = writeln!(
            out,
            "    {source} -->|\"{} calls, {:.1}% err\"| {target}",
            edge.call_count,
            edge.error_rate * 100.0
        );
    }

    if !failing.is_empty() {
        out.push_str("    classDef failing fill:#fdd,stroke:#c00\n");
        let _ = writeln!(out, "    class {} failing", failing.join(","));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use tracelens_compute::graph::{GraphEdge, ServiceNode};

    fn node(name: &str, error_rate: f64) -> ServiceNode {
        ServiceNode {
            name: name.into(),
            request_count: 10,
            error_count: (error_rate * 10.0) as u64,
            avg_duration: 20.0,
            error_rate,
            operations: BTreeSet::new(),
        }
    }

    #[test]
    fn test_render_nodes_and_edges() {
        let mut graph = ServiceGraph::default();
        graph.nodes.insert("api".into(), node("api", 0.0));
        graph.nodes.insert("db \"primary\"".into(), node("db \"primary\"", 0.5));
        graph.edges.push(GraphEdge {
            source: "api".into(),
            target: "db \"primary\"".into(),
            call_count: 12,
            error_count: 3,
            avg_duration: 8.0,
            error_rate: 0.25,
        });

        let text = render(&graph);
        assert!(text.starts_with("graph LR\n"));
        assert!(text.contains("n0[\"api\"]"));
        assert!(text.contains("n1[\"db #quot;primary#quot;\"]"));
        assert!(text.contains("n0 -->|\"12 calls, 25.0% err\"| n1"));
        assert!(text.contains("class n1 failing"));
    }

    #[test]
    fn test_escape_label() {
        assert_eq!(escape_label("a|b<c>"), "a#124;b#lt;c#gt;");
        assert_eq!(escape_label("two\nlines"), "two lines");
    }

    #[test]
    fn test_empty_graph() {
        assert_eq!(render(&ServiceGraph::default()), "graph LR\n");
    }
}
