use serde::{Deserialize, Serialize};

use super::build::ServiceGraph;
use super::centrality::NodeCentrality;

const MAX_BOTTLENECKS: usize = 10;
const HIGH_ERROR_RATE: f64 = 0.1;
const SLOW_FACTOR: f64 = 2.0;
const MIN_FAN_IN: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BottleneckReason {
    HighFanIn,
    HighLatency,
    HighErrorRate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bottleneck {
    pub service: String,
    pub score: f64,
    pub fan_in: usize,
    pub avg_duration: f64,
    pub error_rate: f64,
    pub reasons: Vec<BottleneckReason>,
}

/// Services that many others depend on, or that are slow or failing.
///
/// `score = 0.4 * degree + 0.4 * duration / max_duration + 0.2 * error_rate`.
pub fn find_bottlenecks(graph: &ServiceGraph, centrality: &[NodeCentrality]) -> Vec<Bottleneck> {
    let durations: Vec<f64> = graph.nodes.values().map(|n| n.avg_duration).collect();
    let max_duration = durations.iter().copied().fold(0.0, f64::max);
    let mean_duration = crate::stats::mean(&durations);

    let mut found: Vec<Bottleneck> = centrality
        .iter()
        .filter_map(|c| {
            let node = graph.nodes.get(&c.service)?;
            let mut reasons = Vec::new();
            if c.fan_in >= MIN_FAN_IN {
                reasons.push(BottleneckReason::HighFanIn);
            }
            if mean_duration > 0.0 && node.avg_duration > SLOW_FACTOR * mean_duration {
                reasons.push(BottleneckReason::HighLatency);
            }
            if node.error_rate > HIGH_ERROR_RATE {
                reasons.push(BottleneckReason::HighErrorRate);
            }
            if reasons.is_empty() {
                return None;
            }

            let latency = if max_duration > 0.0 {
                node.avg_duration / max_duration
            } else {
                0.0
            };
            Some(Bottleneck {
                service: c.service.clone(),
                score: 0.4 * c.degree + 0.4 * latency + 0.2 * node.error_rate,
                fan_in: c.fan_in,
                avg_duration: node.avg_duration,
                error_rate: node.error_rate,
                reasons,
            })
        })
        .collect();

    found.sort_by(|a, b| b.score.total_cmp(&a.score));
    found.truncate(MAX_BOTTLENECKS);
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::build::build_service_graph;
    use crate::graph::build::tests::span;
    use crate::graph::centrality::compute_centrality;
    use tracelens_core::Trace;

    #[test]
    fn shared_slow_dependency_is_a_bottleneck() {
        let t = "t";
        let trace = Trace::from_spans(
            t.into(),
            vec![
                span(t, "w", None, "web", 5.0, false),
                span(t, "m", None, "mobile", 5.0, false),
                span(t, "d1", Some("w"), "db", 200.0, true),
                span(t, "d2", Some("m"), "db", 180.0, false),
            ],
        );
        let graph = build_service_graph(&[trace]);
        let found = find_bottlenecks(&graph, &compute_centrality(&graph));
        assert_eq!(found.len(), 1);
        let db = &found[0];
        assert_eq!(db.service, "db");
        assert_eq!(
            db.reasons,
            vec![
                BottleneckReason::HighFanIn,
                BottleneckReason::HighLatency,
                BottleneckReason::HighErrorRate
            ]
        );
    }
}
