use super::context::RunContext;
use super::nodes::StepOutcome;
use super::types::FlowGraph;
use crate::ai::TextGenerator;
use crate::gateway::MessagingGateway;
use crate::store::Store;
use std::sync::Arc;

/// Why a walk stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunReason {
    /// A processor halted the walk (end, handoff, input, failed gate).
    Halted,
    /// The current node had no outgoing edge left to follow.
    PathExhausted,
    /// The walk revisited a node; the per-run visited set bounds
    /// user-authored cycles without a design-time validation pass.
    CycleDetected,
}

#[derive(Debug, Clone, Copy)]
pub struct RunSummary {
    pub steps: usize,
    pub reason: RunReason,
}

/// The node-graph interpreter. One engine is built per process and shared
/// across runs; all collaborators are injected so tests can substitute an
/// in-memory store and mock gateway.
pub struct FlowEngine {
    pub(crate) store: Arc<Store>,
    pub(crate) gateway: Arc<dyn MessagingGateway>,
    pub(crate) ai: Arc<dyn TextGenerator>,
    pub(crate) http: reqwest::Client,
}

impl FlowEngine {
    pub fn new(
        store: Arc<Store>,
        gateway: Arc<dyn MessagingGateway>,
        ai: Arc<dyn TextGenerator>,
    ) -> Self {
        Self {
            store,
            gateway,
            ai,
            http: reqwest::Client::new(),
        }
    }

    /// Walk the graph from the trigger node's single outgoing edge.
    ///
    /// Strictly sequential, single-path: one node completes (including any
    /// external call) before the next begins, and branching nodes commit
    /// to exactly one path per run. Node failures are logged inside the
    /// processors and never abort the walk.
    pub async fn run(&self, flow_id: i64, graph: &FlowGraph, ctx: &mut RunContext) -> RunSummary {
        let entry = graph.edges_from(&graph.trigger_node_id);
        let Some(first) = entry.first() else {
            tracing::debug!(flow_id, "trigger node has no outgoing edge");
            return RunSummary {
                steps: 0,
                reason: RunReason::PathExhausted,
            };
        };

        let mut current = first.target.clone();
        let mut steps = 0usize;

        loop {
            if !ctx.visited.insert(current.clone()) {
                tracing::warn!(flow_id, node = %current, "cycle detected, halting run");
                return RunSummary {
                    steps,
                    reason: RunReason::CycleDetected,
                };
            }

            let Some(node) = graph.node(&current) else {
                tracing::warn!(flow_id, node = %current, "edge points at missing node");
                return RunSummary {
                    steps,
                    reason: RunReason::PathExhausted,
                };
            };

            tracing::debug!(flow_id, node = %current, kind = node.config.kind_name(), "processing node");
            steps += 1;

            match self.process_node(node, graph, ctx).await {
                StepOutcome::Halt => {
                    return RunSummary {
                        steps,
                        reason: RunReason::Halted,
                    };
                }
                StepOutcome::Branch(next) => current = next,
                StepOutcome::Continue => match graph.edges_from(&current).first() {
                    Some(edge) => current = edge.target.clone(),
                    None => {
                        return RunSummary {
                            steps,
                            reason: RunReason::PathExhausted,
                        };
                    }
                },
            }
        }
    }
}

// ── Branch-edge resolution ──────────────────────────────────────

/// Pick the outgoing edge for a binary branch. A `sourceHandle` of
/// "true"/"false" disambiguates; otherwise first edge = true path,
/// second = false path.
pub(crate) fn pick_binary_edge(graph: &FlowGraph, node_id: &str, truthy: bool) -> Option<String> {
    let edges = graph.edges_from(node_id);
    let wanted = if truthy { "true" } else { "false" };
    if let Some(edge) = edges
        .iter()
        .find(|e| e.source_handle.as_deref() == Some(wanted))
    {
        return Some(edge.target.clone());
    }
    let idx = if truthy { 0 } else { 1 };
    edges.get(idx).map(|e| e.target.clone())
}

/// Pick the outgoing edge at a positional index, honoring a matching
/// handle id (`"2"` or `"case-2"`) when the editor tagged one.
pub(crate) fn pick_indexed_edge(graph: &FlowGraph, node_id: &str, idx: usize) -> Option<String> {
    let edges = graph.edges_from(node_id);
    let as_plain = idx.to_string();
    let as_case = format!("case-{idx}");
    if let Some(edge) = edges.iter().find(|e| {
        matches!(e.source_handle.as_deref(), Some(h) if h == as_plain || h == as_case)
    }) {
        return Some(edge.target.clone());
    }
    edges.get(idx).map(|e| e.target.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flows::types::{Edge, FlowGraph};
    use std::collections::HashMap;

    fn graph_with_edges(edges: Vec<Edge>) -> FlowGraph {
        FlowGraph {
            nodes: HashMap::new(),
            edges,
            trigger_node_id: "t".into(),
        }
    }

    #[test]
    fn binary_edge_by_handle() {
        let graph = graph_with_edges(vec![
            Edge {
                source: "c".into(),
                target: "no".into(),
                source_handle: Some("false".into()),
            },
            Edge {
                source: "c".into(),
                target: "yes".into(),
                source_handle: Some("true".into()),
            },
        ]);
        assert_eq!(pick_binary_edge(&graph, "c", true), Some("yes".into()));
        assert_eq!(pick_binary_edge(&graph, "c", false), Some("no".into()));
    }

    #[test]
    fn binary_edge_by_position() {
        let graph = graph_with_edges(vec![
            Edge {
                source: "c".into(),
                target: "first".into(),
                source_handle: None,
            },
            Edge {
                source: "c".into(),
                target: "second".into(),
                source_handle: None,
            },
        ]);
        assert_eq!(pick_binary_edge(&graph, "c", true), Some("first".into()));
        assert_eq!(pick_binary_edge(&graph, "c", false), Some("second".into()));
    }

    #[test]
    fn binary_edge_missing_false_branch() {
        let graph = graph_with_edges(vec![Edge {
            source: "c".into(),
            target: "only".into(),
            source_handle: None,
        }]);
        assert_eq!(pick_binary_edge(&graph, "c", true), Some("only".into()));
        assert_eq!(pick_binary_edge(&graph, "c", false), None);
    }

    #[test]
    fn indexed_edge_positional_and_handle() {
        let graph = graph_with_edges(vec![
            Edge {
                source: "s".into(),
                target: "a".into(),
                source_handle: None,
            },
            Edge {
                source: "s".into(),
                target: "b".into(),
                source_handle: None,
            },
        ]);
        assert_eq!(pick_indexed_edge(&graph, "s", 1), Some("b".into()));
        assert_eq!(pick_indexed_edge(&graph, "s", 5), None);

        let graph = graph_with_edges(vec![
            Edge {
                source: "s".into(),
                target: "x".into(),
                source_handle: Some("case-1".into()),
            },
            Edge {
                source: "s".into(),
                target: "y".into(),
                source_handle: Some("case-0".into()),
            },
        ]);
        assert_eq!(pick_indexed_edge(&graph, "s", 0), Some("y".into()));
        assert_eq!(pick_indexed_edge(&graph, "s", 1), Some("x".into()));
    }
}
