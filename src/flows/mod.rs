pub mod condition;
pub mod context;
pub mod cooldown;
pub mod engine;
pub mod nodes;
pub mod triggers;
pub mod types;
pub mod vars;

use std::collections::{HashMap, HashSet};
use types::{Edge, FlowGraph, FlowNode, NodeConfig, RawContent};

/// Validation errors that keep a flow's content from becoming runnable.
#[derive(Debug, Clone, thiserror::Error)]
#[error("flow content: {message}")]
pub struct ContentError {
    pub message: String,
}

impl ContentError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Parse stored flow content into a validated graph.
///
/// The editor persists content either as a JSON object or as a
/// string-wrapped JSON object; both forms are accepted. Structural
/// faults (duplicate ids, dangling edges, no trigger node) are
/// collected into errors rather than panics -- a flow that fails here
/// is simply skipped by the trigger matcher.
pub fn parse_content(raw: &str) -> Result<FlowGraph, Vec<ContentError>> {
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| vec![ContentError::new(format!("unparseable JSON: {e}"))])?;

    // Tolerate double-encoded content.
    let value = match value {
        serde_json::Value::String(inner) => serde_json::from_str(&inner)
            .map_err(|e| vec![ContentError::new(format!("unparseable inner JSON: {e}"))])?,
        other => other,
    };

    let content: RawContent = serde_json::from_value(value)
        .map_err(|e| vec![ContentError::new(format!("unexpected content shape: {e}"))])?;

    build_graph(content)
}

fn build_graph(content: RawContent) -> Result<FlowGraph, Vec<ContentError>> {
    let mut errors = Vec::new();

    let mut seen_ids = HashSet::new();
    for node in &content.nodes {
        if !seen_ids.insert(node.id.clone()) {
            errors.push(ContentError::new(format!("duplicate node id '{}'", node.id)));
        }
    }

    let mut trigger_ids = Vec::new();
    let mut nodes = HashMap::new();
    for node in &content.nodes {
        let config = NodeConfig::from_raw(&node.kind, &node.data);
        if matches!(config, NodeConfig::Trigger(_)) {
            trigger_ids.push(node.id.clone());
        }
        if let NodeConfig::Unknown(ref kind) = config {
            tracing::warn!(node = %node.id, kind = %kind, "unknown node kind, will no-op at runtime");
        }
        nodes.insert(
            node.id.clone(),
            FlowNode {
                id: node.id.clone(),
                config,
            },
        );
    }

    match trigger_ids.len() {
        0 => errors.push(ContentError::new("no trigger node present")),
        1 => {}
        n => errors.push(ContentError::new(format!("{n} trigger nodes present, expected 1"))),
    }

    let mut edges = Vec::new();
    for edge in &content.edges {
        if !nodes.contains_key(&edge.source) {
            errors.push(ContentError::new(format!(
                "edge references unknown source '{}'",
                edge.source
            )));
            continue;
        }
        if !nodes.contains_key(&edge.target) {
            errors.push(ContentError::new(format!(
                "edge references unknown target '{}'",
                edge.target
            )));
            continue;
        }
        edges.push(Edge {
            source: edge.source.clone(),
            target: edge.target.clone(),
            source_handle: edge.source_handle.clone(),
        });
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(FlowGraph {
        nodes,
        edges,
        trigger_node_id: trigger_ids.remove(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_content() -> &'static str {
        r#"{
            "nodes": [
                {"id": "t", "type": "trigger", "data": {"triggerType": "all"}},
                {"id": "m", "type": "message", "data": {"text": "Oi"}}
            ],
            "edges": [
                {"source": "t", "target": "m"}
            ]
        }"#
    }

    #[test]
    fn parses_object_content() {
        let graph = parse_content(minimal_content()).unwrap();
        assert_eq!(graph.trigger_node_id, "t");
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.edges.len(), 1);
    }

    #[test]
    fn parses_string_wrapped_content() {
        let wrapped = serde_json::to_string(minimal_content()).unwrap();
        let graph = parse_content(&wrapped).unwrap();
        assert_eq!(graph.trigger_node_id, "t");
    }

    #[test]
    fn rejects_missing_trigger() {
        let raw = r#"{"nodes": [{"id": "m", "type": "message", "data": {}}], "edges": []}"#;
        let errs = parse_content(raw).unwrap_err();
        assert!(errs.iter().any(|e| e.message.contains("no trigger node")));
    }

    #[test]
    fn rejects_duplicate_node_ids() {
        let raw = r#"{
            "nodes": [
                {"id": "t", "type": "trigger", "data": {}},
                {"id": "t", "type": "message", "data": {}}
            ],
            "edges": []
        }"#;
        let errs = parse_content(raw).unwrap_err();
        assert!(errs.iter().any(|e| e.message.contains("duplicate node id")));
    }

    #[test]
    fn rejects_dangling_edge() {
        let raw = r#"{
            "nodes": [{"id": "t", "type": "trigger", "data": {}}],
            "edges": [{"source": "t", "target": "ghost"}]
        }"#;
        let errs = parse_content(raw).unwrap_err();
        assert!(errs.iter().any(|e| e.message.contains("unknown target")));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_content("not json").is_err());
    }
}
