use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Relation used for memory → entity co-occurrence edges.
pub const MENTIONS: &str = "MENTIONS";

/// Node type label for classified statements.
pub const MEMORY_NODE_TYPE: &str = "memory";

/// A node in the knowledge graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Unique identifier (entity id or memory node id)
    pub id: String,

    /// Human-readable label
    pub label: String,

    /// Node type (`person`, `medical_condition`, `memory`, ...)
    #[serde(rename = "type")]
    pub node_type: String,

    pub attributes: BTreeMap<String, String>,
}

/// A directed edge in the knowledge graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    /// Source node ID
    pub source: String,

    /// Target node ID
    pub target: String,

    /// Relationship label
    pub relation: String,

    pub weight: f64,
}

/// Node, edge and per-type counts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSummary {
    pub nodes: usize,
    pub edges: usize,
    pub by_type: BTreeMap<String, usize>,
}

impl GraphSummary {
    pub fn count_of(&self, node_type: &str) -> usize {
        self.by_type.get(node_type).copied().unwrap_or(0)
    }
}

impl GraphNode {
    /// Create a new graph node
    pub fn new(id: impl Into<String>, label: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            node_type: node_type.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Create a graph node with attributes
    pub fn with_attributes(
        id: impl Into<String>,
        label: impl Into<String>,
        node_type: impl Into<String>,
        attributes: BTreeMap<String, String>,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            node_type: node_type.into(),
            attributes,
        }
    }
}

impl GraphEdge {
    /// Create a new graph edge
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        relation: impl Into<String>,
        weight: f64,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            relation: relation.into(),
            weight,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_graph_node_serialization() {
        let node = GraphNode::new("named_paris", "Paris", "location");
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["type"], "location");
        assert_eq!(json["id"], "named_paris");
    }

    #[test]
    fn test_graph_edge_serialization() {
        let edge = GraphEdge::new("memory:1:abc", "named_paris", MENTIONS, 1.0);
        let json = serde_json::to_value(&edge).unwrap();
        assert_eq!(
            json,
            json!({
                "source": "memory:1:abc",
                "target": "named_paris",
                "relation": "MENTIONS",
                "weight": 1.0
            })
        );
    }

    #[test]
    fn test_summary_count_of_missing_type() {
        let summary = GraphSummary::default();
        assert_eq!(summary.count_of("person"), 0);
    }
}
