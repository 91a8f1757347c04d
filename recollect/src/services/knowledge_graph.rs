use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::models::{
    Entity, GraphEdge, GraphNode, GraphSummary, MemoryItem, MEMORY_NODE_TYPE, MENTIONS,
};

const LABEL_CHARS: usize = 80;

/// In-memory node/edge store linking classified statements to the entities
/// they mention.
///
/// Nodes are upserted by id. Edges are append-only: the same MENTIONS pair
/// seen on two turns yields two edges.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeGraph {
    nodes: HashMap<String, GraphNode>,
    edges: Vec<GraphEdge>,
}

impl KnowledgeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the node for `entity`.
    pub fn upsert_entity(&mut self, entity: &Entity) -> String {
        let mut attributes = BTreeMap::new();
        attributes.insert("importance".to_string(), entity.importance_score.to_string());
        attributes.insert("mentions".to_string(), entity.mentions.len().to_string());
        for (key, attribute) in &entity.attributes {
            attributes.insert(key.clone(), attribute_text(&attribute.value));
        }

        let node = GraphNode::with_attributes(
            entity.id.clone(),
            entity.canonical_name.clone(),
            entity.entity_type.as_str(),
            attributes,
        );
        self.upsert_node(node);
        entity.id.clone()
    }

    pub fn upsert_node(&mut self, node: GraphNode) {
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn add_edge(
        &mut self,
        source: impl Into<String>,
        target: impl Into<String>,
        relation: impl Into<String>,
        weight: f64,
    ) {
        self.edges.push(GraphEdge::new(source, target, relation, weight));
    }

    pub fn ingest_entities<'a>(&mut self, entities: impl IntoIterator<Item = &'a Entity>) -> usize {
        entities
            .into_iter()
            .map(|entity| self.upsert_entity(entity))
            .count()
    }

    /// Add a node for a classified statement and return its id.
    pub fn ingest_memory(&mut self, item: &MemoryItem) -> String {
        let id = memory_node_id(item);
        let mut attributes = BTreeMap::new();
        attributes.insert("retention".to_string(), item.retention.to_string());
        attributes.insert("importance".to_string(), item.importance_score.to_string());
        attributes.insert("categories".to_string(), item.categories.join(","));
        attributes.insert("turn".to_string(), item.turn_number.to_string());

        let label: String = item.content.chars().take(LABEL_CHARS).collect();
        self.upsert_node(GraphNode::with_attributes(
            id.clone(),
            label,
            MEMORY_NODE_TYPE,
            attributes,
        ));
        id
    }

    /// One MENTIONS edge from the memory node to each entity. Unknown ids are
    /// skipped.
    pub fn link_memory_to_entities<S: AsRef<str>>(&mut self, memory_id: &str, entity_ids: &[S]) -> usize {
        let mut linked = 0;
        for entity_id in entity_ids {
            let entity_id = entity_id.as_ref();
            if !self.nodes.contains_key(entity_id) {
                tracing::debug!(memory_id, entity_id, "Skipping link to unknown entity");
                continue;
            }
            self.add_edge(memory_id, entity_id, MENTIONS, 1.0);
            linked += 1;
        }
        linked
    }

    pub fn get_summary(&self) -> GraphSummary {
        let mut by_type = BTreeMap::new();
        for node in self.nodes.values() {
            *by_type.entry(node.node_type.clone()).or_insert(0) += 1;
        }
        GraphSummary {
            nodes: self.nodes.len(),
            edges: self.edges.len(),
            by_type,
        }
    }

    /// Nodes whose label contains `fragment`, ignoring case. Sorted by id.
    pub fn query_focus(&self, fragment: &str) -> Vec<&GraphNode> {
        let needle = fragment.to_lowercase();
        let mut nodes: Vec<&GraphNode> = self
            .nodes
            .values()
            .filter(|node| node.label.to_lowercase().contains(&needle))
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }
}

/// `memory:{turn}:{first 10 hex chars of sha256(content)}`
pub fn memory_node_id(item: &MemoryItem) -> String {
    let digest = format!("{:x}", Sha256::digest(item.content.as_bytes()));
    format!("memory:{}:{}", item.turn_number, &digest[..10])
}

fn attribute_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
