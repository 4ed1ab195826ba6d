//! Pipeline graph data models.
//!
//! ## Entities
//! - [`Node`] — a pipeline step with a type, a shape, a position and a property bag
//! - [`Edge`] — a connection between two nodes, referenced by id only
//! - [`EntityRef`] — a typed id used for conflict tracking and render signals
//!
//! ## Container
//! - [`GraphModel`] — id-indexed maps of nodes and edges; pure data
//! - [`GraphDocument`] — the flat `{nodes, edges}` form used on the wire and on disk

use crate::error::GraphError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

// ============================================================================
// Entities
// ============================================================================

/// Canvas position of a node
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A pipeline node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier
    pub id: String,
    /// Node type (e.g. "script", "condition", "trigger"); decides which property keys apply
    #[serde(rename = "type")]
    pub node_type: String,
    /// Visual shape hint for the rendering layer
    #[serde(default = "default_shape")]
    pub shape: String,
    pub position: Position,
    /// Property bag, keys depend on `node_type`
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

fn default_shape() -> String {
    "rect".to_string()
}

impl Node {
    /// Create a node with a fresh id
    pub fn new(node_type: impl Into<String>, position: Position) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            node_type: node_type.into(),
            shape: default_shape(),
            position,
            properties: BTreeMap::new(),
        }
    }

    /// Override the generated id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the shape
    pub fn with_shape(mut self, shape: impl Into<String>) -> Self {
        self.shape = shape.into();
        self
    }

    /// Set a property
    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

/// A directed connection between two nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Unique identifier
    pub id: String,
    /// Source node id
    pub source: String,
    /// Target node id
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Branch condition for conditional routing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Last execution status reported by the server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl Edge {
    /// Create an edge with a fresh id
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source: source.into(),
            target: target.into(),
            label: None,
            condition: None,
            status: None,
        }
    }

    /// Override the generated id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    /// Whether this edge starts or ends at `node_id`
    pub fn touches(&self, node_id: &str) -> bool {
        self.source == node_id || self.target == node_id
    }
}

/// A typed reference to a graph entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum EntityRef {
    Node(String),
    Edge(String),
}

impl EntityRef {
    pub fn node(id: impl Into<String>) -> Self {
        Self::Node(id.into())
    }

    pub fn edge(id: impl Into<String>) -> Self {
        Self::Edge(id.into())
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Node(id) | Self::Edge(id) => id,
        }
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Node(id) => write!(f, "node {}", id),
            Self::Edge(id) => write!(f, "edge {}", id),
        }
    }
}

// ============================================================================
// Container
// ============================================================================

/// Flat serialized form of a graph
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GraphDocument {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

/// Id-indexed nodes and edges.
///
/// Edges reference nodes by id only. Ordered maps keep snapshots and
/// equality checks deterministic. All changes go through
/// [`GraphModel::apply_all`](super::gate).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GraphModel {
    pub(super) nodes: BTreeMap<String, Node>,
    pub(super) edges: BTreeMap<String, Edge>,
}

impl GraphModel {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from a document, rejecting duplicates and dangling edges
    pub fn from_document(doc: GraphDocument) -> Result<Self, GraphError> {
        let mut graph = Self::new();
        for node in doc.nodes {
            if graph.nodes.contains_key(&node.id) {
                return Err(GraphError::DuplicateNode(node.id));
            }
            graph.nodes.insert(node.id.clone(), node);
        }
        for edge in doc.edges {
            graph.check_endpoints(&edge)?;
            if graph.edges.contains_key(&edge.id) {
                return Err(GraphError::DuplicateEdge(edge.id));
            }
            graph.edges.insert(edge.id.clone(), edge);
        }
        Ok(graph)
    }

    /// Flatten into a document (nodes and edges ordered by id)
    pub fn to_document(&self) -> GraphDocument {
        GraphDocument {
            nodes: self.nodes.values().cloned().collect(),
            edges: self.edges.values().cloned().collect(),
        }
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn edge(&self, id: &str) -> Option<&Edge> {
        self.edges.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn contains_edge(&self, id: &str) -> bool {
        self.edges.contains_key(id)
    }

    pub fn contains(&self, entity: &EntityRef) -> bool {
        match entity {
            EntityRef::Node(id) => self.contains_node(id),
            EntityRef::Edge(id) => self.contains_edge(id),
        }
    }

    /// All edges starting or ending at `node_id`, ordered by edge id
    pub fn edges_touching(&self, node_id: &str) -> Vec<Edge> {
        self.edges
            .values()
            .filter(|e| e.touches(node_id))
            .cloned()
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }

    pub(super) fn check_endpoints(&self, edge: &Edge) -> Result<(), GraphError> {
        for endpoint in [&edge.source, &edge.target] {
            if !self.nodes.contains_key(endpoint) {
                return Err(GraphError::DanglingEdge {
                    edge: edge.id.clone(),
                    node: endpoint.clone(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> GraphDocument {
        GraphDocument {
            nodes: vec![
                Node::new("trigger", Position::new(0.0, 0.0)).with_id("a"),
                Node::new("script", Position::new(100.0, 0.0)).with_id("b"),
            ],
            edges: vec![Edge::new("a", "b").with_id("e1")],
        }
    }

    #[test]
    fn test_from_document_roundtrip() {
        let graph = GraphModel::from_document(doc()).unwrap();
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.to_document(), doc());
    }

    #[test]
    fn test_from_document_rejects_dangling_edge() {
        let mut d = doc();
        d.edges.push(Edge::new("a", "missing").with_id("e2"));
        let err = GraphModel::from_document(d).unwrap_err();
        assert_eq!(
            err,
            GraphError::DanglingEdge {
                edge: "e2".into(),
                node: "missing".into()
            }
        );
    }

    #[test]
    fn test_from_document_rejects_duplicate_node() {
        let mut d = doc();
        d.nodes.push(Node::new("script", Position::default()).with_id("a"));
        assert_eq!(
            GraphModel::from_document(d).unwrap_err(),
            GraphError::DuplicateNode("a".into())
        );
    }

    #[test]
    fn test_edges_touching() {
        let graph = GraphModel::from_document(doc()).unwrap();
        assert_eq!(graph.edges_touching("a").len(), 1);
        assert_eq!(graph.edges_touching("b").len(), 1);
        assert!(graph.edges_touching("c").is_empty());
    }

    #[test]
    fn test_node_serde_uses_type_key() {
        let node = Node::new("script", Position::new(1.0, 2.0))
            .with_id("n1")
            .with_property("command", serde_json::json!("echo hi"));
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["type"], "script");
        assert_eq!(json["shape"], "rect");
        assert_eq!(json["properties"]["command"], "echo hi");

        let back: Node = serde_json::from_value(json).unwrap();
        assert_eq!(back, node);
    }

    #[test]
    fn test_edge_optional_fields_omitted() {
        let edge = Edge::new("a", "b").with_id("e1");
        let json = serde_json::to_string(&edge).unwrap();
        assert!(!json.contains("label"));
        assert!(!json.contains("condition"));
        assert!(!json.contains("status"));
    }

    #[test]
    fn test_entity_ref_serde() {
        let json = serde_json::to_value(EntityRef::node("n1")).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "node", "id": "n1"}));
        assert_eq!(EntityRef::edge("e1").to_string(), "edge e1");
    }
}
