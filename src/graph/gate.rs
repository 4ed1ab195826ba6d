//! The mutation gate.
//!
//! Every change to a [`GraphModel`] is expressed as a list of primitive
//! [`Mutation`]s and applied through [`GraphModel::apply_all`]. Local
//! commands, undo, redo and accepted remote deltas all go through here.
//!
//! A list is applied fully or not at all: on the first rejected primitive,
//! the ones already applied are rolled back in reverse order.

use super::models::{Edge, EntityRef, GraphModel, Node, Position};
use crate::error::GraphError;
use serde_json::Value;
use tracing::error;

/// A primitive, self-validating change to the graph
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    InsertNode(Node),
    /// Fails while any edge still references the node
    RemoveNode { id: String },
    ReplaceNode(Node),
    SetPosition { id: String, position: Position },
    /// `None` removes the key
    SetProperty {
        id: String,
        key: String,
        value: Option<Value>,
    },
    InsertEdge(Edge),
    RemoveEdge { id: String },
    ReplaceEdge(Edge),
    SetEdgeStatus { id: String, status: Option<String> },
}

impl Mutation {
    /// The entity this primitive touches
    pub fn target(&self) -> EntityRef {
        match self {
            Self::InsertNode(node) | Self::ReplaceNode(node) => EntityRef::node(&node.id),
            Self::RemoveNode { id }
            | Self::SetPosition { id, .. }
            | Self::SetProperty { id, .. } => EntityRef::node(id),
            Self::InsertEdge(edge) | Self::ReplaceEdge(edge) => EntityRef::edge(&edge.id),
            Self::RemoveEdge { id } | Self::SetEdgeStatus { id, .. } => EntityRef::edge(id),
        }
    }
}

impl GraphModel {
    /// Apply a list of mutations atomically.
    pub fn apply_all(&mut self, mutations: &[Mutation]) -> Result<(), GraphError> {
        let mut applied: Vec<Mutation> = Vec::with_capacity(mutations.len());
        for mutation in mutations {
            match self.apply_one(mutation) {
                Ok(rollback) => applied.push(rollback),
                Err(e) => {
                    for rollback in applied.iter().rev() {
                        if let Err(re) = self.apply_one(rollback) {
                            // Unreachable while apply_one returns exact inverses
                            error!(mutation = ?rollback, "Rollback failed: {}", re);
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Apply one primitive and return the primitive that undoes it.
    fn apply_one(&mut self, mutation: &Mutation) -> Result<Mutation, GraphError> {
        match mutation {
            Mutation::InsertNode(node) => {
                if self.nodes.contains_key(&node.id) {
                    return Err(GraphError::DuplicateNode(node.id.clone()));
                }
                self.nodes.insert(node.id.clone(), node.clone());
                Ok(Mutation::RemoveNode {
                    id: node.id.clone(),
                })
            }
            Mutation::RemoveNode { id } => {
                if !self.nodes.contains_key(id) {
                    return Err(GraphError::NodeNotFound(id.clone()));
                }
                let connected = self.edges.values().filter(|e| e.touches(id)).count();
                if connected > 0 {
                    return Err(GraphError::NodeHasEdges {
                        node: id.clone(),
                        edges: connected,
                    });
                }
                let old = self
                    .nodes
                    .remove(id)
                    .ok_or_else(|| GraphError::NodeNotFound(id.clone()))?;
                Ok(Mutation::InsertNode(old))
            }
            Mutation::ReplaceNode(node) => {
                let slot = self
                    .nodes
                    .get_mut(&node.id)
                    .ok_or_else(|| GraphError::NodeNotFound(node.id.clone()))?;
                let old = std::mem::replace(slot, node.clone());
                Ok(Mutation::ReplaceNode(old))
            }
            Mutation::SetPosition { id, position } => {
                let node = self
                    .nodes
                    .get_mut(id)
                    .ok_or_else(|| GraphError::NodeNotFound(id.clone()))?;
                let old = std::mem::replace(&mut node.position, *position);
                Ok(Mutation::SetPosition {
                    id: id.clone(),
                    position: old,
                })
            }
            Mutation::SetProperty { id, key, value } => {
                let node = self
                    .nodes
                    .get_mut(id)
                    .ok_or_else(|| GraphError::NodeNotFound(id.clone()))?;
                let old = match value {
                    Some(v) => node.properties.insert(key.clone(), v.clone()),
                    None => node.properties.remove(key),
                };
                Ok(Mutation::SetProperty {
                    id: id.clone(),
                    key: key.clone(),
                    value: old,
                })
            }
            Mutation::InsertEdge(edge) => {
                if self.edges.contains_key(&edge.id) {
                    return Err(GraphError::DuplicateEdge(edge.id.clone()));
                }
                self.check_endpoints(edge)?;
                self.edges.insert(edge.id.clone(), edge.clone());
                Ok(Mutation::RemoveEdge {
                    id: edge.id.clone(),
                })
            }
            Mutation::RemoveEdge { id } => {
                let old = self
                    .edges
                    .remove(id)
                    .ok_or_else(|| GraphError::EdgeNotFound(id.clone()))?;
                Ok(Mutation::InsertEdge(old))
            }
            Mutation::ReplaceEdge(edge) => {
                if !self.edges.contains_key(&edge.id) {
                    return Err(GraphError::EdgeNotFound(edge.id.clone()));
                }
                self.check_endpoints(edge)?;
                let old = self
                    .edges
                    .insert(edge.id.clone(), edge.clone())
                    .ok_or_else(|| GraphError::EdgeNotFound(edge.id.clone()))?;
                Ok(Mutation::ReplaceEdge(old))
            }
            Mutation::SetEdgeStatus { id, status } => {
                let edge = self
                    .edges
                    .get_mut(id)
                    .ok_or_else(|| GraphError::EdgeNotFound(id.clone()))?;
                let old = std::mem::replace(&mut edge.status, status.clone());
                Ok(Mutation::SetEdgeStatus {
                    id: id.clone(),
                    status: old,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn two_nodes() -> GraphModel {
        let mut graph = GraphModel::new();
        graph
            .apply_all(&[
                Mutation::InsertNode(Node::new("trigger", Position::new(0.0, 0.0)).with_id("a")),
                Mutation::InsertNode(Node::new("script", Position::new(50.0, 0.0)).with_id("b")),
            ])
            .unwrap();
        graph
    }

    #[test]
    fn test_apply_all_is_atomic() {
        let mut graph = two_nodes();
        let before = graph.clone();

        let err = graph
            .apply_all(&[
                Mutation::SetPosition {
                    id: "a".into(),
                    position: Position::new(9.0, 9.0),
                },
                Mutation::InsertEdge(Edge::new("a", "b").with_id("e1")),
                Mutation::SetProperty {
                    id: "missing".into(),
                    key: "k".into(),
                    value: Some(json!(1)),
                },
            ])
            .unwrap_err();

        assert_eq!(err, GraphError::NodeNotFound("missing".into()));
        assert_eq!(graph, before, "partial mutations must be rolled back");
    }

    #[test]
    fn test_remove_node_with_edges_rejected() {
        let mut graph = two_nodes();
        graph
            .apply_all(&[Mutation::InsertEdge(Edge::new("a", "b").with_id("e1"))])
            .unwrap();

        let err = graph
            .apply_all(&[Mutation::RemoveNode { id: "a".into() }])
            .unwrap_err();
        assert_eq!(
            err,
            GraphError::NodeHasEdges {
                node: "a".into(),
                edges: 1
            }
        );
        assert!(graph.contains_node("a"));
    }

    #[test]
    fn test_insert_edge_requires_endpoints() {
        let mut graph = two_nodes();
        let err = graph
            .apply_all(&[Mutation::InsertEdge(Edge::new("a", "zzz").with_id("e1"))])
            .unwrap_err();
        assert!(matches!(err, GraphError::DanglingEdge { .. }));
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_set_property_none_removes_key() {
        let mut graph = two_nodes();
        graph
            .apply_all(&[Mutation::SetProperty {
                id: "b".into(),
                key: "timeout".into(),
                value: Some(json!(30)),
            }])
            .unwrap();
        assert_eq!(graph.node("b").unwrap().property("timeout"), Some(&json!(30)));

        graph
            .apply_all(&[Mutation::SetProperty {
                id: "b".into(),
                key: "timeout".into(),
                value: None,
            }])
            .unwrap();
        assert!(graph.node("b").unwrap().property("timeout").is_none());
    }

    #[test]
    fn test_rollback_restores_replaced_node() {
        let mut graph = two_nodes();
        let before = graph.clone();
        let replacement = Node::new("script", Position::new(1.0, 1.0))
            .with_id("a")
            .with_shape("diamond");

        let result = graph.apply_all(&[
            Mutation::ReplaceNode(replacement),
            Mutation::RemoveEdge { id: "nope".into() },
        ]);
        assert!(result.is_err());
        assert_eq!(graph, before);
    }

    #[test]
    fn test_edge_status_set_and_cleared() {
        let mut graph = two_nodes();
        graph
            .apply_all(&[
                Mutation::InsertEdge(Edge::new("a", "b").with_id("e1")),
                Mutation::SetEdgeStatus {
                    id: "e1".into(),
                    status: Some("active".into()),
                },
            ])
            .unwrap();
        assert_eq!(graph.edge("e1").unwrap().status.as_deref(), Some("active"));
    }

    #[test]
    fn test_mutation_target() {
        assert_eq!(
            Mutation::RemoveEdge { id: "e".into() }.target(),
            EntityRef::edge("e")
        );
        assert_eq!(
            Mutation::SetPosition {
                id: "n".into(),
                position: Position::default()
            }
            .target(),
            EntityRef::node("n")
        );
    }
}
