//! Reversible graph commands
//!
//! A `Command` captures both its forward and inverse mutation lists when it is
//! built. Nothing is recomputed at undo or redo time, so `undo(); redo()`
//! replays exactly the original forward effect.

use crate::error::GraphError;
use crate::graph::{Edge, EntityRef, GraphModel, Mutation, Node, Position};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Command variant tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    AddNode,
    DeleteNode,
    MoveNode,
    UpdateNodeProperty,
    AddEdge,
    DeleteEdge,
    /// Several commands recorded as one history entry
    Batch,
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AddNode => "add node",
            Self::DeleteNode => "delete node",
            Self::MoveNode => "move node",
            Self::UpdateNodeProperty => "update node property",
            Self::AddEdge => "add edge",
            Self::DeleteEdge => "delete edge",
            Self::Batch => "batch",
        };
        f.write_str(s)
    }
}

/// An immutable, reversible graph mutation
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    kind: CommandKind,
    forward: Vec<Mutation>,
    inverse: Vec<Mutation>,
    targets: Vec<EntityRef>,
}

impl Command {
    fn new(kind: CommandKind, forward: Vec<Mutation>, inverse: Vec<Mutation>) -> Self {
        let mut targets: Vec<EntityRef> = forward.iter().map(Mutation::target).collect();
        targets.sort();
        targets.dedup();
        Self {
            kind,
            forward,
            inverse,
            targets,
        }
    }

    // ========================================================================
    // Node commands
    // ========================================================================

    /// Insert `node`; undo removes it by id
    pub fn add_node(node: Node) -> Self {
        let id = node.id.clone();
        Self::new(
            CommandKind::AddNode,
            vec![Mutation::InsertNode(node)],
            vec![Mutation::RemoveNode { id }],
        )
    }

    /// Delete a node together with every edge touching it *now*.
    ///
    /// The edge set is captured here, at construction; execution removes
    /// exactly these edges and undo restores exactly these edges.
    pub fn delete_node(graph: &GraphModel, node_id: &str) -> Result<Self, GraphError> {
        let node = graph
            .node(node_id)
            .cloned()
            .ok_or_else(|| GraphError::NodeNotFound(node_id.to_string()))?;
        let related_edges = graph.edges_touching(node_id);
        Ok(Self::delete_node_with(node, related_edges))
    }

    /// Delete a node with an explicitly captured edge set
    pub fn delete_node_with(node: Node, related_edges: Vec<Edge>) -> Self {
        let mut forward: Vec<Mutation> = related_edges
            .iter()
            .map(|e| Mutation::RemoveEdge { id: e.id.clone() })
            .collect();
        forward.push(Mutation::RemoveNode {
            id: node.id.clone(),
        });

        let mut inverse = vec![Mutation::InsertNode(node)];
        inverse.extend(related_edges.into_iter().map(Mutation::InsertEdge));

        Self::new(CommandKind::DeleteNode, forward, inverse)
    }

    /// Position-only change
    pub fn move_node(node_id: impl Into<String>, old: Position, new: Position) -> Self {
        let id = node_id.into();
        Self::new(
            CommandKind::MoveNode,
            vec![Mutation::SetPosition {
                id: id.clone(),
                position: new,
            }],
            vec![Mutation::SetPosition { id, position: old }],
        )
    }

    /// Single key/value change; `None` means the key is absent
    pub fn update_node_property(
        node_id: impl Into<String>,
        key: impl Into<String>,
        old: Option<Value>,
        new: Option<Value>,
    ) -> Self {
        let id = node_id.into();
        let key = key.into();
        Self::new(
            CommandKind::UpdateNodeProperty,
            vec![Mutation::SetProperty {
                id: id.clone(),
                key: key.clone(),
                value: new,
            }],
            vec![Mutation::SetProperty {
                id,
                key,
                value: old,
            }],
        )
    }

    /// Property change with the old value read from the current graph
    pub fn set_node_property(
        graph: &GraphModel,
        node_id: &str,
        key: impl Into<String>,
        new: Option<Value>,
    ) -> Result<Self, GraphError> {
        let key = key.into();
        let node = graph
            .node(node_id)
            .ok_or_else(|| GraphError::NodeNotFound(node_id.to_string()))?;
        let old = node.property(&key).cloned();
        Ok(Self::update_node_property(node_id, key, old, new))
    }

    // ========================================================================
    // Edge commands
    // ========================================================================

    pub fn add_edge(edge: Edge) -> Self {
        let id = edge.id.clone();
        Self::new(
            CommandKind::AddEdge,
            vec![Mutation::InsertEdge(edge)],
            vec![Mutation::RemoveEdge { id }],
        )
    }

    pub fn delete_edge(graph: &GraphModel, edge_id: &str) -> Result<Self, GraphError> {
        let edge = graph
            .edge(edge_id)
            .cloned()
            .ok_or_else(|| GraphError::EdgeNotFound(edge_id.to_string()))?;
        Ok(Self::delete_edge_with(edge))
    }

    pub fn delete_edge_with(edge: Edge) -> Self {
        let id = edge.id.clone();
        Self::new(
            CommandKind::DeleteEdge,
            vec![Mutation::RemoveEdge { id }],
            vec![Mutation::InsertEdge(edge)],
        )
    }

    // ========================================================================
    // Composition
    // ========================================================================

    /// Several commands as a single history entry.
    ///
    /// Forward runs the parts in order; inverse runs their inverses in reverse order.
    pub fn batch(commands: Vec<Command>) -> Self {
        let forward = commands
            .iter()
            .flat_map(|c| c.forward.iter().cloned())
            .collect();
        let inverse = commands
            .iter()
            .rev()
            .flat_map(|c| c.inverse.iter().cloned())
            .collect();
        Self::new(CommandKind::Batch, forward, inverse)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn forward(&self) -> &[Mutation] {
        &self.forward
    }

    pub fn inverse(&self) -> &[Mutation] {
        &self.inverse
    }

    /// Entities touched by this command, sorted and deduplicated
    pub fn targets(&self) -> &[EntityRef] {
        &self.targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn graph_ab() -> GraphModel {
        let mut graph = GraphModel::new();
        graph
            .apply_all(&[
                Mutation::InsertNode(Node::new("trigger", Position::new(0.0, 0.0)).with_id("a")),
                Mutation::InsertNode(Node::new("script", Position::new(80.0, 0.0)).with_id("b")),
                Mutation::InsertEdge(Edge::new("a", "b").with_id("e1")),
            ])
            .unwrap();
        graph
    }

    fn roundtrip(graph: &mut GraphModel, cmd: &Command) {
        let before = graph.clone();
        graph.apply_all(cmd.forward()).unwrap();
        assert_ne!(*graph, before, "{} should change the graph", cmd.kind());
        graph.apply_all(cmd.inverse()).unwrap();
        assert_eq!(*graph, before, "{} inverse should restore the graph", cmd.kind());
    }

    #[test]
    fn test_every_variant_inverse_restores_graph() {
        let mut graph = graph_ab();
        let commands = vec![
            Command::add_node(Node::new("script", Position::new(5.0, 5.0)).with_id("c")),
            Command::delete_node(&graph, "a").unwrap(),
            Command::move_node("b", Position::new(80.0, 0.0), Position::new(90.0, 10.0)),
            Command::update_node_property("b", "command", None, Some(json!("make"))),
            Command::add_edge(Edge::new("b", "a").with_id("e2")),
            Command::delete_edge(&graph, "e1").unwrap(),
        ];
        for cmd in &commands {
            roundtrip(&mut graph, cmd);
        }
    }

    #[test]
    fn test_delete_node_captures_edges_at_construction() {
        let graph = graph_ab();
        let cmd = Command::delete_node(&graph, "a").unwrap();

        assert_eq!(
            cmd.forward(),
            &[
                Mutation::RemoveEdge { id: "e1".into() },
                Mutation::RemoveNode { id: "a".into() },
            ]
        );
        assert_eq!(cmd.targets(), &[EntityRef::node("a"), EntityRef::edge("e1")]);
    }

    #[test]
    fn test_delete_node_fails_if_edge_set_changed() {
        let mut graph = graph_ab();
        let cmd = Command::delete_node(&graph, "a").unwrap();

        // Another edge appears after construction
        graph
            .apply_all(&[Mutation::InsertEdge(Edge::new("b", "a").with_id("e9"))])
            .unwrap();
        let before = graph.clone();

        assert!(graph.apply_all(cmd.forward()).is_err());
        assert_eq!(graph, before);
    }

    #[test]
    fn test_delete_missing_node_is_rejected() {
        let graph = graph_ab();
        assert_eq!(
            Command::delete_node(&graph, "zz").unwrap_err(),
            GraphError::NodeNotFound("zz".into())
        );
    }

    #[test]
    fn test_set_node_property_reads_old_value() {
        let mut graph = graph_ab();
        graph
            .apply_all(&[Mutation::SetProperty {
                id: "b".into(),
                key: "retries".into(),
                value: Some(json!(1)),
            }])
            .unwrap();

        let cmd = Command::set_node_property(&graph, "b", "retries", Some(json!(3))).unwrap();
        assert_eq!(
            cmd.inverse(),
            &[Mutation::SetProperty {
                id: "b".into(),
                key: "retries".into(),
                value: Some(json!(1)),
            }]
        );
    }

    #[test]
    fn test_batch_inverse_runs_in_reverse() {
        let mut graph = graph_ab();
        let node = Node::new("script", Position::new(0.0, 100.0)).with_id("c");
        let cmd = Command::batch(vec![
            Command::add_node(node),
            Command::add_edge(Edge::new("b", "c").with_id("e2")),
        ]);
        assert_eq!(cmd.kind(), CommandKind::Batch);
        roundtrip(&mut graph, &cmd);
    }
}
