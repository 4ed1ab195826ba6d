//! User edit intents, turned into commands against the current graph

use crate::error::GraphError;
use crate::graph::{Edge, GraphModel, Node, Position};
use crate::history::Command;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One user intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Edit {
    AddNode {
        node: Node,
    },
    DeleteNode {
        id: String,
    },
    MoveNode {
        id: String,
        position: Position,
    },
    /// `null` removes the key
    SetProperty {
        id: String,
        key: String,
        #[serde(default)]
        value: Value,
    },
    AddEdge {
        edge: Edge,
    },
    DeleteEdge {
        id: String,
    },
}

impl Edit {
    /// Build the command, capturing whatever the inverse needs from `graph` now
    pub fn into_command(self, graph: &GraphModel) -> Result<Command, GraphError> {
        match self {
            Self::AddNode { node } => Ok(Command::add_node(node)),
            Self::DeleteNode { id } => Command::delete_node(graph, &id),
            Self::MoveNode { id, position } => {
                let old = graph
                    .node(&id)
                    .ok_or_else(|| GraphError::NodeNotFound(id.clone()))?
                    .position;
                Ok(Command::move_node(id, old, position))
            }
            Self::SetProperty { id, key, value } => {
                let value = (!value.is_null()).then_some(value);
                Command::set_node_property(graph, &id, key, value)
            }
            Self::AddEdge { edge } => Ok(Command::add_edge(edge)),
            Self::DeleteEdge { id } => Command::delete_edge(graph, &id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Mutation;
    use crate::history::CommandKind;
    use serde_json::json;

    fn graph() -> GraphModel {
        let mut graph = GraphModel::new();
        graph
            .apply_all(&[Mutation::InsertNode(
                Node::new("script", Position::new(1.0, 2.0)).with_id("a"),
            )])
            .unwrap();
        graph
    }

    #[test]
    fn test_move_captures_old_position() {
        let cmd = Edit::MoveNode {
            id: "a".into(),
            position: Position::new(9.0, 9.0),
        }
        .into_command(&graph())
        .unwrap();
        assert_eq!(cmd.kind(), CommandKind::MoveNode);
        assert_eq!(
            cmd.inverse(),
            &[Mutation::SetPosition {
                id: "a".into(),
                position: Position::new(1.0, 2.0)
            }]
        );
    }

    #[test]
    fn test_missing_target_rejected() {
        let err = Edit::DeleteNode { id: "zzz".into() }
            .into_command(&graph())
            .unwrap_err();
        assert_eq!(err, GraphError::NodeNotFound("zzz".into()));
    }

    #[test]
    fn test_wire_format() {
        let edit: Edit = serde_json::from_value(json!({
            "op": "set_property",
            "id": "a",
            "key": "timeout",
            "value": 30
        }))
        .unwrap();
        let cmd = edit.into_command(&graph()).unwrap();
        assert_eq!(cmd.kind(), CommandKind::UpdateNodeProperty);
    }
}
