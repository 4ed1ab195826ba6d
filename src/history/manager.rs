//! Undo/redo stacks

use super::command::{Command, CommandKind};
use crate::error::{GraphError, HistoryError};
use crate::graph::{EntityRef, GraphModel};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Default undo depth
pub const DEFAULT_MAX_HISTORY: usize = 50;

/// What a successful execute/undo/redo touched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub kind: CommandKind,
    pub targets: Vec<EntityRef>,
}

impl Applied {
    fn of(cmd: &Command) -> Self {
        Self {
            kind: cmd.kind(),
            targets: cmd.targets().to_vec(),
        }
    }
}

/// Owns the undo and redo stacks.
///
/// The undo stack is bounded: when it overflows, the oldest entry is dropped
/// without any user-visible signal.
#[derive(Debug)]
pub struct CommandManager {
    undo_stack: VecDeque<Command>,
    redo_stack: Vec<Command>,
    max_history: usize,
}

impl CommandManager {
    pub fn new(max_history: usize) -> Self {
        Self {
            undo_stack: VecDeque::with_capacity(max_history.min(1024)),
            redo_stack: Vec::new(),
            max_history: max_history.max(1),
        }
    }

    /// Apply `cmd` and record it.
    ///
    /// If the command no longer applies (e.g. its target was removed by a
    /// remote delta), the graph is left untouched and nothing is recorded.
    pub fn execute(&mut self, graph: &mut GraphModel, cmd: Command) -> Result<Applied, GraphError> {
        graph.apply_all(cmd.forward())?;
        let applied = Applied::of(&cmd);

        self.undo_stack.push_back(cmd);
        if self.undo_stack.len() > self.max_history {
            if let Some(dropped) = self.undo_stack.pop_front() {
                debug!(kind = %dropped.kind(), "Undo history full, dropped oldest entry");
            }
        }
        self.redo_stack.clear();
        Ok(applied)
    }

    /// Apply the inverse of the most recent command and move it to the redo stack
    pub fn undo(&mut self, graph: &mut GraphModel) -> Result<Applied, HistoryError> {
        let cmd = self.undo_stack.pop_back().ok_or(HistoryError::NothingToUndo)?;
        if let Err(e) = graph.apply_all(cmd.inverse()) {
            warn!(kind = %cmd.kind(), "Undo no longer applies, dropping entry: {}", e);
            return Err(HistoryError::Stale(e));
        }
        let applied = Applied::of(&cmd);
        self.redo_stack.push(cmd);
        Ok(applied)
    }

    /// Re-apply the stored forward payload of the most recently undone command
    pub fn redo(&mut self, graph: &mut GraphModel) -> Result<Applied, HistoryError> {
        let cmd = self.redo_stack.pop().ok_or(HistoryError::NothingToRedo)?;
        if let Err(e) = graph.apply_all(cmd.forward()) {
            warn!(kind = %cmd.kind(), "Redo no longer applies, dropping entry: {}", e);
            return Err(HistoryError::Stale(e));
        }
        let applied = Applied::of(&cmd);
        self.undo_stack.push_back(cmd);
        Ok(applied)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }

    /// Kinds on the undo stack, most recent first
    pub fn undo_kinds(&self) -> Vec<CommandKind> {
        self.undo_stack.iter().rev().map(Command::kind).collect()
    }

    /// Drop both stacks (e.g. after restoring a draft, which has no command lineage)
    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }
}

impl Default for CommandManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, Mutation, Node, Position};
    use serde_json::json;

    fn node(id: &str, x: f64) -> Node {
        Node::new("script", Position::new(x, 0.0)).with_id(id)
    }

    #[test]
    fn test_execute_then_undo_restores_state() {
        let mut graph = GraphModel::new();
        let mut history = CommandManager::default();
        history
            .execute(&mut graph, Command::add_node(node("a", 0.0)))
            .unwrap();
        let before = graph.clone();

        history
            .execute(
                &mut graph,
                Command::update_node_property("a", "cmd", None, Some(json!("ls"))),
            )
            .unwrap();
        history.undo(&mut graph).unwrap();
        assert_eq!(graph, before);
    }

    #[test]
    fn test_undo_all_redo_all_matches_direct_application() {
        let mut graph = GraphModel::new();
        let mut history = CommandManager::default();

        history.execute(&mut graph, Command::add_node(node("a", 0.0))).unwrap();
        history.execute(&mut graph, Command::add_node(node("b", 10.0))).unwrap();
        history
            .execute(&mut graph, Command::add_edge(Edge::new("a", "b").with_id("e1")))
            .unwrap();
        history
            .execute(
                &mut graph,
                Command::move_node("a", Position::new(0.0, 0.0), Position::new(5.0, 5.0)),
            )
            .unwrap();
        let direct = graph.clone();

        for _ in 0..4 {
            history.undo(&mut graph).unwrap();
        }
        assert!(graph.is_empty());
        for _ in 0..4 {
            history.redo(&mut graph).unwrap();
        }
        assert_eq!(graph, direct);
    }

    #[test]
    fn test_history_bounded_and_oldest_dropped() {
        let mut graph = GraphModel::new();
        let mut history = CommandManager::default();

        for i in 0..(DEFAULT_MAX_HISTORY + 5) {
            history
                .execute(&mut graph, Command::add_node(node(&format!("n{}", i), i as f64)))
                .unwrap();
            assert!(history.undo_len() <= DEFAULT_MAX_HISTORY);
        }
        assert_eq!(history.undo_len(), DEFAULT_MAX_HISTORY);

        for _ in 0..DEFAULT_MAX_HISTORY {
            history.undo(&mut graph).unwrap();
        }
        assert_eq!(history.undo(&mut graph), Err(HistoryError::NothingToUndo));
        // The five oldest additions are no longer reachable through undo
        assert_eq!(graph.node_count(), 5);
        assert!(graph.contains_node("n0"));
        assert!(!graph.contains_node("n5"));
    }

    #[test]
    fn test_execute_clears_redo() {
        let mut graph = GraphModel::new();
        let mut history = CommandManager::default();
        history.execute(&mut graph, Command::add_node(node("a", 0.0))).unwrap();
        history.execute(&mut graph, Command::add_node(node("b", 0.0))).unwrap();
        history.undo(&mut graph).unwrap();
        history.undo(&mut graph).unwrap();
        assert_eq!(history.redo_len(), 2);

        history.execute(&mut graph, Command::add_node(node("c", 0.0))).unwrap();
        assert_eq!(history.redo_len(), 0);
        assert!(!history.can_redo());
    }

    #[test]
    fn test_stale_command_not_recorded() {
        let mut graph = GraphModel::new();
        let mut history = CommandManager::default();
        let cmd = Command::move_node("ghost", Position::default(), Position::new(1.0, 1.0));

        let err = history.execute(&mut graph, cmd).unwrap_err();
        assert_eq!(err, GraphError::NodeNotFound("ghost".into()));
        assert_eq!(history.undo_len(), 0);
    }

    #[test]
    fn test_empty_stacks_signal() {
        let mut graph = GraphModel::new();
        let mut history = CommandManager::default();
        assert_eq!(history.undo(&mut graph), Err(HistoryError::NothingToUndo));
        assert_eq!(history.redo(&mut graph), Err(HistoryError::NothingToRedo));
    }

    #[test]
    fn test_stale_undo_dropped() {
        let mut graph = GraphModel::new();
        let mut history = CommandManager::default();
        history.execute(&mut graph, Command::add_node(node("a", 0.0))).unwrap();
        history
            .execute(
                &mut graph,
                Command::move_node("a", Position::new(0.0, 0.0), Position::new(3.0, 3.0)),
            )
            .unwrap();

        // Removed behind our back
        graph
            .apply_all(&[Mutation::RemoveNode { id: "a".into() }])
            .unwrap();

        assert!(matches!(history.undo(&mut graph), Err(HistoryError::Stale(_))));
        assert_eq!(history.undo_len(), 1);
        assert_eq!(history.redo_len(), 0);
    }

    #[test]
    fn test_redo_replays_stored_payload_after_unrelated_change() {
        let mut graph = GraphModel::new();
        let mut history = CommandManager::default();
        history.execute(&mut graph, Command::add_node(node("a", 0.0))).unwrap();
        history
            .execute(
                &mut graph,
                Command::move_node("a", Position::new(0.0, 0.0), Position::new(7.0, 7.0)),
            )
            .unwrap();
        history.undo(&mut graph).unwrap();

        // Unrelated remote change
        graph
            .apply_all(&[Mutation::InsertNode(node("remote", 99.0))])
            .unwrap();

        history.redo(&mut graph).unwrap();
        assert_eq!(graph.node("a").unwrap().position, Position::new(7.0, 7.0));
        assert!(graph.contains_node("remote"));
    }
}
