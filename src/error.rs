//! Error taxonomy for the editing session
//!
//! - `GraphError` — a mutation targets a stale or missing entity (validation)
//! - `HistoryError` — undo/redo could not run
//! - `SessionError` — what `Session` and `SessionHandle` callers see
//!
//! Connection failures never surface here: they only drive the live-sync
//! state machine. Conflicts surface as prompts, not errors.

use thiserror::Error;
use uuid::Uuid;

/// A primitive graph mutation was rejected by the mutation gate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("node {0} not found")]
    NodeNotFound(String),
    #[error("edge {0} not found")]
    EdgeNotFound(String),
    #[error("node {0} already exists")]
    DuplicateNode(String),
    #[error("edge {0} already exists")]
    DuplicateEdge(String),
    #[error("edge {edge} references missing node {node}")]
    DanglingEdge { edge: String, node: String },
    #[error("node {node} still has {edges} connected edge(s)")]
    NodeHasEdges { node: String, edges: usize },
}

/// Undo/redo failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    #[error("nothing to undo")]
    NothingToUndo,
    #[error("nothing to redo")]
    NothingToRedo,
    /// The command no longer applies; it has been dropped from history.
    #[error("command no longer applies: {0}")]
    Stale(#[from] GraphError),
}

/// Errors returned by session operations
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("command rejected: {0}")]
    Validation(#[from] GraphError),
    #[error(transparent)]
    History(#[from] HistoryError),
    #[error("draft storage failed: {0:#}")]
    Storage(anyhow::Error),
    #[error("manual save failed: {0:#}")]
    ManualSave(anyhow::Error),
    #[error("a manual save is already in progress")]
    ManualSaveInProgress,
    #[error("no manual save endpoint configured")]
    NoSaveEndpoint,
    #[error("no draft is waiting for a recovery decision")]
    NoPendingRecovery,
    #[error("unknown conflict {0}")]
    UnknownConflict(Uuid),
    #[error("session runtime has stopped")]
    Closed,
}
