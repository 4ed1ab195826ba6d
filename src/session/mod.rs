//! Editing session
//!
//! This module provides:
//! - `Session` — composition root owning the graph, history, autosave and live channel
//! - `Edit` — user intents turned into commands
//! - `SessionRuntime` — the single-task event loop driving a session
//! - `SessionHandle` — cloneable async API to a running session

mod editor;
mod edit;
mod handle;
mod runtime;

pub use editor::{
    Conflict, ConflictResolution, RecoveryChoice, RemoteOutcome, Session, SessionOptions,
    SessionStatus, DRAFT_KEY_PREFIX,
};
pub use edit::Edit;
pub use handle::SessionHandle;
pub use runtime::{SessionRequest, SessionRuntime, DEFAULT_CONNECT_TIMEOUT};
