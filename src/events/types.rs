//! Session event types for the rendering layer

use crate::graph::EntityRef;
use crate::session::ConflictResolution;
use crate::sync::{ConnectionState, ExecutionLog, ExecutionProgress, RemoteDelta};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Toast severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// What a notice is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeTopic {
    History,
    Autosave,
    Connection,
    Sync,
}

/// Why the graph must be redrawn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderReason {
    CommandExecuted,
    Undo,
    Redo,
    RemoteDelta,
    DraftRestored,
    ConflictResolved,
}

/// An event emitted by a session
///
/// Must be Clone for `tokio::sync::broadcast`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The graph changed; `entities` lists what was touched
    RenderInvalidated {
        reason: RenderReason,
        entities: Vec<EntityRef>,
    },
    Notice {
        level: NoticeLevel,
        topic: NoticeTopic,
        message: String,
        /// Stays visible until the user acts
        #[serde(default)]
        persistent: bool,
    },
    /// A recent draft exists; the user must restore or discard it
    RecoveryOffered {
        saved_at: DateTime<Utc>,
        nodes: usize,
        edges: usize,
    },
    /// A remote delta collides with unflushed local edits
    ConflictDetected {
        conflict_id: Uuid,
        entities: Vec<EntityRef>,
        delta: RemoteDelta,
    },
    ConflictResolved {
        conflict_id: Uuid,
        resolution: ConflictResolution,
    },
    ConnectionChanged {
        state: ConnectionState,
        attempts: u32,
    },
    DraftSaved {
        timestamp: DateTime<Utc>,
    },
    ExecutionProgress(ExecutionProgress),
    ExecutionLog(ExecutionLog),
    StatsUpdate {
        stats: serde_json::Value,
    },
}

/// Sink for session events
pub trait EventEmitter: Send + Sync + 'static {
    fn emit(&self, event: SessionEvent);

    fn emit_render(&self, reason: RenderReason, entities: Vec<EntityRef>) {
        self.emit(SessionEvent::RenderInvalidated { reason, entities });
    }

    fn emit_notice(&self, level: NoticeLevel, topic: NoticeTopic, message: String) {
        self.emit(SessionEvent::Notice {
            level,
            topic,
            message,
            persistent: false,
        });
    }

    fn emit_persistent_notice(&self, level: NoticeLevel, topic: NoticeTopic, message: String) {
        self.emit(SessionEvent::Notice {
            level,
            topic,
            message,
            persistent: true,
        });
    }
}
