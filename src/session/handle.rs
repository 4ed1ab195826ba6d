//! Cloneable front door to a running session

use super::editor::{Conflict, ConflictResolution, RecoveryChoice, SessionStatus};
use super::edit::Edit;
use super::runtime::SessionRequest;
use crate::error::SessionError;
use crate::events::{EventBus, SessionEvent};
use crate::graph::GraphDocument;
use crate::history::{Applied, Command};
use crate::sync::Outbound;
use tokio::sync::{broadcast, mpsc, oneshot};
use uuid::Uuid;

/// Talks to a [`SessionRuntime`](super::SessionRuntime) loop.
///
/// Every call is queued behind earlier calls, so edits from one handle apply
/// in issuance order. All methods fail with [`SessionError::Closed`] once the
/// loop has stopped.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionRequest>,
    events: EventBus,
}

impl SessionHandle {
    pub(super) fn new(tx: mpsc::Sender<SessionRequest>, events: EventBus) -> Self {
        Self { tx, events }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SessionRequest,
    ) -> Result<T, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Receive every event the session emits from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    // ========================================================================
    // Editing
    // ========================================================================

    pub async fn edit(&self, edit: Edit) -> Result<Applied, SessionError> {
        self.request(|reply| SessionRequest::Edit { edit, reply })
            .await?
    }

    pub async fn execute(&self, command: Command) -> Result<Applied, SessionError> {
        self.request(|reply| SessionRequest::Execute { command, reply })
            .await?
    }

    pub async fn undo(&self) -> Result<Applied, SessionError> {
        self.request(|reply| SessionRequest::Undo { reply }).await?
    }

    pub async fn redo(&self) -> Result<Applied, SessionError> {
        self.request(|reply| SessionRequest::Redo { reply }).await?
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Manual save; autosave is paused until it completes
    pub async fn save(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionRequest::Save { reply }).await?
    }

    pub async fn resolve_recovery(&self, choice: RecoveryChoice) -> Result<(), SessionError> {
        self.request(|reply| SessionRequest::ResolveRecovery { choice, reply })
            .await?
    }

    // ========================================================================
    // Live sync
    // ========================================================================

    pub async fn connect(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionRequest::Connect { reply }).await
    }

    pub async fn disconnect(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionRequest::Disconnect { reply })
            .await
    }

    /// Send now, or queue until the next successful connect
    pub async fn send(&self, message: Outbound) -> Result<(), SessionError> {
        self.request(|reply| SessionRequest::Send { message, reply })
            .await
    }

    pub async fn conflicts(&self) -> Result<Vec<Conflict>, SessionError> {
        self.request(|reply| SessionRequest::Conflicts { reply })
            .await
    }

    pub async fn resolve_conflict(
        &self,
        id: Uuid,
        resolution: ConflictResolution,
    ) -> Result<(), SessionError> {
        self.request(|reply| SessionRequest::ResolveConflict {
            id,
            resolution,
            reply,
        })
        .await?
    }

    // ========================================================================
    // Inspection and teardown
    // ========================================================================

    pub async fn snapshot(&self) -> Result<GraphDocument, SessionError> {
        self.request(|reply| SessionRequest::Snapshot { reply })
            .await
    }

    pub async fn status(&self) -> Result<SessionStatus, SessionError> {
        self.request(|reply| SessionRequest::Status { reply }).await
    }

    /// Flush dirty state, disconnect and stop the loop
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionRequest::Shutdown { reply })
            .await
    }
}
