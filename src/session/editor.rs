//! The editing session: one graph, its history, its draft and its live channel.
//!
//! `Session` owns the graph exclusively. Local edits go through
//! [`CommandManager`] and remote deltas through [`Session::apply_remote`];
//! both end in the same mutation gate, `GraphModel::apply_all`.
//!
//! ## Conflict tracking
//!
//! Every entity touched by a local command (or undo/redo) is remembered with
//! the local revision that touched it. A successful draft flush forgets all of
//! them; a successful manual save forgets the ones touched before the save
//! started. A remote delta touching a remembered entity is not applied: it is
//! queued as a [`Conflict`] until the user picks a [`ConflictResolution`].

use super::edit::Edit;
use crate::autosave::{
    AutoSaveManager, AutoSaveSettings, AutoSaveState, DraftSnapshot, DraftStore, FlushOutcome,
    RecoveryCheck, SaveEndpoint,
};
use crate::error::{HistoryError, SessionError};
use crate::events::{EventEmitter, NoticeLevel, NoticeTopic, RenderReason, SessionEvent};
use crate::graph::{EntityRef, GraphDocument, GraphModel};
use crate::history::{Applied, Command, CommandManager, DEFAULT_MAX_HISTORY};
use crate::sync::{
    ChannelAction, ConnectionState, Inbound, LiveSyncChannel, Outbound, RemoteDelta, SyncSettings,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Prefix of the per-session draft key
pub const DRAFT_KEY_PREFIX: &str = "pipeline-draft:";

/// Per-session tuning
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub max_history: usize,
    pub autosave: AutoSaveSettings,
    pub sync: SyncSettings,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            max_history: DEFAULT_MAX_HISTORY,
            autosave: AutoSaveSettings::default(),
            sync: SyncSettings::default(),
        }
    }
}

/// How the user settled a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Discard the local edits on the entities and apply the remote delta
    ApplyRemote,
    /// Ignore this remote delta
    KeepLocal,
}

/// What to do with an offered draft
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryChoice {
    Restore,
    Discard,
}

/// A remote delta waiting for a user decision
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conflict {
    pub id: Uuid,
    /// Entities with pending local edits the delta would overwrite
    pub entities: Vec<EntityRef>,
    pub delta: RemoteDelta,
    pub received_at: DateTime<Utc>,
}

/// Result of feeding one remote delta to the session
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteOutcome {
    Applied,
    Conflict(Uuid),
    /// The delta does not apply to the current graph
    Rejected,
}

/// Read-only summary for status displays
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub connection: ConnectionState,
    pub reconnect_attempts: u32,
    pub queued_outbound: usize,
    pub autosave: AutoSaveState,
    pub dirty: bool,
    pub last_save_time: Option<DateTime<Utc>>,
    pub undo_depth: usize,
    pub redo_depth: usize,
    pub pending_conflicts: usize,
    pub recovery_pending: bool,
    pub nodes: usize,
    pub edges: usize,
}

pub struct Session {
    id: String,
    graph: GraphModel,
    history: CommandManager,
    autosave: AutoSaveManager,
    channel: LiveSyncChannel,
    events: Arc<dyn EventEmitter>,
    /// Entity -> local revision of its latest local change
    pending_local: BTreeMap<EntityRef, u64>,
    local_revision: u64,
    save_mark: Option<u64>,
    conflicts: VecDeque<Conflict>,
    pending_recovery: Option<DraftSnapshot>,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        graph: GraphModel,
        store: Arc<dyn DraftStore>,
        events: Arc<dyn EventEmitter>,
        options: SessionOptions,
    ) -> Self {
        let id = id.into();
        let autosave = AutoSaveManager::new(
            store,
            format!("{}{}", DRAFT_KEY_PREFIX, id),
            options.autosave,
            Utc::now(),
        );
        info!(
            session_id = %id,
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "Session created"
        );
        Self {
            id,
            graph,
            history: CommandManager::new(options.max_history),
            autosave,
            channel: LiveSyncChannel::new(options.sync),
            events,
            pending_local: BTreeMap::new(),
            local_revision: 0,
            save_mark: None,
            conflicts: VecDeque::new(),
            pending_recovery: None,
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn graph(&self) -> &GraphModel {
        &self.graph
    }

    pub fn history(&self) -> &CommandManager {
        &self.history
    }

    pub fn autosave(&self) -> &AutoSaveManager {
        &self.autosave
    }

    pub fn channel(&self) -> &LiveSyncChannel {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut LiveSyncChannel {
        &mut self.channel
    }

    pub fn conflicts(&self) -> impl Iterator<Item = &Conflict> {
        self.conflicts.iter()
    }

    pub fn pending_recovery(&self) -> Option<&DraftSnapshot> {
        self.pending_recovery.as_ref()
    }

    /// Whether `entity` has local edits not yet flushed or saved
    pub fn has_pending_edit(&self, entity: &EntityRef) -> bool {
        self.pending_local.contains_key(entity)
    }

    pub fn snapshot(&self) -> GraphDocument {
        self.graph.to_document()
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            session_id: self.id.clone(),
            connection: self.channel.state(),
            reconnect_attempts: self.channel.attempts(),
            queued_outbound: self.channel.queued_len(),
            autosave: self.autosave.state(),
            dirty: self.autosave.is_dirty(),
            last_save_time: self.autosave.last_save_time(),
            undo_depth: self.history.undo_len(),
            redo_depth: self.history.redo_len(),
            pending_conflicts: self.conflicts.len(),
            recovery_pending: self.pending_recovery.is_some(),
            nodes: self.graph.node_count(),
            edges: self.graph.edge_count(),
        }
    }

    // ========================================================================
    // Local edits
    // ========================================================================

    /// Execute a prepared command
    pub fn execute(&mut self, cmd: Command) -> Result<Applied, SessionError> {
        match self.history.execute(&mut self.graph, cmd) {
            Ok(applied) => {
                self.after_local_change(RenderReason::CommandExecuted, &applied);
                Ok(applied)
            }
            Err(e) => {
                self.events.emit_notice(
                    NoticeLevel::Warning,
                    NoticeTopic::History,
                    format!("Edit not applied: {}", e),
                );
                Err(e.into())
            }
        }
    }

    /// Build a command for `edit` against the current graph and execute it
    pub fn edit(&mut self, edit: Edit) -> Result<Applied, SessionError> {
        match edit.into_command(&self.graph) {
            Ok(cmd) => self.execute(cmd),
            Err(e) => {
                self.events.emit_notice(
                    NoticeLevel::Warning,
                    NoticeTopic::History,
                    format!("Edit not applied: {}", e),
                );
                Err(e.into())
            }
        }
    }

    pub fn undo(&mut self) -> Result<Applied, SessionError> {
        let result = self.history.undo(&mut self.graph);
        self.after_history_step(result, RenderReason::Undo)
    }

    pub fn redo(&mut self) -> Result<Applied, SessionError> {
        let result = self.history.redo(&mut self.graph);
        self.after_history_step(result, RenderReason::Redo)
    }

    fn after_history_step(
        &mut self,
        result: Result<Applied, HistoryError>,
        reason: RenderReason,
    ) -> Result<Applied, SessionError> {
        match result {
            Ok(applied) => {
                self.after_local_change(reason, &applied);
                Ok(applied)
            }
            Err(e) => {
                let level = match e {
                    HistoryError::Stale(_) => NoticeLevel::Warning,
                    HistoryError::NothingToUndo | HistoryError::NothingToRedo => NoticeLevel::Info,
                };
                let message = match &e {
                    HistoryError::NothingToUndo => "Nothing to undo".to_string(),
                    HistoryError::NothingToRedo => "Nothing to redo".to_string(),
                    HistoryError::Stale(inner) => {
                        format!("History entry dropped, it no longer applies: {}", inner)
                    }
                };
                self.events
                    .emit_notice(level, NoticeTopic::History, message);
                Err(e.into())
            }
        }
    }

    fn after_local_change(&mut self, reason: RenderReason, applied: &Applied) {
        self.local_revision += 1;
        for target in &applied.targets {
            self.pending_local.insert(target.clone(), self.local_revision);
        }
        self.autosave.mark_dirty();
        self.events.emit_render(reason, applied.targets.clone());
    }

    // ========================================================================
    // Remote deltas
    // ========================================================================

    /// Decode and handle one inbound text frame
    pub fn handle_frame(&mut self, text: &str, now: DateTime<Utc>) {
        if let Some(inbound) = self.channel.on_frame(text) {
            self.handle_inbound(inbound, now);
        }
    }

    pub fn handle_inbound(&mut self, inbound: Inbound, now: DateTime<Utc>) {
        match inbound {
            Inbound::Delta(delta) => {
                self.apply_remote(delta, now);
            }
            Inbound::ExecutionProgress(progress) => {
                self.events.emit(SessionEvent::ExecutionProgress(progress))
            }
            Inbound::ExecutionLog(log) => self.events.emit(SessionEvent::ExecutionLog(log)),
            Inbound::StatsUpdate(stats) => self.events.emit(SessionEvent::StatsUpdate { stats }),
            Inbound::HeartbeatAck => {}
        }
    }

    /// Apply a remote delta, or queue it as a conflict when it touches
    /// entities with pending local edits (or entities already in conflict).
    /// Accepted deltas are never recorded in history.
    pub fn apply_remote(&mut self, delta: RemoteDelta, now: DateTime<Utc>) -> RemoteOutcome {
        let touched = delta.touched(&self.graph);
        let mut colliding: Vec<EntityRef> = touched
            .iter()
            .filter(|entity| {
                self.pending_local.contains_key(entity)
                    || self.conflicts.iter().any(|c| c.entities.contains(entity))
            })
            .cloned()
            .collect();

        if !colliding.is_empty() {
            colliding.sort();
            colliding.dedup();
            let conflict = Conflict {
                id: Uuid::new_v4(),
                entities: colliding,
                delta,
                received_at: now,
            };
            info!(
                session_id = %self.id,
                conflict_id = %conflict.id,
                entities = ?conflict.entities,
                "Remote delta conflicts with local edits"
            );
            let id = conflict.id;
            self.events.emit(SessionEvent::ConflictDetected {
                conflict_id: id,
                entities: conflict.entities.clone(),
                delta: conflict.delta.clone(),
            });
            self.conflicts.push_back(conflict);
            return RemoteOutcome::Conflict(id);
        }

        let mutations = delta.to_mutations(&self.graph);
        match self.graph.apply_all(&mutations) {
            Ok(()) => {
                self.autosave.mark_dirty();
                self.events.emit_render(RenderReason::RemoteDelta, touched);
                RemoteOutcome::Applied
            }
            Err(e) => {
                warn!(session_id = %self.id, ?delta, "Ignoring remote delta: {}", e);
                RemoteOutcome::Rejected
            }
        }
    }

    /// Settle one queued conflict
    pub fn resolve_conflict(
        &mut self,
        conflict_id: Uuid,
        resolution: ConflictResolution,
    ) -> Result<(), SessionError> {
        let index = self
            .conflicts
            .iter()
            .position(|c| c.id == conflict_id)
            .ok_or(SessionError::UnknownConflict(conflict_id))?;
        let Some(conflict) = self.conflicts.remove(index) else {
            return Err(SessionError::UnknownConflict(conflict_id));
        };

        if resolution == ConflictResolution::ApplyRemote {
            let mutations = conflict.delta.to_mutations(&self.graph);
            if let Err(e) = self.graph.apply_all(&mutations) {
                self.events.emit_notice(
                    NoticeLevel::Warning,
                    NoticeTopic::Sync,
                    format!("Remote change no longer applies: {}", e),
                );
                return Err(e.into());
            }
            for entity in conflict.delta.touched(&self.graph) {
                self.pending_local.remove(&entity);
            }
            for entity in &conflict.entities {
                self.pending_local.remove(entity);
            }
            self.autosave.mark_dirty();
            self.events
                .emit_render(RenderReason::ConflictResolved, conflict.entities.clone());
        }

        debug!(
            session_id = %self.id,
            conflict_id = %conflict_id,
            ?resolution,
            "Conflict resolved"
        );
        self.events.emit(SessionEvent::ConflictResolved {
            conflict_id,
            resolution,
        });
        Ok(())
    }

    // ========================================================================
    // Autosave, manual save, recovery
    // ========================================================================

    /// Autosave timer callback. Nothing is written while a recovery offer is
    /// open, so the offered draft stays intact until the user answers.
    pub async fn autosave_tick(&mut self, now: DateTime<Utc>) -> FlushOutcome {
        if self.pending_recovery.is_some() {
            debug!(session_id = %self.id, "Autosave held until the recovery prompt is answered");
            return FlushOutcome::Paused;
        }
        let outcome = self.autosave.tick(&self.graph, now).await;
        self.after_flush(&outcome);
        outcome
    }

    fn after_flush(&mut self, outcome: &FlushOutcome) {
        match outcome {
            FlushOutcome::Saved { timestamp } => {
                self.pending_local.clear();
                self.events.emit(SessionEvent::DraftSaved {
                    timestamp: *timestamp,
                });
            }
            FlushOutcome::Failed { notify: true } => {
                self.events.emit_notice(
                    NoticeLevel::Info,
                    NoticeTopic::Autosave,
                    "Changes have not been saved locally for several minutes".to_string(),
                );
            }
            _ => {}
        }
    }

    /// Pause autosave and hand out the graph to persist
    pub fn begin_manual_save(&mut self) -> Result<GraphModel, SessionError> {
        self.autosave.begin_manual_save()?;
        self.save_mark = Some(self.local_revision);
        Ok(self.graph.clone())
    }

    /// Resume autosave with the outcome of the save started by `begin_manual_save`
    pub async fn finish_manual_save(
        &mut self,
        result: anyhow::Result<()>,
        now: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        self.autosave.finish_manual_save(result.is_ok(), now).await;
        let mark = self.save_mark.take().unwrap_or(self.local_revision);
        match result {
            Ok(()) => {
                self.pending_local.retain(|_, revision| *revision > mark);
                self.events.emit_notice(
                    NoticeLevel::Info,
                    NoticeTopic::Autosave,
                    "Pipeline saved".to_string(),
                );
                Ok(())
            }
            Err(e) => {
                warn!(session_id = %self.id, "Manual save failed: {:#}", e);
                self.events.emit_notice(
                    NoticeLevel::Warning,
                    NoticeTopic::Autosave,
                    format!("Save failed: {:#}", e),
                );
                Err(SessionError::ManualSave(e))
            }
        }
    }

    /// Manual save in one step
    pub async fn save_to_server(
        &mut self,
        endpoint: &dyn SaveEndpoint,
        now: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        let graph = self.begin_manual_save()?;
        let result = endpoint.save(&self.id, &graph).await;
        self.finish_manual_save(result, now).await
    }

    /// Start-of-session draft check; a recent draft becomes a recovery prompt
    pub async fn check_recovery(&mut self, now: DateTime<Utc>) -> Result<RecoveryCheck, SessionError> {
        let check = self
            .autosave
            .check_recovery(now)
            .await
            .map_err(SessionError::Storage)?;
        if let RecoveryCheck::Offer(draft) = &check {
            info!(session_id = %self.id, saved_at = %draft.timestamp, "Offering draft recovery");
            self.events.emit(SessionEvent::RecoveryOffered {
                saved_at: draft.timestamp,
                nodes: draft.nodes.len(),
                edges: draft.edges.len(),
            });
            self.pending_recovery = Some(draft.clone());
        }
        Ok(check)
    }

    /// Restore replaces the graph and clears history; discard deletes the draft
    pub async fn resolve_recovery(&mut self, choice: RecoveryChoice) -> Result<(), SessionError> {
        let draft = self
            .pending_recovery
            .take()
            .ok_or(SessionError::NoPendingRecovery)?;

        match choice {
            RecoveryChoice::Restore => {
                let graph = match draft.to_graph() {
                    Ok(graph) => graph,
                    Err(e) => {
                        warn!(session_id = %self.id, "Stored draft is inconsistent, discarding: {}", e);
                        self.autosave
                            .discard_draft()
                            .await
                            .map_err(SessionError::Storage)?;
                        return Err(e.into());
                    }
                };
                self.graph = graph;
                self.history.clear();
                self.pending_local.clear();
                self.conflicts.clear();
                self.autosave.note_restored(&draft).await;
                info!(session_id = %self.id, saved_at = %draft.timestamp, "Draft restored");

                let mut entities: Vec<EntityRef> =
                    self.graph.nodes().map(|n| EntityRef::node(&n.id)).collect();
                entities.extend(self.graph.edges().map(|e| EntityRef::edge(&e.id)));
                self.events.emit_render(RenderReason::DraftRestored, entities);
            }
            RecoveryChoice::Discard => {
                self.autosave
                    .discard_draft()
                    .await
                    .map_err(SessionError::Storage)?;
                info!(session_id = %self.id, "Draft discarded");
            }
        }
        Ok(())
    }

    // ========================================================================
    // Live channel
    // ========================================================================

    /// Run a channel input and report any state change
    fn with_channel<F>(&mut self, f: F) -> Vec<ChannelAction>
    where
        F: FnOnce(&mut LiveSyncChannel) -> Vec<ChannelAction>,
    {
        let before = (self.channel.state(), self.channel.attempts());
        let actions = f(&mut self.channel);
        let state = self.channel.state();
        let attempts = self.channel.attempts();

        if (state, attempts) != before {
            self.events
                .emit(SessionEvent::ConnectionChanged { state, attempts });
            if state == ConnectionState::Error && before.0 != ConnectionState::Error {
                self.events.emit_persistent_notice(
                    NoticeLevel::Error,
                    NoticeTopic::Connection,
                    format!(
                        "Live updates stopped after {} reconnect attempts. Reconnect to resume.",
                        attempts
                    ),
                );
            }
        }
        actions
    }

    pub fn connect(&mut self) -> Vec<ChannelAction> {
        self.with_channel(|ch| ch.connect())
    }

    pub fn disconnect(&mut self) -> Vec<ChannelAction> {
        self.with_channel(|ch| ch.disconnect())
    }

    pub fn send(&mut self, message: &Outbound, now: DateTime<Utc>) -> Vec<ChannelAction> {
        self.with_channel(|ch| ch.send(message, now))
    }

    pub fn on_link_opened(&mut self, now: DateTime<Utc>) -> Vec<ChannelAction> {
        self.with_channel(|ch| ch.on_opened(now))
    }

    pub fn on_link_lost(&mut self, reason: &str) -> Vec<ChannelAction> {
        self.with_channel(|ch| ch.on_lost(reason))
    }

    pub fn on_retry_due(&mut self) -> Vec<ChannelAction> {
        self.with_channel(|ch| ch.on_retry_due())
    }

    pub fn on_heartbeat_tick(&mut self, now: DateTime<Utc>, at: Instant) -> Vec<ChannelAction> {
        self.with_channel(|ch| ch.on_heartbeat_tick(now, at))
    }

    pub fn on_heartbeat_deadline(&mut self, at: Instant) -> Vec<ChannelAction> {
        self.with_channel(|ch| ch.on_heartbeat_deadline(at))
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Best-effort draft flush, then disconnect. An unanswered recovery offer
    /// keeps its draft; the flush is skipped.
    pub async fn shutdown(&mut self, now: DateTime<Utc>) -> Vec<ChannelAction> {
        self.save_mark = None;
        let outcome = if self.pending_recovery.is_some() {
            FlushOutcome::Paused
        } else {
            self.autosave.flush_on_teardown(&self.graph, now).await
        };
        self.after_flush(&outcome);
        info!(session_id = %self.id, ?outcome, "Session shutting down");
        self.disconnect()
    }
}
