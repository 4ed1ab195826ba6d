//! Periodic draft flushing, manual-save exclusion and draft recovery.
//!
//! ## Lifecycle
//!
//! ```text
//! idle ──mark_dirty──► dirty ──tick──► saving ──ok──► idle
//!                        ▲                 │
//!                        └──────err────────┘   (retried on the next tick)
//! ```
//!
//! While a manual save is running the manager is *paused*: ticks do nothing,
//! so an autosave write can never interleave with the manual save.

use super::draft::{DraftSnapshot, SCHEMA_VERSION};
use super::store::DraftStore;
use crate::error::SessionError;
use crate::graph::GraphModel;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Autosave tuning
#[derive(Debug, Clone)]
pub struct AutoSaveSettings {
    /// Timer period
    pub interval: Duration,
    /// Drafts at least this old are discarded without a prompt
    pub draft_ttl: ChronoDuration,
    /// Failing flushes raise a notice only once no save has succeeded for this long
    pub stale_notice_after: ChronoDuration,
    pub schema_version: u32,
}

impl Default for AutoSaveSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            draft_ttl: ChronoDuration::hours(24),
            stale_notice_after: ChronoDuration::minutes(5),
            schema_version: SCHEMA_VERSION,
        }
    }
}

/// Observable autosave state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoSaveState {
    Idle,
    Dirty,
    Saving,
}

/// Result of one timer tick or explicit flush
#[derive(Debug, Clone, PartialEq)]
pub enum FlushOutcome {
    /// Nothing to write
    Clean,
    /// A manual save or an unanswered recovery prompt holds the timer
    Paused,
    Saved { timestamp: DateTime<Utc> },
    /// Write failed; `notify` is set when the user should be told (rate-limited)
    Failed { notify: bool },
}

/// Why a stored draft was dropped without a prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    Expired,
    SchemaMismatch,
}

/// Outcome of the start-of-session draft check
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryCheck {
    NoDraft,
    Discarded(DiscardReason),
    Offer(DraftSnapshot),
}

/// Owns the dirty flag and the draft lifecycle for one session
pub struct AutoSaveManager {
    store: Arc<dyn DraftStore>,
    key: String,
    settings: AutoSaveSettings,
    dirty: bool,
    saving: bool,
    manual_save_active: bool,
    /// Bumped on every `mark_dirty`; a flush only clears `dirty` if no edit
    /// happened after its snapshot was taken
    revision: u64,
    manual_save_revision: u64,
    last_save_time: Option<DateTime<Utc>>,
    last_draft_timestamp: Option<DateTime<Utc>>,
    last_stale_notice: Option<DateTime<Utc>>,
    started_at: DateTime<Utc>,
}

impl AutoSaveManager {
    pub fn new(
        store: Arc<dyn DraftStore>,
        key: impl Into<String>,
        settings: AutoSaveSettings,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            store,
            key: key.into(),
            settings,
            dirty: false,
            saving: false,
            manual_save_active: false,
            revision: 0,
            manual_save_revision: 0,
            last_save_time: None,
            last_draft_timestamp: None,
            last_stale_notice: None,
            started_at: now,
        }
    }

    // ========================================================================
    // State
    // ========================================================================

    pub fn state(&self) -> AutoSaveState {
        if self.saving {
            AutoSaveState::Saving
        } else if self.dirty {
            AutoSaveState::Dirty
        } else {
            AutoSaveState::Idle
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_paused(&self) -> bool {
        self.manual_save_active
    }

    pub fn last_save_time(&self) -> Option<DateTime<Utc>> {
        self.last_save_time
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn settings(&self) -> &AutoSaveSettings {
        &self.settings
    }

    /// Record a local command or an accepted remote delta
    pub fn mark_dirty(&mut self) {
        self.revision += 1;
        if !self.dirty {
            debug!(key = %self.key, "Session dirty");
        }
        self.dirty = true;
    }

    // ========================================================================
    // Flushing
    // ========================================================================

    /// Timer callback: flush if dirty and no manual save is running
    pub async fn tick(&mut self, graph: &GraphModel, now: DateTime<Utc>) -> FlushOutcome {
        if self.manual_save_active {
            debug!(key = %self.key, "Autosave paused during manual save");
            return FlushOutcome::Paused;
        }
        if !self.dirty {
            return FlushOutcome::Clean;
        }
        self.flush(graph, now).await
    }

    /// Best-effort flush on teardown; failures are only logged. A manual save
    /// still in flight is abandoned, so its edits go to the draft.
    pub async fn flush_on_teardown(&mut self, graph: &GraphModel, now: DateTime<Utc>) -> FlushOutcome {
        if self.manual_save_active {
            debug!(key = %self.key, "Manual save abandoned at teardown");
            self.manual_save_active = false;
        }
        if !self.dirty {
            return FlushOutcome::Clean;
        }
        let outcome = self.flush(graph, now).await;
        if let FlushOutcome::Failed { .. } = outcome {
            warn!(key = %self.key, "Teardown flush failed, unsaved edits lost");
        }
        outcome
    }

    async fn flush(&mut self, graph: &GraphModel, now: DateTime<Utc>) -> FlushOutcome {
        self.saving = true;
        let revision = self.revision;
        let timestamp = self.next_timestamp(now);
        let draft = DraftSnapshot::capture(graph, timestamp, self.settings.schema_version);

        let result = self.store.put(&self.key, &draft).await;
        self.saving = false;

        match result {
            Ok(()) => {
                if self.revision == revision {
                    self.dirty = false;
                }
                self.last_save_time = Some(now);
                self.last_draft_timestamp = Some(timestamp);
                self.last_stale_notice = None;
                debug!(
                    key = %self.key,
                    nodes = draft.nodes.len(),
                    edges = draft.edges.len(),
                    "Draft flushed"
                );
                FlushOutcome::Saved { timestamp }
            }
            Err(e) => {
                warn!(key = %self.key, "Draft flush failed, will retry on next tick: {:#}", e);
                FlushOutcome::Failed {
                    notify: self.should_notify_stale(now),
                }
            }
        }
    }

    /// Strictly increasing draft timestamps, even if the wall clock steps back
    fn next_timestamp(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.last_draft_timestamp {
            Some(last) if now <= last => last + ChronoDuration::milliseconds(1),
            _ => now,
        }
    }

    fn should_notify_stale(&mut self, now: DateTime<Utc>) -> bool {
        let threshold = self.settings.stale_notice_after;
        let since = self.last_save_time.unwrap_or(self.started_at);
        if now - since <= threshold {
            return false;
        }
        if let Some(last) = self.last_stale_notice {
            if now - last <= threshold {
                return false;
            }
        }
        self.last_stale_notice = Some(now);
        true
    }

    // ========================================================================
    // Manual save exclusion
    // ========================================================================

    /// Pause the timer for the duration of a manual save
    pub fn begin_manual_save(&mut self) -> Result<(), SessionError> {
        if self.manual_save_active {
            return Err(SessionError::ManualSaveInProgress);
        }
        self.manual_save_active = true;
        self.manual_save_revision = self.revision;
        debug!(key = %self.key, "Manual save started, autosave paused");
        Ok(())
    }

    /// Resume the timer. On success the local draft is superseded and removed.
    pub async fn finish_manual_save(&mut self, succeeded: bool, now: DateTime<Utc>) {
        self.manual_save_active = false;
        if !succeeded {
            debug!(key = %self.key, "Manual save failed, autosave resumed");
            return;
        }
        if self.revision == self.manual_save_revision {
            self.dirty = false;
        }
        self.last_save_time = Some(now);
        self.last_stale_notice = None;
        if let Err(e) = self.store.delete(&self.key).await {
            warn!(key = %self.key, "Failed to remove superseded draft: {:#}", e);
        }
        info!(key = %self.key, "Manual save completed, autosave resumed");
    }

    // ========================================================================
    // Recovery
    // ========================================================================

    /// Look for a recoverable draft. Expired or incompatible drafts are
    /// deleted silently.
    pub async fn check_recovery(&mut self, now: DateTime<Utc>) -> anyhow::Result<RecoveryCheck> {
        let Some(draft) = self.store.get(&self.key).await? else {
            return Ok(RecoveryCheck::NoDraft);
        };

        let reason = if draft.schema_version != self.settings.schema_version {
            Some(DiscardReason::SchemaMismatch)
        } else if draft.is_expired(now, self.settings.draft_ttl) {
            Some(DiscardReason::Expired)
        } else {
            None
        };

        match reason {
            Some(reason) => {
                info!(
                    key = %self.key,
                    reason = ?reason,
                    saved_at = %draft.timestamp,
                    "Discarding stored draft without prompt"
                );
                self.store.delete(&self.key).await?;
                Ok(RecoveryCheck::Discarded(reason))
            }
            None => Ok(RecoveryCheck::Offer(draft)),
        }
    }

    /// The user declined the offered draft
    pub async fn discard_draft(&mut self) -> anyhow::Result<()> {
        self.store.delete(&self.key).await
    }

    /// The user restored `draft`. The session is clean only if storage still
    /// holds exactly that draft; otherwise the restored graph must be flushed.
    pub async fn note_restored(&mut self, draft: &DraftSnapshot) {
        self.last_draft_timestamp = Some(
            self.last_draft_timestamp
                .map_or(draft.timestamp, |last| last.max(draft.timestamp)),
        );
        let stored = match self.store.get(&self.key).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(key = %self.key, "Failed to re-read draft after restore: {:#}", e);
                None
            }
        };
        if stored.as_ref() == Some(draft) {
            self.dirty = false;
            self.last_save_time = Some(draft.timestamp);
        } else {
            info!(key = %self.key, "Stored draft changed since the offer, restored graph marked dirty");
            self.mark_dirty();
        }
    }
}
