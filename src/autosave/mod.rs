//! Local draft persistence
//!
//! This module provides:
//! - `DraftSnapshot` — `{nodes, edges, timestamp, schemaVersion}` stored under one key per session
//! - `DraftStore` — async key-value storage trait (`FileDraftStore`, `MemoryDraftStore`)
//! - `AutoSaveManager` — dirty tracking, periodic flush, manual-save exclusion, recovery
//! - `SaveEndpoint` — the manual "save to server" call (`HttpSaveEndpoint`)

mod draft;
mod endpoint;
mod manager;
mod store;

pub use draft::{DraftSnapshot, SCHEMA_VERSION};
pub use endpoint::{HttpSaveEndpoint, SaveEndpoint};
pub use manager::{
    AutoSaveManager, AutoSaveSettings, AutoSaveState, DiscardReason, FlushOutcome, RecoveryCheck,
};
pub use store::{DraftStore, FileDraftStore, MemoryDraftStore};
