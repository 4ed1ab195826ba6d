//! Session event system for the rendering layer
//!
//! This module provides:
//! - `SessionEvent` — render invalidation, notices, prompts, connection changes, telemetry
//! - `EventEmitter` — the sink trait sessions emit into
//! - `EventBus` — broadcast channel implementing `EventEmitter`

mod bus;
mod types;

pub use bus::EventBus;
pub use types::{EventEmitter, NoticeLevel, NoticeTopic, RenderReason, SessionEvent};
