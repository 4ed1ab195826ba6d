//! Reversible command history
//!
//! This module provides:
//! - `Command` — one reversible mutation with forward/inverse payloads captured at construction
//! - `CommandManager` — bounded undo stack and redo stack

mod command;
mod manager;

pub use command::{Command, CommandKind};
pub use manager::{Applied, CommandManager, DEFAULT_MAX_HISTORY};
