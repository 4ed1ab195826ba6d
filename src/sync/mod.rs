//! Live sync with the pipeline server
//!
//! This module provides:
//! - `Envelope` / `Inbound` / `Outbound` / `RemoteDelta` — wire messages
//! - `HandlerRegistry` — dispatch by the `type` tag
//! - `ConnectionState` / `transition` / `Backoff` — the pure connection FSM
//! - `LiveSyncChannel` — queue, heartbeat and reconnect decisions as `ChannelAction`s
//! - `Connector` — link factory (`WsConnector`, `MockConnector`)

mod channel;
mod messages;
mod registry;
mod state;
mod transport;

pub use channel::{ChannelAction, LiveSyncChannel, SyncSettings};
pub use messages::{
    Envelope, ExecutionLog, ExecutionProgress, Inbound, Outbound, RemoteDelta, STATUS_PROPERTY,
};
pub use registry::HandlerRegistry;
pub use state::{transition, Backoff, ConnectionEvent, ConnectionState};
pub use transport::{Connector, Link, LinkEvent, MockConnector, MockPeer, WsConnector};
