//! Live sync channel: state, outbound queue, heartbeat.
//!
//! The channel never touches the network. Every input returns the list of
//! [`ChannelAction`]s the runtime must perform (open a link, send a frame,
//! arm the reconnect timer...). This keeps the reconnect logic testable
//! without a socket.

use super::messages::{Envelope, Inbound, Outbound};
use super::registry::HandlerRegistry;
use super::state::{transition, Backoff, ConnectionEvent, ConnectionState};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Live channel tuning
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub client: String,
    pub version: String,
    pub backoff: Backoff,
    pub heartbeat_interval: Duration,
    /// How long to wait for a heartbeat acknowledgement
    pub heartbeat_grace: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            client: "pipeline-editor".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            backoff: Backoff::default(),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_grace: Duration::from_secs(10),
        }
    }
}

/// Side effects requested by the channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelAction {
    /// Start a connection attempt
    Open,
    /// Drop the current link, if any
    Close,
    /// Write a text frame on the open link
    Send(String),
    ScheduleReconnect(Duration),
    CancelReconnect,
}

#[derive(Debug)]
pub struct LiveSyncChannel {
    state: ConnectionState,
    attempts: u32,
    queue: VecDeque<String>,
    awaiting_ack_since: Option<Instant>,
    registry: HandlerRegistry,
    settings: SyncSettings,
}

impl LiveSyncChannel {
    pub fn new(settings: SyncSettings) -> Self {
        Self::with_registry(settings, HandlerRegistry::with_defaults())
    }

    pub fn with_registry(settings: SyncSettings, registry: HandlerRegistry) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempts: 0,
            queue: VecDeque::new(),
            awaiting_ack_since: None,
            registry,
            settings,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn registry_mut(&mut self) -> &mut HandlerRegistry {
        &mut self.registry
    }

    fn apply(&mut self, event: ConnectionEvent) -> bool {
        match transition(self.state, event) {
            Some(next) => {
                debug!(from = %self.state, to = %next, ?event, "Connection state changed");
                self.state = next;
                true
            }
            None => {
                debug!(state = %self.state, ?event, "Ignoring connection event");
                false
            }
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Explicit connect; also the manual way out of `error`
    pub fn connect(&mut self) -> Vec<ChannelAction> {
        let was_reconnecting = self.state == ConnectionState::Reconnecting;
        if !self.apply(ConnectionEvent::ConnectRequested) {
            return Vec::new();
        }
        self.attempts = 0;
        let mut actions = Vec::new();
        if was_reconnecting {
            actions.push(ChannelAction::CancelReconnect);
        }
        actions.push(ChannelAction::Open);
        actions
    }

    /// The link is up: handshake, then flush the queue in enqueue order
    pub fn on_opened(&mut self, now: DateTime<Utc>) -> Vec<ChannelAction> {
        if !self.apply(ConnectionEvent::Opened) {
            return vec![ChannelAction::Close];
        }
        self.attempts = 0;
        self.awaiting_ack_since = None;

        let init = Outbound::Init {
            client: self.settings.client.clone(),
            version: self.settings.version.clone(),
        };
        let mut actions = vec![ChannelAction::Send(init.to_frame(now))];
        if !self.queue.is_empty() {
            info!(queued = self.queue.len(), "Flushing queued messages");
        }
        actions.extend(self.queue.drain(..).map(ChannelAction::Send));
        actions
    }

    /// Unexpected close, failed attempt or heartbeat timeout
    pub fn on_lost(&mut self, reason: &str) -> Vec<ChannelAction> {
        if !matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            return Vec::new();
        }
        self.awaiting_ack_since = None;

        if self.settings.backoff.exhausted(self.attempts) {
            self.apply(ConnectionEvent::GaveUp);
            warn!(
                attempts = self.attempts,
                reason = %reason,
                "Giving up reconnecting, waiting for explicit connect"
            );
            return vec![ChannelAction::Close];
        }

        self.attempts += 1;
        self.apply(ConnectionEvent::Lost);
        let delay = self.settings.backoff.delay(self.attempts);
        warn!(
            attempt = self.attempts,
            delay_ms = delay.as_millis() as u64,
            reason = %reason,
            "Connection lost, scheduling reconnect"
        );
        vec![ChannelAction::Close, ChannelAction::ScheduleReconnect(delay)]
    }

    /// The reconnect timer fired
    pub fn on_retry_due(&mut self) -> Vec<ChannelAction> {
        if self.apply(ConnectionEvent::RetryDue) {
            vec![ChannelAction::Open]
        } else {
            Vec::new()
        }
    }

    /// Explicit disconnect; cancels any pending reconnect. Queued messages are kept.
    pub fn disconnect(&mut self) -> Vec<ChannelAction> {
        if !self.apply(ConnectionEvent::DisconnectRequested) {
            return Vec::new();
        }
        self.attempts = 0;
        self.awaiting_ack_since = None;
        vec![ChannelAction::CancelReconnect, ChannelAction::Close]
    }

    // ========================================================================
    // Messages
    // ========================================================================

    /// Send now if connected, otherwise queue for the next connect
    pub fn send(&mut self, message: &Outbound, now: DateTime<Utc>) -> Vec<ChannelAction> {
        let frame = message.to_frame(now);
        if self.state == ConnectionState::Connected {
            vec![ChannelAction::Send(frame)]
        } else {
            debug!(kind = %message.kind(), state = %self.state, "Queueing outbound message");
            self.queue.push_back(frame);
            Vec::new()
        }
    }

    /// Decode one inbound text frame
    pub fn on_frame(&mut self, text: &str) -> Option<Inbound> {
        let envelope = match Envelope::parse(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Ignoring malformed frame: {}", e);
                return None;
            }
        };
        let inbound = self.registry.dispatch(&envelope)?;
        if inbound == Inbound::HeartbeatAck {
            self.awaiting_ack_since = None;
        }
        Some(inbound)
    }

    // ========================================================================
    // Heartbeat
    // ========================================================================

    /// Heartbeat timer: ping while connected and start the ack deadline
    pub fn on_heartbeat_tick(&mut self, now: DateTime<Utc>, at: Instant) -> Vec<ChannelAction> {
        if self.state != ConnectionState::Connected {
            return Vec::new();
        }
        if self.awaiting_ack_since.is_none() {
            self.awaiting_ack_since = Some(at);
        }
        vec![ChannelAction::Send(Outbound::heartbeat(now).to_frame(now))]
    }

    /// When an unacknowledged heartbeat counts as a lost connection
    pub fn heartbeat_deadline(&self) -> Option<Instant> {
        self.awaiting_ack_since
            .map(|sent| sent + self.settings.heartbeat_grace)
    }

    pub fn on_heartbeat_deadline(&mut self, at: Instant) -> Vec<ChannelAction> {
        match self.heartbeat_deadline() {
            Some(deadline) if at >= deadline => self.on_lost("heartbeat timeout"),
            _ => Vec::new(),
        }
    }
}
