//! Connection state machine and reconnect backoff
//!
//! ```text
//! disconnected ──connect──► connecting ──opened──► connected
//!       ▲                     │    ▲                  │
//!       │                lost │    │ retry due        │ lost / heartbeat timeout
//!       │                     ▼    │                  │
//!       │                   reconnecting ◄────────────┘
//!       │                     │
//!       │            gave up  ▼
//!       └──disconnect──── error  (explicit connect only)
//! ```
//!
//! `transition` is pure: it only says whether an edge exists.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Inputs to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Explicit user (or startup) request
    ConnectRequested,
    Opened,
    /// Unexpected close, failed attempt or heartbeat timeout
    Lost,
    RetryDue,
    /// Lost with no attempts left
    GaveUp,
    DisconnectRequested,
}

/// The next state, or `None` when `event` has no edge from `state`
pub fn transition(state: ConnectionState, event: ConnectionEvent) -> Option<ConnectionState> {
    use ConnectionEvent as E;
    use ConnectionState as S;

    match (state, event) {
        (S::Disconnected | S::Error | S::Reconnecting, E::ConnectRequested) => Some(S::Connecting),
        (S::Connecting, E::Opened) => Some(S::Connected),
        (S::Connecting | S::Connected, E::Lost) => Some(S::Reconnecting),
        (S::Connecting | S::Connected, E::GaveUp) => Some(S::Error),
        (S::Reconnecting, E::RetryDue) => Some(S::Connecting),
        (S::Disconnected, E::DisconnectRequested) => None,
        (_, E::DisconnectRequested) => Some(S::Disconnected),
        _ => None,
    }
}

/// Exponential reconnect delay: `min(base * factor^(attempt-1), max)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
    pub factor: f64,
    pub max_attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
            factor: 1.5,
            max_attempts: 10,
        }
    }
}

impl Backoff {
    /// Delay before attempt `attempt` (1-based; 0 is treated as 1)
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base.as_secs_f64() * self.factor.powi(exponent);
        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// No retry is scheduled once `attempts` reached the limit
    pub fn exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionEvent as E;
    use ConnectionState as S;

    #[test]
    fn test_happy_path() {
        let s = transition(S::Disconnected, E::ConnectRequested).unwrap();
        assert_eq!(s, S::Connecting);
        let s = transition(s, E::Opened).unwrap();
        assert_eq!(s, S::Connected);
        let s = transition(s, E::Lost).unwrap();
        assert_eq!(s, S::Reconnecting);
        let s = transition(s, E::RetryDue).unwrap();
        assert_eq!(s, S::Connecting);
        assert_eq!(transition(s, E::GaveUp), Some(S::Error));
    }

    #[test]
    fn test_disconnect_from_anywhere() {
        for s in [S::Connecting, S::Connected, S::Reconnecting, S::Error] {
            assert_eq!(transition(s, E::DisconnectRequested), Some(S::Disconnected));
        }
        assert_eq!(transition(S::Disconnected, E::DisconnectRequested), None);
    }

    #[test]
    fn test_error_is_terminal_for_automatic_events() {
        for e in [E::Opened, E::Lost, E::RetryDue, E::GaveUp] {
            assert_eq!(transition(S::Error, e), None, "{e:?}");
        }
        assert_eq!(transition(S::Error, E::ConnectRequested), Some(S::Connecting));
    }

    #[test]
    fn test_invalid_edges() {
        assert_eq!(transition(S::Disconnected, E::Opened), None);
        assert_eq!(transition(S::Disconnected, E::RetryDue), None);
        assert_eq!(transition(S::Connected, E::ConnectRequested), None);
        assert_eq!(transition(S::Connected, E::RetryDue), None);
        assert_eq!(transition(S::Reconnecting, E::Opened), None);
    }

    #[test]
    fn test_backoff_delays() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay(1), Duration::from_millis(1000));
        assert_eq!(backoff.delay(2), Duration::from_millis(1500));
        assert_eq!(backoff.delay(3), Duration::from_millis(2250));
        assert_eq!(backoff.delay(4), Duration::from_millis(3375));
        assert_eq!(backoff.delay(10), Duration::from_secs(30));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(30));
        assert_eq!(backoff.delay(0), backoff.delay(1));
    }

    #[test]
    fn test_backoff_exhausted() {
        let backoff = Backoff::default();
        assert!(!backoff.exhausted(9));
        assert!(backoff.exhausted(10));
    }
}
