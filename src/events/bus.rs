//! Event bus for broadcasting session events to the rendering layer

use super::{EventEmitter, SessionEvent};
use tokio::sync::broadcast;
use tracing::trace;

/// Default broadcast channel capacity
const DEFAULT_CAPACITY: usize = 1024;

/// Event bus that distributes SessionEvents via `tokio::sync::broadcast`
///
/// Fire-and-forget: emitting never blocks, never panics.
/// If no subscribers are connected, events are silently dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    /// Create a new EventBus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl EventEmitter for EventBus {
    fn emit(&self, event: SessionEvent) {
        if let Ok(n) = self.sender.send(event) {
            trace!(subscribers = n, "SessionEvent emitted");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{NoticeLevel, NoticeTopic, RenderReason};
    use crate::graph::EntityRef;

    #[test]
    fn test_emit_without_subscriber_no_panic() {
        let bus = EventBus::default();
        bus.emit_render(RenderReason::CommandExecuted, vec![]);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_emit_with_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.emit_render(RenderReason::Redo, vec![EntityRef::edge("e1")]);

        let event = rx.try_recv().unwrap();
        assert_eq!(
            event,
            SessionEvent::RenderInvalidated {
                reason: RenderReason::Redo,
                entities: vec![EntityRef::edge("e1")],
            }
        );
    }

    #[test]
    fn test_multi_subscribers() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.emit_notice(NoticeLevel::Info, NoticeTopic::History, "Nothing to undo".into());

        for rx in [&mut rx1, &mut rx2] {
            let SessionEvent::Notice { message, persistent, .. } = rx.try_recv().unwrap() else {
                panic!("expected notice");
            };
            assert_eq!(message, "Nothing to undo");
            assert!(!persistent);
        }
    }

    #[test]
    fn test_persistent_notice() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.emit_persistent_notice(NoticeLevel::Error, NoticeTopic::Connection, "offline".into());
        assert!(matches!(
            rx.try_recv().unwrap(),
            SessionEvent::Notice {
                level: NoticeLevel::Error,
                persistent: true,
                ..
            }
        ));
    }

    #[test]
    fn test_clone_shares_channel() {
        let bus = EventBus::default();
        let bus2 = bus.clone();
        let mut rx = bus.subscribe();

        bus2.emit_render(RenderReason::DraftRestored, vec![]);

        assert!(matches!(
            rx.try_recv().unwrap(),
            SessionEvent::RenderInvalidated {
                reason: RenderReason::DraftRestored,
                ..
            }
        ));
    }
}
