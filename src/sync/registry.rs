//! Dispatch of inbound frames by their `type` tag

use super::messages::{Envelope, ExecutionLog, ExecutionProgress, Inbound, RemoteDelta};
use anyhow::Result;
use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

type Handler = Box<dyn Fn(&Value) -> Result<Inbound> + Send + Sync>;

/// Maps a message `type` to the decoder for its `data` payload
pub struct HandlerRegistry {
    handlers: HashMap<String, Handler>,
}

impl HandlerRegistry {
    /// An empty registry: every message is unknown
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry with the built-in message types
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("node_status", |data| {
            RemoteDelta::from_status_payload(data).map(Inbound::Delta)
        });
        registry.register("execution_progress", |data| {
            let progress: ExecutionProgress = serde_json::from_value(data.clone())?;
            Ok(Inbound::ExecutionProgress(progress))
        });
        registry.register("execution_log", |data| {
            let log: ExecutionLog = serde_json::from_value(data.clone())?;
            Ok(Inbound::ExecutionLog(log))
        });
        registry.register("stats_update", |data| Ok(Inbound::StatsUpdate(data.clone())));
        registry.register("heartbeat", |_| Ok(Inbound::HeartbeatAck));
        registry
    }

    /// Register (or replace) the handler for `kind`
    pub fn register<F>(&mut self, kind: impl Into<String>, handler: F)
    where
        F: Fn(&Value) -> Result<Inbound> + Send + Sync + 'static,
    {
        self.handlers.insert(kind.into(), Box::new(handler));
    }

    pub fn is_registered(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Decode an envelope. Unknown types and malformed payloads are logged
    /// and yield `None`.
    pub fn dispatch(&self, envelope: &Envelope) -> Option<Inbound> {
        let Some(handler) = self.handlers.get(&envelope.kind) else {
            warn!(kind = %envelope.kind, "Ignoring unknown message type");
            return None;
        };
        match handler(&envelope.data) {
            Ok(inbound) => Some(inbound),
            Err(e) => {
                warn!(kind = %envelope.kind, "Failed to decode message: {:#}", e);
                None
            }
        }
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.handlers.keys().collect();
        kinds.sort();
        f.debug_struct("HandlerRegistry").field("kinds", &kinds).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn envelope(kind: &str, data: Value) -> Envelope {
        Envelope {
            kind: kind.into(),
            data,
            timestamp: None,
        }
    }

    #[test]
    fn test_defaults_registered() {
        let registry = HandlerRegistry::with_defaults();
        for kind in [
            "node_status",
            "execution_progress",
            "execution_log",
            "stats_update",
            "heartbeat",
        ] {
            assert!(registry.is_registered(kind), "{kind} not registered");
        }
    }

    #[test]
    fn test_dispatch_known_types() {
        let registry = HandlerRegistry::with_defaults();

        let inbound = registry
            .dispatch(&envelope("node_status", json!({"node_id": "n1", "status": "ok"})))
            .unwrap();
        assert!(matches!(inbound, Inbound::Delta(RemoteDelta::NodeStatus { .. })));

        let inbound = registry
            .dispatch(&envelope(
                "execution_progress",
                json!({"execution_id": "x1", "node_id": "n1", "progress": 40.0}),
            ))
            .unwrap();
        let Inbound::ExecutionProgress(progress) = inbound else {
            panic!("expected progress");
        };
        assert_eq!(progress.progress, Some(40.0));

        let inbound = registry
            .dispatch(&envelope("stats_update", json!({"running": 2})))
            .unwrap();
        assert_eq!(inbound, Inbound::StatsUpdate(json!({"running": 2})));

        assert_eq!(
            registry.dispatch(&envelope("heartbeat", Value::Null)),
            Some(Inbound::HeartbeatAck)
        );
    }

    #[test]
    fn test_unknown_and_malformed_ignored() {
        let registry = HandlerRegistry::with_defaults();
        assert!(registry.dispatch(&envelope("alert_fired", json!({}))).is_none());
        assert!(registry
            .dispatch(&envelope("execution_log", json!({"level": "warn"})))
            .is_none());
        assert!(HandlerRegistry::new()
            .dispatch(&envelope("heartbeat", Value::Null))
            .is_none());
    }

    /// Collects formatted log output
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_unknown_type_logged_at_warn() {
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let registry = HandlerRegistry::with_defaults();
        tracing::subscriber::with_default(subscriber, || {
            registry.dispatch(&envelope("alert_fired", json!({})));
        });

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("WARN"), "{output}");
        assert!(output.contains("alert_fired"), "{output}");
    }

    #[test]
    fn test_custom_handler_replaces_default() {
        let mut registry = HandlerRegistry::with_defaults();
        registry.register("stats_update", |_| Ok(Inbound::HeartbeatAck));
        assert_eq!(
            registry.dispatch(&envelope("stats_update", json!({}))),
            Some(Inbound::HeartbeatAck)
        );
    }
}
