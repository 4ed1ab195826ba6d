//! Duplex text-frame transport
//!
//! A [`Connector`] produces a [`Link`]: an outgoing frame sender plus an
//! incoming event receiver. Dropping the link closes the connection.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// Something that happened on an open link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Frame(String),
    /// The peer closed or the link failed; `None` for a clean close
    Closed(Option<String>),
}

/// An open duplex connection
#[derive(Debug)]
pub struct Link {
    pub outgoing: mpsc::UnboundedSender<String>,
    pub incoming: mpsc::UnboundedReceiver<LinkEvent>,
}

/// Opens links to the sync server
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Link>;
}

// ============================================================================
// WebSocket
// ============================================================================

/// WebSocket connector (`ws://` or `wss://`)
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Link> {
        let (socket, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .with_context(|| format!("Failed to connect to {}", self.url))?;
        debug!(url = %self.url, "WebSocket connected");

        let (mut ws_sender, mut ws_receiver) = socket.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        // Writer: ends when the link is dropped
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if let Err(e) = ws_sender.send(Message::Text(frame.into())).await {
                    warn!("WebSocket send failed: {}", e);
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });

        // Reader: reports exactly one Closed
        tokio::spawn(async move {
            let reason = loop {
                match ws_receiver.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if in_tx.send(LinkEvent::Frame(text.as_str().to_owned())).is_err() {
                            return;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break None,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Some(e.to_string()),
                }
            };
            let _ = in_tx.send(LinkEvent::Closed(reason));
        });

        Ok(Link {
            outgoing: out_tx,
            incoming: in_rx,
        })
    }
}

// ============================================================================
// Channel-backed connector for tests and embedding
// ============================================================================

/// The server side of a [`MockConnector`] link
#[derive(Debug)]
pub struct MockPeer {
    /// Frames the session sent
    pub sent: mpsc::UnboundedReceiver<String>,
    /// Push frames or a close to the session
    pub inbound: mpsc::UnboundedSender<LinkEvent>,
}

/// In-process connector: every successful `connect` hands a [`MockPeer`]
/// to the receiver returned by [`MockConnector::new`]
#[derive(Debug)]
pub struct MockConnector {
    peers: mpsc::UnboundedSender<MockPeer>,
    failures_left: AtomicUsize,
    attempts: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MockPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        let connector = Self {
            peers,
            failures_left: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
        };
        (connector, rx)
    }

    /// Fail the next `n` connection attempts
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Total `connect` calls so far
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Link> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            anyhow::bail!("connection refused (simulated)");
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        self.peers
            .send(MockPeer {
                sent: out_rx,
                inbound: in_tx,
            })
            .map_err(|_| anyhow::anyhow!("mock peer receiver dropped"))?;
        Ok(Link {
            outgoing: out_tx,
            incoming: in_rx,
        })
    }
}
