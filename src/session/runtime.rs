//! Event loop driving one [`Session`]
//!
//! Every mutation source (handle requests, autosave timer, socket frames,
//! reconnect and heartbeat timers, connect and save completions) is a branch
//! of one `select!`; each wake-up is handled to completion before the next,
//! so the session is only ever touched by one task.

use super::editor::{Conflict, ConflictResolution, RecoveryChoice, Session, SessionStatus};
use super::edit::Edit;
use super::handle::SessionHandle;
use crate::autosave::SaveEndpoint;
use crate::error::SessionError;
use crate::events::EventBus;
use crate::graph::GraphDocument;
use crate::history::{Applied, Command};
use crate::sync::{ChannelAction, ConnectionState, Connector, Link, LinkEvent, Outbound};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default bound on a single connection attempt
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const REQUEST_CAPACITY: usize = 64;

type Reply<T> = oneshot::Sender<T>;

/// Requests sent by [`SessionHandle`]
#[derive(Debug)]
pub enum SessionRequest {
    Edit {
        edit: Edit,
        reply: Reply<Result<Applied, SessionError>>,
    },
    Execute {
        command: Command,
        reply: Reply<Result<Applied, SessionError>>,
    },
    Undo {
        reply: Reply<Result<Applied, SessionError>>,
    },
    Redo {
        reply: Reply<Result<Applied, SessionError>>,
    },
    Save {
        reply: Reply<Result<(), SessionError>>,
    },
    ResolveConflict {
        id: Uuid,
        resolution: ConflictResolution,
        reply: Reply<Result<(), SessionError>>,
    },
    ResolveRecovery {
        choice: RecoveryChoice,
        reply: Reply<Result<(), SessionError>>,
    },
    Connect {
        reply: Reply<()>,
    },
    Disconnect {
        reply: Reply<()>,
    },
    Send {
        message: Outbound,
        reply: Reply<()>,
    },
    Snapshot {
        reply: Reply<GraphDocument>,
    },
    Status {
        reply: Reply<SessionStatus>,
    },
    Conflicts {
        reply: Reply<Vec<Conflict>>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

/// One reason the loop woke up
enum Wake {
    Request(SessionRequest),
    HandlesDropped,
    Cancelled,
    AutosaveTick,
    HeartbeatTick,
    Link(Option<LinkEvent>),
    RetryDue,
    HeartbeatDeadline,
    ConnectFinished(u64, anyhow::Result<Link>),
    SaveFinished(anyhow::Result<()>),
}

pub struct SessionRuntime {
    session: Session,
    connector: Option<Arc<dyn Connector>>,
    save_endpoint: Option<Arc<dyn SaveEndpoint>>,
    connect_timeout: Duration,
    auto_connect: bool,
    shutdown: CancellationToken,
}

/// Mutable loop state that is not part of the session
struct LoopState {
    link: Option<Link>,
    reconnect_at: Option<Instant>,
    connect_generation: u64,
    save_reply: Option<Reply<Result<(), SessionError>>>,
    connect_tx: mpsc::UnboundedSender<(u64, anyhow::Result<Link>)>,
    save_tx: mpsc::UnboundedSender<anyhow::Result<()>>,
}

impl SessionRuntime {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            connector: None,
            save_endpoint: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            auto_connect: false,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn with_save_endpoint(mut self, endpoint: Arc<dyn SaveEndpoint>) -> Self {
        self.save_endpoint = Some(endpoint);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Connect as soon as the loop starts
    pub fn with_auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }

    /// Cancelling the token shuts the session down like [`SessionHandle::shutdown`]
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Start the loop on the current runtime
    pub fn spawn(self, events: EventBus) -> (SessionHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(REQUEST_CAPACITY);
        let handle = SessionHandle::new(tx, events);
        let task = tokio::spawn(self.run(rx));
        (handle, task)
    }

    async fn run(mut self, mut requests: mpsc::Receiver<SessionRequest>) {
        let session_id = self.session.id().to_string();
        info!(session_id = %session_id, "Session loop started");

        let (connect_tx, mut connect_rx) = mpsc::unbounded_channel();
        let (save_tx, mut save_rx) = mpsc::unbounded_channel();
        let mut state = LoopState {
            link: None,
            reconnect_at: None,
            connect_generation: 0,
            save_reply: None,
            connect_tx,
            save_tx,
        };

        let mut autosave = tokio::time::interval(self.session.autosave().settings().interval);
        autosave.set_missed_tick_behavior(MissedTickBehavior::Delay);
        autosave.tick().await; // skip the immediate first tick

        let mut heartbeat = tokio::time::interval(self.session.channel().settings().heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.tick().await;

        if let Err(e) = self.session.check_recovery(Utc::now()).await {
            warn!(session_id = %session_id, "Draft recovery check failed: {}", e);
        }
        if self.auto_connect {
            self.request_connect(&mut state);
        }

        loop {
            let heartbeat_deadline = self.session.channel().heartbeat_deadline();
            let wake = tokio::select! {
                request = requests.recv() => match request {
                    Some(request) => Wake::Request(request),
                    None => Wake::HandlesDropped,
                },
                _ = self.shutdown.cancelled() => Wake::Cancelled,
                _ = autosave.tick() => Wake::AutosaveTick,
                _ = heartbeat.tick() => Wake::HeartbeatTick,
                event = next_link_event(&mut state.link) => Wake::Link(event),
                _ = sleep_until_opt(state.reconnect_at) => Wake::RetryDue,
                _ = sleep_until_opt(heartbeat_deadline) => Wake::HeartbeatDeadline,
                Some((generation, result)) = connect_rx.recv() => {
                    Wake::ConnectFinished(generation, result)
                }
                Some(result) = save_rx.recv() => Wake::SaveFinished(result),
            };

            match wake {
                Wake::Request(request) => {
                    let stop = matches!(request, SessionRequest::Shutdown { .. });
                    self.handle_request(request, &mut state).await;
                    if stop {
                        break;
                    }
                }
                Wake::HandlesDropped | Wake::Cancelled => {
                    self.teardown(&mut state).await;
                    break;
                }
                Wake::AutosaveTick => {
                    self.session.autosave_tick(Utc::now()).await;
                }
                Wake::HeartbeatTick => {
                    let actions = self.session.on_heartbeat_tick(Utc::now(), Instant::now());
                    self.perform(actions, &mut state);
                }
                Wake::Link(Some(LinkEvent::Frame(text))) => {
                    self.session.handle_frame(&text, Utc::now());
                }
                Wake::Link(Some(LinkEvent::Closed(reason))) => {
                    let reason = reason.unwrap_or_else(|| "connection closed".to_string());
                    self.link_lost(&reason, &mut state);
                }
                Wake::Link(None) => self.link_lost("link dropped", &mut state),
                Wake::RetryDue => {
                    state.reconnect_at = None;
                    let actions = self.session.on_retry_due();
                    self.perform(actions, &mut state);
                }
                Wake::HeartbeatDeadline => {
                    let actions = self.session.on_heartbeat_deadline(Instant::now());
                    self.perform(actions, &mut state);
                }
                Wake::ConnectFinished(generation, result) => {
                    if self.connect_finished(generation, result, &mut state) {
                        // First ping one full period after connect
                        heartbeat.reset();
                    }
                }
                Wake::SaveFinished(result) => {
                    let outcome = self.session.finish_manual_save(result, Utc::now()).await;
                    match state.save_reply.take() {
                        Some(reply) => {
                            let _ = reply.send(outcome);
                        }
                        None => debug!("Manual save finished with no waiting caller"),
                    }
                }
            }
        }

        info!(session_id = %session_id, "Session loop stopped");
    }

    async fn handle_request(&mut self, request: SessionRequest, state: &mut LoopState) {
        match request {
            SessionRequest::Edit { edit, reply } => {
                let _ = reply.send(self.session.edit(edit));
            }
            SessionRequest::Execute { command, reply } => {
                let _ = reply.send(self.session.execute(command));
            }
            SessionRequest::Undo { reply } => {
                let _ = reply.send(self.session.undo());
            }
            SessionRequest::Redo { reply } => {
                let _ = reply.send(self.session.redo());
            }
            SessionRequest::Save { reply } => self.start_save(reply, state),
            SessionRequest::ResolveConflict {
                id,
                resolution,
                reply,
            } => {
                let _ = reply.send(self.session.resolve_conflict(id, resolution));
            }
            SessionRequest::ResolveRecovery { choice, reply } => {
                let _ = reply.send(self.session.resolve_recovery(choice).await);
            }
            SessionRequest::Connect { reply } => {
                self.request_connect(state);
                let _ = reply.send(());
            }
            SessionRequest::Disconnect { reply } => {
                let actions = self.session.disconnect();
                self.perform(actions, state);
                let _ = reply.send(());
            }
            SessionRequest::Send { message, reply } => {
                let actions = self.session.send(&message, Utc::now());
                self.perform(actions, state);
                let _ = reply.send(());
            }
            SessionRequest::Snapshot { reply } => {
                let _ = reply.send(self.session.snapshot());
            }
            SessionRequest::Status { reply } => {
                let _ = reply.send(self.session.status());
            }
            SessionRequest::Conflicts { reply } => {
                let _ = reply.send(self.session.conflicts().cloned().collect());
            }
            SessionRequest::Shutdown { reply } => {
                self.teardown(state).await;
                let _ = reply.send(());
            }
        }
    }

    fn link_lost(&mut self, reason: &str, state: &mut LoopState) {
        state.link = None;
        let actions = self.session.on_link_lost(reason);
        self.perform(actions, state);
    }

    fn request_connect(&mut self, state: &mut LoopState) {
        if self.connector.is_none() {
            warn!(session_id = %self.session.id(), "No live sync connector configured");
            return;
        }
        let actions = self.session.connect();
        self.perform(actions, state);
    }

    fn start_save(&mut self, reply: Reply<Result<(), SessionError>>, state: &mut LoopState) {
        let Some(endpoint) = self.save_endpoint.clone() else {
            let _ = reply.send(Err(SessionError::NoSaveEndpoint));
            return;
        };
        let graph = match self.session.begin_manual_save() {
            Ok(graph) => graph,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };
        state.save_reply = Some(reply);
        let session_id = self.session.id().to_string();
        let done = state.save_tx.clone();
        tokio::spawn(async move {
            let result = endpoint.save(&session_id, &graph).await;
            let _ = done.send(result);
        });
    }

    /// Returns whether the link came up
    fn connect_finished(
        &mut self,
        generation: u64,
        result: anyhow::Result<Link>,
        state: &mut LoopState,
    ) -> bool {
        if generation != state.connect_generation
            || self.session.channel().state() != ConnectionState::Connecting
        {
            debug!(generation, "Dropping stale connection attempt");
            return false;
        }
        let (actions, opened) = match result {
            Ok(link) => {
                state.link = Some(link);
                (self.session.on_link_opened(Utc::now()), true)
            }
            Err(e) => (self.session.on_link_lost(&format!("{:#}", e)), false),
        };
        self.perform(actions, state);
        opened
    }

    /// Carry out channel actions
    fn perform(&mut self, actions: Vec<ChannelAction>, state: &mut LoopState) {
        for action in actions {
            match action {
                ChannelAction::Open => self.open(state),
                ChannelAction::Close => {
                    if state.link.take().is_some() {
                        debug!("Link closed");
                    }
                }
                ChannelAction::Send(frame) => match &state.link {
                    Some(link) => {
                        if link.outgoing.send(frame).is_err() {
                            warn!("Link writer gone, frame dropped");
                        }
                    }
                    None => warn!("No open link, frame dropped"),
                },
                ChannelAction::ScheduleReconnect(delay) => {
                    state.reconnect_at = Some(Instant::now() + delay);
                }
                ChannelAction::CancelReconnect => state.reconnect_at = None,
            }
        }
    }

    fn open(&mut self, state: &mut LoopState) {
        let Some(connector) = self.connector.clone() else {
            warn!("Open requested without a connector");
            return;
        };
        state.connect_generation += 1;
        let generation = state.connect_generation;
        let timeout = self.connect_timeout;
        let done = state.connect_tx.clone();
        debug!(generation, "Opening link");
        tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, connector.connect()).await {
                Ok(result) => result,
                Err(_) => Err(anyhow::anyhow!("connect timed out after {:?}", timeout)),
            };
            let _ = done.send((generation, result));
        });
    }

    async fn teardown(&mut self, state: &mut LoopState) {
        let actions = self.session.shutdown(Utc::now()).await;
        self.perform(actions, state);
        if let Some(reply) = state.save_reply.take() {
            let _ = reply.send(Err(SessionError::Closed));
        }
    }
}

async fn next_link_event(link: &mut Option<Link>) -> Option<LinkEvent> {
    match link {
        Some(link) => link.incoming.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
