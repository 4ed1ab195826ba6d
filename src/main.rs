//! Pipeline Session - headless session driver
//!
//! Runs one editing session against the configured draft directory, live
//! sync server and save endpoint. Events are printed as JSON lines; control
//! commands are read as JSON lines from stdin.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pipeline_session::autosave::{DraftStore, FileDraftStore, HttpSaveEndpoint};
use pipeline_session::events::EventBus;
use pipeline_session::graph::{GraphDocument, GraphModel};
use pipeline_session::session::{
    ConflictResolution, Edit, RecoveryChoice, Session, SessionHandle, SessionRuntime,
};
use pipeline_session::sync::{Outbound, WsConnector};
use pipeline_session::Config;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "pipeline-session")]
#[command(about = "Pipeline editor session manager")]
struct Cli {
    /// Path to the YAML config file (default: ./pipeline-session.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a session, reading JSON control lines from stdin
    Run {
        /// Initial graph as a `{nodes, edges}` JSON file
        #[arg(short, long)]
        graph: Option<PathBuf>,

        /// Do not connect to the live sync server on start
        #[arg(long)]
        no_connect: bool,
    },

    /// Inspect or remove the stored draft
    Draft {
        #[command(subcommand)]
        action: DraftAction,
    },
}

#[derive(Subcommand)]
enum DraftAction {
    /// Print the stored draft as JSON
    Show,
    /// Delete the stored draft
    Discard,
}

/// One stdin control line
#[derive(Debug, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
enum Control {
    Edit(Edit),
    Undo,
    Redo,
    Save,
    Connect,
    Disconnect,
    Send {
        kind: String,
        #[serde(default)]
        data: serde_json::Value,
    },
    Resolve {
        conflict_id: Uuid,
        resolution: ConflictResolution,
    },
    Recover {
        choice: RecoveryChoice,
    },
    Status,
    Snapshot,
    Quit,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Logs go to stderr; stdout carries events
    let json_logs = std::env::var("PIPELINE_LOG_FORMAT").is_ok_and(|f| f == "json");
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,pipeline_session=debug".into()),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json_logs).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();

    let cli = Cli::parse();
    let config = Config::from_yaml_and_env(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { graph, no_connect } => run_session(config, graph, no_connect).await,
        Commands::Draft { action } => run_draft(config, action).await,
    }
}

async fn run_session(config: Config, graph_path: Option<PathBuf>, no_connect: bool) -> Result<()> {
    let graph = match graph_path {
        Some(path) => {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let doc: GraphDocument = serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            GraphModel::from_document(doc)?
        }
        None => GraphModel::new(),
    };

    let bus = EventBus::default();
    let store = Arc::new(FileDraftStore::new(&config.draft_dir));
    let session = Session::new(
        config.session_id.clone(),
        graph,
        store,
        Arc::new(bus.clone()),
        config.session_options(),
    );

    let shutdown = CancellationToken::new();
    let mut runtime = SessionRuntime::new(session)
        .with_connect_timeout(config.connect_timeout)
        .with_shutdown_token(shutdown.clone());
    if let Some(url) = &config.sync_url {
        runtime = runtime
            .with_connector(Arc::new(WsConnector::new(url)))
            .with_auto_connect(!no_connect);
    }
    if let Some(url) = &config.save_url {
        runtime = runtime.with_save_endpoint(Arc::new(HttpSaveEndpoint::new(url)?));
    }

    // Subscribe before the loop starts so the recovery prompt is not missed
    let mut events = bus.subscribe();
    let (handle, task) = runtime.spawn(bus);

    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{}", line),
                    Err(e) => tracing::warn!("Failed to encode event: {}", e),
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Event printer lagged, {} events skipped", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, shutting down");
            ctrl_c.cancel();
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => {
                    if !dispatch(&handle, &line).await {
                        break;
                    }
                }
                None => break,
            },
            _ = shutdown.cancelled() => break,
        }
    }

    if let Err(e) = handle.shutdown().await {
        tracing::debug!("Session already stopped: {}", e);
    }
    task.await.context("Session task panicked")?;
    Ok(())
}

/// Run one control line; `false` stops the session
async fn dispatch(handle: &SessionHandle, line: &str) -> bool {
    let control: Control = match serde_json::from_str(line) {
        Ok(control) => control,
        Err(e) => {
            tracing::warn!("Ignoring invalid control line: {}", e);
            return true;
        }
    };

    let result = match control {
        Control::Edit(edit) => handle.edit(edit).await.map(|_| ()),
        Control::Undo => handle.undo().await.map(|_| ()),
        Control::Redo => handle.redo().await.map(|_| ()),
        Control::Save => handle.save().await,
        Control::Connect => handle.connect().await,
        Control::Disconnect => handle.disconnect().await,
        Control::Send { kind, data } => handle.send(Outbound::custom(kind, data)).await,
        Control::Resolve {
            conflict_id,
            resolution,
        } => handle.resolve_conflict(conflict_id, resolution).await,
        Control::Recover { choice } => handle.resolve_recovery(choice).await,
        Control::Status => handle.status().await.map(|status| print_json(&status)),
        Control::Snapshot => handle.snapshot().await.map(|doc| print_json(&doc)),
        Control::Quit => return false,
    };

    match result {
        Ok(()) => true,
        Err(pipeline_session::SessionError::Closed) => false,
        Err(e) => {
            tracing::info!("{}", e);
            true
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{}", line),
        Err(e) => tracing::warn!("Failed to encode output: {}", e),
    }
}

async fn run_draft(config: Config, action: DraftAction) -> Result<()> {
    let store = FileDraftStore::new(&config.draft_dir);
    let key = config.draft_key();

    match action {
        DraftAction::Show => match store.get(&key).await? {
            Some(draft) => println!("{}", serde_json::to_string_pretty(&draft)?),
            None => tracing::info!("No draft stored for session {}", config.session_id),
        },
        DraftAction::Discard => {
            store.delete(&key).await?;
            tracing::info!("Draft for session {} discarded", config.session_id);
        }
    }
    Ok(())
}
