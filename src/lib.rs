//! Pipeline Session
//!
//! Editing session manager for a node/edge pipeline editor:
//! - Reversible command history with bounded undo/redo
//! - Periodic local draft persistence with recovery and expiry
//! - Reconnecting live channel merging server deltas, with conflict prompts

pub mod autosave;
pub mod error;
pub mod events;
pub mod graph;
pub mod history;
pub mod session;
pub mod sync;

use anyhow::Result;
use serde::Deserialize;
use session::SessionOptions;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use error::{GraphError, HistoryError, SessionError};

// ============================================================================
// YAML config structs (deserialization targets)
// ============================================================================

/// Top-level YAML configuration file structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub session: SessionYamlConfig,
    pub autosave: AutoSaveYamlConfig,
    pub sync: SyncYamlConfig,
    pub server: ServerYamlConfig,
}

/// Session section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionYamlConfig {
    pub id: String,
    pub max_history: usize,
}

impl Default for SessionYamlConfig {
    fn default() -> Self {
        Self {
            id: "default".into(),
            max_history: history::DEFAULT_MAX_HISTORY,
        }
    }
}

/// Autosave section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AutoSaveYamlConfig {
    pub interval_secs: u64,
    pub draft_ttl_hours: i64,
    pub stale_notice_minutes: i64,
    /// Defaults to `<data_dir>/pipeline-session/drafts`
    pub draft_dir: Option<String>,
}

impl Default for AutoSaveYamlConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            draft_ttl_hours: 24,
            stale_notice_minutes: 5,
            draft_dir: None,
        }
    }
}

/// Live sync section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncYamlConfig {
    /// `ws://` / `wss://` URL; no URL means no live sync
    pub url: Option<String>,
    pub client: String,
    pub heartbeat_interval_secs: u64,
    pub heartbeat_grace_secs: u64,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    pub reconnect_factor: f64,
    pub max_reconnect_attempts: u32,
    pub connect_timeout_secs: u64,
}

impl Default for SyncYamlConfig {
    fn default() -> Self {
        Self {
            url: None,
            client: "pipeline-editor".into(),
            heartbeat_interval_secs: 30,
            heartbeat_grace_secs: 10,
            reconnect_base_ms: 1_000,
            reconnect_max_ms: 30_000,
            reconnect_factor: 1.5,
            max_reconnect_attempts: 10,
            connect_timeout_secs: 10,
        }
    }
}

/// Server section (manual save)
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYamlConfig {
    /// POST target for "save to server"; no URL disables manual save
    pub save_url: Option<String>,
}

// ============================================================================
// Runtime config (what the application actually uses)
// ============================================================================

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub session_id: String,
    pub sync_url: Option<String>,
    pub save_url: Option<String>,
    pub draft_dir: PathBuf,
    pub max_history: usize,
    pub autosave_interval: Duration,
    pub draft_ttl: chrono::Duration,
    pub stale_notice_after: chrono::Duration,
    pub client: String,
    pub heartbeat_interval: Duration,
    pub heartbeat_grace: Duration,
    pub backoff: sync::Backoff,
    pub connect_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables only.
    /// Equivalent to from_yaml_and_env(None).
    pub fn from_env() -> Result<Self> {
        Self::from_yaml_and_env(None)
    }

    /// Load configuration from an optional YAML file, then override with env vars.
    ///
    /// Priority: env var > YAML > default
    ///
    /// If `yaml_path` is None, tries "pipeline-session.yaml" in CWD. If the file
    /// doesn't exist, falls back to pure env var / defaults.
    pub fn from_yaml_and_env(yaml_path: Option<&Path>) -> Result<Self> {
        let yaml = Self::load_yaml(yaml_path);

        let draft_dir = std::env::var("PIPELINE_DRAFT_DIR")
            .ok()
            .or(yaml.autosave.draft_dir)
            .map(PathBuf::from)
            .unwrap_or_else(default_draft_dir);

        let interval_secs = std::env::var("PIPELINE_AUTOSAVE_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(yaml.autosave.interval_secs);

        Ok(Self {
            session_id: std::env::var("PIPELINE_SESSION_ID").unwrap_or(yaml.session.id),
            sync_url: std::env::var("PIPELINE_SYNC_URL").ok().or(yaml.sync.url),
            save_url: std::env::var("PIPELINE_SAVE_URL").ok().or(yaml.server.save_url),
            draft_dir,
            max_history: std::env::var("PIPELINE_MAX_HISTORY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(yaml.session.max_history)
                .max(1),
            // Timers reject a zero period
            autosave_interval: Duration::from_secs(interval_secs.max(1)),
            draft_ttl: chrono::Duration::hours(yaml.autosave.draft_ttl_hours),
            stale_notice_after: chrono::Duration::minutes(yaml.autosave.stale_notice_minutes),
            client: yaml.sync.client,
            heartbeat_interval: Duration::from_secs(yaml.sync.heartbeat_interval_secs.max(1)),
            heartbeat_grace: Duration::from_secs(yaml.sync.heartbeat_grace_secs),
            backoff: sync::Backoff {
                base: Duration::from_millis(yaml.sync.reconnect_base_ms),
                max: Duration::from_millis(yaml.sync.reconnect_max_ms),
                factor: yaml.sync.reconnect_factor,
                max_attempts: yaml.sync.max_reconnect_attempts,
            },
            connect_timeout: Duration::from_secs(yaml.sync.connect_timeout_secs.max(1)),
        })
    }

    /// Try to load and parse a YAML config file. Returns defaults on any failure.
    fn load_yaml(yaml_path: Option<&Path>) -> YamlConfig {
        let default_path = Path::new("pipeline-session.yaml");
        let path = yaml_path.unwrap_or(default_path);

        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_yaml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    YamlConfig::default()
                }
            },
            Err(_) => {
                tracing::debug!(
                    "No config file at {}, using env vars / defaults",
                    path.display()
                );
                YamlConfig::default()
            }
        }
    }

    /// Session tuning derived from this config
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            max_history: self.max_history,
            autosave: autosave::AutoSaveSettings {
                interval: self.autosave_interval,
                draft_ttl: self.draft_ttl,
                stale_notice_after: self.stale_notice_after,
                schema_version: autosave::SCHEMA_VERSION,
            },
            sync: sync::SyncSettings {
                client: self.client.clone(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                backoff: self.backoff,
                heartbeat_interval: self.heartbeat_interval,
                heartbeat_grace: self.heartbeat_grace,
            },
        }
    }

    /// Draft key used for this config's session
    pub fn draft_key(&self) -> String {
        format!("{}{}", session::DRAFT_KEY_PREFIX, self.session_id)
    }
}

fn default_draft_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pipeline-session")
        .join("drafts")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod config_tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_yaml_config_loading() {
        let yaml = r#"
session:
  id: pipeline-42
  max_history: 100

autosave:
  interval_secs: 10
  draft_dir: /tmp/drafts

sync:
  url: ws://localhost:9000/ws
  reconnect_base_ms: 500
  max_reconnect_attempts: 3

server:
  save_url: http://localhost:9000/api/pipelines/save
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.session.id, "pipeline-42");
        assert_eq!(config.session.max_history, 100);
        assert_eq!(config.autosave.interval_secs, 10);
        assert_eq!(config.autosave.draft_ttl_hours, 24);
        assert_eq!(config.autosave.draft_dir.as_deref(), Some("/tmp/drafts"));
        assert_eq!(config.sync.url.as_deref(), Some("ws://localhost:9000/ws"));
        assert_eq!(config.sync.reconnect_base_ms, 500);
        assert_eq!(config.sync.reconnect_max_ms, 30_000);
        assert_eq!(config.sync.max_reconnect_attempts, 3);
        assert_eq!(
            config.server.save_url.as_deref(),
            Some("http://localhost:9000/api/pipelines/save")
        );
    }

    #[test]
    fn test_yaml_defaults() {
        let config = YamlConfig::default();
        assert_eq!(config.session.id, "default");
        assert_eq!(config.session.max_history, 50);
        assert_eq!(config.autosave.interval_secs, 30);
        assert_eq!(config.autosave.stale_notice_minutes, 5);
        assert!(config.sync.url.is_none());
        assert_eq!(config.sync.client, "pipeline-editor");
        assert_eq!(config.sync.reconnect_factor, 1.5);
        assert_eq!(config.sync.max_reconnect_attempts, 10);
        assert!(config.server.save_url.is_none());
    }

    #[test]
    fn test_session_options_from_config() {
        let yaml = r#"
sync:
  reconnect_base_ms: 200
  reconnect_max_ms: 1000
  heartbeat_interval_secs: 5
"#;
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("pipeline-session.yaml");
        std::fs::write(&file_path, yaml).unwrap();

        let config = Config::from_yaml_and_env(Some(&file_path)).unwrap();
        let options = config.session_options();
        assert_eq!(options.sync.backoff.base, Duration::from_millis(200));
        assert_eq!(options.sync.backoff.delay(10), Duration::from_millis(1000));
        assert_eq!(options.sync.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(options.sync.version, env!("CARGO_PKG_VERSION"));
        assert_eq!(options.autosave.draft_ttl, chrono::Duration::hours(24));
        assert_eq!(options.autosave.schema_version, autosave::SCHEMA_VERSION);
    }

    /// Combined test for YAML file loading, env var overrides, and defaults.
    /// Runs as a single test to avoid parallel env var race conditions.
    #[test]
    fn test_yaml_and_env_lifecycle() {
        fn clear_env() {
            for var in &[
                "PIPELINE_SESSION_ID",
                "PIPELINE_SYNC_URL",
                "PIPELINE_SAVE_URL",
                "PIPELINE_DRAFT_DIR",
                "PIPELINE_AUTOSAVE_INTERVAL_SECS",
                "PIPELINE_MAX_HISTORY",
            ] {
                std::env::remove_var(var);
            }
        }

        // --- Phase 1: YAML values loaded correctly ---
        let yaml = r#"
session:
  id: yaml-session
  max_history: 20
autosave:
  interval_secs: 15
  draft_dir: /tmp/yaml-drafts
sync:
  url: ws://yaml-host/ws
server:
  save_url: http://yaml-host/save
"#;
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("pipeline-session.yaml");
        let mut file = std::fs::File::create(&file_path).unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        clear_env();

        let config = Config::from_yaml_and_env(Some(&file_path)).unwrap();
        assert_eq!(config.session_id, "yaml-session");
        assert_eq!(config.max_history, 20);
        assert_eq!(config.autosave_interval, Duration::from_secs(15));
        assert_eq!(config.draft_dir, PathBuf::from("/tmp/yaml-drafts"));
        assert_eq!(config.sync_url.as_deref(), Some("ws://yaml-host/ws"));
        assert_eq!(config.save_url.as_deref(), Some("http://yaml-host/save"));
        assert_eq!(config.draft_key(), "pipeline-draft:yaml-session");

        // --- Phase 2: Env vars override YAML ---
        std::env::set_var("PIPELINE_SESSION_ID", "env-session");
        std::env::set_var("PIPELINE_SYNC_URL", "ws://env-host/ws");
        std::env::set_var("PIPELINE_AUTOSAVE_INTERVAL_SECS", "5");
        std::env::set_var("PIPELINE_MAX_HISTORY", "not-a-number");

        let config = Config::from_yaml_and_env(Some(&file_path)).unwrap();
        assert_eq!(config.session_id, "env-session");
        assert_eq!(config.sync_url.as_deref(), Some("ws://env-host/ws"));
        assert_eq!(config.autosave_interval, Duration::from_secs(5));
        // Unparseable env value falls back to YAML
        assert_eq!(config.max_history, 20);
        // YAML value still used where no env override
        assert_eq!(config.save_url.as_deref(), Some("http://yaml-host/save"));

        clear_env();

        // --- Phase 3: No YAML file → defaults ---
        let nonexistent = Path::new("/tmp/nonexistent-pipeline-session-12345.yaml");
        let config = Config::from_yaml_and_env(Some(nonexistent)).unwrap();
        assert_eq!(config.session_id, "default");
        assert_eq!(config.max_history, 50);
        assert_eq!(config.autosave_interval, Duration::from_secs(30));
        assert!(config.sync_url.is_none());
        assert!(config.draft_dir.ends_with("pipeline-session/drafts"));
    }
}
