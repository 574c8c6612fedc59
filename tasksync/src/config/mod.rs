//! Configuration system for the `tasksync` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/tasksync/config.toml`)
//! 4. Compiled defaults (overridable at build time through the
//!    `TASKSYNC_API_URL` and `TASKSYNC_WS_URL` build environment)
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use tasksync_proto::task::{TaskFilter, TaskId, TaskStatus};

use crate::connection::ReconnectPolicy;
use crate::transport::websocket::DEFAULT_CONNECT_TIMEOUT;

/// Task service base URL used when nothing else is configured.
pub const DEFAULT_API_URL: &str = match option_env!("TASKSYNC_API_URL") {
    Some(url) => url,
    None => "http://localhost:8000",
};

/// Push channel URL used when nothing else is configured.
pub const DEFAULT_WS_URL: &str = match option_env!("TASKSYNC_WS_URL") {
    Some(url) => url,
    None => "ws://localhost:8000/ws",
};

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    server: ServerFileConfig,
    reconnect: ReconnectFileConfig,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    api_url: Option<String>,
    ws_url: Option<String>,
    connect_timeout_secs: Option<u64>,
}

/// `[reconnect]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ReconnectFileConfig {
    base_delay_ms: Option<u64>,
    max_attempts: Option<u32>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL of the task service REST API.
    pub api_url: String,
    /// WebSocket URL of the push channel.
    pub ws_url: String,
    /// Timeout for opening the push channel.
    pub connect_timeout: Duration,
    /// Reconnect schedule for the push channel.
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect: ReconnectPolicy::DEFAULT,
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// CLI args and env vars are parsed via `clap`. If `--config` is given
    /// and the file does not exist, returns an error. If no `--config` is
    /// given, the default path (`~/.config/tasksync/config.toml`) is tried
    /// and silently ignored if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default. This is separated from `load()` to
    /// enable unit testing without CLI parsing.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            api_url: cli
                .api_url
                .clone()
                .or_else(|| file.server.api_url.clone())
                .unwrap_or(defaults.api_url),
            ws_url: cli
                .ws_url
                .clone()
                .or_else(|| file.server.ws_url.clone())
                .unwrap_or(defaults.ws_url),
            connect_timeout: file
                .server
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            reconnect: ReconnectPolicy::new(
                file.reconnect
                    .base_delay_ms
                    .map_or(defaults.reconnect.base_delay, Duration::from_millis),
                file.reconnect
                    .max_attempts
                    .unwrap_or(defaults.reconnect.max_attempts),
            ),
        }
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Live-synchronized task list client")]
pub struct CliArgs {
    /// Base URL of the task service.
    #[arg(long, global = true, env = "TASKSYNC_API_URL")]
    pub api_url: Option<String>,

    /// WebSocket URL of the push channel.
    #[arg(long, global = true, env = "TASKSYNC_WS_URL")]
    pub ws_url: Option<String>,

    /// Path to config file (default: `~/.config/tasksync/config.toml`).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn", env = "TASKSYNC_LOG")]
    pub log_level: String,

    /// Write logs to this file instead of stderr.
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// What to do; lists every task when omitted.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// `tasksync` subcommands.
#[derive(clap::Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print the tasks matching a filter.
    List(FilterArgs),
    /// Print one task.
    Get {
        /// Task id.
        id: TaskId,
    },
    /// Create a task.
    Create {
        /// Short title.
        #[arg(long)]
        title: String,
        /// Longer description.
        #[arg(long, default_value = "")]
        description: String,
        /// Person responsible.
        #[arg(long, default_value = "")]
        assignee: String,
    },
    /// Take a task (move it to "In Progress").
    Claim {
        /// Task id.
        id: TaskId,
    },
    /// Finish a task (move it to "Done").
    Complete {
        /// Task id.
        id: TaskId,
    },
    /// Move a task to any status (`todo`, `in-progress`, `done`).
    Status {
        /// Task id.
        id: TaskId,
        /// New status.
        status: TaskStatus,
    },
    /// Delete a task.
    Delete {
        /// Task id.
        id: TaskId,
    },
    /// Print a view every time it changes, until interrupted.
    Watch(FilterArgs),
}

/// Filter options shared by `list` and `watch`.
#[derive(clap::Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterArgs {
    /// Only tasks with this status (`todo`, `in-progress`, `done`).
    #[arg(long)]
    pub status: Option<TaskStatus>,

    /// Only tasks whose title contains this text (case-insensitive).
    #[arg(long)]
    pub search: Option<String>,
}

impl FilterArgs {
    /// The view filter these options describe.
    #[must_use]
    pub fn to_filter(&self) -> TaskFilter {
        TaskFilter::new(self.status, self.search.clone())
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let Some(config_dir) = dirs::config_dir() else {
        return Ok(ConfigFile::default());
    };
    let path = config_dir.join("tasksync").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
