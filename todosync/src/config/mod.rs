//! Configuration system for the `todosync` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/todosync/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use todosync_proto::task::{MAX_TASK_TITLE_LENGTH, UserId};

use crate::backend::memory::DEFAULT_TABLE;
use crate::sync::{DEFAULT_CHANNEL_CAPACITY, SyncConfig};
use crate::tasks::reconciler::DEFAULT_REQUEST_TIMEOUT;

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
    session: SessionFileConfig,
    sync: SyncFileConfig,
    tasks: TasksFileConfig,
}

/// `[session]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SessionFileConfig {
    user_id: Option<String>,
}

/// `[sync]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SyncFileConfig {
    table: Option<String>,
    channel_capacity: Option<usize>,
    request_timeout_secs: Option<u64>,
}

/// `[tasks]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct TasksFileConfig {
    max_title_len: Option<usize>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// User to sign in as on startup.
    pub user_id: Option<UserId>,
    /// Table whose change feed is subscribed to.
    pub table: String,
    /// Channel capacity for command/event mpsc channels.
    pub channel_capacity: usize,
    /// Upper bound on any single task store call.
    pub request_timeout: Duration,
    /// Maximum task title length in characters.
    pub max_title_len: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_id: None,
            table: DEFAULT_TABLE.to_string(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_title_len: MAX_TASK_TITLE_LENGTH,
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// Otherwise the default path (`~/.config/todosync/config.toml`) is tried
    /// and silently ignored if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Priority: CLI > file > default.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            user_id: cli
                .user_id
                .clone()
                .or_else(|| file.session.user_id.clone())
                .filter(|u| !u.trim().is_empty())
                .map(UserId::new),
            table: cli
                .table
                .clone()
                .or_else(|| file.sync.table.clone())
                .unwrap_or(defaults.table),
            channel_capacity: file
                .sync
                .channel_capacity
                .filter(|&c| c > 0)
                .unwrap_or(defaults.channel_capacity),
            request_timeout: file
                .sync
                .request_timeout_secs
                .filter(|&s| s > 0)
                .map_or(defaults.request_timeout, Duration::from_secs),
            max_title_len: file
                .tasks
                .max_title_len
                .filter(|&n| n > 0)
                .unwrap_or(defaults.max_title_len),
        }
    }

    /// Runtime settings for [`crate::sync::spawn_sync`].
    #[must_use]
    pub fn to_sync_config(&self) -> SyncConfig {
        SyncConfig {
            table: self.table.clone(),
            channel_capacity: self.channel_capacity,
        }
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Personal task list kept in sync with a change feed")]
pub struct CliArgs {
    /// Sign in as this user on startup.
    #[arg(long, env = "TODOSYNC_USER")]
    pub user_id: Option<String>,

    /// Path to config file (default: `~/.config/todosync/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Table to subscribe to.
    #[arg(long)]
    pub table: Option<String>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "TODOSYNC_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/todosync.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
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
    let path = config_dir.join("todosync").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
