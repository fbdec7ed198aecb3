//! Configuration system for the Taskboard client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/taskboard/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use taskboard_proto::task::MAX_TITLE_LENGTH;

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

    /// The store URL is not a usable WebSocket URL.
    #[error("invalid store URL {url}: {reason}")]
    InvalidStoreUrl {
        /// The rejected URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The remote backend was selected without a store URL.
    #[error("the remote backend needs a store URL (--store-url or [store] url)")]
    MissingStoreUrl,
}

/// Which store backs the board.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process only; nothing survives the process.
    Memory,
    /// JSON file on disk.
    #[default]
    Local,
    /// `taskboard-store` server over WebSocket.
    Remote,
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    store: StoreFileConfig,
    tasks: TasksFileConfig,
}

/// `[store]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct StoreFileConfig {
    backend: Option<BackendKind>,
    url: Option<String>,
    data_file: Option<PathBuf>,
    collection: Option<String>,
    connect_timeout_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
}

/// `[tasks]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct TasksFileConfig {
    max_title_length: Option<usize>,
    creator: Option<String>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Store --
    /// Selected backend.
    pub backend: BackendKind,
    /// WebSocket URL of the store server (remote backend).
    pub store_url: Option<String>,
    /// JSON file for the local backend.
    pub data_file: PathBuf,
    /// Collection (board) name.
    pub collection: String,
    /// Timeout for connecting to the store server.
    pub connect_timeout: Duration,
    /// Timeout for a write to be acknowledged.
    pub request_timeout: Duration,

    // -- Tasks --
    /// Maximum task title length in characters.
    pub max_title_length: usize,
    /// Creator recorded on new tasks when none is given.
    pub default_creator: Option<String>,

    // -- Logging --
    /// Log level filter string.
    pub log_level: String,
    /// Log file; logs go to stderr when unset.
    pub log_file: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Local,
            store_url: None,
            data_file: default_data_file(),
            collection: "tasks".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
            max_title_length: MAX_TITLE_LENGTH,
            default_creator: None,
            log_level: "warn".to_string(),
            log_file: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed, or if the resolved store settings are unusable.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        let config = Self::resolve(cli, &file);
        config.validate()?;
        Ok(config)
    }

    /// Priority: CLI > file > default.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            backend: cli
                .backend
                .or(file.store.backend)
                .unwrap_or(defaults.backend),
            store_url: cli
                .store_url
                .clone()
                .or_else(|| file.store.url.clone()),
            data_file: cli
                .data_file
                .clone()
                .or_else(|| file.store.data_file.clone())
                .unwrap_or(defaults.data_file),
            collection: cli
                .collection
                .clone()
                .or_else(|| file.store.collection.clone())
                .unwrap_or(defaults.collection),
            connect_timeout: file
                .store
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            request_timeout: file
                .store
                .request_timeout_secs
                .map_or(defaults.request_timeout, Duration::from_secs),
            max_title_length: file
                .tasks
                .max_title_length
                .unwrap_or(defaults.max_title_length),
            default_creator: file.tasks.creator.clone(),
            log_level: cli.log_level.clone(),
            log_file: cli.log_file.clone(),
        }
    }

    /// Checks settings that only make sense together.
    fn validate(&self) -> Result<(), ConfigError> {
        match (&self.store_url, self.backend) {
            (Some(url), _) => validate_store_url(url),
            (None, BackendKind::Remote) => Err(ConfigError::MissingStoreUrl),
            (None, _) => Ok(()),
        }
    }
}

/// CLI flags shared by every subcommand.
#[derive(clap::Args, Debug, Default)]
pub struct CliArgs {
    /// Store backend to use.
    #[arg(long, value_enum, env = "TASKBOARD_BACKEND", global = true)]
    pub backend: Option<BackendKind>,

    /// WebSocket URL of the store server (e.g. `ws://127.0.0.1:9000/ws`).
    #[arg(long, env = "TASKBOARD_STORE_URL", global = true)]
    pub store_url: Option<String>,

    /// JSON file for the local backend.
    #[arg(long, env = "TASKBOARD_DATA_FILE", global = true)]
    pub data_file: Option<PathBuf>,

    /// Board (collection) name.
    #[arg(long, global = true)]
    pub collection: Option<String>,

    /// Path to config file (default: `~/.config/taskboard/config.toml`).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "warn", env = "TASKBOARD_LOG", global = true)]
    pub log_level: String,

    /// Write logs to this file instead of stderr.
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn default_data_file() -> PathBuf {
    dirs::data_dir().map_or_else(
        || PathBuf::from("taskboard.json"),
        |dir| dir.join("taskboard").join("tasks.json"),
    )
}

/// Accepts only absolute `ws://` or `wss://` URLs with a host.
fn validate_store_url(raw: &str) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidStoreUrl {
        url: raw.to_string(),
        reason,
    };
    let url = url::Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(invalid(format!("unsupported scheme {}", url.scheme())));
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    Ok(())
}

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
    let path = config_dir.join("taskboard").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
