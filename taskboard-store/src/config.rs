//! Configuration for the Taskboard document store server.
//!
//! Layered with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/taskboard-store/config.toml`)
//! 4. Compiled defaults

use std::path::PathBuf;

use taskboard_proto::wire::MAX_FRAME_SIZE;

/// Errors that can occur when loading store configuration.
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
// TOML file structs
// ---------------------------------------------------------------------------

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct StoreConfigFile {
    server: ServerFileConfig,
    limits: LimitsFileConfig,
}

/// `[server]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
    max_frame_size: Option<usize>,
}

/// `[limits]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct LimitsFileConfig {
    max_documents: Option<usize>,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the store server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Taskboard document store server")]
pub struct StoreCliArgs {
    /// Address to bind the store server to.
    #[arg(short, long, env = "STORE_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/taskboard-store/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Maximum inbound frame size in bytes.
    #[arg(long)]
    pub max_frame_size: Option<usize>,

    /// Maximum number of documents per collection.
    #[arg(long)]
    pub max_documents: Option<usize>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "STORE_LOG")]
    pub log_level: String,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved store server configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Address to bind the server to (e.g., `0.0.0.0:9000`).
    pub bind_addr: String,
    /// Maximum allowed inbound frame size in bytes.
    pub max_frame_size: usize,
    /// Maximum number of documents per collection.
    pub max_documents: usize,
    /// Log level filter string.
    pub log_level: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9000".to_string(),
            max_frame_size: MAX_FRAME_SIZE,
            max_documents: 10_000,
            log_level: "info".to_string(),
        }
    }
}

impl StoreConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// A missing file at the default path is treated as empty; a missing
    /// file passed via `--config` is an error.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed.
    pub fn load(cli: &StoreCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Priority: CLI > file > default.
    fn resolve(cli: &StoreCliArgs, file: &StoreConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            bind_addr: cli
                .bind
                .clone()
                .or_else(|| file.server.bind_addr.clone())
                .unwrap_or(defaults.bind_addr),
            max_frame_size: cli
                .max_frame_size
                .or(file.server.max_frame_size)
                .unwrap_or(defaults.max_frame_size),
            max_documents: cli
                .max_documents
                .or(file.limits.max_documents)
                .unwrap_or(defaults.max_documents),
            log_level: cli.log_level.clone(),
        }
    }
}

fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<StoreConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let Some(config_dir) = dirs::config_dir() else {
        return Ok(StoreConfigFile::default());
    };
    let path = config_dir.join("taskboard-store").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoreConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
