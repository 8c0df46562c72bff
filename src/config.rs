//! Configuration module for the dotline server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::ffi::CStr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Command-line arguments for the SMTP server
#[derive(Parser, Debug)]
#[command(name = "dotline")]
#[command(author = "dotline authors")]
#[command(version = "0.1.0")]
#[command(about = "A minimal SMTP receiving server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0:8888)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Host name announced in greetings (defaults to the system host name)
    #[arg(short = 'n', long)]
    pub hostname: Option<String>,

    /// Maximum number of concurrent sessions
    #[arg(short = 's', long)]
    pub max_sessions: Option<usize>,

    /// Idle timeout for every read, in seconds
    #[arg(short = 't', long)]
    pub timeout: Option<u64>,

    /// Number of worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionToml,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// What the accept loop does when every session slot is taken.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Overflow {
    /// Stall the accept loop until a slot frees up.
    #[default]
    Wait,
    /// Answer with 421 and close the connection.
    Reject,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Host name announced to clients
    pub hostname: Option<String>,
    /// Admission pool capacity
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    /// Saturation policy
    #[serde(default)]
    pub overflow: Overflow,
    /// Number of worker threads
    pub workers: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            hostname: None,
            max_sessions: default_max_sessions(),
            backlog: default_backlog(),
            overflow: Overflow::default(),
            workers: None,
        }
    }
}

/// Per-session limits as they appear in the config file
#[derive(Debug, Deserialize)]
pub struct SessionToml {
    /// Sliding idle timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Maximum bytes accumulated for one protocol unit
    #[serde(default = "default_max_data_size")]
    pub max_data_size: usize,
    /// Round-trip ceiling per session (0 = unlimited)
    #[serde(default = "default_max_exchanges")]
    pub max_exchanges: usize,
    /// Send 552 before dropping an oversized message
    #[serde(default)]
    pub reject_oversized: bool,
}

impl Default for SessionToml {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_data_size: default_max_data_size(),
            max_exchanges: default_max_exchanges(),
            reject_oversized: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:8888".to_string()
}

fn default_max_sessions() -> usize {
    10
}

fn default_backlog() -> i32 {
    1024
}

fn default_timeout_secs() -> u64 {
    100
}

fn default_max_data_size() -> usize {
    128 * 1024 // 131072 bytes
}

fn default_max_exchanges() -> usize {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Limits applied to every session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Host name used in the greeting and HELO reply.
    pub hostname: String,
    /// Deadline applied to each read, reset before every read.
    pub timeout: Duration,
    pub max_data_size: usize,
    /// 0 disables the ceiling.
    pub max_exchanges: usize,
    pub reject_oversized: bool,
}

impl SessionConfig {
    /// Defaults with the given host name.
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            timeout: Duration::from_secs(default_timeout_secs()),
            max_data_size: default_max_data_size(),
            max_exchanges: default_max_exchanges(),
            reject_oversized: false,
        }
    }
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub max_sessions: usize,
    pub backlog: i32,
    pub overflow: Overflow,
    pub workers: Option<usize>,
    pub log_level: String,
    pub session: SessionConfig,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let hostname = cli
            .hostname
            .or(toml_config.server.hostname)
            .unwrap_or_else(system_hostname);

        let config = Config {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            max_sessions: cli
                .max_sessions
                .unwrap_or(toml_config.server.max_sessions),
            backlog: toml_config.server.backlog,
            overflow: toml_config.server.overflow,
            workers: cli.workers.or(toml_config.server.workers),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
            session: SessionConfig {
                hostname,
                timeout: Duration::from_secs(
                    cli.timeout.unwrap_or(toml_config.session.timeout_secs),
                ),
                max_data_size: toml_config.session.max_data_size,
                max_exchanges: toml_config.session.max_exchanges,
                reject_oversized: toml_config.session.reject_oversized,
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_sessions == 0 {
            return Err(ConfigError::Invalid("max_sessions must be at least 1"));
        }
        if self.workers == Some(0) {
            return Err(ConfigError::Invalid("workers must be at least 1"));
        }
        if self.session.timeout.is_zero() {
            return Err(ConfigError::Invalid("timeout must be at least 1 second"));
        }
        if self.session.max_data_size == 0 {
            return Err(ConfigError::Invalid("max_data_size must be positive"));
        }
        if self.session.hostname.is_empty() {
            return Err(ConfigError::Invalid("hostname must not be empty"));
        }
        Ok(())
    }
}

/// Host name reported by the operating system, or `localhost`.
pub fn system_hostname() -> String {
    let mut buf = [0u8; 256];
    // SAFETY: the buffer is valid for `buf.len()` bytes and gethostname
    // writes at most that many.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc != 0 {
        return "localhost".to_string();
    }
    match CStr::from_bytes_until_nul(&buf) {
        Ok(name) if !name.is_empty() => name.to_string_lossy().into_owned(),
        _ => "localhost".to_string(),
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}
