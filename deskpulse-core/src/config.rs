//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/deskpulse/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/deskpulse/` (~/.config/deskpulse/)
//! - Data: `$XDG_DATA_HOME/deskpulse/` (~/.local/share/deskpulse/)
//! - State/Logs: `$XDG_STATE_HOME/deskpulse/` (~/.local/state/deskpulse/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Remote collector endpoint settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Upload cadence and batching
    #[serde(default)]
    pub sync: SyncConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Remote collector configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    /// API root, without trailing slash
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Fixed service identifier sent with every request
    #[serde(default = "default_service")]
    pub service: String,

    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            service: default_service(),
            timeout_secs: default_timeout(),
        }
    }
}

impl ApiConfig {
    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        let url = self.base_url.trim();
        if url.is_empty() {
            return Err(Error::Config("api.base_url must not be empty".to_string()));
        }
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(Error::Config(format!(
                "api.base_url must be an http(s) URL, got {:?}",
                url
            )));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config(
                "api.timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Request timeout as a [`Duration`]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_base_url() -> String {
    "https://www.timecamp.com/third_party/api".to_string()
}

fn default_service() -> String {
    "timecamp-desktop".to_string()
}

fn default_timeout() -> u64 {
    30
}

/// Upload scheduling configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Seconds between regular sync ticks
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Sessions per upload request
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,

    /// Consecutive immediate follow-up ticks allowed while draining a backlog
    #[serde(default = "default_max_follow_ups")]
    pub max_follow_ups: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            max_batch: default_max_batch(),
            max_follow_ups: default_max_follow_ups(),
        }
    }
}

impl SyncConfig {
    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 {
            return Err(Error::Config(
                "sync.interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.max_batch == 0 || self.max_batch > 1000 {
            return Err(Error::Config(
                "sync.max_batch must be between 1 and 1000".to_string(),
            ));
        }
        Ok(())
    }

    /// Base tick period as a [`Duration`]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

fn default_interval() -> u64 {
    30
}

fn default_max_batch() -> usize {
    100
}

fn default_max_follow_ups() -> u32 {
    10
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.api.validate()?;
        self.sync.validate()
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/deskpulse/config.toml` (~/.config/deskpulse/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("deskpulse").join("config.toml")
    }

    /// Returns the data directory path (for SQLite database)
    ///
    /// `$XDG_DATA_HOME/deskpulse/` (~/.local/share/deskpulse/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("deskpulse")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/deskpulse/` (~/.local/state/deskpulse/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("deskpulse")
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/deskpulse/data.db` (~/.local/share/deskpulse/data.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("data.db")
    }

    /// Returns the log file path
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("deskpulse.log")
    }
}
