//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/gameevents/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/gameevents/` (~/.config/gameevents/)
//! - Data: `$XDG_DATA_HOME/gameevents/` (~/.local/share/gameevents/)
//! - State/Logs: `$XDG_STATE_HOME/gameevents/` (~/.local/state/gameevents/)

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
    /// Client-side limits applied to events and user properties
    #[serde(default)]
    pub sdk: SdkConfig,

    /// Collection endpoint configuration
    #[serde(default)]
    pub collector: CollectorConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Limits the event manager reads but never changes.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct SdkConfig {
    /// Maximum length (in characters) of event names and property keys
    #[serde(default = "default_max_event_name_length")]
    pub max_event_name_length: usize,

    /// Maximum number of user properties held by a session
    #[serde(default = "default_max_property_count")]
    pub max_property_count: usize,

    /// Configured send interval in seconds.
    ///
    /// Accepted for compatibility; the recurring flush runs on a fixed
    /// period regardless of this value.
    #[serde(default = "default_send_interval")]
    pub send_interval_secs: u64,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            max_event_name_length: default_max_event_name_length(),
            max_property_count: default_max_property_count(),
            send_interval_secs: default_send_interval(),
        }
    }
}

impl SdkConfig {
    /// Configured send interval as a duration
    pub fn send_interval(&self) -> Duration {
        Duration::from_secs(self.send_interval_secs)
    }
}

fn default_max_event_name_length() -> usize {
    40
}

fn default_max_property_count() -> usize {
    25
}

fn default_send_interval() -> u64 {
    30
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

/// Collection endpoint configuration
///
/// The API key is not part of the file: it is supplied by the host at
/// `initialize` time.
#[derive(Debug, Deserialize, Clone)]
pub struct CollectorConfig {
    /// Collection server URL (e.g., `https://collect.gameevents.io`)
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Events per API call (max 100, default 50)
    #[serde(default = "default_collector_batch_size")]
    pub batch_size: usize,

    /// Events held in memory before the store persists them without an
    /// explicit flush
    #[serde(default = "default_max_buffered_events")]
    pub max_buffered_events: usize,

    /// HTTP request timeout in seconds
    #[serde(default = "default_collector_timeout")]
    pub timeout_secs: u64,

    /// Max retry attempts for transient failures
    #[serde(default = "default_collector_max_retries")]
    pub max_retries: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            batch_size: default_collector_batch_size(),
            max_buffered_events: default_max_buffered_events(),
            timeout_secs: default_collector_timeout(),
            max_retries: default_collector_max_retries(),
        }
    }
}

impl CollectorConfig {
    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        let url = self.server_url.trim();
        if url.is_empty() {
            return Err(Error::Config("collector.server_url is required".to_string()));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "collector.server_url must be an http(s) URL, got {:?}",
                url
            )));
        }
        if self.batch_size == 0 || self.batch_size > 100 {
            return Err(Error::Config(
                "collector.batch_size must be between 1 and 100".to_string(),
            ));
        }
        if self.max_buffered_events == 0 {
            return Err(Error::Config(
                "collector.max_buffered_events must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Base URL without a trailing slash
    pub fn base_url(&self) -> String {
        self.server_url.trim().trim_end_matches('/').to_string()
    }

    /// HTTP request timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_server_url() -> String {
    "https://collect.gameevents.io".to_string()
}

fn default_collector_batch_size() -> usize {
    50
}

fn default_max_buffered_events() -> usize {
    100
}

fn default_collector_timeout() -> u64 {
    30
}

fn default_collector_max_retries() -> usize {
    3
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

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("failed to parse config: {}", e)))
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/gameevents/config.toml` (~/.config/gameevents/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("gameevents").join("config.toml")
    }

    /// Returns the data directory path (for the local event store)
    ///
    /// `$XDG_DATA_HOME/gameevents/` (~/.local/share/gameevents/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("gameevents")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/gameevents/` (~/.local/state/gameevents/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("gameevents")
    }

    /// Returns the event store file path
    ///
    /// `$XDG_DATA_HOME/gameevents/events.db` (~/.local/share/gameevents/events.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("events.db")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/gameevents/gameevents.log`
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("gameevents.log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.sdk.max_event_name_length, 40);
        assert_eq!(config.sdk.max_property_count, 25);
        assert_eq!(config.sdk.send_interval(), Duration::from_secs(30));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[sdk]
max_event_name_length = 24
max_property_count = 10

[collector]
server_url = "https://collect.example.com/"
batch_size = 20

[logging]
level = "debug"
"#;
        let config = Config::parse(toml).unwrap();

        assert_eq!(config.sdk.max_event_name_length, 24);
        assert_eq!(config.sdk.max_property_count, 10);
        assert_eq!(config.sdk.send_interval_secs, 30);
        assert_eq!(config.collector.base_url(), "https://collect.example.com");
        assert_eq!(config.collector.batch_size, 20);
        assert_eq!(config.collector.max_retries, 3);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_collector_config_defaults() {
        let config = CollectorConfig::default();
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.max_buffered_events, 100);
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.max_retries, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_collector_config_validation() {
        let config = CollectorConfig {
            server_url: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = CollectorConfig {
            server_url: "collect.example.com".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = CollectorConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = CollectorConfig {
            batch_size: 101,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_missing_file_is_config_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = Config::load_from(&dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_paths_are_namespaced() {
        assert!(Config::config_path().ends_with("gameevents/config.toml"));
        assert!(Config::database_path().ends_with("gameevents/events.db"));
        assert!(Config::log_path().ends_with("gameevents.log"));
    }
}
