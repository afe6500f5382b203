//! Configuration management for trackpoint.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Directory name under the platform config dir.
const APP_DIR_NAME: &str = "trackpoint";

/// Prefix for environment overrides, e.g. `TRACKPOINT_SERVER__BIND_ADDRESS`.
const ENV_PREFIX: &str = "TRACKPOINT_";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `TRACKPOINT_`, sections split on `__`)
/// 2. TOML config file at `~/.config/trackpoint/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listener configuration.
    pub server: ServerConfig,
    /// Persisted collections.
    pub storage: StorageConfig,
    /// In-memory history ring.
    pub history: HistoryConfig,
    /// Console monitor.
    pub monitor: MonitorConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the ingestion endpoint binds to.
    pub bind_address: String,
    /// Largest request message accepted, in bytes.
    pub max_message_bytes: usize,
}

/// On-disk representation of the JSON collections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageFormat {
    /// One pretty-printed JSON array per file, rewritten on every append.
    #[default]
    Array,
    /// One compact JSON record per line, appended in place.
    JsonLines,
}

/// Storage-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding every persisted file.
    /// Defaults to the working directory.
    pub data_dir: Option<PathBuf>,
    /// Location collection file name.
    pub location_file: String,
    /// Human-readable location log file name.
    pub location_log_file: String,
    /// Traffic collection file name.
    pub traffic_file: String,
    /// Telephony collection file name (written by another process).
    pub telephony_file: String,
    /// Collection file format.
    pub format: StorageFormat,
}

/// History ring configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Maximum number of samples kept in memory.
    pub capacity: usize,
    /// Number of entries returned by `show`.
    pub show_limit: usize,
}

/// Console monitor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Dashboard refresh period in milliseconds.
    pub refresh_interval_ms: u64,
    /// Rows in the recent-records table.
    pub rows: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_message_bytes: 1024 * 1024,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            location_file: "location_data.json".to_string(),
            location_log_file: "location_log.txt".to_string(),
            traffic_file: "traffic_data.json".to_string(),
            telephony_file: "telephony_data.json".to_string(),
            format: StorageFormat::Array,
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            show_limit: 10,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 1000,
            rows: 20,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(APP_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        self.bind_addr()?;

        let positive = [
            ("server.max_message_bytes", self.server.max_message_bytes),
            ("history.capacity", self.history.capacity),
            ("history.show_limit", self.history.show_limit),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(Error::ConfigValidation {
                    message: format!("{name} must be greater than 0"),
                });
            }
        }

        if self.monitor.refresh_interval_ms == 0 {
            return Err(Error::ConfigValidation {
                message: "monitor.refresh_interval_ms must be greater than 0".to_string(),
            });
        }

        let files = [
            &self.storage.location_file,
            &self.storage.location_log_file,
            &self.storage.traffic_file,
            &self.storage.telephony_file,
        ];
        if files.iter().any(|name| name.trim().is_empty()) {
            return Err(Error::ConfigValidation {
                message: "storage file names must not be empty".to_string(),
            });
        }

        Ok(())
    }

    /// Parse the configured bind address.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the address is not `host:port`.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.server
            .bind_address
            .parse()
            .map_err(|_| Error::ConfigValidation {
                message: format!("invalid bind_address: {}", self.server.bind_address),
            })
    }

    /// Directory holding the persisted files, resolving the default.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.storage
            .data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Path of the location collection.
    #[must_use]
    pub fn location_path(&self) -> PathBuf {
        self.data_dir().join(&self.storage.location_file)
    }

    /// Path of the human-readable location log.
    #[must_use]
    pub fn location_log_path(&self) -> PathBuf {
        self.data_dir().join(&self.storage.location_log_file)
    }

    /// Path of the traffic collection.
    #[must_use]
    pub fn traffic_path(&self) -> PathBuf {
        self.data_dir().join(&self.storage.traffic_file)
    }

    /// Path of the telephony collection.
    #[must_use]
    pub fn telephony_path(&self) -> PathBuf {
        self.data_dir().join(&self.storage.telephony_file)
    }

    /// Get the dashboard refresh interval as a Duration.
    #[must_use]
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.monitor.refresh_interval_ms)
    }
}
