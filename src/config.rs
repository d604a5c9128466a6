//! # Configuration Management
//!
//! Centralized configuration for the connection-manager client.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` / `from_toml()`
//! - Environment variables via `from_env()` (prefix `CM_PROTOCOL_`)
//! - Direct instantiation with defaults
//!
//! Durations are written as integer milliseconds.

use crate::error::{ProtocolError, Result};
use crate::protocol::emsg::EUniverse;
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Max allowed frame payload size (16 MB)
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Directory service endpoint returning the current server list
pub const DEFAULT_DIRECTORY_URL: &str = "https://api.steampowered.com/ISteamDirectory/GetCMList/v1/";

const ENV_PREFIX: &str = "CM_PROTOCOL_";

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct CmConfig {
    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub directory: DirectoryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl CmConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables on top of the defaults.
    ///
    /// Unparseable values are reported rather than silently ignored.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_env_with<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(val) = var("CONNECTION_TIMEOUT_MS") {
            config.client.connection_timeout = Duration::from_millis(parse_env("CONNECTION_TIMEOUT_MS", &val)?);
        }
        if let Some(val) = var("WRITE_QUEUE_CAPACITY") {
            config.client.write_queue_capacity = parse_env("WRITE_QUEUE_CAPACITY", &val)?;
        }
        if let Some(val) = var("EVENT_QUEUE_CAPACITY") {
            config.client.event_queue_capacity = parse_env("EVENT_QUEUE_CAPACITY", &val)?;
        }
        if let Some(val) = var("MAX_PAYLOAD_SIZE") {
            config.client.max_payload_size = parse_env("MAX_PAYLOAD_SIZE", &val)?;
        }
        if let Some(val) = var("DIRECTORY_URL") {
            config.directory.url = val;
        }
        if let Some(val) = var("CELL_ID") {
            config.directory.cell_id = parse_env("CELL_ID", &val)?;
        }
        if let Some(val) = var("DIRECTORY_TIMEOUT_MS") {
            config.directory.request_timeout = Duration::from_millis(parse_env("DIRECTORY_TIMEOUT_MS", &val)?);
        }
        if let Some(val) = var("FETCH_ON_CONNECT") {
            config.directory.fetch_on_connect = parse_env("FETCH_ON_CONNECT", &val)?;
        }
        if let Some(val) = var("LOG_LEVEL") {
            config.logging.log_level = val
                .parse::<Level>()
                .map_err(|_| ProtocolError::ConfigError(format!("Invalid log level: {val}")))?;
        }
        if let Some(val) = var("LOG_JSON") {
            config.logging.json_format = parse_env("LOG_JSON", &val)?;
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.client.validate());
        errors.extend(self.directory.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ProtocolError::ConfigError(format!("Invalid value for {ENV_PREFIX}{name}: '{value}'")))
}

/// Session configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Timeout for the TCP connect
    #[serde(with = "duration_serde")]
    pub connection_timeout: Duration,

    /// Capacity of the outgoing message queue
    pub write_queue_capacity: usize,

    /// Capacity of the event stream buffer
    pub event_queue_capacity: usize,

    /// Largest frame payload accepted or sent
    pub max_payload_size: usize,

    /// Realm whose key the handshake accepts
    pub universe: EUniverse,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connection_timeout: timeout::DEFAULT_TIMEOUT,
            write_queue_capacity: 32,
            event_queue_capacity: 64,
            max_payload_size: MAX_PAYLOAD_SIZE,
            universe: EUniverse::Public,
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.connection_timeout.as_millis() < 100 {
            errors.push("Connection timeout too short (minimum: 100ms)".to_string());
        } else if self.connection_timeout.as_secs() > 300 {
            errors.push("Connection timeout too long (maximum: 300s)".to_string());
        }

        if self.write_queue_capacity == 0 {
            errors.push("Write queue capacity must be greater than 0".to_string());
        }
        if self.event_queue_capacity == 0 {
            errors.push("Event queue capacity must be greater than 0".to_string());
        }

        if self.max_payload_size < 1024 {
            errors.push("Max payload size too small (minimum: 1 KB)".to_string());
        } else if self.max_payload_size > 100 * 1024 * 1024 {
            errors.push(format!(
                "Max payload size too large: {} bytes (maximum recommended: 100 MB)",
                self.max_payload_size
            ));
        }

        if self.universe == EUniverse::Invalid {
            errors.push("Universe cannot be 'invalid'".to_string());
        }

        errors
    }
}

/// Server directory configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Directory service URL
    pub url: String,

    /// Geographic cell hint sent as `cellId`
    pub cell_id: u32,

    /// Timeout for the directory HTTP request
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,

    /// Fetch the dynamic list before the first connect if not yet initialized
    pub fetch_on_connect: bool,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DIRECTORY_URL.to_string(),
            cell_id: 0,
            request_timeout: Duration::from_secs(10),
            fetch_on_connect: true,
        }
    }
}

impl DirectoryConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.url.is_empty() {
            errors.push("Directory URL cannot be empty".to_string());
        } else if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            errors.push(format!(
                "Invalid directory URL: '{}' (expected http:// or https://)",
                self.url
            ));
        }

        if self.request_timeout.as_millis() < 100 {
            errors.push("Directory request timeout too short (minimum: 100ms)".to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("cm-protocol"),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        level.as_str().to_ascii_lowercase().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
