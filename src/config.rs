//! Bridge Configuration
//!
//! Handles parsing of the optional `modbridge.toml` configuration file.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Root configuration structure matching modbridge.toml.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct BridgeConfig {
    /// Framework error symbols
    #[serde(default)]
    pub errors: ErrorsConfig,

    /// Host runtime requirements
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Asynchronous operations
    #[serde(default, rename = "async")]
    pub async_ops: AsyncConfig,

    /// Diagnostics
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl BridgeConfig {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: BridgeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> ConfigResult<()> {
        let prefix = &self.errors.prefix;
        if prefix.is_empty() || prefix.contains(|c: char| c.is_whitespace() || c == '\0') {
            return Err(ConfigError::Invalid {
                field: "errors.prefix",
                reason: format!("{:?} is not a valid symbol prefix", prefix),
            });
        }
        if self.async_ops.queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "async.queue_capacity",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Framework error symbol settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorsConfig {
    /// Prefix of the framework conditions (`<prefix>-error`, `<prefix>-panic`, ...)
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_prefix() -> String {
    crate::translate::DEFAULT_PREFIX.to_string()
}

impl Default for ErrorsConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
        }
    }
}

/// Host runtime requirements.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeConfig {
    /// Oldest supported major version of the host
    #[serde(default = "default_min_major_version")]
    pub min_major_version: i64,
}

fn default_min_major_version() -> i64 {
    27
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            min_major_version: default_min_major_version(),
        }
    }
}

/// Asynchronous operation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AsyncConfig {
    /// Completed operations buffered before forwarders block
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_queue_capacity() -> usize {
    10
}

impl Default for AsyncConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Default log level filter (overridden by RUST_LOG)
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}
