//! Client configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via HIDOCK_CONFIG)
//! 3. Environment variables

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default read size per bulk transfer (50 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 50 * 1024;

/// Minimum read size (512 bytes, one full-speed bulk packet batch).
pub const MIN_READ_BUFFER_SIZE: usize = 512;

/// Maximum read size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Protocol engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Timeout for single-shot commands in milliseconds.
    pub command_timeout_ms: u64,
    /// Timeout for listings, downloads and firmware uploads in milliseconds.
    pub transfer_timeout_ms: u64,
    /// Quiet period after the last read before decoding, in milliseconds.
    pub debounce_ms: u64,
    /// Quiet period while a file transfer is in flight, in milliseconds.
    pub transfer_debounce_ms: u64,
    /// Interval between transport liveness checks in milliseconds.
    pub liveness_interval_ms: u64,
    /// Maximum bytes requested per bulk read.
    pub read_buffer_size: usize,
    /// Bulk OUT endpoint number.
    pub endpoint_out: u8,
    /// Bulk IN endpoint number.
    pub endpoint_in: u8,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: 5_000,
            transfer_timeout_ms: 600_000,
            debounce_ms: 10,
            transfer_debounce_ms: 1_000,
            liveness_interval_ms: 1_000,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            endpoint_out: 1,
            endpoint_in: 2,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, then applies environment variable
    /// overrides and validates the result.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("HIDOCK_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: ClientConfig = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }

    /// Applies `HIDOCK_*` environment variable overrides. Call
    /// [`validate`](Self::validate) afterwards.
    pub fn apply_env_overrides(&mut self) {
        fn parse_env<T: std::str::FromStr>(name: &str, target: &mut T) {
            if let Ok(value) = std::env::var(name) {
                if let Ok(parsed) = value.parse() {
                    *target = parsed;
                }
            }
        }

        parse_env("HIDOCK_COMMAND_TIMEOUT_MS", &mut self.command_timeout_ms);
        parse_env("HIDOCK_TRANSFER_TIMEOUT_MS", &mut self.transfer_timeout_ms);
        parse_env("HIDOCK_DEBOUNCE_MS", &mut self.debounce_ms);
        parse_env("HIDOCK_TRANSFER_DEBOUNCE_MS", &mut self.transfer_debounce_ms);
        parse_env("HIDOCK_LIVENESS_INTERVAL_MS", &mut self.liveness_interval_ms);

        let mut read_size = self.read_buffer_size;
        parse_env("HIDOCK_READ_BUFFER_SIZE", &mut read_size);
        self.read_buffer_size = read_size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
    }

    /// Validates value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command_timeout_ms == 0 || self.transfer_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "timeouts must be non-zero".to_string(),
            ));
        }
        if self.liveness_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "liveness_interval_ms must be non-zero".to_string(),
            ));
        }
        if self.endpoint_out == self.endpoint_in {
            return Err(ConfigError::ValidationError(format!(
                "endpoint_out and endpoint_in are both {}",
                self.endpoint_out
            )));
        }
        Ok(())
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_transfer_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_debounce(mut self, short: Duration, transfer: Duration) -> Self {
        self.debounce_ms = short.as_millis() as u64;
        self.transfer_debounce_ms = transfer.as_millis() as u64;
        self
    }

    pub fn with_liveness_interval(mut self, interval: Duration) -> Self {
        self.liveness_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn transfer_debounce(&self) -> Duration {
        Duration::from_millis(self.transfer_debounce_ms)
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_interval_ms)
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
