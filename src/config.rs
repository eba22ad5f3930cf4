//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//! Every section is optional; missing values take their defaults.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ElrsLinkError, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,

    #[serde(default)]
    pub link: LinkConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    /// May be empty when the port comes from the command line
    #[serde(default)]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

/// Link supervisor timing
#[derive(Debug, Deserialize, Clone)]
pub struct LinkConfig {
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    #[serde(default = "default_status_log_interval_ms")]
    pub status_log_interval_ms: u64,
}

/// Telemetry recording configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    #[serde(default = "default_max_records_per_file")]
    pub max_records_per_file: usize,

    #[serde(default = "default_max_files_to_keep")]
    pub max_files_to_keep: usize,
}

// Default value functions
fn default_baud_rate() -> u32 { 921_600 }

fn default_handshake_timeout_ms() -> u64 { 5000 }
fn default_shutdown_grace_ms() -> u64 { 100 }
fn default_status_log_interval_ms() -> u64 { 4000 }

fn default_log_dir() -> PathBuf { PathBuf::from("./logs") }
fn default_max_records_per_file() -> usize { 10_000 }
fn default_max_files_to_keep() -> usize { 10 }

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: default_baud_rate(),
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: default_handshake_timeout_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            status_log_interval_ms: default_status_log_interval_ms(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            log_dir: default_log_dir(),
            max_records_per_file: default_max_records_per_file(),
            max_files_to_keep: default_max_files_to_keep(),
        }
    }
}

impl LinkConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn status_log_interval(&self) -> Duration {
        Duration::from_millis(self.status_log_interval_ms)
    }
}

fn invalid(message: impl std::fmt::Display) -> ElrsLinkError {
    ElrsLinkError::Config(toml::de::Error::custom(message))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use elrs_link::config::Config;
    ///
    /// let config = Config::load("elrs-link.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every value is within its accepted range
    pub fn validate(&self) -> Result<()> {
        if self.serial.baud_rate == 0 {
            return Err(invalid("baud_rate must be greater than 0"));
        }

        let link = &self.link;
        if link.handshake_timeout_ms == 0 || link.handshake_timeout_ms > 60_000 {
            return Err(invalid("handshake_timeout_ms must be between 1 and 60000"));
        }

        if link.shutdown_grace_ms > 5000 {
            return Err(invalid("shutdown_grace_ms must be between 0 and 5000"));
        }

        if link.status_log_interval_ms == 0 || link.status_log_interval_ms > 60_000 {
            return Err(invalid("status_log_interval_ms must be between 1 and 60000"));
        }

        // Recording limits only matter when recording
        let telemetry = &self.telemetry;
        if telemetry.enabled {
            if telemetry.log_dir.as_os_str().is_empty() {
                return Err(invalid("telemetry log_dir cannot be empty when enabled"));
            }

            if telemetry.max_records_per_file == 0 {
                return Err(invalid("max_records_per_file must be greater than 0"));
            }

            if telemetry.max_files_to_keep == 0 {
                return Err(invalid("max_files_to_keep must be greater than 0"));
            }
        }

        Ok(())
    }
}
