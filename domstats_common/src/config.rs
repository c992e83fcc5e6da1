//! Configuration loading traits and types.
//!
//! This module provides a standardized way to load TOML configuration files
//! for the domstats daemon and its tooling.
//!
//! # Usage
//!
//! ```rust,no_run
//! use domstats_common::config::{ConfigLoader, DaemonConfig, ConfigError};
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = DaemonConfig::load(Path::new("domstatsd.toml"))?;
//!     config.validate()?;
//!     println!("rrd root: {}", config.paths.rrd_root.display());
//!     Ok(())
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::consts;

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose, detailed tracing information.
    Trace,
    /// Debug information useful during development.
    Debug,
    /// General information about application operation.
    #[default]
    Info,
    /// Warning messages for potentially problematic situations.
    Warn,
    /// Error messages for serious problems.
    Error,
}

impl LogLevel {
    /// The equivalent `tracing` level.
    pub fn as_level(&self) -> tracing::Level {
        match self {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// Logging table of the daemon configuration.
///
/// # TOML Example
///
/// ```toml
/// [log]
/// level = "debug"
/// json = false
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub level: LogLevel,

    /// Emit JSON-formatted log lines instead of the compact format.
    #[serde(default)]
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: LogLevel::default(),
            json: false,
        }
    }
}

/// Filesystem locations the daemon works with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory holding archived RRDs.
    #[serde(default = "default_rrd_root")]
    pub rrd_root: PathBuf,

    /// Directory local plugins publish payload files into.
    #[serde(default = "default_plugin_dir")]
    pub plugin_dir: PathBuf,

    /// Directory where granted guest pages are materialised.
    #[serde(default = "default_grant_dir")]
    pub grant_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        PathsConfig {
            rrd_root: default_rrd_root(),
            plugin_dir: default_plugin_dir(),
            grant_dir: default_grant_dir(),
        }
    }
}

/// Sampling cadence of the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Length of one sampling cycle in seconds.
    #[serde(default = "default_cycle_seconds")]
    pub cycle_seconds: f64,

    /// Interval between periodic RRD backups, in seconds.
    #[serde(default = "default_backup_interval")]
    pub backup_interval_seconds: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        SamplingConfig {
            cycle_seconds: default_cycle_seconds(),
            backup_interval_seconds: default_backup_interval(),
        }
    }
}

/// Pool membership of this host.
///
/// A standalone host is its own master; a pool member forwards guest RRDs
/// to the master named here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Whether this host is the pool master.
    #[serde(default = "default_true")]
    pub is_master: bool,

    /// Address of the pool master, required for non-masters.
    #[serde(default)]
    pub master_address: Option<String>,

    /// Shared pool secret presented when fetching RRDs from the master.
    #[serde(default)]
    pub secret: Option<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            is_master: true,
            master_address: None,
            secret: None,
        }
    }
}

/// Daemon configuration, one table per concern.
///
/// Every table and every field has a default, so an empty file (or an
/// absent table) yields a standalone-master daemon with stock paths.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Logging table.
    #[serde(default)]
    pub log: LogConfig,

    /// Filesystem locations.
    #[serde(default)]
    pub paths: PathsConfig,

    /// Sampling cadence.
    #[serde(default)]
    pub sampling: SamplingConfig,

    /// Pool membership.
    #[serde(default)]
    pub pool: PoolConfig,
}

impl DaemonConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if:
    /// - `cycle_seconds` is not strictly positive
    /// - `backup_interval_seconds` is zero
    /// - the host is not a master but `master_address` is unset
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.sampling.cycle_seconds > 0.0) {
            return Err(ConfigError::ValidationError(
                "sampling.cycle_seconds must be positive".to_string(),
            ));
        }
        if self.sampling.backup_interval_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "sampling.backup_interval_seconds must be at least 1".to_string(),
            ));
        }
        if !self.pool.is_master && self.pool.master_address.is_none() {
            return Err(ConfigError::ValidationError(
                "pool.master_address is required when pool.is_master = false".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_rrd_root() -> PathBuf {
    PathBuf::from(consts::DEFAULT_RRD_ROOT)
}

fn default_plugin_dir() -> PathBuf {
    PathBuf::from(consts::DEFAULT_PLUGIN_DIR)
}

fn default_grant_dir() -> PathBuf {
    PathBuf::from(consts::DEFAULT_GRANT_DIR)
}

fn default_cycle_seconds() -> f64 {
    consts::DEFAULT_CYCLE_SECONDS
}

fn default_backup_interval() -> u64 {
    consts::DEFAULT_BACKUP_INTERVAL_SECONDS
}

fn default_true() -> bool {
    true
}

/// Trait for loading configuration from TOML files.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
/// - Semantic validation is a separate step (`DaemonConfig::validate`)
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

// Blanket implementation for all types that implement DeserializeOwned.
// This allows any serde-deserializable struct to use ConfigLoader.
impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}
