//! Configuration management
//!
//! This module handles loading, saving, and migrating the loft configuration file.
//! The configuration file is stored in TOML format at ~/.config/loft/config.toml,
//! or under `$LOFT_CONFIG_DIR` when that variable is set.
//!
//! PROTECTED FILE: Changes to schema_version require migration support.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::profile::Profile;

/// Current configuration schema version
pub const SCHEMA_VERSION: u32 = 1;

/// Environment variable overriding the configuration directory
pub const CONFIG_DIR_ENV: &str = "LOFT_CONFIG_DIR";

/// Default output format
const DEFAULT_OUTPUT: &str = "human";

/// Default number of concurrently running transfers
pub const DEFAULT_MAX_PARALLEL: usize = 2;

/// Objects at or above this size use multipart transfer: 32 MiB
pub const DEFAULT_MULTIPART_THRESHOLD: u64 = 32 * 1024 * 1024;

/// Part size for multipart transfer: 32 MiB
pub const DEFAULT_CHUNK_SIZE: u64 = 32 * 1024 * 1024;

/// Parts in flight per multipart transfer
pub const DEFAULT_FAN_OUT: usize = 8;

/// Minimum spacing between worker progress events
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 120;

/// How long shutdown waits for each running worker
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 1500;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Schema version for migration support
    pub schema_version: u32,

    /// Default settings
    #[serde(default)]
    pub defaults: Defaults,

    /// Transfer engine settings
    #[serde(default)]
    pub transfer: TransferConfig,

    /// Configured credential profiles
    #[serde(default)]
    pub profiles: Vec<Profile>,
}

/// Default settings for CLI behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Defaults {
    /// Output format: "human" or "json"
    #[serde(default = "default_output")]
    pub output: String,

    /// Show progress bars
    #[serde(default = "default_true")]
    pub progress: bool,

    /// Profile used when a path does not name one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
}

fn default_output() -> String {
    DEFAULT_OUTPUT.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            progress: true,
            profile: None,
        }
    }
}

/// Retry policy for rate-limited store calls
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial backoff duration in milliseconds
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff duration in milliseconds
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff() -> u64 {
    100
}

fn default_max_backoff() -> u64 {
    10_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

impl RetryConfig {
    /// Upper bound of the backoff window before the given retry (1-based).
    ///
    /// Doubles per attempt starting at `initial_backoff_ms`, capped at
    /// `max_backoff_ms`. The gateway draws the actual delay uniformly from
    /// `[0, ceiling]`.
    pub fn backoff_ceiling(&self, retry: u32) -> Duration {
        let shift = retry.saturating_sub(1).min(20);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Transfer engine settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferConfig {
    /// Maximum number of transfers running at once
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Objects at or above this size use multipart transfer
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold: u64,

    /// Part size for multipart transfer
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Parts in flight per multipart transfer
    #[serde(default = "default_fan_out")]
    pub fan_out: usize,

    /// Minimum spacing between progress events of one task
    #[serde(default = "default_progress_interval")]
    pub progress_interval_ms: u64,

    /// How long shutdown waits for each running worker to settle
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_ms: u64,

    /// Retry policy for rate-limited calls
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_max_parallel() -> usize {
    DEFAULT_MAX_PARALLEL
}

fn default_multipart_threshold() -> u64 {
    DEFAULT_MULTIPART_THRESHOLD
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

fn default_fan_out() -> usize {
    DEFAULT_FAN_OUT
}

fn default_progress_interval() -> u64 {
    DEFAULT_PROGRESS_INTERVAL_MS
}

fn default_shutdown_timeout() -> u64 {
    DEFAULT_SHUTDOWN_TIMEOUT_MS
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            multipart_threshold: default_multipart_threshold(),
            chunk_size: default_chunk_size(),
            fan_out: default_fan_out(),
            progress_interval_ms: default_progress_interval(),
            shutdown_timeout_ms: default_shutdown_timeout(),
            retry: RetryConfig::default(),
        }
    }
}

impl TransferConfig {
    pub fn max_parallel(mut self, n: usize) -> Self {
        self.max_parallel = n.max(1);
        self
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            defaults: Defaults::default(),
            transfer: TransferConfig::default(),
            profiles: Vec::new(),
        }
    }
}

/// Configuration manager handles loading and saving config
#[derive(Debug)]
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager with the default config path
    pub fn new() -> Result<Self> {
        let config_dir = match std::env::var_os(CONFIG_DIR_ENV) {
            Some(dir) => PathBuf::from(dir),
            None => dirs::config_dir()
                .ok_or_else(|| Error::Config("Could not determine config directory".into()))?
                .join("loft"),
        };
        Ok(Self {
            config_path: config_dir.join("config.toml"),
        })
    }

    /// Create a ConfigManager with a custom path (useful for testing)
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the configuration file path
    pub fn config_path(&self) -> &PathBuf {
        &self.config_path
    }

    /// Load configuration from disk
    ///
    /// If the configuration file doesn't exist, returns a default configuration.
    /// If the schema version doesn't match, attempts migration.
    pub fn load(&self) -> Result<Config> {
        if !self.config_path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(&self.config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        if config.schema_version < SCHEMA_VERSION {
            config = self.migrate(config)?;
        } else if config.schema_version > SCHEMA_VERSION {
            return Err(Error::Config(format!(
                "Configuration file version {} is newer than supported version {}. Please upgrade loft.",
                config.schema_version, SCHEMA_VERSION
            )));
        }

        Ok(config)
    }

    /// Save configuration to disk
    ///
    /// Creates parent directories if they don't exist.
    /// Sets file permissions to 600 (owner read/write only) since profiles hold secrets.
    pub fn save(&self, config: &Config) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(config)?;
        std::fs::write(&self.config_path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&self.config_path, permissions)?;
        }

        Ok(())
    }

    /// Migrate configuration from older schema version
    fn migrate(&self, config: Config) -> Result<Config> {
        let mut config = config;
        tracing::info!(
            from = config.schema_version,
            to = SCHEMA_VERSION,
            "Migrating configuration"
        );
        config.schema_version = SCHEMA_VERSION;
        Ok(config)
    }
}
