//! Configuration management.

use serde::Deserialize;
use std::time::Duration;

use crate::telemetry::logging::LogFormat;

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration; in-memory stores are used when absent
    #[serde(default)]
    pub database: Option<DatabaseConfig>,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Follower runtime configuration
    #[serde(default)]
    pub follower: FollowerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Log filter directive, overridden by RUST_LOG
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,

    /// Install the Prometheus recorder
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

/// Tuning for per-entity followers and the registry that owns them.
#[derive(Debug, Clone, Deserialize)]
pub struct FollowerConfig {
    /// Deadline for applying one batch (EventAsyncProcessTimeoutSeconds)
    #[serde(default = "default_event_process_timeout_secs")]
    pub event_process_timeout_secs: u64,

    /// Bounded channel capacity per entity
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Upper bound on items drained into one batch
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// How long a producer waits for channel space before the write is rejected
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Followers idle for longer than this are deactivated
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// How often the registry looks for idle followers
    #[serde(default = "default_eviction_interval_secs")]
    pub eviction_interval_secs: u64,
}

impl Default for FollowerConfig {
    fn default() -> Self {
        Self {
            event_process_timeout_secs: default_event_process_timeout_secs(),
            channel_capacity: default_channel_capacity(),
            max_batch_size: default_max_batch_size(),
            write_timeout_ms: default_write_timeout_ms(),
            idle_timeout_secs: default_idle_timeout_secs(),
            eviction_interval_secs: default_eviction_interval_secs(),
        }
    }
}

impl FollowerConfig {
    pub fn event_process_timeout(&self) -> Duration {
        Duration::from_secs(self.event_process_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs)
    }
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 5 }
fn default_log_level() -> String { "info".to_string() }
fn default_metrics_enabled() -> bool { true }
fn default_event_process_timeout_secs() -> u64 { 30 }
fn default_channel_capacity() -> usize { 10_000 }
fn default_max_batch_size() -> usize { 5_000 }
fn default_write_timeout_ms() -> u64 { 5_000 }
fn default_idle_timeout_secs() -> u64 { 600 }
fn default_eviction_interval_secs() -> u64 { 60 }

impl Config {
    /// Load configuration from the environment (`FOLLOW__SECTION__KEY`).
    pub fn load() -> crate::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("FOLLOW").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides on top.
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("FOLLOW").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }
}
