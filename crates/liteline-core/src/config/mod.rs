//! Application configuration with layered loading.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//!
//! 1. **Compiled defaults**: Hardcoded in struct `Default` implementations
//! 2. **Config file**: TOML file specified by `LITELINE_CONFIG` env var
//! 3. **Environment variables**: `LITELINE__*` env vars override specific fields
//!
//! # Configuration Sections
//!
//! - [`LoggingConfig`]: Log level and format
//! - [`ConnectionConfig`]: Per-peer timeout and reconnect delay
//! - [`LoadBalancerConfig`]: Retry budget inside one group
//! - [`PriorityConfig`]: Group suppression thresholds
//! - [`GroupConfig`]: Peer groups, highest priority first
//!
//! # Example
//!
//! ```toml
//! [priority]
//! max_errors_until_suppressed = 10
//! err_counter_ttl_ms = 60000
//!
//! [[groups]]
//! name = "own"
//! peers = ["tcp://10.0.0.5:4924?publicKey=n4VDnSCUuSpjnCyUk9e3QOOd6o0ItSWYbTnW3Wnn8wk="]
//!
//! [[groups]]
//! name = "fallback"
//! peers = ["tcp://10.0.0.6:4924?publicKey=n4VDnSCUuSpjnCyUk9e3QOOd6o0ItSWYbTnW3Wnn8wk="]
//! ```

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub use crate::engine::{ConnectionConfig, LoadBalancerConfig, PriorityConfig};
use crate::transport::PeerAddress;

/// Application logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "trace", "debug", "info", "warn", "error"). Defaults to `"info"`.
    pub level: String,

    /// Output format: `"json"` or `"pretty"`. Defaults to `"pretty"`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "pretty".to_string() }
    }
}

/// One priority tier: a set of interchangeable peers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupConfig {
    /// Label used in logs only.
    #[serde(default)]
    pub name: Option<String>,

    /// Peer URLs, see [`PeerAddress`].
    #[serde(default)]
    pub peers: Vec<String>,
}

impl GroupConfig {
    /// Parses every peer URL in this group.
    ///
    /// # Errors
    ///
    /// Returns a description of the first peer that fails to parse.
    pub fn parse_peers(&self) -> Result<Vec<PeerAddress>, String> {
        self.peers
            .iter()
            .map(|raw| raw.parse::<PeerAddress>().map_err(|e| format!("invalid peer '{raw}': {e}")))
            .collect()
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub balancer: LoadBalancerConfig,

    #[serde(default)]
    pub priority: PriorityConfig,

    /// Peer groups, highest priority first.
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
}

impl AppConfig {
    /// Loads configuration from a TOML file with environment variable overrides.
    ///
    /// Environment variables with the `LITELINE__` prefix can override any configuration
    /// value. Use `__` as a separator for nested fields
    /// (e.g., `LITELINE__PRIORITY__ERR_COUNTER_TTL_MS=30000`).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, parsed, or deserialized.
    pub fn from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config_builder = Config::builder()
            .set_default("logging.level", defaults.logging.level)?
            .set_default("logging.format", defaults.logging.format)?
            .set_default("connection.default_timeout_ms", defaults.connection.default_timeout_ms)?
            .set_default("connection.reconnect_delay_ms", defaults.connection.reconnect_delay_ms)?
            .set_default("connection.handshake_timeout_ms", defaults.connection.handshake_timeout_ms)?
            .set_default("balancer.default_timeout_ms", defaults.balancer.default_timeout_ms)?
            .set_default("balancer.max_errors_before_throw", defaults.balancer.max_errors_before_throw)?
            .set_default("balancer.max_attempts_until_ready", defaults.balancer.max_attempts_until_ready)?
            .set_default("balancer.retry_delay_ms", defaults.balancer.retry_delay_ms)?
            .set_default(
                "priority.max_errors_until_suppressed",
                defaults.priority.max_errors_until_suppressed,
            )?
            .set_default(
                "priority.min_available_to_unsuppress",
                defaults.priority.min_available_to_unsuppress,
            )?
            .set_default(
                "priority.require_continuous_availability",
                defaults.priority.require_continuous_availability,
            )?
            .set_default("priority.err_counter_ttl_ms", defaults.priority.err_counter_ttl_ms)?
            .add_source(File::with_name(&config_path.as_ref().to_string_lossy()).required(false))
            .add_source(Environment::with_prefix("LITELINE").separator("__"))
            .build()?;

        config_builder.try_deserialize()
    }

    /// Loads configuration from `config/config.toml` with fallback to defaults.
    ///
    /// The config file path can be overridden using the `LITELINE_CONFIG` environment variable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration cannot be loaded or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("LITELINE_CONFIG").unwrap_or_else(|_| "config/config.toml".to_string());
        Self::from_file(&config_path)
    }

    /// Parses the peers of every group, preserving priority order.
    ///
    /// # Errors
    ///
    /// Returns a description of the first peer that fails to parse.
    pub fn peer_groups(&self) -> Result<Vec<Vec<PeerAddress>>, String> {
        self.groups.iter().map(GroupConfig::parse_peers).collect()
    }

    /// Validates the configuration for correctness and consistency.
    ///
    /// Checks include:
    /// - At least two peer groups are configured
    /// - No group is empty and every peer URL parses
    /// - Logging format is either `"json"` or `"pretty"`
    ///
    /// # Errors
    ///
    /// Returns a descriptive error string if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        if self.groups.len() < 2 {
            return Err(format!(
                "At least 2 peer groups are required, got {}",
                self.groups.len()
            ));
        }

        for (index, group) in self.groups.iter().enumerate() {
            if group.peers.is_empty() {
                let label = group.name.as_deref().unwrap_or("unnamed");
                return Err(format!("Peer group {index} ({label}) has no peers"));
            }
            group.parse_peers()?;
        }

        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return Err("Logging format must be 'json' or 'pretty'".to_string());
        }

        Ok(())
    }
}
