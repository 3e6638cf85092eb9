//! Configuration types.
//!
//! The embedding proxy passes configuration as a struct; serde support is
//! provided so the same types can be embedded in a TOML config file.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Hard cap on `reconnect.max_attempts`.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Hard cap on `reconnect.delay`.
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);

/// Selection algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlgorithmKind {
    /// Round-robin distribution.
    #[default]
    RoundRobin,
    /// Least active connections.
    LeastConnections,
    /// Weighted round-robin.
    WeightedRoundRobin,
    /// Hash of the client IP.
    IpHash,
    /// Lowest weighted response-time score.
    LeastResponseTime,
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A numeric option is outside its allowed range.
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        /// Option name.
        field: &'static str,
        /// Minimum allowed value.
        min: u64,
        /// Maximum allowed value.
        max: u64,
        /// Provided value.
        value: u64,
    },

    /// An option that must be non-zero was zero.
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UplinkConfig {
    /// Selection algorithm.
    pub algorithm: AlgorithmKind,

    /// Maximum servers the pool accepts.
    pub max_servers: usize,

    /// Maximum tracked connections.
    pub max_connections: usize,

    /// Idle timeout before a connection is failed with `ErrorKind::Timeout`.
    #[serde(with = "humantime_serde")]
    pub connection_timeout: Duration,

    /// Distinct error kinds tracked before new kinds are dropped.
    pub error_stats_capacity: usize,

    /// Health monitoring settings.
    pub health: HealthConfig,

    /// Weight adjustment settings.
    pub weight_adjust: WeightAdjustConfig,

    /// Reconnect policy settings.
    pub reconnect: ReconnectConfig,
}

impl Default for UplinkConfig {
    fn default() -> Self {
        Self {
            algorithm: AlgorithmKind::RoundRobin,
            max_servers: 100,
            max_connections: 10_000,
            connection_timeout: Duration::from_secs(30),
            error_stats_capacity: 16,
            health: HealthConfig::default(),
            weight_adjust: WeightAdjustConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl UplinkConfig {
    /// Validate all options.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for any out-of-range value. Out-of-range
    /// options are rejected, never silently clamped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_servers == 0 {
            return Err(ConfigError::Zero("max_servers"));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Zero("max_connections"));
        }
        if self.connection_timeout.is_zero() {
            return Err(ConfigError::Zero("connection_timeout"));
        }
        if self.error_stats_capacity == 0 {
            return Err(ConfigError::Zero("error_stats_capacity"));
        }
        self.health.validate()?;
        self.weight_adjust.validate()?;
        self.reconnect.validate()
    }
}

/// Health monitoring configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Enable the periodic health monitor.
    pub enabled: bool,

    /// Probe interval.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Probe timeout.
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,

    /// Consecutive probe failures before marking a server Unhealthy.
    pub unhealthy_threshold: u32,

    /// Consecutive probe successes before marking a server Healthy again.
    pub healthy_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(5),
            unhealthy_threshold: 3,
            healthy_threshold: 2,
        }
    }
}

impl HealthConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::Zero("health.interval"));
        }
        if self.unhealthy_threshold == 0 {
            return Err(ConfigError::Zero("health.unhealthy_threshold"));
        }
        if self.healthy_threshold == 0 {
            return Err(ConfigError::Zero("health.healthy_threshold"));
        }
        Ok(())
    }
}

/// Weight adjustment configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightAdjustConfig {
    /// Enable the periodic weight adjuster.
    pub enabled: bool,

    /// Adjustment interval.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for WeightAdjustConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(30),
        }
    }
}

impl WeightAdjustConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::Zero("weight_adjust.interval"));
        }
        Ok(())
    }
}

/// Reconnect policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Maximum reconnect attempts per connection (1-10).
    pub max_attempts: u32,

    /// Delay before each reconnect attempt (up to 60s).
    #[serde(with = "humantime_serde")]
    pub delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

impl ReconnectConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 || self.max_attempts > MAX_RECONNECT_ATTEMPTS {
            return Err(ConfigError::OutOfRange {
                field: "reconnect.max_attempts",
                min: 1,
                max: u64::from(MAX_RECONNECT_ATTEMPTS),
                value: u64::from(self.max_attempts),
            });
        }
        if self.delay > MAX_RECONNECT_DELAY {
            return Err(ConfigError::OutOfRange {
                field: "reconnect.delay",
                min: 0,
                max: MAX_RECONNECT_DELAY.as_millis() as u64,
                value: self.delay.as_millis() as u64,
            });
        }
        Ok(())
    }
}
