//! Configuration for the resource cache.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration for the resource cache and its sweeper.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheConfig {
    /// Whether resources are retained between requests. When `false`, the
    /// cache runs in construct-use-discard mode: each resource is torn down
    /// as soon as its last in-flight use ends, and no sweeper is needed.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Seconds of inactivity before a resource becomes eligible for
    /// eviction (default: 1800 = 30 minutes). A value of 0 evicts any idle
    /// resource on the next sweep.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// How often the sweeper wakes, in seconds (default: 300 = 5 minutes).
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_idle_timeout_secs() -> u64 {
    1800 // 30 minutes
}

fn default_sweep_interval_secs() -> u64 {
    300 // 5 minutes
}

/// Errors that can occur during cache configuration validation.
#[derive(Debug, Error)]
pub enum CacheConfigError {
    /// Invalid sweep interval (must be > 0).
    #[error("Invalid sweep interval: must be greater than 0")]
    InvalidSweepInterval,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            idle_timeout_secs: default_idle_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl CacheConfig {
    /// Validate the cache configuration.
    ///
    /// # Errors
    /// Returns `CacheConfigError` if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), CacheConfigError> {
        if self.sweep_interval_secs == 0 {
            return Err(CacheConfigError::InvalidSweepInterval);
        }

        Ok(())
    }

    /// Get the idle timeout as a Duration.
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Get the sweep interval as a Duration.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
