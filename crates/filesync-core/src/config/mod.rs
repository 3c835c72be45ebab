//! Engine tuning knobs
//!
//! [`SyncConfig`] is read from a TOML, JSON or YAML file (picked by
//! extension). Every field has a default, so a missing file or a partial
//! one is fine.
//!
//! # Example
//!
//! ```ignore
//! use filesync_core::SyncConfig;
//! use filesync_fs::NormalizedPath;
//!
//! let config = SyncConfig::load(&NormalizedPath::new("/path/to/filesync.toml"))?;
//! assert_eq!(config.debounce().as_millis(), 300);
//! ```

use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use filesync_fs::{ConfigStore, NormalizedPath};
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::subscription::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Full reconciliation passes before giving up
    pub max_sync_attempts: u32,
    /// Window for coalescing local file events
    pub debounce_ms: u64,
    /// How long engine-written paths suppress watcher events
    pub recent_write_ttl_ms: u64,
    /// Upper bound for draining in-flight work on shutdown
    pub shutdown_timeout_ms: u64,
    /// Extra publish attempts after a network failure
    pub publish_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub keep_alive_interval_ms: u64,
    /// Reconnect attempts between two delivered batches
    pub subscription_max_attempts: u32,
    /// Run after `yarn.lock` changes; empty disables it
    pub install_command: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_sync_attempts: 10,
            debounce_ms: 300,
            recent_write_ttl_ms: 5_000,
            shutdown_timeout_ms: 10_000,
            publish_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            keep_alive_interval_ms: 60_000,
            subscription_max_attempts: 10,
            install_command: vec!["yarn".into(), "install".into(), "--check-files".into()],
        }
    }
}

impl SyncConfig {
    /// Load from `path`, falling back to defaults when it does not exist.
    pub fn load(path: &NormalizedPath) -> Result<Self> {
        Ok(ConfigStore::new().load_optional(path)?.unwrap_or_default())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn recent_write_ttl(&self) -> Duration {
        Duration::from_millis(self.recent_write_ttl_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Backoff schedule for publish retries. Attempt counting is left to
    /// the caller, so the schedule itself never expires.
    pub fn publish_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.initial_backoff_ms))
            .with_max_interval(Duration::from_millis(self.max_backoff_ms))
            .with_max_elapsed_time(None)
            .build()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.subscription_max_attempts,
            initial_delay: Duration::from_millis(self.initial_backoff_ms),
            max_delay: Duration::from_millis(self.max_backoff_ms),
            keep_alive_interval: Duration::from_millis(self.keep_alive_interval_ms),
        }
    }
}
