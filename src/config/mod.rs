//! Configuration
//!
//! `ArborConfig` is assembled by [`ConfigLoader`] from built-in defaults, the
//! global config file, an optional explicit file and `ARBOR__*` environment
//! variables, in that order of increasing precedence.

mod facade;
pub mod merge {
    pub mod service;
}
pub mod paths {
    pub mod xdg_root;
}
pub mod sources {
    pub mod environment;
    pub mod global_file;
}
pub mod storage {
    pub mod storage_paths;
}

pub use facade::ConfigLoader;
pub use paths::xdg_root as xdg;
pub use storage::storage_paths::StorageConfig;

use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArborConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub walker: WalkerSettings,

    #[serde(default)]
    pub events: EventSettings,
}

/// Walker thread pacing, in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkerSettings {
    /// Fixed delay after every callback
    #[serde(default = "default_base_interval_ms")]
    pub base_interval_ms: u64,

    /// Upper bound on the callback-cost part of the delay
    #[serde(default = "default_callback_cost_cap_ms")]
    pub callback_cost_cap_ms: u64,

    /// Pause between laps
    #[serde(default = "default_lap_interval_ms")]
    pub lap_interval_ms: u64,

    /// Polling period of `wait_for_fresh_lap`
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_fresh_lap_timeout_ms")]
    pub fresh_lap_timeout_ms: u64,
}

fn default_base_interval_ms() -> u64 {
    25
}

fn default_callback_cost_cap_ms() -> u64 {
    250
}

fn default_lap_interval_ms() -> u64 {
    1000
}

fn default_poll_interval_ms() -> u64 {
    10
}

fn default_fresh_lap_timeout_ms() -> u64 {
    30_000
}

impl Default for WalkerSettings {
    fn default() -> Self {
        Self {
            base_interval_ms: default_base_interval_ms(),
            callback_cost_cap_ms: default_callback_cost_cap_ms(),
            lap_interval_ms: default_lap_interval_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            fresh_lap_timeout_ms: default_fresh_lap_timeout_ms(),
        }
    }
}

/// Change-event channel settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSettings {
    /// Batches buffered per subscriber before it lags
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

fn default_capacity() -> usize {
    1024
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}
