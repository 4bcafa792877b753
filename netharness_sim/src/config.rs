//! Harness configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Configuration shared by every run of a harness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HarnessConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Simulated time per tick in milliseconds
    pub tick_ms: u64,

    /// Wall-clock pause between ticks in milliseconds (0 = as fast as possible)
    pub wall_tick_ms: u64,

    /// Node queue bound, in seconds of nominal capacity
    pub queue_depth_secs: f64,

    /// Congestion factor `k` in the node latency model
    pub congestion_factor: f64,

    /// Most transactions a single tick may synthesize before the run fails
    pub max_batch_size: u64,

    /// Where to persist history (in-memory when unset)
    pub history_path: Option<PathBuf>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            tick_ms: 1000,
            wall_tick_ms: 0,
            queue_depth_secs: 2.0,
            congestion_factor: 0.5,
            max_batch_size: 200_000,
            history_path: None,
        }
    }
}

impl HarnessConfig {
    /// Loads a JSON config file; missing fields keep their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_ms == 0 {
            return Err(ConfigError::Invalid("tickMs must be positive".into()));
        }
        if !(self.queue_depth_secs.is_finite() && self.queue_depth_secs >= 0.0) {
            return Err(ConfigError::Invalid("queueDepthSecs must be non-negative".into()));
        }
        if !(self.congestion_factor.is_finite() && self.congestion_factor >= 0.0) {
            return Err(ConfigError::Invalid("congestionFactor must be non-negative".into()));
        }
        if self.max_batch_size == 0 {
            return Err(ConfigError::Invalid("maxBatchSize must be positive".into()));
        }
        Ok(())
    }

    /// Simulated tick length.
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// Wall-clock throttle between ticks.
    pub fn wall_tick(&self) -> Duration {
        Duration::from_millis(self.wall_tick_ms)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}
