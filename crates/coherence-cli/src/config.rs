//! Simulation configuration.
//!
//! Settings come from CLI arguments, then `COHERENCE_SIM_*` environment
//! variables, then defaults.
//!
//! ```no_run
//! use coherence_cli::SimConfig;
//!
//! let config = SimConfig::from_args();
//! config.validate().expect("Invalid configuration");
//! println!("{} workers x {} updates", config.workers, config.updates_per_worker);
//! ```

use crate::error::SimError;
use clap::Parser;
use coherence_cache::{BackgroundConfig, TwoTierConfig};
use coherence_lock::InterlockConfig;
use std::time::Duration;

/// Simulation settings.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "coherence-sim",
    about = "Drive concurrent interlocked updates, two-tier caching and invalidation in memory",
    version
)]
pub struct SimConfig {
    /// Number of concurrent simulated service instances
    #[arg(long, env = "COHERENCE_SIM_WORKERS", default_value_t = 8)]
    pub workers: usize,

    /// Interlocked increments performed by each instance
    #[arg(long, env = "COHERENCE_SIM_UPDATES_PER_WORKER", default_value_t = 25)]
    pub updates_per_worker: usize,

    /// Lock acquisition deadline per update, in milliseconds
    #[arg(long, env = "COHERENCE_SIM_TIMEOUT_MS", default_value_t = 15_000)]
    pub timeout_ms: u64,

    /// Shortest pause between lock attempts, in milliseconds
    #[arg(long, env = "COHERENCE_SIM_BACKOFF_MIN_MS", default_value_t = 5)]
    pub backoff_min_ms: u64,

    /// Longest pause between lock attempts, in milliseconds
    #[arg(long, env = "COHERENCE_SIM_BACKOFF_MAX_MS", default_value_t = 25)]
    pub backoff_max_ms: u64,

    /// Upper bound on how long an instance keeps a local cache copy, in seconds
    #[arg(long, env = "COHERENCE_SIM_LOCAL_TTL_CAP_SECS", default_value_t = 30)]
    pub local_ttl_cap_secs: u64,

    /// Distinct caller sessions that receive invalidations
    #[arg(long, env = "COHERENCE_SIM_SESSIONS", default_value_t = 3)]
    pub sessions: usize,

    /// Emit logs as JSON lines
    #[arg(long, env = "COHERENCE_SIM_JSON_LOGS")]
    pub json_logs: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            updates_per_worker: 25,
            timeout_ms: 15_000,
            backoff_min_ms: 5,
            backoff_max_ms: 25,
            local_ttl_cap_secs: 30,
            sessions: 3,
            json_logs: false,
        }
    }
}

impl SimConfig {
    /// Parse configuration from command-line arguments.
    #[must_use]
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Validate configuration.
    ///
    /// # Errors
    ///
    /// Returns `SimError::InvalidConfig` naming the first bad setting.
    pub fn validate(&self) -> Result<(), SimError> {
        if self.workers == 0 {
            return Err(SimError::InvalidConfig {
                field: "workers",
                reason: "at least one worker is required".to_string(),
            });
        }
        if self.sessions == 0 {
            return Err(SimError::InvalidConfig {
                field: "sessions",
                reason: "at least one session is required".to_string(),
            });
        }
        if self.local_ttl_cap_secs == 0 {
            return Err(SimError::InvalidConfig {
                field: "local_ttl_cap_secs",
                reason: "must be greater than 0".to_string(),
            });
        }
        self.interlock()
            .validate()
            .map_err(|reason| SimError::InvalidConfig {
                field: "interlock",
                reason,
            })
    }

    pub fn interlock(&self) -> InterlockConfig {
        InterlockConfig::new()
            .with_timeout(Duration::from_millis(self.timeout_ms))
            .with_backoff(
                Duration::from_millis(self.backoff_min_ms),
                Duration::from_millis(self.backoff_max_ms),
            )
    }

    pub fn two_tier(&self) -> TwoTierConfig {
        TwoTierConfig::new().with_local_ttl_cap(Some(Duration::from_secs(self.local_ttl_cap_secs)))
    }

    pub fn background(&self) -> BackgroundConfig {
        BackgroundConfig::from_env()
    }
}
