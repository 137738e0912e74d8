//! Invalidation marker configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How long served and invalidated markers live in the shared store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationConfig {
    pub marker_ttl: Duration,
}

impl Default for InvalidationConfig {
    fn default() -> Self {
        Self {
            marker_ttl: Duration::from_secs(10 * 60 * 60),
        }
    }
}

impl InvalidationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_marker_ttl(mut self, marker_ttl: Duration) -> Self {
        self.marker_ttl = marker_ttl;
        self
    }

    /// Load from `COHERENCE_INVALIDATION_MARKER_TTL_SECS`, falling back to
    /// the 10 hour default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            marker_ttl: std::env::var("COHERENCE_INVALIDATION_MARKER_TTL_SECS")
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .map_or(defaults.marker_ttl, Duration::from_secs),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.marker_ttl.is_zero() {
            return Err("marker_ttl must be greater than 0".to_string());
        }
        Ok(())
    }
}
