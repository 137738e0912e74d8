//! Cache configuration structures
//!
//! This module defines the per-call caching policy ([`CacheConfig`]), the
//! expiry model shared by every store ([`Expiry`]), and the configuration for
//! each store implementation. Each configuration has sensible defaults,
//! builder-style setters, validation, and an environment loader.

use serde::{Deserialize, Serialize};
use std::{str::FromStr, time::Duration};

const SECONDS_PER_DAY: i64 = 86_400;
const MINUTES_PER_DAY: u32 = 1_440;

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

/// When a stored value stops being visible
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expiry {
    /// Never expires on its own
    Never,
    /// Expires after the given time-to-live, measured from the write
    Ttl(Duration),
    /// Expires at an absolute instant, in epoch seconds
    At(i64),
}

impl Expiry {
    pub fn from_secs(seconds: u64) -> Self {
        Self::Ttl(Duration::from_secs(seconds))
    }

    /// Absolute deadline in epoch milliseconds, or None for [`Expiry::Never`]
    pub fn deadline_millis(&self, now_millis: u64) -> Option<u64> {
        match self {
            Self::Never => None,
            Self::Ttl(ttl) => {
                let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
                Some(now_millis.saturating_add(ttl_ms))
            }
            Self::At(epoch_seconds) => {
                Some(u64::try_from(*epoch_seconds).unwrap_or(0).saturating_mul(1000))
            }
        }
    }

    /// Clamp the expiry so the value lives no longer than `cap` from now
    pub fn capped(self, cap: Duration, now_millis: u64) -> Self {
        let cap_deadline = now_millis.saturating_add(u64::try_from(cap.as_millis()).unwrap_or(u64::MAX));
        match self.deadline_millis(now_millis) {
            Some(deadline) if deadline <= cap_deadline => self,
            _ => Self::Ttl(cap),
        }
    }
}

/// Per-call caching policy for get-or-compute lookups
///
/// A policy either expires a fixed number of seconds after the write, or at
/// a fixed UTC wall time every day (`minutes_past_midnight`). A policy with
/// neither set disables caching for the call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub duration_seconds: u64,
    /// Daily absolute expiry in minutes after 00:00 UTC. Zero counts as unset.
    pub minutes_past_midnight: Option<u32>,
}

impl CacheConfig {
    pub const fn disabled() -> Self {
        Self {
            duration_seconds: 0,
            minutes_past_midnight: None,
        }
    }

    pub const fn for_seconds(duration_seconds: u64) -> Self {
        Self {
            duration_seconds,
            minutes_past_midnight: None,
        }
    }

    pub const fn daily_at(minutes_past_midnight: u32) -> Self {
        Self {
            duration_seconds: 0,
            minutes_past_midnight: Some(minutes_past_midnight),
        }
    }

    fn daily_minutes(&self) -> Option<u32> {
        self.minutes_past_midnight
            .filter(|m| *m > 0 && *m < MINUTES_PER_DAY)
    }

    pub fn is_enabled(&self) -> bool {
        self.daily_minutes().is_some() || self.duration_seconds > 0
    }

    /// Concrete expiry for a write happening at `now_epoch_seconds`
    ///
    /// The daily wall time wins over the duration when both are set. The
    /// returned instant is always strictly after `now_epoch_seconds`.
    pub fn expiry(&self, now_epoch_seconds: i64) -> Option<Expiry> {
        if let Some(minutes) = self.daily_minutes() {
            let day_start = now_epoch_seconds - now_epoch_seconds.rem_euclid(SECONDS_PER_DAY);
            let mut at = day_start + i64::from(minutes) * 60;
            if at <= now_epoch_seconds {
                at += SECONDS_PER_DAY;
            }
            return Some(Expiry::At(at));
        }

        (self.duration_seconds > 0).then(|| Expiry::from_secs(self.duration_seconds))
    }
}

/// In-memory store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStoreConfig {
    /// Maximum number of live entries
    pub max_entries: usize,
    /// Interval of the background sweep for expired entries
    pub cleanup_interval: Duration,
    /// Evict live entries when full instead of rejecting new keys.
    /// Only safe for a local tier: a shared store holding locks must not
    /// drop a held lock.
    pub evict_when_full: bool,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            max_entries: 100_000,
            cleanup_interval: Duration::from_secs(60),
            evict_when_full: false,
        }
    }
}

impl MemoryStoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    pub fn with_eviction(mut self, evict_when_full: bool) -> Self {
        self.evict_when_full = evict_when_full;
        self
    }

    /// Reads `COHERENCE_MEMORY_MAX_ENTRIES`, `COHERENCE_MEMORY_CLEANUP_SECS`
    /// and `COHERENCE_MEMORY_EVICT_WHEN_FULL`
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_entries: env_parse("COHERENCE_MEMORY_MAX_ENTRIES").unwrap_or(defaults.max_entries),
            cleanup_interval: env_parse("COHERENCE_MEMORY_CLEANUP_SECS")
                .map_or(defaults.cleanup_interval, Duration::from_secs),
            evict_when_full: env_parse("COHERENCE_MEMORY_EVICT_WHEN_FULL")
                .unwrap_or(defaults.evict_when_full),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_entries == 0 {
            return Err("max_entries must be greater than 0".to_string());
        }

        if self.cleanup_interval.is_zero() {
            return Err("cleanup_interval must be greater than 0".to_string());
        }

        Ok(())
    }
}

/// Two-tier (local in front of remote) store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwoTierConfig {
    /// Upper bound on how long a value may live in the local tier.
    /// None mirrors the remote expiry exactly.
    pub local_ttl_cap: Option<Duration>,
}

impl Default for TwoTierConfig {
    fn default() -> Self {
        Self {
            local_ttl_cap: Some(Duration::from_secs(300)),
        }
    }
}

impl TwoTierConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_local_ttl_cap(mut self, cap: Option<Duration>) -> Self {
        self.local_ttl_cap = cap;
        self
    }

    /// Reads `COHERENCE_LOCAL_TTL_CAP_SECS`; `0` removes the cap
    pub fn from_env() -> Self {
        match env_parse::<u64>("COHERENCE_LOCAL_TTL_CAP_SECS") {
            Some(0) => Self {
                local_ttl_cap: None,
            },
            Some(secs) => Self {
                local_ttl_cap: Some(Duration::from_secs(secs)),
            },
            None => Self::default(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.local_ttl_cap.is_some_and(|cap| cap.is_zero()) {
            return Err("local_ttl_cap must be greater than 0 when set".to_string());
        }
        Ok(())
    }
}

/// Background write-back queue configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackgroundConfig {
    /// Number of worker tasks draining the queue
    pub workers: usize,
    /// Queued jobs beyond which the oldest non-forced job is evicted
    pub capacity: usize,
    /// Attempts per job, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_backoff: Duration,
    /// Upper bound for the doubled backoff
    pub max_backoff: Duration,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            capacity: 1024,
            max_attempts: 3,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl BackgroundConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.base_backoff = base;
        self.max_backoff = max;
        self
    }

    /// Reads `COHERENCE_BACKGROUND_WORKERS`, `COHERENCE_BACKGROUND_CAPACITY`,
    /// `COHERENCE_BACKGROUND_MAX_ATTEMPTS`, `COHERENCE_BACKGROUND_BACKOFF_MS`
    /// and `COHERENCE_BACKGROUND_MAX_BACKOFF_MS`
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            workers: env_parse("COHERENCE_BACKGROUND_WORKERS").unwrap_or(defaults.workers),
            capacity: env_parse("COHERENCE_BACKGROUND_CAPACITY").unwrap_or(defaults.capacity),
            max_attempts: env_parse("COHERENCE_BACKGROUND_MAX_ATTEMPTS")
                .unwrap_or(defaults.max_attempts),
            base_backoff: env_parse("COHERENCE_BACKGROUND_BACKOFF_MS")
                .map_or(defaults.base_backoff, Duration::from_millis),
            max_backoff: env_parse("COHERENCE_BACKGROUND_MAX_BACKOFF_MS")
                .map_or(defaults.max_backoff, Duration::from_millis),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("workers must be greater than 0".to_string());
        }

        if self.capacity == 0 {
            return Err("capacity must be greater than 0".to_string());
        }

        if self.max_attempts == 0 {
            return Err("max_attempts must be greater than 0".to_string());
        }

        if self.base_backoff > self.max_backoff {
            return Err("base_backoff must not exceed max_backoff".to_string());
        }

        Ok(())
    }
}
