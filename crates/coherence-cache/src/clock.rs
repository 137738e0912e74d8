//! Injectable wall clock
//!
//! Every expiry decision in the workspace (cache TTLs, lock validity,
//! invalidation markers) reads time through [`Clock`] so that tests can drive
//! time explicitly with [`ManualClock`].

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// Source of UTC wall-clock time
pub trait Clock: fmt::Debug + Send + Sync {
    fn now(&self) -> SystemTime;

    /// Milliseconds since the Unix epoch. Times before the epoch read as zero.
    fn epoch_millis(&self) -> u64 {
        self.now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }

    fn epoch_seconds(&self) -> i64 {
        i64::try_from(self.epoch_millis() / 1000).unwrap_or(i64::MAX)
    }
}

/// Clock backed by [`SystemTime::now`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    /// Create a clock frozen at the given epoch second
    pub fn at_epoch_seconds(seconds: i64) -> Self {
        let millis = u64::try_from(seconds).unwrap_or(0).saturating_mul(1000);
        Self {
            millis: AtomicU64::new(millis),
        }
    }

    pub fn set_epoch_seconds(&self, seconds: i64) {
        let millis = u64::try_from(seconds).unwrap_or(0).saturating_mul(1000);
        self.millis.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        let delta = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.millis.fetch_add(delta, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.millis.load(Ordering::SeqCst))
    }

    fn epoch_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::at_epoch_seconds(100);
        assert_eq!(clock.epoch_seconds(), 100);
        assert_eq!(clock.epoch_millis(), 100_000);

        clock.advance(Duration::from_millis(1500));
        assert_eq!(clock.epoch_seconds(), 101);
        assert_eq!(clock.epoch_millis(), 101_500);

        clock.set_epoch_seconds(7);
        assert_eq!(clock.epoch_seconds(), 7);
    }

    #[test]
    fn test_system_clock_is_after_2020() {
        assert!(SystemClock.epoch_seconds() > 1_577_836_800);
    }
}
