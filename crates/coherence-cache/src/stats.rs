//! Cache statistics and metrics types
//!
//! Stores update [`AtomicCacheMetrics`] on their hot paths and hand out
//! point-in-time [`CacheStats`] snapshots for monitoring and tests.

#![allow(missing_docs)]
#![allow(clippy::cast_precision_loss)] // Statistics calculations intentionally accept precision loss

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

// Use cache-aligned atomics to reduce false sharing
#[repr(align(64))]
#[derive(Debug, Default)]
struct CacheAlignedAtomicU64(AtomicU64);

impl CacheAlignedAtomicU64 {
    #[inline]
    fn incr(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn load(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    #[inline]
    fn reset(&self) {
        self.0.store(0, Ordering::Relaxed);
    }
}

/// Cache statistics snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub get_count: u64,
    pub hit_count: u64,
    pub miss_count: u64,
    pub set_count: u64,
    /// Successful create-if-absent writes
    pub add_count: u64,
    /// Create-if-absent writes rejected because the key was live
    pub add_conflict_count: u64,
    pub remove_count: u64,
    pub eviction_count: u64,
    pub expiration_count: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        if self.get_count == 0 {
            0.0
        } else {
            self.hit_count as f64 / self.get_count as f64
        }
    }

    pub fn miss_rate(&self) -> f64 {
        if self.get_count == 0 {
            0.0
        } else {
            self.miss_count as f64 / self.get_count as f64
        }
    }
}

/// Thread-safe counters backing [`CacheStats`]
#[derive(Debug, Default)]
pub struct AtomicCacheMetrics {
    get_count: CacheAlignedAtomicU64,
    hit_count: CacheAlignedAtomicU64,
    miss_count: CacheAlignedAtomicU64,
    set_count: CacheAlignedAtomicU64,
    add_count: CacheAlignedAtomicU64,
    add_conflict_count: CacheAlignedAtomicU64,
    remove_count: CacheAlignedAtomicU64,
    eviction_count: CacheAlignedAtomicU64,
    expiration_count: CacheAlignedAtomicU64,
}

impl AtomicCacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_get(&self, hit: bool) {
        self.get_count.incr();
        if hit {
            self.hit_count.incr();
        } else {
            self.miss_count.incr();
        }
    }

    #[inline]
    pub fn record_set(&self) {
        self.set_count.incr();
    }

    #[inline]
    pub fn record_add(&self, stored: bool) {
        if stored {
            self.add_count.incr();
        } else {
            self.add_conflict_count.incr();
        }
    }

    #[inline]
    pub fn record_remove(&self) {
        self.remove_count.incr();
    }

    #[inline]
    pub fn record_eviction(&self) {
        self.eviction_count.incr();
    }

    #[inline]
    pub fn record_expiration(&self) {
        self.expiration_count.incr();
    }

    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            get_count: self.get_count.load(),
            hit_count: self.hit_count.load(),
            miss_count: self.miss_count.load(),
            set_count: self.set_count.load(),
            add_count: self.add_count.load(),
            add_conflict_count: self.add_conflict_count.load(),
            remove_count: self.remove_count.load(),
            eviction_count: self.eviction_count.load(),
            expiration_count: self.expiration_count.load(),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.get_count,
            &self.hit_count,
            &self.miss_count,
            &self.set_count,
            &self.add_count,
            &self.add_conflict_count,
            &self.remove_count,
            &self.eviction_count,
            &self.expiration_count,
        ] {
            counter.reset();
        }
    }
}

/// Where two-tier reads were satisfied
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwoTierStats {
    pub local_hits: u64,
    pub remote_hits: u64,
    pub misses: u64,
    /// Local writes that failed after the remote write succeeded
    pub local_write_failures: u64,
}

impl TwoTierStats {
    pub fn local_hit_rate(&self) -> f64 {
        let total = self.local_hits + self.remote_hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.local_hits as f64 / total as f64
        }
    }
}
