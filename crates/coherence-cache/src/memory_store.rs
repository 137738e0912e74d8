//! In-memory cache store
//!
//! This module provides a process-local [`CacheStore`] using:
//! - DashMap for concurrent access with minimal lock contention
//! - Expiry evaluated against an injected [`Clock`], so tests control time
//! - Lazy removal of expired entries on read plus an optional background sweep
//! - Capacity-bounded storage. When full, expired entries are purged first;
//!   then new keys are rejected with [`CacheError::Full`], or, with
//!   `evict_when_full`, the entry closest to expiry is evicted
//!
//! The same type serves as the local tier of [`crate::TwoTierStore`] and, in
//! tests and simulations, as a stand-in for the shared remote store: its
//! `add` is an atomic create-if-absent.

#![allow(missing_docs)]

use crate::{
    clock::Clock,
    config::{Expiry, MemoryStoreConfig},
    error::{CacheError, CacheResult},
    stats::{AtomicCacheMetrics, CacheStats},
    traits::{CacheStore, StoredValue},
};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, mapref::entry::Entry};
use std::{sync::Arc, time::Duration};
use tokio::{task::JoinHandle, time::interval};

#[derive(Debug, Clone)]
struct StoreEntry {
    value: Bytes,
    /// Epoch milliseconds; None for no expiration
    expires_at_ms: Option<u64>,
    written_at_ms: u64,
}

impl StoreEntry {
    fn new(value: Bytes, expiry: Expiry, now_ms: u64) -> Self {
        Self {
            value,
            expires_at_ms: expiry.deadline_millis(now_ms),
            written_at_ms: now_ms,
        }
    }

    fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms.is_some_and(|deadline| now_ms >= deadline)
    }

    fn remaining(&self, now_ms: u64) -> Option<Duration> {
        self.expires_at_ms
            .map(|deadline| Duration::from_millis(deadline.saturating_sub(now_ms)))
    }
}

fn parse_counter(value: &[u8]) -> Option<i64> {
    std::str::from_utf8(value).ok()?.trim().parse().ok()
}

fn counter_bytes(value: i64) -> Bytes {
    Bytes::from(value.to_string())
}

/// Concurrent in-memory [`CacheStore`]
pub struct MemoryStore {
    storage: Arc<DashMap<String, StoreEntry>>,
    config: MemoryStoreConfig,
    clock: Arc<dyn Clock>,
    metrics: Arc<AtomicCacheMetrics>,
    cleanup_handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entries", &self.storage.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl MemoryStore {
    pub fn new(config: MemoryStoreConfig, clock: Arc<dyn Clock>) -> CacheResult<Self> {
        config
            .validate()
            .map_err(CacheError::InvalidConfiguration)?;

        Ok(Self {
            storage: Arc::new(DashMap::with_capacity(config.max_entries.min(1024))),
            config,
            clock,
            metrics: Arc::new(AtomicCacheMetrics::new()),
            cleanup_handle: None,
        })
    }

    /// Create a store and start the background sweep for expired entries.
    /// Must be called from within a tokio runtime.
    pub fn new_with_cleanup(config: MemoryStoreConfig, clock: Arc<dyn Clock>) -> CacheResult<Self> {
        let cleanup_interval = config.cleanup_interval;
        let mut store = Self::new(config, clock)?;
        store.start_cleanup_task(cleanup_interval);
        Ok(store)
    }

    fn start_cleanup_task(&mut self, cleanup_interval: Duration) {
        let storage = Arc::clone(&self.storage);
        let clock = Arc::clone(&self.clock);
        let metrics = Arc::clone(&self.metrics);

        let handle = tokio::spawn(async move {
            let mut ticker = interval(cleanup_interval);
            loop {
                ticker.tick().await;
                let removed = purge_expired(&storage, clock.epoch_millis(), &metrics);
                if removed > 0 {
                    tracing::debug!(removed, "swept expired cache entries");
                }
            }
        });

        self.cleanup_handle = Some(handle);
    }

    pub fn stats(&self) -> CacheStats {
        self.metrics.snapshot()
    }

    /// Remove every expired entry now. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        purge_expired(&self.storage, self.clock.epoch_millis(), &self.metrics)
    }

    /// Make room for one new key when at capacity.
    fn make_room(&self, key: &str, now_ms: u64) -> CacheResult<()> {
        if self.storage.len() < self.config.max_entries || self.storage.contains_key(key) {
            return Ok(());
        }

        self.purge_expired();

        if !self.config.evict_when_full {
            if self.storage.len() >= self.config.max_entries {
                tracing::debug!(key, max_entries = self.config.max_entries, "store full, rejecting new key");
                return Err(CacheError::Full {
                    max_entries: self.config.max_entries,
                });
            }
            return Ok(());
        }

        while self.storage.len() >= self.config.max_entries {
            let victim = self
                .storage
                .iter()
                .min_by_key(|entry| {
                    (
                        entry.value().expires_at_ms.unwrap_or(u64::MAX),
                        entry.value().written_at_ms,
                    )
                })
                .map(|entry| entry.key().clone());

            let Some(victim) = victim else {
                break;
            };

            if self.storage.remove(&victim).is_some() {
                self.metrics.record_eviction();
                tracing::trace!(key = %victim, now_ms, "evicted cache entry at capacity");
            }
        }
        Ok(())
    }
}

fn purge_expired(
    storage: &DashMap<String, StoreEntry>,
    now_ms: u64,
    metrics: &AtomicCacheMetrics,
) -> usize {
    let expired: Vec<String> = storage
        .iter()
        .filter(|entry| entry.value().is_expired(now_ms))
        .map(|entry| entry.key().clone())
        .collect();

    let mut removed = 0;
    for key in expired {
        if storage
            .remove_if(&key, |_, entry| entry.is_expired(now_ms))
            .is_some()
        {
            metrics.record_expiration();
            removed += 1;
        }
    }
    removed
}

impl Drop for MemoryStore {
    fn drop(&mut self) {
        if let Some(handle) = self.cleanup_handle.take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get_with_expiry(&self, key: &str) -> CacheResult<Option<StoredValue>> {
        let now = self.clock.epoch_millis();

        // Outer Some: present. Inner None: present but expired.
        let lookup = self.storage.get(key).map(|entry| {
            if entry.is_expired(now) {
                None
            } else {
                Some(StoredValue {
                    value: entry.value.clone(),
                    remaining: entry.remaining(now),
                })
            }
        });

        match lookup {
            Some(Some(stored)) => {
                self.metrics.record_get(true);
                Ok(Some(stored))
            }
            Some(None) => {
                if self
                    .storage
                    .remove_if(key, |_, entry| entry.is_expired(now))
                    .is_some()
                {
                    self.metrics.record_expiration();
                }
                self.metrics.record_get(false);
                Ok(None)
            }
            None => {
                self.metrics.record_get(false);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: Bytes, expiry: Expiry) -> CacheResult<bool> {
        let now = self.clock.epoch_millis();
        self.make_room(key, now)?;
        self.storage
            .insert(key.to_string(), StoreEntry::new(value, expiry, now));
        self.metrics.record_set();
        Ok(true)
    }

    async fn add(&self, key: &str, value: Bytes, expiry: Expiry) -> CacheResult<bool> {
        let now = self.clock.epoch_millis();
        self.make_room(key, now)?;

        let stored = match self.storage.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(StoreEntry::new(value, expiry, now));
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoreEntry::new(value, expiry, now));
                true
            }
        };

        self.metrics.record_add(stored);
        Ok(stored)
    }

    async fn replace(&self, key: &str, value: Bytes, expiry: Expiry) -> CacheResult<bool> {
        let now = self.clock.epoch_millis();
        let replaced = match self.storage.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) => {
                *entry = StoreEntry::new(value, expiry, now);
                true
            }
            _ => false,
        };

        if replaced {
            self.metrics.record_set();
        }
        Ok(replaced)
    }

    async fn remove(&self, key: &str) -> CacheResult<bool> {
        let now = self.clock.epoch_millis();
        let removed = self
            .storage
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired(now));

        if removed {
            self.metrics.record_remove();
        }
        Ok(removed)
    }

    async fn apply_delta(&self, key: &str, delta: i64, expiry: Expiry) -> CacheResult<i64> {
        let now = self.clock.epoch_millis();
        self.make_room(key, now)?;

        match self.storage.entry(key.to_string()) {
            Entry::Occupied(mut occupied) if !occupied.get().is_expired(now) => {
                let current = parse_counter(&occupied.get().value)
                    .ok_or_else(|| CacheError::NotCounter(key.to_string()))?;
                let next = current.saturating_add(delta);
                let entry = occupied.get_mut();
                entry.value = counter_bytes(next);
                entry.written_at_ms = now;
                Ok(next)
            }
            Entry::Occupied(mut occupied) => {
                occupied.insert(StoreEntry::new(counter_bytes(delta), expiry, now));
                Ok(delta)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoreEntry::new(counter_bytes(delta), expiry, now));
                Ok(delta)
            }
        }
    }

    async fn clear(&self) -> CacheResult<()> {
        self.storage.clear();
        Ok(())
    }

    async fn len(&self) -> CacheResult<usize> {
        let now = self.clock.epoch_millis();
        Ok(self
            .storage
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .count())
    }
}
