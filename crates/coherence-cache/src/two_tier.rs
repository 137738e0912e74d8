//! Two-tier cache store
//!
//! A process-local store in front of a shared remote store. Reads try the
//! local tier first and fall back to the remote tier, populating the local
//! tier on a remote hit. Writes go to the remote tier first and are mirrored
//! locally only once the remote accepted them.
//!
//! The local tier is never authoritative: local failures are logged and
//! ignored, and counters bypass it entirely so the remote value stays the
//! single source of truth.

#![allow(missing_docs)]

use crate::{
    clock::Clock,
    config::{Expiry, TwoTierConfig},
    error::{CacheError, CacheResult},
    stats::TwoTierStats,
    traits::{CacheStore, StoredValue},
};
use async_trait::async_trait;
use bytes::Bytes;
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct TierCounters {
    local_hits: AtomicU64,
    remote_hits: AtomicU64,
    misses: AtomicU64,
    local_write_failures: AtomicU64,
}

/// Local-then-remote [`CacheStore`]
pub struct TwoTierStore {
    local: Arc<dyn CacheStore>,
    remote: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    config: TwoTierConfig,
    counters: TierCounters,
}

impl std::fmt::Debug for TwoTierStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwoTierStore")
            .field("config", &self.config)
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

impl TwoTierStore {
    pub fn new(
        local: Arc<dyn CacheStore>,
        remote: Arc<dyn CacheStore>,
        clock: Arc<dyn Clock>,
        config: TwoTierConfig,
    ) -> CacheResult<Self> {
        config
            .validate()
            .map_err(CacheError::InvalidConfiguration)?;

        Ok(Self {
            local,
            remote,
            clock,
            config,
            counters: TierCounters::default(),
        })
    }

    pub fn local(&self) -> &Arc<dyn CacheStore> {
        &self.local
    }

    pub fn remote(&self) -> &Arc<dyn CacheStore> {
        &self.remote
    }

    pub fn stats(&self) -> TwoTierStats {
        TwoTierStats {
            local_hits: self.counters.local_hits.load(Ordering::Relaxed),
            remote_hits: self.counters.remote_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            local_write_failures: self.counters.local_write_failures.load(Ordering::Relaxed),
        }
    }

    /// Drop the local copy of a key without touching the remote tier
    pub async fn evict_local(&self, key: &str) {
        if let Err(e) = self.local.remove(key).await {
            warn!(key, error = %e, "failed to evict local cache entry");
        }
    }

    /// Expiry for a local copy of a value that lives `remaining` on the remote
    fn local_expiry_for_remaining(&self, remaining: Option<Duration>) -> Expiry {
        match (remaining, self.config.local_ttl_cap) {
            (Some(remaining), Some(cap)) => Expiry::Ttl(remaining.min(cap)),
            (Some(remaining), None) => Expiry::Ttl(remaining),
            (None, Some(cap)) => Expiry::Ttl(cap),
            (None, None) => Expiry::Never,
        }
    }

    fn local_expiry(&self, expiry: Expiry) -> Expiry {
        match self.config.local_ttl_cap {
            Some(cap) => expiry.capped(cap, self.clock.epoch_millis()),
            None => expiry,
        }
    }

    async fn write_local(&self, key: &str, value: Bytes, expiry: Expiry) {
        if let Err(e) = self.local.set(key, value, expiry).await {
            self.counters
                .local_write_failures
                .fetch_add(1, Ordering::Relaxed);
            warn!(key, error = %e, "failed to mirror value into local cache");
        }
    }

    async fn read_local(&self, key: &str) -> Option<StoredValue> {
        match self.local.get_with_expiry(key).await {
            Ok(found) => found,
            Err(e) => {
                warn!(key, error = %e, "local cache read failed, falling back to remote");
                None
            }
        }
    }
}

#[async_trait]
impl CacheStore for TwoTierStore {
    async fn get_with_expiry(&self, key: &str) -> CacheResult<Option<StoredValue>> {
        if let Some(stored) = self.read_local(key).await {
            self.counters.local_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(stored));
        }

        match self.remote.get_with_expiry(key).await? {
            Some(stored) => {
                self.counters.remote_hits.fetch_add(1, Ordering::Relaxed);
                let expiry = self.local_expiry_for_remaining(stored.remaining);
                self.write_local(key, stored.value.clone(), expiry).await;
                Ok(Some(stored))
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key, "two-tier cache miss");
                Ok(None)
            }
        }
    }

    async fn get_all(&self, keys: &[String]) -> CacheResult<HashMap<String, Bytes>> {
        let mut found = match self.local.get_all(keys).await {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "local batch read failed, fetching all keys remotely");
                HashMap::with_capacity(keys.len())
            }
        };
        self.counters
            .local_hits
            .fetch_add(found.len() as u64, Ordering::Relaxed);

        let remaining: Vec<String> = keys
            .iter()
            .filter(|key| !found.contains_key(*key))
            .cloned()
            .collect();
        if remaining.is_empty() {
            return Ok(found);
        }

        let from_remote = self.remote.get_all(&remaining).await?;
        self.counters
            .remote_hits
            .fetch_add(from_remote.len() as u64, Ordering::Relaxed);
        self.counters.misses.fetch_add(
            (remaining.len() - from_remote.len()) as u64,
            Ordering::Relaxed,
        );

        // A batch read carries no remaining lifetime, so only a capped local
        // copy is safe to keep.
        if let Some(cap) = self.config.local_ttl_cap {
            for (key, value) in &from_remote {
                self.write_local(key, value.clone(), Expiry::Ttl(cap)).await;
            }
        }

        found.extend(from_remote);
        Ok(found)
    }

    async fn set(&self, key: &str, value: Bytes, expiry: Expiry) -> CacheResult<bool> {
        let stored = self.remote.set(key, value.clone(), expiry).await?;
        if stored {
            self.write_local(key, value, self.local_expiry(expiry)).await;
        }
        Ok(stored)
    }

    async fn add(&self, key: &str, value: Bytes, expiry: Expiry) -> CacheResult<bool> {
        let stored = self.remote.add(key, value.clone(), expiry).await?;
        if stored {
            self.write_local(key, value, self.local_expiry(expiry)).await;
        }
        Ok(stored)
    }

    async fn replace(&self, key: &str, value: Bytes, expiry: Expiry) -> CacheResult<bool> {
        let replaced = self.remote.replace(key, value.clone(), expiry).await?;
        if replaced {
            self.write_local(key, value, self.local_expiry(expiry)).await;
        }
        Ok(replaced)
    }

    async fn remove(&self, key: &str) -> CacheResult<bool> {
        let removed = self.remote.remove(key).await?;
        self.evict_local(key).await;
        Ok(removed)
    }

    async fn apply_delta(&self, key: &str, delta: i64, expiry: Expiry) -> CacheResult<i64> {
        let value = self.remote.apply_delta(key, delta, expiry).await?;
        self.evict_local(key).await;
        Ok(value)
    }

    async fn clear(&self) -> CacheResult<()> {
        self.remote.clear().await?;
        if let Err(e) = self.local.clear().await {
            warn!(error = %e, "failed to clear local cache");
        }
        Ok(())
    }

    async fn len(&self) -> CacheResult<usize> {
        self.remote.len().await
    }
}
