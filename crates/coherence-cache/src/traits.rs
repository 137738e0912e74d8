//! Core cache store trait
//!
//! [`CacheStore`] is the contract every backing store implements, whether it
//! lives in-process ([`crate::MemoryStore`]), composes other stores
//! ([`crate::TwoTierStore`]), or fronts a shared remote service. Values are
//! raw [`Bytes`]; typed access lives in [`crate::CacheClient`].
//!
//! Only single-key operations are atomic. In particular [`CacheStore::add`]
//! must be an atomic create-if-absent: distributed locking is built on it.

#![allow(missing_docs)]

use crate::{config::Expiry, error::CacheResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::{collections::HashMap, time::Duration};

/// A value read from a store together with its remaining lifetime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredValue {
    pub value: Bytes,
    /// None when the value never expires
    pub remaining: Option<Duration>,
}

impl StoredValue {
    /// Expiry that reproduces the remaining lifetime on another store
    pub fn expiry(&self) -> Expiry {
        self.remaining.map_or(Expiry::Never, Expiry::Ttl)
    }
}

/// Core async cache store trait
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns None if absent or expired.
    async fn get_with_expiry(&self, key: &str) -> CacheResult<Option<StoredValue>>;

    async fn get(&self, key: &str) -> CacheResult<Option<Bytes>> {
        Ok(self.get_with_expiry(key).await?.map(|stored| stored.value))
    }

    /// Missing keys are absent from the returned map.
    async fn get_all(&self, keys: &[String]) -> CacheResult<HashMap<String, Bytes>> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.get(key).await? {
                found.insert(key.clone(), value);
            }
        }
        Ok(found)
    }

    /// Unconditional write. Returns true if the store accepted the value.
    async fn set(&self, key: &str, value: Bytes, expiry: Expiry) -> CacheResult<bool>;

    /// Returns true only if every item was accepted.
    async fn set_all(&self, items: Vec<(String, Bytes)>, expiry: Expiry) -> CacheResult<bool> {
        let mut all_stored = true;
        for (key, value) in items {
            all_stored &= self.set(&key, value, expiry).await?;
        }
        Ok(all_stored)
    }

    /// Atomic create-if-absent. Returns false if a live value already exists.
    async fn add(&self, key: &str, value: Bytes, expiry: Expiry) -> CacheResult<bool>;

    /// Write only if a live value exists. Returns false otherwise.
    async fn replace(&self, key: &str, value: Bytes, expiry: Expiry) -> CacheResult<bool>;

    /// Returns true if a live value was present and removed.
    async fn remove(&self, key: &str) -> CacheResult<bool>;

    /// Atomically add `delta` to an integer counter, creating it at `delta`
    /// with `expiry` when absent. Existing counters keep their expiry.
    async fn apply_delta(&self, key: &str, delta: i64, expiry: Expiry) -> CacheResult<i64>;

    async fn increment(&self, key: &str, amount: u64, expiry: Expiry) -> CacheResult<i64> {
        let delta = i64::try_from(amount).unwrap_or(i64::MAX);
        self.apply_delta(key, delta, expiry).await
    }

    async fn decrement(&self, key: &str, amount: u64, expiry: Expiry) -> CacheResult<i64> {
        let delta = i64::try_from(amount).map_or(i64::MIN, |amount| -amount);
        self.apply_delta(key, delta, expiry).await
    }

    /// Remaining lifetime. Outer None: absent. Inner None: never expires.
    async fn ttl(&self, key: &str) -> CacheResult<Option<Option<Duration>>> {
        Ok(self
            .get_with_expiry(key)
            .await?
            .map(|stored| stored.remaining))
    }

    async fn clear(&self) -> CacheResult<()>;

    /// Live entry count, not byte size.
    async fn len(&self) -> CacheResult<usize>;

    async fn is_empty(&self) -> CacheResult<bool> {
        Ok(self.len().await? == 0)
    }
}
