//! Typed cache client with get-or-compute
//!
//! [`CacheClient`] layers serde_json encoding over any [`CacheStore`] and
//! implements the stampede-avoiding lookup used by request handlers:
//!
//! 1. a policy with no expiry disables caching, so the getter runs with no
//!    cache I/O at all;
//! 2. otherwise the cache is read, including values this process computed
//!    but has not finished writing back;
//! 3. a hit is returned without running the getter;
//! 4. a miss runs the getter and schedules a best-effort write-back, unless
//!    the value serializes to JSON `null`. The caller never waits for it.
//!
//! Cache read and decode failures are logged and treated as misses: the
//! cache is advisory and must never fail a lookup the getter can serve.

#![allow(missing_docs)]

use crate::{
    background::BackgroundQueue,
    clock::Clock,
    config::{CacheConfig, Expiry},
    error::{CacheError, CacheResult},
    traits::CacheStore,
};
use bytes::Bytes;
use dashmap::DashMap;
use serde::{Serialize, de::DeserializeOwned};
use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};
use tracing::{debug, warn};

const NULL_JSON: &[u8] = b"null";

/// A computed value whose write-back has not yet landed in the store
#[derive(Debug, Clone)]
struct PendingValue {
    value: Bytes,
    expires_at_ms: Option<u64>,
}

impl PendingValue {
    fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms.is_some_and(|deadline| now_ms >= deadline)
    }
}

/// Typed access to a [`CacheStore`]
#[derive(Clone)]
pub struct CacheClient {
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    background: Option<Arc<BackgroundQueue>>,
    pending: Arc<DashMap<String, PendingValue>>,
}

impl std::fmt::Debug for CacheClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheClient")
            .field("pending_writes", &self.pending.len())
            .field("background", &self.background.is_some())
            .finish_non_exhaustive()
    }
}

fn encode<T: Serialize + ?Sized>(value: &T) -> CacheResult<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| CacheError::serialization(&e))
}

fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> CacheResult<T> {
    serde_json::from_slice(bytes).map_err(|e| CacheError::deserialization(key, &e))
}

impl CacheClient {
    /// Client whose write-backs run as detached tokio tasks
    pub fn new(store: Arc<dyn CacheStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            background: None,
            pending: Arc::new(DashMap::new()),
        }
    }

    /// Route write-backs through a bounded, retrying queue
    #[must_use]
    pub fn with_background(mut self, queue: Arc<BackgroundQueue>) -> Self {
        self.background = Some(queue);
        self
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Write-backs scheduled by this client that have not landed yet
    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        match self.store.get(key).await? {
            Some(bytes) => decode(key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Missing keys are absent from the result.
    pub async fn get_all<T: DeserializeOwned>(
        &self,
        keys: &[String],
    ) -> CacheResult<HashMap<String, T>> {
        let raw = self.store.get_all(keys).await?;
        raw.into_iter()
            .map(|(key, bytes)| {
                let value = decode(&key, &bytes)?;
                Ok((key, value))
            })
            .collect()
    }

    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        expiry: Expiry,
    ) -> CacheResult<bool> {
        let bytes = encode(value)?;
        self.pending.remove(key);
        self.store.set(key, bytes, expiry).await
    }

    pub async fn set_all<T: Serialize>(
        &self,
        items: &[(String, T)],
        expiry: Expiry,
    ) -> CacheResult<bool> {
        let encoded = items
            .iter()
            .map(|(key, value)| {
                self.pending.remove(key);
                Ok((key.clone(), encode(value)?))
            })
            .collect::<CacheResult<Vec<_>>>()?;
        self.store.set_all(encoded, expiry).await
    }

    /// Atomic create-if-absent
    pub async fn add<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        expiry: Expiry,
    ) -> CacheResult<bool> {
        let bytes = encode(value)?;
        self.store.add(key, bytes, expiry).await
    }

    pub async fn replace<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        expiry: Expiry,
    ) -> CacheResult<bool> {
        let bytes = encode(value)?;
        self.pending.remove(key);
        self.store.replace(key, bytes, expiry).await
    }

    pub async fn remove(&self, key: &str) -> CacheResult<bool> {
        self.pending.remove(key);
        self.store.remove(key).await
    }

    pub async fn increment(&self, key: &str, amount: u64, expiry: Expiry) -> CacheResult<i64> {
        self.store.increment(key, amount, expiry).await
    }

    pub async fn decrement(&self, key: &str, amount: u64, expiry: Expiry) -> CacheResult<i64> {
        self.store.decrement(key, amount, expiry).await
    }

    pub async fn ttl(&self, key: &str) -> CacheResult<Option<Option<Duration>>> {
        self.store.ttl(key).await
    }

    /// Get-or-compute with an infallible synchronous getter
    pub async fn try_get<T, F>(&self, key: &str, getter: F, config: &CacheConfig) -> T
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> T,
    {
        let Some(expiry) = config.expiry(self.clock.epoch_seconds()) else {
            return getter();
        };

        if let Some(hit) = self.read_cached(key).await {
            return hit;
        }

        let value = getter();
        self.schedule_write_back(key, &value, expiry);
        value
    }

    /// Get-or-compute with a fallible async getter
    ///
    /// Getter errors are returned unchanged and nothing is cached for them.
    pub async fn try_get_async<T, E, F, Fut>(
        &self,
        key: &str,
        getter: F,
        config: &CacheConfig,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(expiry) = config.expiry(self.clock.epoch_seconds()) else {
            return getter().await;
        };

        if let Some(hit) = self.read_cached(key).await {
            return Ok(hit);
        }

        let value = getter().await?;
        self.schedule_write_back(key, &value, expiry);
        Ok(value)
    }

    fn pending_value(&self, key: &str, now_ms: u64) -> Option<Bytes> {
        let lookup = self.pending.get(key).map(|pending| {
            if pending.is_expired(now_ms) {
                None
            } else {
                Some(pending.value.clone())
            }
        })?;

        if lookup.is_none() {
            self.pending
                .remove_if(key, |_, pending| pending.is_expired(now_ms));
        }
        lookup
    }

    async fn read_cached<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = match self.pending_value(key, self.clock.epoch_millis()) {
            Some(bytes) => bytes,
            None => match self.store.get(key).await {
                Ok(Some(bytes)) => bytes,
                Ok(None) => {
                    debug!(key, "cache miss");
                    return None;
                }
                Err(e) => {
                    warn!(key, error = %e, "cache read failed, computing value");
                    return None;
                }
            },
        };

        match decode(key, &bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "cached value could not be decoded, computing value");
                None
            }
        }
    }

    fn schedule_write_back<T: Serialize>(&self, key: &str, value: &T, expiry: Expiry) {
        let bytes = match encode(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key, error = %e, "computed value could not be encoded, not caching");
                return;
            }
        };
        if bytes.as_ref() == NULL_JSON {
            debug!(key, "computed value is null, not caching");
            return;
        }

        self.pending.insert(
            key.to_string(),
            PendingValue {
                value: bytes.clone(),
                expires_at_ms: expiry.deadline_millis(self.clock.epoch_millis()),
            },
        );

        let abandoned_value = bytes.clone();
        let store = Arc::clone(&self.store);
        let pending = Arc::clone(&self.pending);
        let owned_key = key.to_string();
        let write = move || {
            let store = Arc::clone(&store);
            let pending = Arc::clone(&pending);
            let key = owned_key.clone();
            let bytes = bytes.clone();
            async move {
                store.set(&key, bytes.clone(), expiry).await?;
                pending.remove_if(&key, |_, queued| queued.value == bytes);
                Ok::<(), CacheError>(())
            }
        };

        // a write-back that never lands drops its pending value
        let forget = {
            let pending = Arc::clone(&self.pending);
            let key = key.to_string();
            move || {
                pending.remove_if(&key, |_, queued| queued.value == abandoned_value);
            }
        };

        match &self.background {
            Some(queue) => {
                if let Err(e) =
                    queue.submit_with_abandon(format!("write-back {key}"), false, write, forget)
                {
                    warn!(key, error = %e, "could not schedule cache write-back");
                    self.pending.remove(key);
                }
            }
            None => match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let key = key.to_string();
                    handle.spawn(async move {
                        if let Err(e) = write().await {
                            warn!(key = %key, error = %e, "cache write-back failed");
                            forget();
                        }
                    });
                }
                Err(_) => {
                    warn!(key, "no tokio runtime for cache write-back");
                    self.pending.remove(key);
                }
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::{clock::ManualClock, config::MemoryStoreConfig, memory_store::MemoryStore};
    use pretty_assertions::assert_eq;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        visits: u32,
    }

    fn client() -> (CacheClient, Arc<MemoryStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_epoch_seconds(50_000));
        let store = Arc::new(MemoryStore::new(MemoryStoreConfig::default(), clock.clone()).unwrap());
        (CacheClient::new(store.clone(), clock.clone()), store, clock)
    }

    #[tokio::test]
    async fn test_typed_round_trip() {
        let (client, _store, _clock) = client();
        let profile = Profile {
            name: "ada".to_string(),
            visits: 3,
        };

        assert!(client.set("p", &profile, Expiry::from_secs(60)).await.unwrap());
        assert_eq!(client.get::<Profile>("p").await.unwrap(), Some(profile.clone()));
        assert!(!client.add("p", &profile, Expiry::from_secs(60)).await.unwrap());
        assert!(client.remove("p").await.unwrap());
        assert_eq!(client.get::<Profile>("p").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_get_reports_undecodable_values() {
        let (client, store, _clock) = client();
        store
            .set("p", Bytes::from_static(b"not json"), Expiry::Never)
            .await
            .unwrap();

        let err = client.get::<Profile>("p").await.expect_err("bad json");
        assert!(matches!(err, CacheError::Deserialization(msg) if msg.starts_with("p:")));
    }

    #[tokio::test]
    async fn test_try_get_serves_pending_value_before_write_lands() {
        let (client, _store, _clock) = client();
        let config = CacheConfig::for_seconds(60);

        let first: u32 = client.try_get("answer", || 42, &config).await;
        // no await point between the two lookups that would let the write run
        let second: u32 = client.try_get("answer", || 7, &config).await;

        assert_eq!(first, 42);
        assert_eq!(second, 42);
    }

    #[tokio::test]
    async fn test_undecodable_cache_entry_is_a_miss() {
        let (client, store, _clock) = client();
        store
            .set("p", Bytes::from_static(b"{broken"), Expiry::Never)
            .await
            .unwrap();

        let value: u32 = client
            .try_get("p", || 5, &CacheConfig::for_seconds(10))
            .await;
        assert_eq!(value, 5);
    }

    #[tokio::test]
    async fn test_pending_value_expires() {
        let (client, _store, clock) = client();
        let config = CacheConfig::for_seconds(10);
        let _: u32 = client.try_get("k", || 1, &config).await;

        clock.advance(Duration::from_secs(11));
        assert!(client.pending_value("k", clock.epoch_millis()).is_none());
    }

    #[tokio::test]
    async fn test_set_all_and_get_all() {
        let (client, _store, _clock) = client();
        let items = vec![("a".to_string(), 1_u32), ("b".to_string(), 2_u32)];
        assert!(client.set_all(&items, Expiry::Never).await.unwrap());

        let found: HashMap<String, u32> = client
            .get_all(&["a".to_string(), "b".to_string(), "z".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found["b"], 2);
    }
}
