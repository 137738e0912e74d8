//! Distributed lock service over a shared cache store
//!
//! Mutual exclusion rests entirely on the store's atomic create-if-absent
//! ([`CacheStore::add`]). A lock is a JSON-encoded [`LockItem`] stored under
//! `lock:{category}|{id}` with a time-to-live equal to its duration, so a
//! crashed holder's lock disappears on its own.
//!
//! The service holds no in-process state: every decision is made against
//! the store, which lets any number of instances share it.

use crate::{
    error::{LockError, LockResult},
    guard::LockGuard,
    item::LockItem,
};
use bytes::Bytes;
use coherence_cache::{CacheStore, Clock, Expiry};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Acquire, renew and release locks held in a [`CacheStore`]
#[derive(Clone)]
pub struct LockService {
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for LockService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockService")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl LockService {
    /// Locks must live in the shared store, never in a process-local tier.
    pub fn new(store: Arc<dyn CacheStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    async fn read(&self, key: &str) -> LockResult<Option<LockItem>> {
        match self.store.get(key).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| LockError::Serialization(format!("{key}: {e}"))),
            None => Ok(None),
        }
    }

    fn encode(item: &LockItem) -> LockResult<Bytes> {
        serde_json::to_vec(item)
            .map(Bytes::from)
            .map_err(|e| LockError::Serialization(format!("{}: {e}", item.key)))
    }

    /// The currently valid lock for `id`, if any
    pub async fn current(&self, id: &str, category: &str) -> LockResult<Option<LockItem>> {
        let now = self.clock.epoch_seconds();
        Ok(self
            .read(&LockItem::key_for(category, id))
            .await?
            .filter(|item| item.is_valid(now)))
    }

    /// Try once to take the lock for `id` in `category`.
    ///
    /// Returns `Ok(None)` when someone else holds it or wins the race.
    pub async fn try_acquire(
        &self,
        id: &str,
        category: &str,
        duration_seconds: u64,
    ) -> LockResult<Option<LockItem>> {
        let key = LockItem::key_for(category, id);
        let now = self.clock.epoch_seconds();

        if let Some(current) = self.read(&key).await? {
            if current.is_valid(now) {
                debug!(key = %key, "lock is held by another owner");
                return Ok(None);
            }
        }

        let item = LockItem::new(id, category, duration_seconds, now);
        let stored = self
            .store
            .add(&key, Self::encode(&item)?, Expiry::from_secs(duration_seconds))
            .await?;
        if !stored {
            debug!(key = %key, "lost lock race");
            return Ok(None);
        }

        // Confirm the write is ours before trusting it
        let confirmed = self.read(&key).await?;
        if item.matches_tokens_with(confirmed.as_ref()) {
            debug!(key = %key, duration_seconds, "lock acquired");
            Ok(Some(item))
        } else {
            warn!(key = %key, "lock was replaced immediately after acquisition");
            Ok(None)
        }
    }

    /// Extend a held lock from now. A `new_duration_seconds` of zero keeps
    /// the current duration.
    ///
    /// If the stored lock has lapsed, a fresh acquisition is attempted and
    /// the returned item carries a new owner token.
    pub async fn renew(&self, lock: &LockItem, new_duration_seconds: u64) -> LockResult<LockItem> {
        let duration = if new_duration_seconds == 0 {
            lock.duration_seconds
        } else {
            new_duration_seconds
        };

        let Some(stored) = self.read(&lock.key).await? else {
            return match self.try_acquire(&lock.id, &lock.category, duration).await? {
                Some(item) => {
                    info!(key = %lock.key, "lapsed lock re-acquired on renewal");
                    Ok(item)
                }
                None => Err(LockError::ownership(&lock.key, &lock.owner_token, None)),
            };
        };

        if stored.owner_token != lock.owner_token {
            return Err(LockError::ownership(
                &lock.key,
                &lock.owner_token,
                Some(&stored.owner_token),
            ));
        }

        let mut renewed = lock.clone();
        renewed.duration_seconds = duration;
        renewed.update(self.clock.epoch_seconds());
        self.store
            .set(&lock.key, Self::encode(&renewed)?, Expiry::from_secs(duration))
            .await?;

        let confirmed = self.read(&lock.key).await?;
        if renewed.matches_tokens_with(confirmed.as_ref()) {
            debug!(key = %lock.key, renewals = renewed.renewal_count, "lock renewed");
            Ok(renewed)
        } else {
            Err(LockError::ownership(
                &lock.key,
                &lock.owner_token,
                confirmed.as_ref().map(|c| c.owner_token.as_str()),
            ))
        }
    }

    /// Renew only when at most `threshold_fraction` of the window remains
    pub async fn renew_if_expiring(
        &self,
        lock: &LockItem,
        threshold_fraction: f64,
    ) -> LockResult<LockItem> {
        if lock.remaining_fraction(self.clock.epoch_seconds()) > threshold_fraction {
            return Ok(lock.clone());
        }
        self.renew(lock, 0).await
    }

    /// Release a held lock.
    ///
    /// A lock already gone is fine. A lock now owned by someone else is left
    /// in place and reported as an ownership violation. Store failures are
    /// logged and swallowed; the TTL reclaims the lock eventually.
    pub async fn release(&self, lock: &LockItem) -> LockResult<()> {
        let stored = match self.read(&lock.key).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(key = %lock.key, error = %e, "could not read lock for release");
                return Ok(());
            }
        };

        match stored {
            None => {
                debug!(key = %lock.key, "lock already released or expired");
                Ok(())
            }
            Some(stored) if stored.owner_token != lock.owner_token => Err(LockError::ownership(
                &lock.key,
                &lock.owner_token,
                Some(&stored.owner_token),
            )),
            Some(_) => {
                if let Err(e) = self.store.remove(&lock.key).await {
                    warn!(key = %lock.key, error = %e, "failed to remove lock");
                } else {
                    debug!(key = %lock.key, "lock released");
                }
                Ok(())
            }
        }
    }

    /// Like [`Self::try_acquire`], but the lock is released when the guard
    /// is released or dropped.
    pub async fn acquire_scoped(
        self: &Arc<Self>,
        id: &str,
        category: &str,
        duration_seconds: u64,
    ) -> LockResult<Option<LockGuard>> {
        Ok(self
            .try_acquire(id, category, duration_seconds)
            .await?
            .map(|item| LockGuard::new(Arc::clone(self), item)))
    }
}
