//! Interlocked read-modify-write of versioned records
//!
//! [`InterlockedWriter`] serializes writers of the same record across every
//! service instance sharing a lock store:
//!
//! 1. acquire the record's lock, retrying with a random 150-550 ms pause
//!    until the acquisition deadline passes;
//! 2. re-read the record and keep whichever copy is strictly newer, the
//!    fresh one or the caller's (ties favour the caller);
//! 3. mutate that copy, stamp it and write it;
//! 4. release the lock on every exit path.
//!
//! The deadline bounds acquisition only. Once the lock is held the write
//! runs to completion however long it takes.

use crate::{
    error::{LockError, LockResult},
    guard::LockGuard,
    item::LockItem,
    notify::{ChangeNotification, NotificationSink},
    record::{RecordKey, RecordStore, VersionedRecord},
    service::LockService,
};
use rand::{RngExt, rng};
use serde::{Deserialize, Serialize};
use std::{marker::PhantomData, str::FromStr, sync::Arc, time::Duration};
use tokio::time::{Instant, sleep};
use tracing::{debug, error, warn};

fn env_millis(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|s| u64::from_str(s.trim()).ok())
        .map(Duration::from_millis)
}

/// Timing of lock acquisition for interlocked writes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterlockConfig {
    /// Default acquisition deadline when a call does not pass one
    pub timeout: Duration,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
}

impl Default for InterlockConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            backoff_min: Duration::from_millis(150),
            backoff_max: Duration::from_millis(550),
        }
    }
}

impl InterlockConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.backoff_min = min;
        self.backoff_max = max;
        self
    }

    /// Load from `COHERENCE_INTERLOCK_TIMEOUT_MS`,
    /// `COHERENCE_INTERLOCK_BACKOFF_MIN_MS` and
    /// `COHERENCE_INTERLOCK_BACKOFF_MAX_MS`, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            timeout: env_millis("COHERENCE_INTERLOCK_TIMEOUT_MS").unwrap_or(defaults.timeout),
            backoff_min: env_millis("COHERENCE_INTERLOCK_BACKOFF_MIN_MS")
                .unwrap_or(defaults.backoff_min),
            backoff_max: env_millis("COHERENCE_INTERLOCK_BACKOFF_MAX_MS")
                .unwrap_or(defaults.backoff_max),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.timeout.is_zero() {
            return Err("timeout must be greater than 0".to_string());
        }
        if self.backoff_min > self.backoff_max {
            return Err("backoff_min must not exceed backoff_max".to_string());
        }
        Ok(())
    }

    /// Uniformly random pause between two acquisition attempts
    pub fn backoff_delay(&self) -> Duration {
        let min = u64::try_from(self.backoff_min.as_millis()).unwrap_or(u64::MAX);
        let max = u64::try_from(self.backoff_max.as_millis()).unwrap_or(u64::MAX);
        if min >= max {
            return self.backoff_min;
        }
        Duration::from_millis(rng().random_range(min..=max))
    }
}

/// Lock lifetime for a given acquisition deadline: half of it, at least 1 s
pub fn lock_duration_seconds(timeout: Duration) -> u64 {
    (timeout.as_secs() / 2).max(1)
}

/// Writes records of type `R` to `S` under a distributed lock
pub struct InterlockedWriter<R, S> {
    locks: Arc<LockService>,
    store: Arc<S>,
    config: InterlockConfig,
    sink: Option<Arc<dyn NotificationSink>>,
    _record: PhantomData<fn() -> R>,
}

impl<R, S> std::fmt::Debug for InterlockedWriter<R, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterlockedWriter")
            .field("config", &self.config)
            .field("notifies", &self.sink.is_some())
            .finish_non_exhaustive()
    }
}

impl<R, S> InterlockedWriter<R, S>
where
    R: VersionedRecord,
    S: RecordStore<R>,
{
    pub fn new(locks: Arc<LockService>, store: Arc<S>, config: InterlockConfig) -> Self {
        Self {
            locks,
            store,
            config,
            sink: None,
            _record: PhantomData,
        }
    }

    #[must_use]
    pub fn with_notification_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &InterlockConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Lock, re-read, mutate in place, write, release
    pub async fn put_item_tracked_interlocked<F>(
        &self,
        item: R,
        mutate: F,
        timeout: Option<Duration>,
    ) -> LockResult<R>
    where
        F: FnOnce(&mut R) + Send,
    {
        self.put_item_tracked_interlocked_with(
            item,
            |mut record| {
                mutate(&mut record);
                record
            },
            timeout,
        )
        .await
    }

    /// As [`Self::put_item_tracked_interlocked`], with a mutation that
    /// returns a new model instead of editing in place
    pub async fn put_item_tracked_interlocked_with<F>(
        &self,
        item: R,
        mutate: F,
        timeout: Option<Duration>,
    ) -> LockResult<R>
    where
        F: FnOnce(R) -> R + Send,
    {
        let timeout = timeout.unwrap_or(self.config.timeout);
        let key = item.record_key();
        let category = R::lock_category();

        let lock = self.acquire(&key, &category, timeout).await?;
        let guard = LockGuard::new(Arc::clone(&self.locks), lock);

        let result = self.write_locked(&key, item, mutate).await;

        if let Err(e) = guard.release().await {
            error!(record = %key, category = %category, error = %e, "failed to release record lock");
        }
        result
    }

    /// As [`Self::put_item_tracked_interlocked`], then announce the change.
    /// Notification failures are logged, never returned.
    pub async fn put_item_tracked_interlocked_and_defer<F>(
        &self,
        item: R,
        mutate: F,
        timeout: Option<Duration>,
    ) -> LockResult<R>
    where
        F: FnOnce(&mut R) + Send,
    {
        let stored = self
            .put_item_tracked_interlocked(item, mutate, timeout)
            .await?;

        let Some(sink) = &self.sink else {
            debug!("no notification sink configured");
            return Ok(stored);
        };

        let notification = ChangeNotification {
            category: R::lock_category(),
            key: stored.record_key().to_string(),
            modified_at: stored.modified_at(),
        };
        if let Err(e) = sink.publish(notification).await {
            warn!(record = %stored.record_key(), error = %e, "failed to publish change notification");
        }
        Ok(stored)
    }

    async fn acquire(
        &self,
        key: &RecordKey,
        category: &str,
        timeout: Duration,
    ) -> LockResult<LockItem> {
        let id = key.to_string();
        let duration_seconds = lock_duration_seconds(timeout);
        let started = Instant::now();
        let deadline = started + timeout;
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            match self.locks.try_acquire(&id, category, duration_seconds).await {
                Ok(Some(lock)) => return Ok(lock),
                Ok(None) => debug!(record = %id, category, attempts, "record lock contended"),
                Err(e) => {
                    warn!(record = %id, category, attempts, error = %e, "lock store error, retrying");
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(LockError::Timeout {
                    key: LockItem::key_for(category, &id),
                    category: category.to_string(),
                    waited: now - started,
                });
            }
            sleep(self.config.backoff_delay().min(deadline - now)).await;
        }
    }

    async fn write_locked<F>(&self, key: &RecordKey, item: R, mutate: F) -> LockResult<R>
    where
        F: FnOnce(R) -> R + Send,
    {
        let fresh = self.store.get_item(key).await?;
        let base = match fresh {
            Some(fresh) if fresh.modified_at() > item.modified_at() => {
                debug!(record = %key, "mutating newer stored copy");
                fresh
            }
            _ => item,
        };

        let mut updated = mutate(base);
        updated.touch(self.locks.clock().epoch_seconds());
        Ok(self.store.put_item(&updated).await?)
    }
}
