//! Distributed locks and interlocked updates of versioned records
//!
//! Stateless service instances coordinate writes to shared records through
//! locks kept in a shared [`coherence_cache::CacheStore`]:
//!
//! - [`LockService`] acquires, renews and releases locks identified by
//!   `lock:{category}|{id}`, proving ownership with a random owner token
//! - [`LockGuard`] scopes a held lock and releases it when dropped
//! - [`InterlockedWriter`] performs lock / re-read / mutate / write / release
//!   for any [`VersionedRecord`] held in a [`RecordStore`]
//! - [`NotificationSink`] receives a [`ChangeNotification`] after deferred
//!   writes
//!
//! ```rust
//! use coherence_cache::{ManualClock, MemoryStore, MemoryStoreConfig};
//! use coherence_lock::LockService;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let clock = Arc::new(ManualClock::at_epoch_seconds(1_000));
//! let store = Arc::new(MemoryStore::new(MemoryStoreConfig::default(), clock.clone())?);
//! let locks = LockService::new(store, clock);
//!
//! let held = locks.try_acquire("42", "Invoice", 30).await?.expect("uncontended");
//! assert!(locks.try_acquire("42", "Invoice", 30).await?.is_none());
//! locks.release(&held).await?;
//! # Ok(())
//! # }
//! ```

#![allow(missing_docs)]
#![allow(clippy::return_self_not_must_use)] // Builder patterns

pub mod error;
pub mod guard;
pub mod interlocked;
pub mod item;
pub mod notify;
pub mod record;
pub mod service;

pub use error::{LockError, LockResult, NotifyError, StoreError, StoreResult};
pub use guard::LockGuard;
pub use interlocked::{InterlockConfig, InterlockedWriter, lock_duration_seconds};
pub use item::LockItem;
pub use notify::{ChangeNotification, ChannelSink, LoggingSink, NotificationSink};
pub use record::{MemoryRecordStore, RecordKey, RecordStore, VersionedRecord};
pub use service::LockService;
