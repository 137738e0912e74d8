//! Pluggable cache stores, two-tier caching and get-or-compute
//!
//! This crate is the storage foundation of the coherence workspace. Locks,
//! invalidation markers and cached responses all live in a [`CacheStore`],
//! and every expiry decision reads time through an injected [`Clock`].
//!
//! # Features
//!
//! - **Store contract**: [`CacheStore`] on raw bytes with an atomic
//!   create-if-absent ([`CacheStore::add`]) and atomic counters
//! - **In-memory store**: [`MemoryStore`], DashMap-backed, capacity-bounded,
//!   with lazy and swept expiry
//! - **Two tiers**: [`TwoTierStore`] puts a local store in front of a shared
//!   one and never lets the local copy outlive the shared value
//! - **Get-or-compute**: [`CacheClient::try_get`] and
//!   [`CacheClient::try_get_async`] serve hits, compute misses and write them
//!   back without making the caller wait
//! - **Background write-back**: [`BackgroundQueue`] retries failed writes with
//!   jittered backoff and bounds the amount of queued work
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐
//! │   CacheClient (typed, JSON)  │──► BackgroundQueue
//! └──────────────────────────────┘
//!                │
//! ┌──────────────────────────────┐
//! │     CacheStore trait         │
//! └──────────────────────────────┘
//!        │                │
//!  ┌───────────┐   ┌──────────────────────┐
//!  │MemoryStore│   │ TwoTierStore         │
//!  └───────────┘   │  local ─► remote     │
//!                  └──────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use coherence_cache::{CacheClient, CacheConfig, MemoryStore, MemoryStoreConfig, SystemClock};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let clock = Arc::new(SystemClock);
//! let store = Arc::new(MemoryStore::new(MemoryStoreConfig::default(), clock.clone())?);
//! let client = CacheClient::new(store, clock);
//!
//! let total: u64 = client
//!     .try_get("report:total", || 42, &CacheConfig::for_seconds(60))
//!     .await;
//! assert_eq!(total, 42);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![allow(clippy::return_self_not_must_use)] // Builder patterns

pub mod background;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod memory_store;
pub mod stats;
pub mod traits;
pub mod two_tier;

pub use background::{BackgroundQueue, BackgroundStats};
pub use client::CacheClient;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BackgroundConfig, CacheConfig, Expiry, MemoryStoreConfig, TwoTierConfig};
pub use error::{CacheError, CacheResult};
pub use memory_store::MemoryStore;
pub use stats::{AtomicCacheMetrics, CacheStats, TwoTierStats};
pub use traits::{CacheStore, StoredValue};
pub use two_tier::TwoTierStore;
