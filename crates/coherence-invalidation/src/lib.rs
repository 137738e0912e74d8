//! Timestamp-based invalidation of cached GET responses
//!
//! Any node can make another node's cached responses stale without a
//! broadcast channel: served-at and invalidated-at markers live side by side
//! in the shared store and are compared by timestamp.
//!
//! ```rust
//! use coherence_cache::{ManualClock, MemoryStore, MemoryStoreConfig};
//! use coherence_invalidation::{InvalidationConfig, InvalidationService, StaticSessionResolver};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let clock = Arc::new(ManualClock::at_epoch_seconds(100));
//! let store = Arc::new(MemoryStore::new(MemoryStoreConfig::default(), clock.clone())?);
//! let service = InvalidationService::new(
//!     store,
//!     clock,
//!     Arc::new(StaticSessionResolver::new()),
//!     InvalidationConfig::default(),
//! )?;
//!
//! let served_at = service.mark_get_response_served("api", "session-1", "/deals/7").await;
//! service.invalidate("api", "session-1", &["/deals"]).await;
//! assert!(!service.is_cached_get_still_valid("api", "session-1", "/deals/7", served_at).await);
//! # Ok(())
//! # }
//! ```

#![allow(missing_docs)]
#![allow(clippy::return_self_not_must_use)] // Builder patterns

pub mod config;
pub mod resolver;
pub mod service;

pub use config::InvalidationConfig;
pub use resolver::{ResolveError, SessionResolver, StaticSessionResolver};
pub use service::{InvalidationService, invalidated_key, resource_segment, served_key};
