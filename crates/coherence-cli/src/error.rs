//! Error types for the simulation driver.

use coherence_cache::CacheError;
use coherence_lock::{LockError, StoreError};
use thiserror::Error;

/// Errors that abort a simulation run.
#[derive(Debug, Error)]
pub enum SimError {
    /// A command-line or environment setting is out of range
    #[error("Invalid {field}: {reason}")]
    InvalidConfig {
        /// Name of the offending setting
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },

    /// An interlocked update failed
    #[error("Interlocked update failed: {0}")]
    Lock(#[from] LockError),

    /// A cache component could not be built
    #[error("Cache setup failed: {0}")]
    Cache(#[from] CacheError),

    /// Reading back the final record failed
    #[error("Record store failed: {0}")]
    Store(#[from] StoreError),

    /// A worker task panicked or was cancelled
    #[error("Worker {worker} did not finish: {reason}")]
    Worker {
        /// Index of the worker
        worker: usize,
        /// Join failure description
        reason: String,
    },
}
