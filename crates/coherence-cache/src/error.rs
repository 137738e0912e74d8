//! Error types for cache operations

use thiserror::Error;

/// Errors that can occur during cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    /// Cache backend-specific error (store unreachable, rejected write, ...)
    #[error("Backend error: {0}")]
    Backend(String),

    /// A value could not be encoded for storage
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A stored value could not be decoded into the requested type
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Invalid cache configuration
    #[error("Invalid cache configuration: {0}")]
    InvalidConfiguration(String),

    /// Increment/decrement applied to a value that is not an integer counter
    #[error("Value stored under '{0}' is not a counter")]
    NotCounter(String),

    /// A new key was rejected because the store is at capacity
    #[error("Store is full ({max_entries} live entries)")]
    Full {
        /// Configured capacity
        max_entries: usize,
    },

    /// The background write-back queue has been shut down
    #[error("Background queue is closed")]
    QueueClosed,
}

impl CacheError {
    /// Wrap a serde_json encode failure
    pub fn serialization(err: &serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }

    /// Wrap a serde_json decode failure, naming the key that held the value
    pub fn deserialization(key: &str, err: &serde_json::Error) -> Self {
        Self::Deserialization(format!("{key}: {err}"))
    }
}

/// Result type alias for cache operations
pub type CacheResult<T> = Result<T, CacheError>;
