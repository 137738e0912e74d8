//! Error types for locking and interlocked updates

use coherence_cache::CacheError;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the lock service and the interlocked writer
#[derive(Debug, Error)]
pub enum LockError {
    /// No lock could be acquired before the deadline
    #[error("Timed out after {waited:?} waiting for lock '{key}' ({category})")]
    Timeout {
        key: String,
        category: String,
        waited: Duration,
    },

    /// The caller's owner token does not match the stored lock
    #[error("Lock '{key}' is not owned by token {expected} (stored: {found:?})")]
    OwnershipViolation {
        key: String,
        expected: String,
        found: Option<String>,
    },

    /// The cache store holding the locks failed
    #[error("Lock store error: {0}")]
    Cache(#[from] CacheError),

    /// The record store failed
    #[error("Record store error: {0}")]
    Store(#[from] StoreError),

    /// A lock item or record could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl LockError {
    pub(crate) fn ownership(key: &str, expected: &str, found: Option<&str>) -> Self {
        Self::OwnershipViolation {
            key: key.to_string(),
            expected: expected.to_string(),
            found: found.map(str::to_string),
        }
    }
}

/// Errors raised by a [`crate::RecordStore`]
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record store backend error: {0}")]
    Backend(String),

    /// The store rejected a write because of a concurrent modification
    #[error("Conflicting write to record '{0}'")]
    Conflict(String),
}

/// Errors raised by a [`crate::NotificationSink`]
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notification channel closed")]
    Closed,

    #[error("Notification backend error: {0}")]
    Backend(String),
}

/// Result type alias for lock operations
pub type LockResult<T> = Result<T, LockError>;

/// Result type alias for record store operations
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display_names_the_lock() {
        let err = LockError::Timeout {
            key: "lock:Order|7".to_string(),
            category: "Order".to_string(),
            waited: Duration::from_secs(1),
        };
        let message = err.to_string();
        assert!(message.contains("lock:Order|7"));
        assert!(message.contains("(Order)"));
    }

    #[test]
    fn test_conversions() {
        let err: LockError = CacheError::Backend("down".to_string()).into();
        assert!(matches!(err, LockError::Cache(_)));

        let err: LockError = StoreError::Conflict("a|b".to_string()).into();
        assert_eq!(err.to_string(), "Record store error: Conflicting write to record 'a|b'");
    }

    #[test]
    fn test_ownership_helper() {
        let err = LockError::ownership("lock:A|1", "abc", None);
        assert!(matches!(
            err,
            LockError::OwnershipViolation { found: None, .. }
        ));
    }
}
