//! Store error types
//!
//! Every failure in the block layer, the registry and the query path is a
//! `StoreError`. Callers use [`StoreError::is_transient`] to tell retriable
//! object-store trouble apart from corrupt artifacts.

use thiserror::Error;

/// Errors that can occur while syncing or querying blocks
#[derive(Error, Debug)]
pub enum StoreError {
    /// Local I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Object store request failed (network, throttling, backend outage)
    #[error("Bucket error: {0}")]
    Bucket(String),

    /// Requested object does not exist in the bucket
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Data corruption detected (checksum mismatch, invalid magic, bad offsets)
    #[error("Corrupt data: {0}")]
    Corruption(String),

    /// Block metadata is malformed or violates block invariants
    #[error("Invalid block metadata: {0}")]
    InvalidMeta(String),

    /// Label matcher could not be constructed
    #[error("Invalid matcher: {0}")]
    InvalidMatcher(String),

    /// Series selector string could not be parsed
    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    /// Serialization of an artifact failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The caller cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,

    /// Lock acquisition failed
    #[error("Lock error: {0}")]
    Lock(String),
}

impl StoreError {
    /// Whether a later attempt may succeed without the artifact changing.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Io(_) | StoreError::Bucket(_) | StoreError::NotFound(_)
        )
    }

    /// Whether the error is caused by a malformed artifact.
    pub fn is_corruption(&self) -> bool {
        matches!(self, StoreError::Corruption(_) | StoreError::InvalidMeta(_))
    }
}

impl From<object_store::Error> for StoreError {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => StoreError::NotFound(path),
            other => StoreError::Bucket(other.to_string()),
        }
    }
}

impl From<bincode::Error> for StoreError {
    fn from(err: bincode::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::Corruption("index checksum mismatch".to_string());
        assert_eq!(err.to_string(), "Corrupt data: index checksum mismatch");

        let err = StoreError::Cancelled;
        assert_eq!(err.to_string(), "Operation cancelled");
    }

    #[test]
    fn test_transient_classification() {
        assert!(StoreError::Bucket("timeout".into()).is_transient());
        assert!(StoreError::NotFound("01H/meta.json".into()).is_transient());
        assert!(!StoreError::Corruption("bad magic".into()).is_transient());
        assert!(StoreError::InvalidMeta("minTime > maxTime".into()).is_corruption());
    }

    #[test]
    fn test_object_store_not_found_conversion() {
        let err = object_store::Error::NotFound {
            path: "blocks/x/meta.json".to_string(),
            source: "missing".into(),
        };
        let store_err: StoreError = err.into();
        assert!(matches!(store_err, StoreError::NotFound(_)));
    }
}
