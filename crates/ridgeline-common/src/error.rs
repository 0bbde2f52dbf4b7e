//! Error types for Ridgeline.

use thiserror::Error;

/// Result type alias using RidgelineError.
pub type Result<T> = std::result::Result<T, RidgelineError>;

/// Errors that can occur in Ridgeline operations.
#[derive(Debug, Error)]
pub enum RidgelineError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error in index {index}: {source}")]
    IndexIo {
        index: String,
        #[source]
        source: std::io::Error,
    },

    // Page cache errors
    #[error("Page not found: {page_id}")]
    PageNotFound { page_id: String },

    #[error("Page cache full, unable to allocate frame")]
    CacheFull,

    #[error("File not registered: {file_id}")]
    FileNotOpen { file_id: u32 },

    #[error("File already exists: {name}")]
    FileAlreadyExists { name: String },

    // Index errors
    #[error("Key too large: {size} bytes (max {max}) in index {index}")]
    KeyTooLarge {
        size: usize,
        max: usize,
        index: String,
    },

    #[error("Index {index} is corrupted: {reason}")]
    TreeCorrupted { index: String, reason: String },

    #[error("Index {index} is not empty ({size} records) and can not be deleted")]
    NotEmptyOnDelete { index: String, size: i64 },

    #[error("Duplicate key in unique index {index}")]
    DuplicateKey { index: String },

    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    // Key codec errors
    #[error("Malformed key encoding: {0}")]
    MalformedKey(String),

    // WAL errors
    #[error("WAL write failed: {0}")]
    WalWriteFailed(String),

    #[error("WAL corrupted at offset {offset}: {reason}")]
    WalCorrupted { offset: u64, reason: String },
}

impl RidgelineError {
    /// Wraps an I/O error with the name of the index it occurred in.
    pub fn index_io(index: &str, source: std::io::Error) -> Self {
        Self::IndexIo {
            index: index.to_string(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_io_error_conversion() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: RidgelineError = io_err.into();
        assert!(matches!(err, RidgelineError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_index_io_carries_name() {
        let io_err = IoError::new(ErrorKind::Other, "disk gone");
        let err = RidgelineError::index_io("users_by_name", io_err);
        assert!(err.to_string().contains("users_by_name"));
    }

    #[test]
    fn test_key_too_large_display() {
        let err = RidgelineError::KeyTooLarge {
            size: 8192,
            max: 4096,
            index: "idx".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Key too large: 8192 bytes (max 4096) in index idx"
        );
    }

    #[test]
    fn test_tree_corrupted_display() {
        let err = RidgelineError::TreeCorrupted {
            index: "idx".to_string(),
            reason: "descent exceeded max depth".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Index idx is corrupted: descent exceeded max depth"
        );
    }

    #[test]
    fn test_not_empty_on_delete_display() {
        let err = RidgelineError::NotEmptyOnDelete {
            index: "idx".to_string(),
            size: 42,
        };
        assert!(err.to_string().contains("42 records"));
    }

    #[test]
    fn test_wal_corrupted_display() {
        let err = RidgelineError::WalCorrupted {
            offset: 1024,
            reason: "checksum mismatch".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "WAL corrupted at offset 1024: checksum mismatch"
        );
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RidgelineError>();
    }
}
