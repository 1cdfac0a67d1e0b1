//! Error types for the storage layer.

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `SQLite` database error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Schema migration failed.
    #[error("migration error: {message}")]
    Migration {
        /// Describes which migration failed and why.
        message: String,
    },

    /// A vector does not have the store's dimensionality.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimensionality the store was opened with.
        expected: usize,
        /// Dimensionality of the offending vector.
        actual: usize,
    },

    /// Stored data violates a structural invariant.
    #[error("corrupt data: {0}")]
    Corrupt(String),
}

/// Convenience type alias for store results.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn sqlite_error_display() {
        let err = StoreError::Sqlite(rusqlite::Error::QueryReturnedNoRows);
        assert!(err.to_string().contains("sqlite error"));
    }

    #[test]
    fn migration_error_display() {
        let err = StoreError::Migration {
            message: "v001 failed: syntax error".into(),
        };
        assert_eq!(err.to_string(), "migration error: v001 failed: syntax error");
    }

    #[test]
    fn dimension_mismatch_display() {
        let err = StoreError::DimensionMismatch {
            expected: 384,
            actual: 2,
        };
        assert_eq!(err.to_string(), "dimension mismatch: expected 384, got 2");
    }

    #[test]
    fn source_chain_preserved() {
        let err: StoreError = rusqlite::Error::QueryReturnedNoRows.into();
        let source = err.source().expect("should have source");
        assert!(source.to_string().contains("Query returned no rows"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<StoreError>();
    }
}
