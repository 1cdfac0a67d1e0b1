//! Error types for clustering, centroid maintenance and routing.

use strata_store::StoreError;
use thiserror::Error;

/// Errors raised by the clustering core.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Required state is missing or a parameter is out of range.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// There is nothing to operate on.
    #[error("no data: {0}")]
    DataAbsence(String),

    /// Every candidate cluster was checked and none has members.
    #[error("routing exhausted: {0}")]
    RoutingExhaustion(String),

    /// Some assignment pages of a build could not be written.
    #[error("{failed_pages} of {total_pages} assignment pages failed ({failed_rows} rows not written)")]
    PartialBatchFailure {
        /// Pages whose transaction failed.
        failed_pages: usize,
        /// Pages attempted.
        total_pages: usize,
        /// Assignment rows in the failed pages.
        failed_rows: usize,
    },

    /// Vectors disagree on dimensionality.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimensionality of the store.
        expected: usize,
        /// Dimensionality of the offending vector.
        actual: usize,
    },

    /// Underlying store failure.
    #[error("store error: {0}")]
    Store(#[source] StoreError),
}

impl From<StoreError> for ClusterError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DimensionMismatch { expected, actual } => {
                Self::DimensionMismatch { expected, actual }
            }
            other => Self::Store(other),
        }
    }
}

/// Convenience type alias for clustering results.
pub type Result<T> = std::result::Result<T, ClusterError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn store_dimension_mismatch_is_lifted() {
        let err: ClusterError = StoreError::DimensionMismatch {
            expected: 384,
            actual: 3,
        }
        .into();
        assert!(matches!(
            err,
            ClusterError::DimensionMismatch {
                expected: 384,
                actual: 3
            }
        ));
    }

    #[test]
    fn store_error_keeps_source() {
        let err: ClusterError = StoreError::Corrupt("bad blob".into()).into();
        assert!(err.to_string().contains("bad blob"));
        assert!(err.source().is_some());
    }

    #[test]
    fn partial_failure_display() {
        let err = ClusterError::PartialBatchFailure {
            failed_pages: 1,
            total_pages: 4,
            failed_rows: 250,
        };
        assert_eq!(
            err.to_string(),
            "1 of 4 assignment pages failed (250 rows not written)"
        );
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ClusterError>();
    }
}
