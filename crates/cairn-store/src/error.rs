//! Error types for the store layer.

use cairn_core::error::PayloadError;
use thiserror::Error;

/// Errors from the ledger store and transaction pool.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")] Sqlite(#[from] rusqlite::Error),
    #[error("connection pool: {0}")] Pool(#[from] r2d2::Error),
    #[error("io: {0}")] Io(#[from] std::io::Error),
    /// A block row already exists at this height. Benign under redundant
    /// delivery; the surrounding transaction has been rolled back.
    #[error("duplicate block at height {0}")] DuplicateHeight(u64),
    #[error("row count mismatch: expected {expected}, got {got}")] RowCount { expected: usize, got: usize },
    #[error("integrity: {0}")] Integrity(String),
    #[error(transparent)] Payload(#[from] PayloadError),
}

impl StoreError {
    /// True when the error is a duplicate-height insert, which redundant
    /// delivery makes an expected outcome rather than a fault.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateHeight(_))
    }
}

/// Check whether a rusqlite error is a unique/primary-key violation.
pub(crate) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_detection() {
        assert!(StoreError::DuplicateHeight(3).is_duplicate());
        assert!(!StoreError::Integrity("x".into()).is_duplicate());
    }

    #[test]
    fn error_display() {
        let e = StoreError::RowCount { expected: 1, got: 0 };
        assert_eq!(e.to_string(), "row count mismatch: expected 1, got 0");
    }
}
