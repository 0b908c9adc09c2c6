//! Error types shared across the indexer.
use thiserror::Error;

/// Failures parsing a pushed payload. Logged and dropped by the queue.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("block payload missing header height")] MissingHeight,
    #[error("malformed {kind} payload: {message}")] Malformed { kind: &'static str, message: String },
    #[error("encoding: {0}")] Encoding(String),
}

impl PayloadError {
    /// Wrap a serde error for the named payload kind.
    pub fn malformed(kind: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Malformed { kind, message: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let e = PayloadError::malformed("block", "missing field `outputs`");
        assert_eq!(
            e.to_string(),
            "malformed block payload: missing field `outputs`"
        );
        assert!(!PayloadError::MissingHeight.to_string().is_empty());
    }
}
