//! Error type for queue items.

use cairn_core::error::PayloadError;
use cairn_store::StoreError;
use thiserror::Error;

use crate::client::UpstreamError;

/// Failure of a single queue item. Logged by the worker, never fatal to
/// the queue itself.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

impl IngestError {
    /// True for duplicate-height block writes, which redundant delivery
    /// makes routine.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_duplicate())
    }
}
