//! # cairn-ingest
//! The ingestion core: a strictly serialized event queue over the ledger
//! store, plus the paged gap-recovery protocol against the upstream node.

pub mod client;
pub mod error;
pub mod queue;
pub mod recovery;

pub use client::{NodeClient, RestClient, UpstreamError};
pub use error::IngestError;
pub use queue::IngestionQueue;
pub use recovery::Recovery;
