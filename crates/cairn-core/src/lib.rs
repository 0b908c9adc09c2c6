//! # cairn-core
//! Foundation types for the Cairn block indexer.

pub mod constants;
pub mod error;
pub mod merkle;
pub mod types;
