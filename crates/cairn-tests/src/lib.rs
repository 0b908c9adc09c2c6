//! Integration test suite for the Cairn ingestion pipeline.
//!
//! The tests drive the real queue, recovery controller, and ledger store
//! against a scripted upstream node, covering out-of-order delivery, gap
//! recovery, pool eviction, and melting propagation end to end.

pub mod helpers;
