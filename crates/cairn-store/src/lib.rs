//! # cairn-store
//! SQLite-backed persistence for the Cairn indexer: the ledger store
//! (blocks, transactions, UTXO set, validators) and the pending
//! transaction pool.

pub mod db;
pub mod error;
pub mod ledger;
pub mod pool;
pub mod schema;

pub use db::Database;
pub use error::StoreError;
pub use ledger::{LedgerStore, StoreSettings, UtxoRow};
pub use pool::TransactionPool;
