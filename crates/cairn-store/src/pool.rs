//! Pending transaction pool: in-memory spender index mirrored by the
//! `pool_transactions` / `pool_inputs` / `pool_outputs` tables.
//!
//! The index maps each UTXO key to the set of pending transactions that
//! spend it, so double-spend conflicts are an O(1) lookup per input. The
//! persisted rows exist only so the index can be rebuilt after restart.
//!
//! Mutation discipline: the in-memory maps are touched only from the
//! single-writer ingestion chain, and only *after* the enclosing SQL
//! transaction commits. The SQL row helpers here take an open
//! [`rusqlite::Transaction`] and never touch the maps, so a rollback
//! cannot leave the index ahead of the database.

use std::collections::{HashMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection};
use tracing::debug;

use cairn_core::error::PayloadError;
use cairn_core::types::{Hash256, Transaction};

use crate::error::StoreError;

/// In-memory index of which pending transactions spend which UTXOs.
#[derive(Default)]
pub struct TransactionPool {
    /// UTXO key -> hashes of pending transactions spending it.
    spenders: HashMap<Hash256, HashSet<Hash256>>,
    /// Pending transaction hash -> the UTXO keys it spends.
    inputs_by_tx: HashMap<Hash256, Vec<Hash256>>,
}

impl TransactionPool {
    /// Create an empty pool index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pending transactions tracked.
    pub fn len(&self) -> usize {
        self.inputs_by_tx.len()
    }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.inputs_by_tx.is_empty()
    }

    /// Check if a transaction hash is in the pool.
    pub fn contains(&self, tx_hash: &Hash256) -> bool {
        self.inputs_by_tx.contains_key(tx_hash)
    }

    /// Rebuild the spender index from the persisted pool rows.
    ///
    /// Must run before the pool is used; a failure here is fatal to
    /// ingestion startup since conflict detection would be blind to
    /// pre-restart pending transactions. Returns the number of
    /// transactions loaded.
    pub fn load_spender_list(&mut self, conn: &Connection) -> Result<usize, StoreError> {
        self.spenders.clear();
        self.inputs_by_tx.clear();

        let mut stmt = conn.prepare("SELECT tx_hash, body FROM pool_transactions")?;
        let rows = stmt.query_map([], |row| {
            let hash: String = row.get(0)?;
            let body: String = row.get(1)?;
            Ok((hash, body))
        })?;

        let mut loaded = 0;
        for row in rows {
            let (hash_hex, body) = row?;
            let tx_hash = Hash256::from_hex(&hash_hex)?;
            let tx: Transaction = serde_json::from_str(&body)
                .map_err(|e| PayloadError::malformed("pool transaction", e))?;
            self.register(tx_hash, tx.inputs.iter().map(|i| i.utxo).collect());
            loaded += 1;
        }

        debug!(loaded, "rebuilt pool spender index");
        Ok(loaded)
    }

    /// Register a pending transaction's inputs in the spender index.
    pub fn register(&mut self, tx_hash: Hash256, input_keys: Vec<Hash256>) {
        for key in &input_keys {
            self.spenders.entry(*key).or_default().insert(tx_hash);
        }
        self.inputs_by_tx.insert(tx_hash, input_keys);
    }

    /// Remove a transaction's own entries from the spender index.
    ///
    /// Does not cascade to other claimants of the same inputs; callers
    /// that need eviction resolve the conflict set first via
    /// [`double_spenders`](Self::double_spenders). Returns false if the
    /// hash was not tracked.
    pub fn deregister(&mut self, tx_hash: &Hash256) -> bool {
        let Some(keys) = self.inputs_by_tx.remove(tx_hash) else {
            return false;
        };
        for key in keys {
            if let Some(set) = self.spenders.get_mut(&key) {
                set.remove(tx_hash);
                if set.is_empty() {
                    self.spenders.remove(&key);
                }
            }
        }
        true
    }

    /// Every *other* pending transaction that spends at least one of this
    /// transaction's inputs.
    ///
    /// Hash equality is the only identity: the transaction itself is
    /// excluded from its own conflict set.
    pub fn double_spenders(&self, tx: &Transaction, self_hash: &Hash256) -> Vec<Hash256> {
        let mut seen = HashSet::new();
        for input in &tx.inputs {
            if let Some(set) = self.spenders.get(&input.utxo) {
                for hash in set {
                    if hash != self_hash {
                        seen.insert(*hash);
                    }
                }
            }
        }
        seen.into_iter().collect()
    }

    // --- SQL row helpers (no map mutation) ---

    /// Insert the persisted rows for a pending transaction.
    ///
    /// Each insert must affect exactly one row; anything else aborts the
    /// enclosing transaction.
    pub fn insert_rows(
        dbtx: &rusqlite::Transaction,
        tx_hash: &Hash256,
        tx: &Transaction,
    ) -> Result<(), StoreError> {
        let body = serde_json::to_string(tx)
            .map_err(|e| PayloadError::malformed("pool transaction", e))?;
        let received_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let changed = dbtx.execute(
            "INSERT INTO pool_transactions (tx_hash, tx_type, body, received_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![tx_hash.to_hex(), tx.tx_type.as_u8(), body, received_at],
        )?;
        expect_rows(changed, 1)?;

        for (index, input) in tx.inputs.iter().enumerate() {
            let changed = dbtx.execute(
                "INSERT INTO pool_inputs (tx_hash, input_index, utxo_key)
                 VALUES (?1, ?2, ?3)",
                params![tx_hash.to_hex(), index as u64, input.utxo.to_hex()],
            )?;
            expect_rows(changed, 1)?;
        }

        for (index, output) in tx.outputs.iter().enumerate() {
            let changed = dbtx.execute(
                "INSERT INTO pool_outputs (tx_hash, output_index, amount, address)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    tx_hash.to_hex(),
                    index as u64,
                    output.value,
                    output.address.to_hex()
                ],
            )?;
            expect_rows(changed, 1)?;
        }

        Ok(())
    }

    /// Delete the persisted rows for a pending transaction, if present.
    ///
    /// Returns the number of `pool_transactions` rows removed (0 or 1);
    /// absent rows are not an error, since confirmation removal runs for
    /// every block transaction whether or not it was pending here.
    pub fn delete_rows(
        dbtx: &rusqlite::Transaction,
        tx_hash: &Hash256,
    ) -> Result<usize, StoreError> {
        let hex = tx_hash.to_hex();
        let removed = dbtx.execute(
            "DELETE FROM pool_transactions WHERE tx_hash = ?1",
            params![hex],
        )?;
        dbtx.execute("DELETE FROM pool_inputs WHERE tx_hash = ?1", params![hex])?;
        dbtx.execute("DELETE FROM pool_outputs WHERE tx_hash = ?1", params![hex])?;
        Ok(removed)
    }
}

fn expect_rows(got: usize, expected: usize) -> Result<(), StoreError> {
    if got == expected {
        Ok(())
    } else {
        Err(StoreError::RowCount { expected, got })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::types::{TxInput, TxOutput, TxType};

    use crate::db::Database;

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn key(seed: u8) -> Hash256 {
        Hash256([seed; 32])
    }

    fn make_tx(input_keys: &[Hash256], value: u64) -> Transaction {
        Transaction {
            tx_type: TxType::Payment,
            inputs: input_keys
                .iter()
                .map(|k| TxInput {
                    utxo: *k,
                    unlock: vec![0u8; 64],
                })
                .collect(),
            outputs: vec![TxOutput {
                value,
                address: key(0xAA),
            }],
            payload: vec![],
        }
    }

    fn temp_db() -> (Database, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("index.db")).unwrap();
        (db, dir)
    }

    // ------------------------------------------------------------------
    // In-memory index
    // ------------------------------------------------------------------

    #[test]
    fn new_pool_is_empty() {
        let pool = TransactionPool::new();
        assert!(pool.is_empty());
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn register_and_contains() {
        let mut pool = TransactionPool::new();
        let tx = make_tx(&[key(1)], 100);
        let hash = tx.hash();
        pool.register(hash, vec![key(1)]);

        assert!(pool.contains(&hash));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn deregister_clears_spender_entries() {
        let mut pool = TransactionPool::new();
        let tx = make_tx(&[key(1), key(2)], 100);
        let hash = tx.hash();
        pool.register(hash, vec![key(1), key(2)]);

        assert!(pool.deregister(&hash));
        assert!(pool.is_empty());

        // Both inputs are free again.
        let probe = make_tx(&[key(1), key(2)], 50);
        assert!(pool.double_spenders(&probe, &probe.hash()).is_empty());
    }

    #[test]
    fn deregister_unknown_returns_false() {
        let mut pool = TransactionPool::new();
        assert!(!pool.deregister(&key(9)));
    }

    #[test]
    fn double_spenders_finds_conflict() {
        let mut pool = TransactionPool::new();
        let a = make_tx(&[key(1)], 100);
        let a_hash = a.hash();
        pool.register(a_hash, vec![key(1)]);

        let b = make_tx(&[key(1)], 90);
        let conflicts = pool.double_spenders(&b, &b.hash());
        assert_eq!(conflicts, vec![a_hash]);
    }

    #[test]
    fn double_spenders_excludes_self() {
        let mut pool = TransactionPool::new();
        let a = make_tx(&[key(1)], 100);
        let a_hash = a.hash();
        pool.register(a_hash, vec![key(1)]);

        // The same transaction is not its own double spend.
        assert!(pool.double_spenders(&a, &a_hash).is_empty());
    }

    #[test]
    fn double_spenders_deduplicates() {
        let mut pool = TransactionPool::new();
        // One pending tx spends both keys.
        let a = make_tx(&[key(1), key(2)], 100);
        let a_hash = a.hash();
        pool.register(a_hash, vec![key(1), key(2)]);

        // Conflicting tx also spends both; the claimant appears once.
        let b = make_tx(&[key(1), key(2)], 90);
        let conflicts = pool.double_spenders(&b, &b.hash());
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0], a_hash);
    }

    #[test]
    fn double_spenders_no_conflict() {
        let mut pool = TransactionPool::new();
        let a = make_tx(&[key(1)], 100);
        pool.register(a.hash(), vec![key(1)]);

        let b = make_tx(&[key(2)], 90);
        assert!(pool.double_spenders(&b, &b.hash()).is_empty());
    }

    // ------------------------------------------------------------------
    // Persisted rows + restart recovery
    // ------------------------------------------------------------------

    #[test]
    fn insert_and_load_spender_list() {
        let (db, _dir) = temp_db();
        let tx = make_tx(&[key(1), key(2)], 100);
        let hash = tx.hash();

        db.transaction(|t| TransactionPool::insert_rows(t, &hash, &tx))
            .unwrap();

        // Fresh index rebuilt from rows, as after a restart.
        let mut pool = TransactionPool::new();
        let loaded = db
            .with_connection(|c| pool.load_spender_list(c))
            .unwrap();
        assert_eq!(loaded, 1);
        assert!(pool.contains(&hash));

        let probe = make_tx(&[key(2)], 10);
        assert_eq!(pool.double_spenders(&probe, &probe.hash()), vec![hash]);
    }

    #[test]
    fn insert_rejects_duplicate_hash() {
        let (db, _dir) = temp_db();
        let tx = make_tx(&[key(1)], 100);
        let hash = tx.hash();

        db.transaction(|t| TransactionPool::insert_rows(t, &hash, &tx))
            .unwrap();
        let err = db.transaction(|t| TransactionPool::insert_rows(t, &hash, &tx));
        assert!(err.is_err());
    }

    #[test]
    fn delete_rows_removes_everything() {
        let (db, _dir) = temp_db();
        let tx = make_tx(&[key(1)], 100);
        let hash = tx.hash();

        db.transaction(|t| TransactionPool::insert_rows(t, &hash, &tx))
            .unwrap();
        let removed = db
            .transaction(|t| TransactionPool::delete_rows(t, &hash))
            .unwrap();
        assert_eq!(removed, 1);

        let remaining: i64 = db
            .with_connection(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM pool_inputs WHERE tx_hash = ?1",
                    params![hash.to_hex()],
                    |row| row.get(0),
                )
                .map_err(Into::into)
            })
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[test]
    fn delete_rows_absent_is_zero() {
        let (db, _dir) = temp_db();
        let removed = db
            .transaction(|t| TransactionPool::delete_rows(t, &key(7)))
            .unwrap();
        assert_eq!(removed, 0);
    }

    #[test]
    fn load_replaces_previous_index() {
        let (db, _dir) = temp_db();
        let mut pool = TransactionPool::new();
        pool.register(key(0x0F), vec![key(1)]);

        let loaded = db
            .with_connection(|c| pool.load_spender_list(c))
            .unwrap();
        assert_eq!(loaded, 0);
        assert!(pool.is_empty());
    }
}
