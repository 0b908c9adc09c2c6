//! Transactional block persistence and the expected-height marker.
//!
//! [`LedgerStore`] owns the database and the pool index. `put_block`
//! writes one block's full effect in a single SQL transaction: pool row
//! cleanup for confirmed transactions, the block row, transaction rows,
//! input and output rows, the UTXO-set delta, enrollments and validator
//! rows, the merkle tree, aggregate stats, and the expected-height marker.
//! Any failure rolls the whole unit back.
//!
//! The in-memory pool index is only mutated after the SQL transaction
//! commits, so the index never runs ahead of the persisted rows.

use std::path::Path;

use rusqlite::{params, OptionalExtension, Transaction as DbTx};
use tracing::{debug, info};

use cairn_core::constants::FREEZE_UNLOCK_BLOCKS;
use cairn_core::merkle::merkle_tree;
use cairn_core::types::{utxo_key, Block, Hash256, PreImage, Transaction, TxType};

use crate::db::Database;
use crate::error::{is_constraint_violation, StoreError};
use crate::pool::TransactionPool;
use crate::schema::info_keys;

/// Policy settings for the ledger store.
#[derive(Clone, Debug)]
pub struct StoreSettings {
    /// Genesis timestamp in unix seconds. Block header time offsets are
    /// added to this when persisting.
    pub genesis_timestamp: u64,
    /// Address exempt from freeze-propagation locks. Outputs of a melting
    /// transaction paid here unlock at height + 1 like ordinary change.
    pub exempt_address: Option<Hash256>,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            genesis_timestamp: cairn_core::constants::DEFAULT_GENESIS_TIMESTAMP,
            exempt_address: None,
        }
    }
}

/// A live UTXO row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UtxoRow {
    pub utxo_key: Hash256,
    pub tx_hash: Hash256,
    pub output_index: u64,
    pub tx_type: TxType,
    pub amount: u64,
    pub address: Hash256,
    pub unlock_height: u64,
}

/// The ledger store: database handle, pool index, and policy settings.
pub struct LedgerStore {
    db: Database,
    pool: TransactionPool,
    settings: StoreSettings,
}

impl LedgerStore {
    /// Open the store at the given path and rebuild the pool index from
    /// the persisted pool rows.
    ///
    /// A failure to rebuild the index is fatal: without it the store
    /// cannot detect double spends among pre-restart pending
    /// transactions.
    pub fn open(path: impl AsRef<Path>, settings: StoreSettings) -> Result<Self, StoreError> {
        let db = Database::open(path)?;
        let mut pool = TransactionPool::new();
        let loaded = db.with_connection(|conn| pool.load_spender_list(conn))?;
        if loaded > 0 {
            info!(pending = loaded, "restored transaction pool");
        }
        Ok(Self { db, pool, settings })
    }

    /// The underlying database handle, for read-side queries.
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// The next block height this store expects, 0 when empty.
    pub fn expected_height(&self) -> Result<u64, StoreError> {
        self.db.with_connection(|conn| {
            let value: Option<String> = conn
                .query_row(
                    "SELECT value FROM chain_info WHERE name = ?1",
                    params![info_keys::EXPECTED_HEIGHT],
                    |row| row.get(0),
                )
                .optional()?;
            match value {
                None => Ok(0),
                Some(s) => s
                    .parse::<u64>()
                    .map_err(|_| StoreError::Integrity(format!("bad height marker {s:?}"))),
            }
        })
    }

    /// Persist one block and its full derived effect atomically.
    ///
    /// Duplicate heights surface as [`StoreError::DuplicateHeight`] with
    /// nothing written; callers treat that as redundant delivery, not
    /// corruption. Confirmed transactions are removed from the pool as
    /// part of the same transaction, and from the in-memory index after
    /// commit.
    pub fn put_block(&mut self, block: &Block) -> Result<(), StoreError> {
        let height = block.header.height;
        let tx_hashes = block.tx_hashes();
        let settings = self.settings.clone();

        self.db.transaction(|dbtx| {
            // Confirmed transactions leave the pool. Only their own rows:
            // conflicting claimants stay pending until evicted by receipt
            // of a competing transaction.
            for hash in &tx_hashes {
                TransactionPool::delete_rows(dbtx, hash)?;
            }

            insert_block_row(dbtx, block, &settings)?;

            let mut total_sent: u64 = 0;
            let mut total_fee: u64 = 0;
            let mut total_size: u64 = 0;
            for (index, tx) in block.transactions.iter().enumerate() {
                let written = insert_transaction(
                    dbtx,
                    height,
                    index as u64,
                    &tx_hashes[index],
                    tx,
                    &settings,
                )?;
                total_sent = total_sent.saturating_add(written.sent);
                total_fee = total_fee.saturating_add(written.fee);
                total_size = total_size.saturating_add(tx.serialized_size() as u64);
            }

            insert_enrollments(dbtx, block)?;
            insert_merkle_tree(dbtx, height, &tx_hashes)?;

            dbtx.execute(
                "INSERT INTO block_stats (block_height, tx_count, total_sent, total_fee, total_size)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    height,
                    block.transactions.len() as u64,
                    total_sent,
                    total_fee,
                    total_size
                ],
            )?;

            dbtx.execute(
                "INSERT INTO chain_info (name, value) VALUES (?1, ?2)
                 ON CONFLICT(name) DO UPDATE SET value = excluded.value",
                params![info_keys::EXPECTED_HEIGHT, (height + 1).to_string()],
            )?;

            Ok(())
        })?;

        // Committed. Now the in-memory index may follow.
        for hash in &tx_hashes {
            self.pool.deregister(hash);
        }

        info!(
            height,
            txs = block.transactions.len(),
            enrollments = block.enrollments.len(),
            "block persisted"
        );
        Ok(())
    }

    /// Conditionally advance a validator's stored pre-image.
    ///
    /// The update applies only against the stake's most recent enrollment,
    /// only for a strictly greater height, and only within the cycle.
    /// Returns the number of rows changed (0 or 1).
    pub fn update_preimage(&self, preimage: &PreImage) -> Result<usize, StoreError> {
        let changed = self.db.with_connection(|conn| {
            conn.execute(
                "UPDATE validators
                 SET preimage_height = ?1, preimage_hash = ?2
                 WHERE utxo_key = ?3
                   AND enrolled_at = (SELECT MAX(enrolled_at) FROM validators
                                      WHERE utxo_key = ?3)
                   AND ?1 > preimage_height
                   AND ?1 <= enrolled_at + cycle_length",
                params![
                    preimage.height,
                    preimage.hash.to_hex(),
                    preimage.utxo_key.to_hex()
                ],
            )
            .map_err(Into::into)
        })?;
        debug!(
            utxo_key = %preimage.utxo_key,
            height = preimage.height,
            changed,
            "pre-image update"
        );
        Ok(changed)
    }

    /// Admit a transaction to the pending pool, evicting double spenders.
    ///
    /// Any pending transaction claiming one of the same inputs is removed,
    /// rows and index both, before this one is persisted. The whole row
    /// mutation is one transaction; the index is updated after commit.
    pub fn put_pool_tx(&mut self, tx: &Transaction) -> Result<(), StoreError> {
        let tx_hash = tx.hash();
        let victims = self.pool.double_spenders(tx, &tx_hash);

        self.db.transaction(|dbtx| {
            for victim in &victims {
                TransactionPool::delete_rows(dbtx, victim)?;
            }
            // Redundant delivery of the same transaction replaces its rows.
            TransactionPool::delete_rows(dbtx, &tx_hash)?;
            TransactionPool::insert_rows(dbtx, &tx_hash, tx)
        })?;

        for victim in &victims {
            self.pool.deregister(victim);
            debug!(victim = %victim, winner = %tx_hash, "evicted double spender");
        }
        self.pool.deregister(&tx_hash);
        self.pool
            .register(tx_hash, tx.inputs.iter().map(|i| i.utxo).collect());
        Ok(())
    }

    // --- read helpers ---

    /// Whether a block row exists at the given height.
    pub fn has_block(&self, height: u64) -> Result<bool, StoreError> {
        self.db.with_connection(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM blocks WHERE height = ?1",
                    params![height],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Hash of the block at the given height, if persisted.
    pub fn block_hash(&self, height: u64) -> Result<Option<Hash256>, StoreError> {
        self.db.with_connection(|conn| {
            let hex: Option<String> = conn
                .query_row(
                    "SELECT hash FROM blocks WHERE height = ?1",
                    params![height],
                    |row| row.get(0),
                )
                .optional()?;
            match hex {
                None => Ok(None),
                Some(s) => Ok(Some(Hash256::from_hex(&s)?)),
            }
        })
    }

    /// Look up a live UTXO row by key.
    pub fn get_utxo(&self, key: &Hash256) -> Result<Option<UtxoRow>, StoreError> {
        self.db.with_connection(|conn| {
            let row = conn
                .query_row(
                    "SELECT tx_hash, output_index, tx_type, amount, address, unlock_height
                     FROM utxos WHERE utxo_key = ?1",
                    params![key.to_hex()],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, u64>(1)?,
                            row.get::<_, u8>(2)?,
                            row.get::<_, u64>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, u64>(5)?,
                        ))
                    },
                )
                .optional()?;
            match row {
                None => Ok(None),
                Some((tx_hash, output_index, tx_type, amount, address, unlock_height)) => {
                    Ok(Some(UtxoRow {
                        utxo_key: *key,
                        tx_hash: Hash256::from_hex(&tx_hash)?,
                        output_index,
                        tx_type: TxType::from_u8(tx_type)?,
                        amount,
                        address: Hash256::from_hex(&address)?,
                        unlock_height,
                    }))
                }
            }
        })
    }

    /// Latest stored pre-image (height, hash) for a stake UTXO key.
    pub fn validator_preimage(
        &self,
        utxo_key: &Hash256,
    ) -> Result<Option<(u64, Hash256)>, StoreError> {
        self.db.with_connection(|conn| {
            let row = conn
                .query_row(
                    "SELECT preimage_height, preimage_hash FROM validators
                     WHERE utxo_key = ?1
                     ORDER BY enrolled_at DESC LIMIT 1",
                    params![utxo_key.to_hex()],
                    |row| Ok((row.get::<_, u64>(0)?, row.get::<_, String>(1)?)),
                )
                .optional()?;
            match row {
                None => Ok(None),
                Some((height, hash)) => Ok(Some((height, Hash256::from_hex(&hash)?))),
            }
        })
    }

    /// Number of transactions in the pending pool.
    pub fn pool_len(&self) -> usize {
        self.pool.len()
    }

    /// Whether a transaction hash is pending in the pool.
    pub fn pool_contains(&self, tx_hash: &Hash256) -> bool {
        self.pool.contains(tx_hash)
    }
}

struct WrittenTx {
    fee: u64,
    sent: u64,
}

fn insert_block_row(
    dbtx: &DbTx,
    block: &Block,
    settings: &StoreSettings,
) -> Result<(), StoreError> {
    let header = &block.header;
    // The offset comes straight from the payload; an absurd value must
    // fail the write, not wrap the timestamp.
    let time_stamp = settings
        .genesis_timestamp
        .checked_add(header.time_offset)
        .ok_or_else(|| {
            StoreError::Integrity(format!(
                "time offset {} overflows the genesis timestamp",
                header.time_offset
            ))
        })?;
    let result = dbtx.execute(
        "INSERT INTO blocks (height, hash, prev_hash, merkle_root, signature,
                             random_seed, validators, tx_count, enrollment_count,
                             time_stamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            header.height,
            header.hash().to_hex(),
            header.prev_hash.to_hex(),
            header.merkle_root.to_hex(),
            hex::encode(&header.signature),
            header.random_seed.to_hex(),
            hex::encode(&header.validators),
            block.transactions.len() as u64,
            block.enrollments.len() as u64,
            time_stamp
        ],
    );
    match result {
        Ok(_) => Ok(()),
        Err(err) if is_constraint_violation(&err) => {
            Err(StoreError::DuplicateHeight(header.height))
        }
        Err(err) => Err(err.into()),
    }
}

fn insert_transaction(
    dbtx: &DbTx,
    height: u64,
    tx_index: u64,
    tx_hash: &Hash256,
    tx: &Transaction,
    settings: &StoreSettings,
) -> Result<WrittenTx, StoreError> {
    // Resolve input UTXOs up front. A missing row means spending an
    // already-spent or never-seen output, which a committed upstream chain
    // cannot produce.
    let mut input_sum: u64 = 0;
    let mut melting = false;
    for input in &tx.inputs {
        let (amount, source_type) = lookup_utxo(dbtx, &input.utxo)?.ok_or_else(|| {
            StoreError::Integrity(format!("input spends unknown utxo {}", input.utxo))
        })?;
        input_sum = input_sum.saturating_add(amount);
        if source_type == TxType::Freeze {
            melting = true;
        }
    }

    let output_sum = tx.total_output_value().ok_or_else(|| {
        StoreError::Integrity(format!("output value overflow in tx {tx_hash}"))
    })?;
    let fee = if tx.inputs.is_empty() {
        0
    } else {
        input_sum.checked_sub(output_sum).ok_or_else(|| {
            StoreError::Integrity(format!("outputs exceed inputs in tx {tx_hash}"))
        })?
    };

    // A thawing stake stays locked for a full difficulty period.
    let unlock_height = if melting {
        height + FREEZE_UNLOCK_BLOCKS
    } else {
        height + 1
    };

    let changed = dbtx.execute(
        "INSERT INTO transactions (block_height, tx_index, tx_hash, tx_type,
                                   fee, unlock_height, payload)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            height,
            tx_index,
            tx_hash.to_hex(),
            tx.tx_type.as_u8(),
            fee,
            unlock_height,
            tx.payload
        ],
    )?;
    expect_one(changed)?;

    for (input_index, input) in tx.inputs.iter().enumerate() {
        let changed = dbtx.execute(
            "INSERT INTO tx_inputs (block_height, tx_index, input_index, utxo_key, unlock)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                height,
                tx_index,
                input_index as u64,
                input.utxo.to_hex(),
                input.unlock
            ],
        )?;
        expect_one(changed)?;

        let deleted = dbtx.execute(
            "DELETE FROM utxos WHERE utxo_key = ?1",
            params![input.utxo.to_hex()],
        )?;
        expect_one(deleted)?;
    }

    for (output_index, output) in tx.outputs.iter().enumerate() {
        let key = utxo_key(tx_hash, output_index as u64);
        let changed = dbtx.execute(
            "INSERT INTO tx_outputs (block_height, tx_index, output_index,
                                     utxo_key, amount, address)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                height,
                tx_index,
                output_index as u64,
                key.to_hex(),
                output.value,
                output.address.to_hex()
            ],
        )?;
        expect_one(changed)?;

        // Melting change stays frozen unless it is paid to the exempt
        // commons address.
        let exempt = settings.exempt_address.as_ref() == Some(&output.address);
        let output_unlock = if melting && !exempt {
            height + FREEZE_UNLOCK_BLOCKS
        } else {
            height + 1
        };
        let changed = dbtx.execute(
            "INSERT INTO utxos (utxo_key, tx_hash, output_index, tx_type,
                                amount, address, unlock_height)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                key.to_hex(),
                tx_hash.to_hex(),
                output_index as u64,
                tx.tx_type.as_u8(),
                output.value,
                output.address.to_hex(),
                output_unlock
            ],
        )?;
        expect_one(changed)?;
    }

    Ok(WrittenTx {
        fee,
        sent: output_sum,
    })
}

fn insert_enrollments(dbtx: &DbTx, block: &Block) -> Result<(), StoreError> {
    let height = block.header.height;
    for (index, enrollment) in block.enrollments.iter().enumerate() {
        let changed = dbtx.execute(
            "INSERT INTO enrollments (block_height, enrollment_index, utxo_key,
                                      commitment, cycle_length, enroll_sig)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                height,
                index as u64,
                enrollment.utxo_key.to_hex(),
                enrollment.commitment.to_hex(),
                enrollment.cycle_length,
                enrollment.enroll_sig
            ],
        )?;
        expect_one(changed)?;

        // The validator row starts its pre-image chain at the commitment.
        let changed = dbtx.execute(
            "INSERT INTO validators (enrolled_at, utxo_key, commitment,
                                     cycle_length, preimage_height, preimage_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                height,
                enrollment.utxo_key.to_hex(),
                enrollment.commitment.to_hex(),
                enrollment.cycle_length,
                height,
                enrollment.commitment.to_hex()
            ],
        )?;
        expect_one(changed)?;
    }
    Ok(())
}

fn insert_merkle_tree(dbtx: &DbTx, height: u64, tx_hashes: &[Hash256]) -> Result<(), StoreError> {
    for (position, hash) in merkle_tree(tx_hashes).iter().enumerate() {
        let changed = dbtx.execute(
            "INSERT INTO merkle_trees (block_height, position, hash)
             VALUES (?1, ?2, ?3)",
            params![height, position as u64, hash.to_hex()],
        )?;
        expect_one(changed)?;
    }
    Ok(())
}

fn lookup_utxo(dbtx: &DbTx, key: &Hash256) -> Result<Option<(u64, TxType)>, StoreError> {
    let row = dbtx
        .query_row(
            "SELECT amount, tx_type FROM utxos WHERE utxo_key = ?1",
            params![key.to_hex()],
            |row| Ok((row.get::<_, u64>(0)?, row.get::<_, u8>(1)?)),
        )
        .optional()?;
    match row {
        None => Ok(None),
        Some((amount, tx_type)) => Ok(Some((amount, TxType::from_u8(tx_type)?))),
    }
}

fn expect_one(got: usize) -> Result<(), StoreError> {
    if got == 1 {
        Ok(())
    } else {
        Err(StoreError::RowCount { expected: 1, got })
    }
}
