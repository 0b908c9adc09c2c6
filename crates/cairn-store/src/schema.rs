//! SQL schema for the indexer database.
//!
//! The layout is denormalized for read queries: a block's transactions,
//! inputs, outputs, merkle tree, and aggregate stats each get their own
//! table keyed by block height. The UTXO set is mutable: a row under a
//! UTXO key means the output is unspent; spending deletes the row.
//!
//! Uniqueness constraints carry semantics: `blocks.height` is the primary
//! key, so persisting the same height twice fails the insert and rolls the
//! whole block write back. That failure is how redundant delivery is made
//! idempotent.

/// Complete schema, applied on open. Idempotent (`IF NOT EXISTS`).
pub const CREATE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS blocks (
    height           INTEGER PRIMARY KEY,
    hash             TEXT NOT NULL UNIQUE,
    prev_hash        TEXT NOT NULL,
    merkle_root      TEXT NOT NULL,
    signature        TEXT NOT NULL,
    random_seed      TEXT NOT NULL,
    validators       TEXT NOT NULL,
    tx_count         INTEGER NOT NULL,
    enrollment_count INTEGER NOT NULL,
    time_stamp       INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS transactions (
    block_height  INTEGER NOT NULL,
    tx_index      INTEGER NOT NULL,
    tx_hash       TEXT NOT NULL UNIQUE,
    tx_type       INTEGER NOT NULL,
    fee           INTEGER NOT NULL,
    unlock_height INTEGER NOT NULL,
    payload       BLOB NOT NULL,
    PRIMARY KEY (block_height, tx_index)
);

CREATE TABLE IF NOT EXISTS tx_inputs (
    block_height INTEGER NOT NULL,
    tx_index     INTEGER NOT NULL,
    input_index  INTEGER NOT NULL,
    utxo_key     TEXT NOT NULL,
    unlock       BLOB NOT NULL,
    PRIMARY KEY (block_height, tx_index, input_index)
);
CREATE INDEX IF NOT EXISTS tx_inputs_utxo ON tx_inputs(utxo_key);

CREATE TABLE IF NOT EXISTS tx_outputs (
    block_height INTEGER NOT NULL,
    tx_index     INTEGER NOT NULL,
    output_index INTEGER NOT NULL,
    utxo_key     TEXT NOT NULL,
    amount       INTEGER NOT NULL,
    address      TEXT NOT NULL,
    PRIMARY KEY (block_height, tx_index, output_index)
);
CREATE INDEX IF NOT EXISTS tx_outputs_address ON tx_outputs(address);

CREATE TABLE IF NOT EXISTS utxos (
    utxo_key      TEXT PRIMARY KEY,
    tx_hash       TEXT NOT NULL,
    output_index  INTEGER NOT NULL,
    tx_type       INTEGER NOT NULL,
    amount        INTEGER NOT NULL,
    address       TEXT NOT NULL,
    unlock_height INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS utxos_address ON utxos(address);

CREATE TABLE IF NOT EXISTS enrollments (
    block_height     INTEGER NOT NULL,
    enrollment_index INTEGER NOT NULL,
    utxo_key         TEXT NOT NULL,
    commitment       TEXT NOT NULL,
    cycle_length     INTEGER NOT NULL,
    enroll_sig       BLOB NOT NULL,
    PRIMARY KEY (block_height, enrollment_index)
);

CREATE TABLE IF NOT EXISTS validators (
    enrolled_at     INTEGER NOT NULL,
    utxo_key        TEXT NOT NULL,
    commitment      TEXT NOT NULL,
    cycle_length    INTEGER NOT NULL,
    preimage_height INTEGER NOT NULL,
    preimage_hash   TEXT NOT NULL,
    PRIMARY KEY (enrolled_at, utxo_key)
);

CREATE TABLE IF NOT EXISTS merkle_trees (
    block_height INTEGER NOT NULL,
    position     INTEGER NOT NULL,
    hash         TEXT NOT NULL,
    PRIMARY KEY (block_height, position)
);

CREATE TABLE IF NOT EXISTS block_stats (
    block_height INTEGER PRIMARY KEY,
    tx_count     INTEGER NOT NULL,
    total_sent   INTEGER NOT NULL,
    total_fee    INTEGER NOT NULL,
    total_size   INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS pool_transactions (
    tx_hash     TEXT PRIMARY KEY,
    tx_type     INTEGER NOT NULL,
    body        TEXT NOT NULL,
    received_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS pool_inputs (
    tx_hash     TEXT NOT NULL,
    input_index INTEGER NOT NULL,
    utxo_key    TEXT NOT NULL,
    PRIMARY KEY (tx_hash, input_index)
);
CREATE INDEX IF NOT EXISTS pool_inputs_utxo ON pool_inputs(utxo_key);

CREATE TABLE IF NOT EXISTS pool_outputs (
    tx_hash      TEXT NOT NULL,
    output_index INTEGER NOT NULL,
    amount       INTEGER NOT NULL,
    address      TEXT NOT NULL,
    PRIMARY KEY (tx_hash, output_index)
);

CREATE TABLE IF NOT EXISTS chain_info (
    name  TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Well-known keys for the `chain_info` table.
pub mod info_keys {
    /// The expected next block height: max confirmed height + 1, or absent
    /// when no blocks have been persisted.
    pub const EXPECTED_HEIGHT: &str = "expected_height";
}
