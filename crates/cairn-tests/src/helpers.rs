//! Shared helpers: block builders, a scripted upstream node, and polling
//! utilities for the asynchronous worker.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use cairn_core::merkle::merkle_root;
use cairn_core::types::{
    Block, BlockHeader, Hash256, Transaction, TxInput, TxOutput, TxType,
};
use cairn_ingest::{NodeClient, UpstreamError};
use cairn_store::LedgerStore;

/// Simple address hash from a seed byte.
pub fn addr(seed: u8) -> Hash256 {
    Hash256([seed; 32])
}

/// Coinbase with a height-dependent value so every block's txid differs.
pub fn make_coinbase(height: u64) -> Transaction {
    Transaction {
        tx_type: TxType::Coinbase,
        inputs: vec![],
        outputs: vec![TxOutput {
            value: 5_000 + height,
            address: addr(0x01),
        }],
        payload: vec![],
    }
}

/// Payment spending one output of `source`.
pub fn make_spend(source: &Transaction, output_index: u64, outputs: Vec<(u64, Hash256)>) -> Transaction {
    Transaction {
        tx_type: TxType::Payment,
        inputs: vec![TxInput {
            utxo: cairn_core::types::utxo_key(&source.hash(), output_index),
            unlock: vec![0u8; 64],
        }],
        outputs: outputs
            .into_iter()
            .map(|(value, address)| TxOutput { value, address })
            .collect(),
        payload: vec![],
    }
}

/// Build a block with the correct merkle root, linked to `prev_hash`.
pub fn make_block(height: u64, prev_hash: Hash256, transactions: Vec<Transaction>) -> Block {
    let hashes: Vec<Hash256> = transactions.iter().map(Transaction::hash).collect();
    Block {
        header: BlockHeader {
            height,
            prev_hash,
            merkle_root: merkle_root(&hashes),
            validators: vec![0b0000_0111],
            signature: vec![0u8; 64],
            random_seed: addr(0x5E),
            time_offset: height * 600,
        },
        transactions,
        enrollments: vec![],
    }
}

/// A linked chain of coinbase-only blocks, heights `0..len`.
pub fn make_chain(len: u64) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut prev_hash = Hash256::ZERO;
    for height in 0..len {
        let block = make_block(height, prev_hash, vec![make_coinbase(height)]);
        prev_hash = block.header.hash();
        blocks.push(block);
    }
    blocks
}

/// Scripted upstream node serving a fixed chain and recording every
/// `blocks_from` call as `(height, max)`.
pub struct ScriptedNode {
    chain: Vec<Block>,
    pub calls: parking_lot::Mutex<Vec<(u64, u64)>>,
    fail_remaining: parking_lot::Mutex<u32>,
}

impl ScriptedNode {
    pub fn new(chain: Vec<Block>) -> Self {
        Self {
            chain,
            calls: parking_lot::Mutex::new(Vec::new()),
            fail_remaining: parking_lot::Mutex::new(0),
        }
    }

    /// Make the next `count` fetches fail with a transport error.
    pub fn fail_next(&self, count: u32) {
        *self.fail_remaining.lock() = count;
    }

    /// Largest `max` any fetch requested so far.
    pub fn largest_batch(&self) -> u64 {
        self.calls.lock().iter().map(|&(_, max)| max).max().unwrap_or(0)
    }
}

#[async_trait]
impl NodeClient for ScriptedNode {
    async fn block_height(&self) -> Result<u64, UpstreamError> {
        Ok(self.chain.len() as u64 - 1)
    }

    async fn blocks_from(&self, height: u64, max: u64) -> Result<Vec<Block>, UpstreamError> {
        self.calls.lock().push((height, max));
        {
            let mut remaining = self.fail_remaining.lock();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(UpstreamError::Decode("connection reset".into()));
            }
        }
        Ok(self
            .chain
            .iter()
            .filter(|b| b.header.height >= height)
            .take(max as usize)
            .cloned()
            .collect())
    }
}

/// Poll the store until the expected-height marker reaches `height`.
///
/// Panics after a few seconds; the worker is local and fast, so a miss
/// means processing actually failed.
pub async fn wait_for_height(store: &Arc<Mutex<LedgerStore>>, height: u64) {
    for _ in 0..500 {
        if store.lock().await.expected_height().unwrap() >= height {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("store never reached height {height}");
}

/// Poll until `condition` holds against the store.
pub async fn wait_until<F>(store: &Arc<Mutex<LedgerStore>>, mut condition: F)
where
    F: FnMut(&LedgerStore) -> bool,
{
    for _ in 0..500 {
        if condition(&*store.lock().await) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never satisfied");
}
