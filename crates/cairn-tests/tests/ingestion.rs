//! Ingestion pipeline integration tests: ordering, idempotence, gap
//! recovery, and the bounded end-to-end catch-up scenario.

use std::sync::Arc;

use tokio::sync::Mutex;

use cairn_core::types::Block;
use cairn_ingest::IngestionQueue;
use cairn_store::{LedgerStore, StoreSettings};
use cairn_tests::helpers::*;

fn setup(
    chain_len: u64,
    max_blocks_per_recovery: u64,
) -> (
    IngestionQueue,
    Arc<Mutex<LedgerStore>>,
    Arc<ScriptedNode>,
    Vec<Block>,
    tempfile::TempDir,
) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Mutex::new(
        LedgerStore::open(dir.path().join("index.db"), StoreSettings::default()).unwrap(),
    ));
    let blocks = make_chain(chain_len);
    let node = Arc::new(ScriptedNode::new(blocks.clone()));
    let queue = IngestionQueue::start(store.clone(), node.clone(), max_blocks_per_recovery);
    (queue, store, node, blocks, dir)
}

#[tokio::test]
async fn redundant_delivery_is_idempotent() {
    let (queue, store, _node, blocks, _dir) = setup(2, 64);

    for _ in 0..3 {
        queue.receive_block(serde_json::to_value(&blocks[0]).unwrap());
    }
    queue.receive_block(serde_json::to_value(&blocks[1]).unwrap());
    wait_for_height(&store, 2).await;

    let store = store.lock().await;
    assert_eq!(store.expected_height().unwrap(), 2);
    assert_eq!(
        store.block_hash(0).unwrap().unwrap(),
        blocks[0].header.hash()
    );
    let rows: i64 = store
        .database()
        .with_connection(|conn| {
            conn.query_row("SELECT COUNT(*) FROM blocks", [], |row| row.get(0))
                .map_err(Into::into)
        })
        .unwrap();
    assert_eq!(rows, 2);
}

#[tokio::test]
async fn gap_recovery_fills_contiguously() {
    let (queue, store, node, blocks, _dir) = setup(4, 64);

    // Height 3 arrives against an empty store: E=0, H=E+3.
    queue.receive_block(serde_json::to_value(&blocks[3]).unwrap());
    wait_for_height(&store, 4).await;

    let store = store.lock().await;
    for height in 0..=3 {
        assert!(store.has_block(height).unwrap(), "missing block {height}");
    }
    assert!(node.largest_batch() <= 64);
}

#[tokio::test]
async fn arrival_order_does_not_change_final_state() {
    let (queue_a, store_a, _node_a, blocks, _dir_a) = setup(7, 64);
    let (queue_b, store_b, _node_b, _blocks, _dir_b) = setup(7, 64);

    // A: every other height, each one a gap trigger.
    for height in [0u64, 2, 4, 6] {
        queue_a.receive_block(serde_json::to_value(&blocks[height as usize]).unwrap());
    }
    // B: strict height order.
    for block in &blocks {
        queue_b.receive_block(serde_json::to_value(block).unwrap());
    }

    wait_for_height(&store_a, 7).await;
    wait_for_height(&store_b, 7).await;

    let store_a = store_a.lock().await;
    let store_b = store_b.lock().await;
    for height in 0..=6 {
        assert_eq!(
            store_a.block_hash(height).unwrap(),
            store_b.block_hash(height).unwrap(),
            "divergence at height {height}"
        );
    }
}

#[tokio::test]
async fn stale_delivery_leaves_store_unchanged() {
    let (queue, store, _node, blocks, _dir) = setup(3, 64);

    queue.receive_block(serde_json::to_value(&blocks[0]).unwrap());
    queue.receive_block(serde_json::to_value(&blocks[1]).unwrap());
    wait_for_height(&store, 2).await;

    // A late retry of height 0, then a live block to prove the worker
    // kept going.
    queue.receive_block(serde_json::to_value(&blocks[0]).unwrap());
    queue.receive_block(serde_json::to_value(&blocks[2]).unwrap());
    wait_for_height(&store, 3).await;

    let store = store.lock().await;
    assert_eq!(
        store.block_hash(0).unwrap().unwrap(),
        blocks[0].header.hash()
    );
    assert_eq!(store.expected_height().unwrap(), 3);
}

#[tokio::test]
async fn end_to_end_bounded_recovery() {
    let (queue, store, node, blocks, _dir) = setup(6, 2);

    // Normal traffic first.
    queue.receive_block(serde_json::to_value(&blocks[0]).unwrap());
    queue.receive_block(serde_json::to_value(&blocks[1]).unwrap());
    wait_for_height(&store, 2).await;
    assert_eq!(store.lock().await.expected_height().unwrap(), 2);

    // Height 5 arrives; the 3-block gap is closed in capped pages.
    queue.receive_block(serde_json::to_value(&blocks[5]).unwrap());
    wait_for_height(&store, 6).await;

    let s = store.lock().await;
    for height in 0..=5 {
        assert!(s.has_block(height).unwrap(), "missing block {height}");
    }
    assert!(
        node.largest_batch() <= 2,
        "a fetch exceeded the recovery cap: {:?}",
        node.calls.lock().as_slice()
    );
}

#[tokio::test]
async fn upstream_failure_aborts_one_item_only() {
    let (queue, store, node, blocks, _dir) = setup(4, 64);

    // The first recovery fetch dies on the wire; the gapped block is
    // abandoned but the worker must survive it.
    node.fail_next(1);
    queue.receive_block(serde_json::to_value(&blocks[3]).unwrap());

    // The next item is processed normally.
    queue.receive_block(serde_json::to_value(&blocks[0]).unwrap());
    wait_for_height(&store, 1).await;
    assert!(!store.lock().await.has_block(3).unwrap());

    // A redelivery of the gapped block recovers to completion now that
    // the upstream is healthy again.
    queue.receive_block(serde_json::to_value(&blocks[3]).unwrap());
    wait_for_height(&store, 4).await;
    for height in 0..=3 {
        assert!(store.lock().await.has_block(height).unwrap());
    }
}

#[tokio::test]
async fn startup_catch_up_reaches_upstream_tip() {
    let (queue, store, node, _blocks, _dir) = setup(4, 64);

    // What the daemon does at boot: one synthetic pass to the reported
    // tip before any pushed traffic.
    queue.catch_up(3);
    wait_for_height(&store, 4).await;
    assert!(node.largest_batch() <= 64);
}
