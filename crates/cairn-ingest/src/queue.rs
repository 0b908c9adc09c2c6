//! The serialization core: one FIFO worker between the HTTP boundary and
//! the store.
//!
//! Callers enqueue raw payloads and return immediately; a single worker
//! task drains the queue in arrival order, so no two store mutations ever
//! run concurrently. A failed item is logged and the worker moves on.
//! Receipt order is not height order; the height check against the
//! persisted expected-height marker decides between the normal persist
//! path, the gap-recovery loop, and the stale drop.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use cairn_core::error::PayloadError;
use cairn_core::types::{header_height, Block, PreImage, Transaction};
use cairn_store::LedgerStore;

use crate::client::NodeClient;
use crate::error::IngestError;
use crate::recovery::Recovery;

/// An inbound event, queued as received.
enum IngestEvent {
    Block(Value),
    PreImage(Value),
    Transaction(Value),
    CatchUp { height: u64 },
}

/// Handle to the ingestion worker. Cloneable; all clones feed the same
/// FIFO queue.
#[derive(Clone)]
pub struct IngestionQueue {
    sender: mpsc::UnboundedSender<IngestEvent>,
}

impl IngestionQueue {
    /// Spawn the worker task and return the enqueue handle.
    pub fn start(
        store: Arc<Mutex<LedgerStore>>,
        client: Arc<dyn NodeClient>,
        max_blocks_per_recovery: u64,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let worker = Worker {
            store: store.clone(),
            recovery: Recovery::new(store, client, max_blocks_per_recovery),
        };
        tokio::spawn(worker.run(receiver));
        Self { sender }
    }

    /// Enqueue a raw block payload. Returns immediately.
    pub fn receive_block(&self, raw: Value) {
        let _ = self.sender.send(IngestEvent::Block(raw));
    }

    /// Enqueue a raw pre-image payload.
    pub fn receive_preimage(&self, raw: Value) {
        let _ = self.sender.send(IngestEvent::PreImage(raw));
    }

    /// Enqueue a raw pending-transaction payload.
    pub fn receive_transaction(&self, raw: Value) {
        let _ = self.sender.send(IngestEvent::Transaction(raw));
    }

    /// Enqueue a synthetic recovery pass toward the given upstream height.
    /// Used at startup so the store is current before normal traffic.
    pub fn catch_up(&self, height: u64) {
        let _ = self.sender.send(IngestEvent::CatchUp { height });
    }
}

struct Worker {
    store: Arc<Mutex<LedgerStore>>,
    recovery: Recovery,
}

impl Worker {
    async fn run(self, mut receiver: mpsc::UnboundedReceiver<IngestEvent>) {
        while let Some(event) = receiver.recv().await {
            let (kind, result) = match event {
                IngestEvent::Block(raw) => ("block", self.handle_block(raw).await),
                IngestEvent::PreImage(raw) => ("pre-image", self.handle_preimage(raw).await),
                IngestEvent::Transaction(raw) => {
                    ("transaction", self.handle_transaction(raw).await)
                }
                IngestEvent::CatchUp { height } => ("catch-up", self.handle_catch_up(height).await),
            };
            match result {
                Ok(()) => {}
                Err(e) if e.is_duplicate() => debug!(kind, "{e}"),
                Err(e) => error!(kind, "{e}"),
            }
        }
        debug!("ingestion queue closed");
    }

    async fn handle_block(&self, raw: Value) -> Result<(), IngestError> {
        let received_height = header_height(&raw)?;
        let mut expected = self.store.lock().await.expected_height()?;

        if received_height < expected {
            // Routine under redundant delivery and retries.
            debug!(received_height, expected, "stale block dropped");
            return Ok(());
        }

        let block: Block =
            serde_json::from_value(raw).map_err(|e| PayloadError::malformed("block", e))?;

        if received_height == expected {
            self.store.lock().await.put_block(&block)?;
            return Ok(());
        }

        // Gap: recover in bounded attempts, re-reading the marker between
        // them since recovery itself advances it.
        info!(received_height, expected, "height gap detected");
        loop {
            let done = self
                .recovery
                .recover(Some(&block), received_height, expected)
                .await?;
            if done {
                return Ok(());
            }
            let now_expected = self.store.lock().await.expected_height()?;
            if now_expected == expected {
                // The attempt neither finished nor advanced the marker.
                // Retrying with the same inputs would spin.
                warn!(received_height, expected, "recovery stalled, abandoning block");
                return Ok(());
            }
            expected = now_expected;
        }
    }

    async fn handle_preimage(&self, raw: Value) -> Result<(), IngestError> {
        let preimage: PreImage =
            serde_json::from_value(raw).map_err(|e| PayloadError::malformed("pre-image", e))?;
        let changed = self.store.lock().await.update_preimage(&preimage)?;
        if changed == 0 {
            debug!(utxo_key = %preimage.utxo_key, height = preimage.height, "pre-image ignored");
        }
        Ok(())
    }

    async fn handle_transaction(&self, raw: Value) -> Result<(), IngestError> {
        let tx: Transaction =
            serde_json::from_value(raw).map_err(|e| PayloadError::malformed("transaction", e))?;
        self.store.lock().await.put_pool_tx(&tx)?;
        Ok(())
    }

    async fn handle_catch_up(&self, height: u64) -> Result<(), IngestError> {
        let mut expected = self.store.lock().await.expected_height()?;
        if height < expected {
            debug!(height, expected, "already past upstream height");
            return Ok(());
        }
        info!(height, expected, "startup catch-up");
        loop {
            let done = self.recovery.recover(None, height, expected).await?;
            if done {
                return Ok(());
            }
            let now_expected = self.store.lock().await.expected_height()?;
            if now_expected == expected {
                warn!(height, expected, "catch-up stalled");
                return Ok(());
            }
            expected = now_expected;
        }
    }
}
