//! Paged backfill of missing blocks from the upstream node.
//!
//! One [`recover`](Recovery::recover) call does a bounded amount of work:
//! it fetches and persists at most `max_blocks` blocks, then reports
//! whether the originally reported height has been reached. The queue
//! loops, re-reading the persisted expected-height marker between
//! attempts, so a concurrent writer advancing the chain shortens the
//! remaining span instead of causing conflicting writes.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use cairn_core::types::Block;
use cairn_store::LedgerStore;

use crate::client::NodeClient;
use crate::error::IngestError;

/// Gap-recovery controller.
pub struct Recovery {
    store: Arc<Mutex<LedgerStore>>,
    client: Arc<dyn NodeClient>,
    max_blocks: u64,
}

impl Recovery {
    /// Create a controller capped at `max_blocks` fetched per attempt.
    pub fn new(
        store: Arc<Mutex<LedgerStore>>,
        client: Arc<dyn NodeClient>,
        max_blocks: u64,
    ) -> Self {
        Self {
            store,
            client,
            // A zero cap would make every attempt a no-op and the
            // caller's loop would never progress.
            max_blocks: max_blocks.max(1),
        }
    }

    /// Attempt to close the gap between `expected_height` and
    /// `received_height`.
    ///
    /// Fetches up to `max_blocks` blocks starting at `expected_height`
    /// and persists them strictly in order. Returns `true` when the
    /// reported height has been reached (persisting `maybe_block` as the
    /// tail if one was supplied), `false` when another bounded attempt is
    /// needed or this attempt was aborted.
    pub async fn recover(
        &self,
        maybe_block: Option<&Block>,
        received_height: u64,
        expected_height: u64,
    ) -> Result<bool, IngestError> {
        let mut expected = expected_height;
        let mut span = received_height.saturating_sub(expected);
        // Without a block in hand the reported height itself must be
        // fetched too.
        if maybe_block.is_none() {
            span = span.saturating_add(1);
        }
        span = span.min(self.max_blocks);

        if span > 0 {
            let blocks = self.client.blocks_from(expected, span).await?;
            debug!(
                from = expected,
                requested = span,
                got = blocks.len(),
                "fetched recovery page"
            );

            for block in &blocks {
                if block.header.height != expected {
                    // A gap inside the recovered range itself. Abort
                    // rather than persist out of order.
                    warn!(
                        got = block.header.height,
                        expected,
                        "upstream page out of sequence"
                    );
                    return Ok(false);
                }
                let mut store = self.store.lock().await;
                match store.put_block(block) {
                    Ok(()) => expected += 1,
                    Err(e) if e.is_duplicate() => {
                        // Another recovery pass got here first. Let the
                        // caller re-read the marker and retry.
                        debug!(height = block.header.height, "recovery raced a duplicate");
                        return Ok(false);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        if received_height <= expected {
            if let Some(block) = maybe_block {
                let mut store = self.store.lock().await;
                match store.put_block(block) {
                    Ok(()) => {}
                    Err(e) if e.is_duplicate() => {
                        debug!(height = block.header.height, "tail block already persisted");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Ok(true)
        } else {
            Ok(false)
        }
    }
}
