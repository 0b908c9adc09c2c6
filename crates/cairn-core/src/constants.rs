//! Protocol constants used by the indexer.

/// Number of blocks a melting transaction (one spending a frozen output)
/// stays locked: the stake-thawing period.
pub const FREEZE_UNLOCK_BLOCKS: u64 = 2016;

/// Default cap on blocks fetched from the upstream node in one recovery
/// attempt. A single attempt never requests more than this many blocks.
pub const DEFAULT_MAX_BLOCKS_PER_RECOVERY: u64 = 64;

/// Default genesis timestamp (Unix seconds). Block headers carry offsets
/// from this instant; the persisted timestamp is `genesis + offset`.
pub const DEFAULT_GENESIS_TIMESTAMP: u64 = 1_609_459_200;
