use anyhow::{Context, Result};

use cairn_core::constants::{DEFAULT_GENESIS_TIMESTAMP, DEFAULT_MAX_BLOCKS_PER_RECOVERY};
use cairn_core::types::Hash256;

pub struct Config {
    pub bind_addr: String,
    pub node_endpoint: String,
    pub db_path: String,
    pub max_blocks_per_recovery: u64,
    pub genesis_timestamp: u64,
    /// Commons address exempt from freeze-propagation locks, hex encoded.
    pub exempt_address: Option<Hash256>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            bind_addr: std::env::var("CAIRN_BIND_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:3836".into()),
            node_endpoint: std::env::var("CAIRN_NODE_ENDPOINT")
                .unwrap_or_else(|_| "http://127.0.0.1:2826".into()),
            db_path: std::env::var("CAIRN_DB_PATH")
                .unwrap_or_else(|_| "data/index.db".into()),
            max_blocks_per_recovery: parse_env(
                "CAIRN_MAX_BLOCKS_PER_RECOVERY",
                DEFAULT_MAX_BLOCKS_PER_RECOVERY,
            )?,
            genesis_timestamp: parse_env("CAIRN_GENESIS_TIMESTAMP", DEFAULT_GENESIS_TIMESTAMP)?,
            exempt_address: match std::env::var("CAIRN_EXEMPT_ADDRESS") {
                Ok(hex) => Some(
                    Hash256::from_hex(&hex)
                        .with_context(|| format!("CAIRN_EXEMPT_ADDRESS {hex:?}"))?,
                ),
                Err(_) => None,
            },
        })
    }
}

fn parse_env(name: &str, default: u64) -> Result<u64> {
    match std::env::var(name) {
        Ok(value) => value
            .parse::<u64>()
            .with_context(|| format!("{name} {value:?}")),
        Err(_) => Ok(default),
    }
}
