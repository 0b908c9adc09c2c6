mod config;
mod routes;

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use cairn_ingest::{IngestionQueue, NodeClient, RestClient};
use cairn_store::{LedgerStore, StoreSettings};

#[derive(Clone)]
pub struct AppState {
    pub queue: IngestionQueue,
    pub store: Arc<Mutex<LedgerStore>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = config::Config::from_env()?;

    let settings = StoreSettings {
        genesis_timestamp: config.genesis_timestamp,
        exempt_address: config.exempt_address,
    };
    let store = Arc::new(Mutex::new(LedgerStore::open(&config.db_path, settings)?));

    let client = Arc::new(RestClient::new(&config.node_endpoint));
    let queue = IngestionQueue::start(
        store.clone(),
        client.clone(),
        config.max_blocks_per_recovery,
    );

    info!(
        node = %config.node_endpoint,
        bind = %config.bind_addr,
        db = %config.db_path,
        "Starting cairn-indexer"
    );

    // Catch up to the upstream tip before normal traffic lands. An
    // unreachable node is not fatal; pushed blocks trigger recovery on
    // their own.
    match client.block_height().await {
        Ok(height) => queue.catch_up(height),
        Err(e) => warn!("startup catch-up skipped: {e}"),
    }

    let state = AppState { queue, store };
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Indexer listening on http://{}", config.bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}
