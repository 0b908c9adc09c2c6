//! Upstream node client.
//!
//! [`NodeClient`] is the seam between recovery and the network: the
//! worker only ever asks for the current height or an ordered page of
//! blocks. Tests script the trait directly; production uses
//! [`RestClient`] over the node's REST surface.

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;

use cairn_core::types::Block;

/// Failures talking to the upstream node.
#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("upstream request: {0}")]
    Http(#[from] reqwest::Error),
    #[error("upstream returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("upstream payload: {0}")]
    Decode(String),
}

/// Fetch interface to the consensus node.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// The node's current best block height.
    async fn block_height(&self) -> Result<u64, UpstreamError>;

    /// Up to `max` blocks starting at `height`, in ascending height order.
    /// May return fewer than `max`, or none when `height` is past the tip.
    async fn blocks_from(&self, height: u64, max: u64) -> Result<Vec<Block>, UpstreamError>;
}

/// REST implementation of [`NodeClient`].
pub struct RestClient {
    client: Client,
    base_url: String,
}

impl RestClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("build reqwest client"),
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }
}

#[async_trait]
impl NodeClient for RestClient {
    async fn block_height(&self) -> Result<u64, UpstreamError> {
        let resp = self
            .client
            .get(format!("{}/block_height", self.base_url))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(UpstreamError::Status(resp.status()));
        }
        let body = resp.text().await?;
        body.trim()
            .parse::<u64>()
            .map_err(|_| UpstreamError::Decode(format!("bad height {body:?}")))
    }

    async fn blocks_from(&self, height: u64, max: u64) -> Result<Vec<Block>, UpstreamError> {
        let resp = self
            .client
            .get(format!("{}/blocks", self.base_url))
            .query(&[("height", height), ("max", max)])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(UpstreamError::Status(resp.status()));
        }
        resp.json::<Vec<Block>>()
            .await
            .map_err(|e| UpstreamError::Decode(e.to_string()))
    }
}
