//! Chain client for Ethereum JSON-RPC connectivity.
//!
//! Used to prove that the chain an identity is bound to is reachable, and to
//! read the latest block as a freshness anchor.

use crate::chain::error::ChainError;
use crate::chain::types::{
    parse_quantity, ChainInfo, FreshnessAnchor, RpcBlock, RpcRequest, RpcResponse,
};
use async_trait::async_trait;
use log::{debug, info};
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicU64, Ordering};

/// Chain RPC operations needed by the access workflow.
///
/// Abstracted so identities and the local network can be exercised against
/// mock chains.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Identify the network. Fails with an unreachable error if the node
    /// cannot be reached or does not answer.
    async fn connect(&self) -> Result<ChainInfo, ChainError>;

    /// Fetch the latest block hash.
    async fn latest_anchor(&self) -> Result<FreshnessAnchor, ChainError>;
}

/// JSON-RPC over HTTP chain client.
pub struct ChainClient {
    /// The RPC URL for the chain node.
    rpc_url: String,

    http: reqwest::Client,

    /// Monotonic JSON-RPC request id.
    next_id: AtomicU64,
}

impl ChainClient {
    /// Create a new chain client. No request is made until first use.
    pub fn new(rpc_url: String) -> Self {
        Self {
            rpc_url,
            http: reqwest::Client::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, ChainError> {
        if self.rpc_url.is_empty() {
            return Err(ChainError::NotConfigured);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest::new(id, method, params);
        debug!("chain rpc {} (id {})", method, id);

        let response = self
            .http
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ChainError::ConnectionFailed {
                url: redact_url(&self.rpc_url),
                reason: e.to_string(),
            })?
            .error_for_status()
            .map_err(|e| ChainError::RpcError(e.to_string()))?;

        let envelope: RpcResponse = response
            .json()
            .await
            .map_err(|e| ChainError::DecodeError(e.to_string()))?;

        if let Some(err) = envelope.error {
            return Err(ChainError::RpcError(format!(
                "{} (code {})",
                err.message, err.code
            )));
        }

        let result = envelope
            .result
            .ok_or_else(|| ChainError::DecodeError(format!("{} returned no result", method)))?;
        serde_json::from_value(result).map_err(|e| ChainError::DecodeError(e.to_string()))
    }
}

#[async_trait]
impl ChainRpc for ChainClient {
    async fn connect(&self) -> Result<ChainInfo, ChainError> {
        info!("Connecting to chain RPC at {}", redact_url(&self.rpc_url));

        let raw: String = self.call("eth_chainId", serde_json::json!([])).await?;
        let chain_id = parse_quantity(&raw).ok_or_else(|| ChainError::ConnectionFailed {
            url: redact_url(&self.rpc_url),
            reason: format!("node returned unparseable chain id {:?}", raw),
        })?;

        info!("Connected to chain {}", chain_id);
        Ok(ChainInfo { chain_id })
    }

    async fn latest_anchor(&self) -> Result<FreshnessAnchor, ChainError> {
        let block: RpcBlock = self
            .call("eth_getBlockByNumber", serde_json::json!(["latest", false]))
            .await?;

        let block_hash = block
            .hash
            .ok_or_else(|| ChainError::DecodeError("latest block has no hash".to_string()))?;
        let block_number = block.number.as_deref().and_then(parse_quantity);
        debug!("latest block {:?} {}", block_number, block_hash);

        Ok(FreshnessAnchor {
            block_hash,
            block_number,
        })
    }
}

impl std::fmt::Debug for ChainClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainClient")
            .field("rpc_url", &redact_url(&self.rpc_url))
            .finish()
    }
}

/// Hosted RPC URLs carry the API key as the last path segment.
fn redact_url(url: &str) -> String {
    match url.rfind('/') {
        Some(idx) if idx + 1 < url.len() && url[..idx].contains("/v2") => {
            format!("{}/***", &url[..idx])
        }
        _ => url.to_string(),
    }
}
