//! Types for chain RPC queries.

use serde::{Deserialize, Serialize};

/// Identity of the chain a connection is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainInfo {
    /// EIP-155 chain id reported by `eth_chainId`.
    pub chain_id: u64,
}

/// A recent, unpredictable block identifier used as a replay-protection nonce.
///
/// Anchors are fetched fresh for every authentication attempt and never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreshnessAnchor {
    /// 0x-prefixed block hash.
    pub block_hash: String,

    /// Block number the hash belongs to, when the source reports it.
    pub block_number: Option<u64>,
}

impl FreshnessAnchor {
    pub fn new(block_hash: impl Into<String>) -> Self {
        Self {
            block_hash: block_hash.into(),
            block_number: None,
        }
    }

    /// The nonce value placed in authorization messages.
    pub fn as_nonce(&self) -> &str {
        &self.block_hash
    }
}

/// Ethereum JSON-RPC request envelope.
#[derive(Debug, Serialize)]
pub struct RpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: serde_json::Value,
}

impl<'a> RpcRequest<'a> {
    pub fn new(id: u64, method: &'a str, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

/// Ethereum JSON-RPC response envelope.
#[derive(Debug, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
}

/// Subset of the block object returned by `eth_getBlockByNumber`.
#[derive(Debug, Deserialize)]
pub struct RpcBlock {
    pub hash: Option<String>,
    pub number: Option<String>,
}

/// Parse a 0x-prefixed hex quantity (`"0xaa36a7"`).
pub fn parse_quantity(value: &str) -> Option<u64> {
    let digits = value.strip_prefix("0x")?;
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}
