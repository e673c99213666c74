//! Error types for chain RPC access.

use thiserror::Error;

/// Errors specific to blockchain connectivity and queries.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Failed to connect to chain RPC at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Chain RPC endpoint is not configured")]
    NotConfigured,

    #[error("RPC request failed: {0}")]
    RpcError(String),

    #[error("Failed to decode RPC response: {0}")]
    DecodeError(String),
}

impl ChainError {
    /// True when the node could not be reached or identified at all.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            ChainError::ConnectionFailed { .. } | ChainError::NotConfigured
        )
    }
}

/// Errors raised while signing with an ephemeral identity.
#[derive(Debug, Error)]
pub enum SigningError {
    #[error("Signing failed: {0}")]
    Failed(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}
