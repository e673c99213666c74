//! Error types for the conditional-access workflow.

use crate::chain::error::{ChainError, SigningError};
use thiserror::Error;

/// Errors in access-condition construction or loading.
#[derive(Debug, Error)]
pub enum ConditionError {
    #[error("Access condition must contain at least one clause")]
    Empty,

    #[error("Invalid access condition: {0}")]
    Invalid(String),
}

/// Errors raised by the challenge-response authenticator.
///
/// Never retried by the authenticator itself.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authentication setup failed: {0}")]
    SetupFailed(String),

    #[error("Signing failed: {0}")]
    SigningFailed(#[from] SigningError),
}

impl From<ChainError> for AuthError {
    fn from(e: ChainError) -> Self {
        AuthError::SetupFailed(e.to_string())
    }
}

impl From<NetworkError> for AuthError {
    fn from(e: NetworkError) -> Self {
        AuthError::SetupFailed(e.to_string())
    }
}

/// Errors reported by a decryption network backend.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Network unreachable: {0}")]
    Unreachable(String),

    /// The access condition evaluated false for the credential's signer.
    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    /// The credential is expired or otherwise stale and must be re-issued.
    #[error("Session credential rejected: {0}")]
    CredentialExpired(String),

    #[error("Request rejected by network: {0}")]
    Rejected(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Errors surfaced by [`ConditionalCryptoClient`](crate::access::ConditionalCryptoClient).
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Decryption network unreachable: {0}")]
    NetworkUnreachable(String),

    /// The only expected negative outcome: the signer is not eligible.
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error(transparent)]
    Authentication(#[from] AuthError),
}

impl CryptoError {
    pub fn is_access_denied(&self) -> bool {
        matches!(self, CryptoError::AccessDenied(_))
    }
}
