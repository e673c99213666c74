//! Ephemeral secp256k1 identities bound to a live chain connection.
//!
//! A fresh keypair is generated for every authentication attempt. Nothing is
//! derived from, or written to, persistent key material.

use crate::chain::client::ChainRpc;
use crate::chain::error::{ChainError, SigningError};
use crate::chain::types::ChainInfo;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use log::debug;
use rand_core::OsRng;
use sha3::{Digest, Keccak256};
use std::sync::Arc;

/// A one-time signing identity.
///
/// Owned by the authentication attempt that created it and dropped afterwards.
pub struct EphemeralIdentity {
    signing_key: SigningKey,
    address: String,
    chain: ChainInfo,
}

impl EphemeralIdentity {
    fn generate(chain: ChainInfo) -> Self {
        let signing_key = SigningKey::random(&mut OsRng);
        let address = address_from_verifying_key(signing_key.verifying_key());
        Self {
            signing_key,
            address,
            chain,
        }
    }

    /// Lower-case 0x-prefixed Ethereum address.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn chain(&self) -> ChainInfo {
        self.chain
    }

    /// EIP-191 personal-sign over `message`.
    ///
    /// Returns the 65-byte `r || s || v` signature (v in 27/28) as 0x-hex.
    pub fn sign_message(&self, message: &str) -> Result<String, SigningError> {
        let prehash = personal_sign_hash(message);
        let (signature, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(&prehash)
            .map_err(|e| SigningError::Failed(e.to_string()))?;

        let mut bytes = signature.to_bytes().to_vec();
        bytes.push(recovery_id.to_byte() + 27);
        Ok(format!("0x{}", hex::encode(bytes)))
    }
}

impl std::fmt::Debug for EphemeralIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralIdentity")
            .field("address", &self.address)
            .field("chain", &self.chain)
            .finish_non_exhaustive()
    }
}

/// Produces ephemeral identities after checking chain connectivity.
#[derive(Clone)]
pub struct EphemeralIdentityProvider {
    chain: Arc<dyn ChainRpc>,
}

impl EphemeralIdentityProvider {
    pub fn new(chain: Arc<dyn ChainRpc>) -> Self {
        Self { chain }
    }

    /// Connect to the chain and generate a brand-new random identity.
    pub async fn new_identity(&self) -> Result<EphemeralIdentity, ChainError> {
        let chain = self.chain.connect().await?;
        let identity = EphemeralIdentity::generate(chain);
        debug!(
            "Generated ephemeral identity {} on chain {}",
            identity.address, chain.chain_id
        );
        Ok(identity)
    }
}

/// Keccak-256 of the EIP-191 prefixed message.
pub fn personal_sign_hash(message: &str) -> [u8; 32] {
    let bytes = message.as_bytes();
    let prefix = format!("\x19Ethereum Signed Message:\n{}", bytes.len());
    let mut hasher = Keccak256::new();
    hasher.update(prefix.as_bytes());
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Ethereum address of a public key: last 20 bytes of keccak(X || Y).
pub fn address_from_verifying_key(key: &VerifyingKey) -> String {
    let encoded = key.to_encoded_point(false);
    let digest = Keccak256::digest(&encoded.as_bytes()[1..]);
    format!("0x{}", hex::encode(&digest[12..]))
}

/// Recover the signer address of an EIP-191 signature produced by
/// [`EphemeralIdentity::sign_message`] or any standard wallet.
pub fn recover_address(message: &str, signature_hex: &str) -> Result<String, SigningError> {
    let raw = signature_hex
        .strip_prefix("0x")
        .ok_or_else(|| SigningError::InvalidSignature("missing 0x prefix".to_string()))?;
    let bytes = hex::decode(raw).map_err(|e| SigningError::InvalidSignature(e.to_string()))?;
    if bytes.len() != 65 {
        return Err(SigningError::InvalidSignature(format!(
            "expected 65 bytes, got {}",
            bytes.len()
        )));
    }

    let signature = Signature::try_from(&bytes[..64])
        .map_err(|e| SigningError::InvalidSignature(e.to_string()))?;
    let v = match bytes[64] {
        27 | 28 => bytes[64] - 27,
        0 | 1 => bytes[64],
        other => {
            return Err(SigningError::InvalidSignature(format!(
                "recovery id {} out of range",
                other
            )))
        }
    };
    let recovery_id = RecoveryId::try_from(v)
        .map_err(|_| SigningError::InvalidSignature("invalid recovery id".to_string()))?;

    let prehash = personal_sign_hash(message);
    let key = VerifyingKey::recover_from_prehash(&prehash, &signature, recovery_id)
        .map_err(|e| SigningError::InvalidSignature(e.to_string()))?;
    Ok(address_from_verifying_key(&key))
}

/// EIP-55 mixed-case checksum encoding of an address.
pub fn to_checksum_address(address: &str) -> Result<String, SigningError> {
    let lower = normalize_address(address)?;
    let hex_digits = &lower[2..];
    let hash = Keccak256::digest(hex_digits.as_bytes());

    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (i, c) in hex_digits.chars().enumerate() {
        let byte = hash[i / 2];
        let nibble = if i % 2 == 0 { byte >> 4 } else { byte & 0x0f };
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    Ok(out)
}

/// Lower-case a 0x-prefixed 20-byte address, rejecting anything else.
pub fn normalize_address(address: &str) -> Result<String, SigningError> {
    let raw = address
        .strip_prefix("0x")
        .ok_or_else(|| SigningError::InvalidAddress(address.to_string()))?;
    if raw.len() != 40 || !raw.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(SigningError::InvalidAddress(address.to_string()));
    }
    Ok(format!("0x{}", raw.to_ascii_lowercase()))
}
