//! In-process decryption network.
//!
//! Seals payloads with AES-256-GCM under a key derived from a network master
//! secret and the condition hash, verifies session credentials by public-key
//! recovery, and evaluates conditions against an in-memory ledger. Used for
//! offline runs and tests.

use crate::access::client::{DecryptRequest, DecryptionNetwork, NetworkSession};
use crate::access::condition::{AccessCondition, ConditionClause};
use crate::access::error::NetworkError;
use crate::access::siwe::ParsedAuthorization;
use crate::access::types::{EncryptedPayload, ResourceAbilityRequest};
use crate::chain::client::ChainRpc;
use crate::chain::identity::{normalize_address, recover_address};
use crate::chain::types::FreshnessAnchor;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use hkdf::Hkdf;
use log::{debug, info, warn};
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const NONCE_LEN: usize = 12;
const KEY_INFO_PREFIX: &[u8] = b"lilygate-condition-key:";

/// Error code the network reports when a condition evaluates false.
pub const NOT_AUTHORIZED_CODE: &str = "NodeAccessControlConditionsReturnedNotAuthorized";

/// Token and native balances keyed by lowercase address.
#[derive(Debug, Default, Clone)]
pub struct Ledger {
    tokens: HashMap<String, HashMap<String, u128>>,
    native: HashMap<String, u128>,
}

impl Ledger {
    pub fn token_balance(&self, contract: &str, holder: &str) -> u128 {
        self.tokens
            .get(&contract.to_ascii_lowercase())
            .and_then(|holders| holders.get(&holder.to_ascii_lowercase()))
            .copied()
            .unwrap_or(0)
    }

    pub fn native_balance(&self, holder: &str) -> u128 {
        self.native
            .get(&holder.to_ascii_lowercase())
            .copied()
            .unwrap_or(0)
    }
}

pub struct LocalNetwork {
    name: String,
    master_secret: [u8; 32],
    anchor_source: Option<Arc<dyn ChainRpc>>,
    ledger: Mutex<Ledger>,
    sessions: Mutex<HashSet<String>>,
    reachable: AtomicBool,
    next_session: AtomicU64,
    handshakes: AtomicUsize,
    closes: AtomicUsize,
}

impl LocalNetwork {
    pub fn new(name: impl Into<String>) -> Self {
        let mut master_secret = [0u8; 32];
        OsRng.fill_bytes(&mut master_secret);
        Self {
            name: name.into(),
            master_secret,
            anchor_source: None,
            ledger: Mutex::new(Ledger::default()),
            sessions: Mutex::new(HashSet::new()),
            reachable: AtomicBool::new(true),
            next_session: AtomicU64::new(1),
            handshakes: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    /// Take freshness anchors from a real chain instead of synthesizing them.
    pub fn with_anchor_source(mut self, chain: Arc<dyn ChainRpc>) -> Self {
        self.anchor_source = Some(chain);
        self
    }

    pub fn set_token_balance(&self, contract: &str, holder: &str, amount: u128) {
        if let Ok(mut ledger) = self.ledger.lock() {
            ledger
                .tokens
                .entry(contract.to_ascii_lowercase())
                .or_default()
                .insert(holder.to_ascii_lowercase(), amount);
        }
    }

    pub fn set_native_balance(&self, holder: &str, amount: u128) {
        if let Ok(mut ledger) = self.ledger.lock() {
            ledger.native.insert(holder.to_ascii_lowercase(), amount);
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn handshake_count(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn open_sessions(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }

    fn ensure_reachable(&self) -> Result<(), NetworkError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(NetworkError::Unreachable(format!(
                "{} network is not accepting connections",
                self.name
            )))
        }
    }

    fn ensure_session(&self, session: &NetworkSession) -> Result<(), NetworkError> {
        let open = self
            .sessions
            .lock()
            .map_err(|_| NetworkError::Protocol("session table poisoned".to_string()))?;
        if open.contains(&session.session_id) {
            Ok(())
        } else {
            Err(NetworkError::Rejected(format!(
                "unknown session {}",
                session.session_id
            )))
        }
    }

    fn cipher_for(&self, condition_hash: &str) -> Result<Aes256Gcm, NetworkError> {
        let hkdf = Hkdf::<Sha256>::new(None, &self.master_secret);
        let mut info = KEY_INFO_PREFIX.to_vec();
        info.extend_from_slice(condition_hash.as_bytes());
        let mut key = [0u8; 32];
        hkdf.expand(&info, &mut key)
            .map_err(|e| NetworkError::Protocol(format!("HKDF expansion failed: {}", e)))?;
        Aes256Gcm::new_from_slice(&key)
            .map_err(|e| NetworkError::Protocol(format!("Failed to create cipher: {}", e)))
    }

    /// Check signature, scope, and expiry; returns the signer address.
    fn verify_credential(
        &self,
        session: &NetworkSession,
        request: &DecryptRequest<'_>,
    ) -> Result<String, NetworkError> {
        let auth_sig = &request.credential.auth_sig;
        let recovered = recover_address(&auth_sig.signed_message, &auth_sig.sig)
            .map_err(|e| NetworkError::Rejected(format!("invalid signature: {}", e)))?;
        let claimed = normalize_address(&auth_sig.address)
            .map_err(|e| NetworkError::Rejected(e.to_string()))?;
        if recovered != claimed {
            warn!("Credential signed by {} but claims {}", recovered, claimed);
            return Err(NetworkError::Rejected(
                "signature does not match claimed address".to_string(),
            ));
        }

        let parsed = ParsedAuthorization::parse(&auth_sig.signed_message)
            .map_err(|e| NetworkError::Rejected(format!("malformed message: {}", e)))?;
        if parsed.expiration <= Utc::now() {
            return Err(NetworkError::CredentialExpired(format!(
                "credential expired at {}",
                parsed.expiration
            )));
        }
        if parsed.uri != session.uri() {
            return Err(NetworkError::Rejected(format!(
                "credential issued for {}, not {}",
                parsed.uri,
                session.uri()
            )));
        }
        let required = [ResourceAbilityRequest::decrypt_any()];
        let granted = required.iter().all(|wanted| {
            parsed.resources.iter().any(|r| {
                r.ability == wanted.ability && r.resource.covers(&wanted.resource)
            })
        });
        if !granted {
            return Err(NetworkError::Rejected(
                "credential does not grant decryption".to_string(),
            ));
        }

        Ok(recovered)
    }

    fn evaluate(&self, condition: &AccessCondition, user: &str) -> Result<bool, NetworkError> {
        let ledger = self
            .ledger
            .lock()
            .map_err(|_| NetworkError::Protocol("ledger poisoned".to_string()))?;
        for clause in condition.clauses() {
            let actual = clause_value(&ledger, clause, user)?;
            let threshold = clause
                .return_value_test
                .value
                .parse::<u128>()
                .map_err(|e| NetworkError::Protocol(format!("invalid threshold: {}", e)))?;
            let holds = clause.return_value_test.comparator.evaluate(actual, threshold);
            debug!(
                "{} {}({:?}) = {} -> {}",
                clause.chain,
                clause.method,
                clause.resolved_parameters(user),
                actual,
                holds
            );
            if !holds {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn clause_value(
    ledger: &Ledger,
    clause: &ConditionClause,
    user: &str,
) -> Result<u128, NetworkError> {
    let params = clause.resolved_parameters(user);
    let holder = params
        .first()
        .ok_or_else(|| NetworkError::Protocol(format!("{} needs an address", clause.method)))?;
    match clause.method.as_str() {
        "balanceOf" => Ok(ledger.token_balance(&clause.contract_address, holder)),
        "eth_getBalance" => Ok(ledger.native_balance(holder)),
        other => Err(NetworkError::Protocol(format!(
            "unsupported condition method {}",
            other
        ))),
    }
}

#[async_trait]
impl DecryptionNetwork for LocalNetwork {
    async fn handshake(&self) -> Result<NetworkSession, NetworkError> {
        self.ensure_reachable()?;
        let id = self.next_session.fetch_add(1, Ordering::SeqCst);
        let session_id = format!("{}-{:08x}", self.name, id);
        self.sessions
            .lock()
            .map_err(|_| NetworkError::Protocol("session table poisoned".to_string()))?
            .insert(session_id.clone());
        self.handshakes.fetch_add(1, Ordering::SeqCst);
        info!("Local network handshake, session {}", session_id);
        Ok(NetworkSession {
            session_id,
            network_name: self.name.clone(),
        })
    }

    async fn latest_blockhash(
        &self,
        session: &NetworkSession,
    ) -> Result<FreshnessAnchor, NetworkError> {
        self.ensure_reachable()?;
        self.ensure_session(session)?;
        if let Some(chain) = &self.anchor_source {
            return chain
                .latest_anchor()
                .await
                .map_err(|e| NetworkError::Unreachable(e.to_string()));
        }
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        Ok(FreshnessAnchor::new(format!("0x{}", hex::encode(seed))))
    }

    async fn encrypt(
        &self,
        session: &NetworkSession,
        condition: &AccessCondition,
        plaintext: &[u8],
    ) -> Result<EncryptedPayload, NetworkError> {
        self.ensure_reachable()?;
        self.ensure_session(session)?;
        let condition_hash = condition.condition_hash();
        let cipher = self.cipher_for(&condition_hash)?;

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| NetworkError::Protocol(format!("Encryption failed: {}", e)))?;

        let mut blob = nonce.to_vec();
        blob.extend_from_slice(&sealed);
        Ok(EncryptedPayload {
            ciphertext: STANDARD.encode(blob),
            condition_hash,
            data_to_encrypt_hash: hex::encode(Sha256::digest(plaintext)),
        })
    }

    async fn decrypt(
        &self,
        session: &NetworkSession,
        request: DecryptRequest<'_>,
    ) -> Result<Vec<u8>, NetworkError> {
        self.ensure_reachable()?;
        self.ensure_session(session)?;

        let signer = self.verify_credential(session, &request)?;
        if !self.evaluate(request.condition, &signer)? {
            info!("Condition not met for {}", signer);
            return Err(NetworkError::NotAuthorized(format!(
                "{}: {} does not satisfy the access condition",
                NOT_AUTHORIZED_CODE, signer
            )));
        }

        let blob = STANDARD
            .decode(&request.payload.ciphertext)
            .map_err(|e| NetworkError::Protocol(format!("invalid ciphertext encoding: {}", e)))?;
        if blob.len() < NONCE_LEN {
            return Err(NetworkError::Protocol("ciphertext truncated".to_string()));
        }
        let (nonce, sealed) = blob.split_at(NONCE_LEN);
        let cipher = self.cipher_for(&request.condition.condition_hash())?;
        cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|e| NetworkError::Protocol(format!("Decryption failed: {}", e)))
    }

    async fn close(&self, session: &NetworkSession) -> Result<(), NetworkError> {
        let removed = self
            .sessions
            .lock()
            .map_err(|_| NetworkError::Protocol("session table poisoned".to_string()))?
            .remove(&session.session_id);
        self.closes.fetch_add(1, Ordering::SeqCst);
        if !removed {
            warn!("Close of unknown session {}", session.session_id);
        }
        Ok(())
    }
}

impl std::fmt::Debug for LocalNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalNetwork")
            .field("name", &self.name)
            .field("handshakes", &self.handshake_count())
            .field("closes", &self.close_count())
            .finish()
    }
}
