//! Client for the threshold decryption network.
//!
//! A [`ClientHandle`] is one live connection. It caches a session credential
//! for its lifetime and must be released with [`ClientHandle::disconnect`];
//! a handle dropped without release closes its session in the background.

use crate::access::auth::{AuthNeededCallback, AuthenticatingNetwork};
use crate::access::condition::AccessCondition;
use crate::access::error::{AuthError, CryptoError, NetworkError};
use crate::access::types::{
    AuthNeededParams, EncryptedPayload, ResourceAbilityRequest, SessionCredential,
};
use crate::chain::types::FreshnessAnchor;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Default lifetime of a session credential.
pub const DEFAULT_SESSION_TTL_SECS: i64 = 24 * 60 * 60;

/// An open session with the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSession {
    pub session_id: String,
    pub network_name: String,
}

impl NetworkSession {
    /// URI a session credential is issued for.
    pub fn uri(&self) -> String {
        format!("lit:session:{}", self.session_id)
    }
}

/// A decryption request as submitted to the network.
#[derive(Debug, Clone, Copy)]
pub struct DecryptRequest<'a> {
    pub condition: &'a AccessCondition,
    pub chain: &'a str,
    pub payload: &'a EncryptedPayload,
    pub credential: &'a SessionCredential,
}

/// Backend seam for the decryption network.
///
/// The network, not the client, evaluates access conditions.
#[async_trait]
pub trait DecryptionNetwork: Send + Sync {
    async fn handshake(&self) -> Result<NetworkSession, NetworkError>;

    async fn latest_blockhash(
        &self,
        session: &NetworkSession,
    ) -> Result<FreshnessAnchor, NetworkError>;

    async fn encrypt(
        &self,
        session: &NetworkSession,
        condition: &AccessCondition,
        plaintext: &[u8],
    ) -> Result<EncryptedPayload, NetworkError>;

    async fn decrypt(
        &self,
        session: &NetworkSession,
        request: DecryptRequest<'_>,
    ) -> Result<Vec<u8>, NetworkError>;

    async fn close(&self, session: &NetworkSession) -> Result<(), NetworkError>;
}

/// Entry point: opens handles on a [`DecryptionNetwork`].
#[derive(Clone)]
pub struct ConditionalCryptoClient {
    network: Arc<dyn DecryptionNetwork>,
    session_ttl: Duration,
}

impl ConditionalCryptoClient {
    pub fn new(network: Arc<dyn DecryptionNetwork>) -> Self {
        Self {
            network,
            session_ttl: Duration::seconds(DEFAULT_SESSION_TTL_SECS),
        }
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    pub async fn connect(&self) -> Result<ClientHandle, CryptoError> {
        let session = self.network.handshake().await.map_err(|e| {
            warn!("Handshake with decryption network failed: {}", e);
            CryptoError::NetworkUnreachable(e.to_string())
        })?;
        info!(
            "Connected to {} network, session {}",
            session.network_name, session.session_id
        );

        Ok(ClientHandle {
            network: self.network.clone(),
            session,
            session_ttl: self.session_ttl,
            credential: Mutex::new(None),
            released: false,
        })
    }
}

/// A live connection to the decryption network.
pub struct ClientHandle {
    network: Arc<dyn DecryptionNetwork>,
    session: NetworkSession,
    session_ttl: Duration,
    credential: Mutex<Option<SessionCredential>>,
    released: bool,
}

impl ClientHandle {
    pub fn session(&self) -> &NetworkSession {
        &self.session
    }

    /// Seal `plaintext` so only signers satisfying `condition` can open it.
    pub async fn encrypt(
        &self,
        condition: &AccessCondition,
        plaintext: &[u8],
    ) -> Result<EncryptedPayload, CryptoError> {
        let payload = self
            .network
            .encrypt(&self.session, condition, plaintext)
            .await
            .map_err(|e| match e {
                NetworkError::Unreachable(msg) => CryptoError::NetworkUnreachable(msg),
                other => CryptoError::EncryptionFailed(other.to_string()),
            })?;
        debug!(
            "Encrypted {} bytes under condition {}",
            plaintext.len(),
            payload.condition_hash.get(..16).unwrap_or(&payload.condition_hash)
        );
        Ok(payload)
    }

    /// Current session credential, authenticating if none covers `requests`.
    pub async fn session_credential(
        &self,
        requests: &[ResourceAbilityRequest],
        chain: &str,
        authenticate: &dyn AuthNeededCallback,
    ) -> Result<SessionCredential, CryptoError> {
        let mut cached = self.credential.lock().await;
        if let Some(credential) = cached.as_ref() {
            if credential.is_valid_at(Utc::now()) && credential.covers(requests) {
                debug!("Reusing session credential of {}", credential.signer_address());
                return Ok(credential.clone());
            }
        }

        let expiration = Utc::now()
            .checked_add_signed(self.session_ttl)
            .ok_or_else(|| {
                AuthError::SetupFailed(format!(
                    "session expiry out of range for ttl {}s",
                    self.session_ttl.num_seconds()
                ))
            })?;
        let params = AuthNeededParams {
            uri: self.session.uri(),
            expiration,
            resource_ability_requests: requests.to_vec(),
            chain: chain.to_string(),
        };
        let credential = authenticate.authenticate(params).await?;
        *cached = Some(credential.clone());
        Ok(credential)
    }

    async fn invalidate_credential(&self) {
        self.credential.lock().await.take();
    }

    /// Open `payload`, authenticating through `authenticate` when needed.
    ///
    /// A negative condition evaluation is [`CryptoError::AccessDenied`];
    /// every other failure is [`CryptoError::DecryptionFailed`].
    pub async fn decrypt(
        &self,
        condition: &AccessCondition,
        payload: &EncryptedPayload,
        authenticate: &dyn AuthNeededCallback,
    ) -> Result<Vec<u8>, CryptoError> {
        if payload.condition_hash != condition.condition_hash() {
            return Err(CryptoError::DecryptionFailed(
                "payload was sealed under a different access condition".to_string(),
            ));
        }

        let chain = condition.chain();
        let scope = [ResourceAbilityRequest::decrypt_any()];
        let credential = self.session_credential(&scope, chain, authenticate).await?;

        let plaintext = match self.submit(condition, chain, payload, &credential).await {
            Err(NetworkError::CredentialExpired(reason)) => {
                warn!("Session credential rejected ({}), re-authenticating", reason);
                self.invalidate_credential().await;
                let credential = self.session_credential(&scope, chain, authenticate).await?;
                self.submit(condition, chain, payload, &credential).await
            }
            other => other,
        }
        .map_err(classify_decrypt_failure)?;

        let digest = hex::encode(Sha256::digest(&plaintext));
        if !digest.eq_ignore_ascii_case(&payload.data_to_encrypt_hash) {
            return Err(CryptoError::DecryptionFailed(
                "plaintext does not match payload digest".to_string(),
            ));
        }

        Ok(plaintext)
    }

    async fn submit(
        &self,
        condition: &AccessCondition,
        chain: &str,
        payload: &EncryptedPayload,
        credential: &SessionCredential,
    ) -> Result<Vec<u8>, NetworkError> {
        self.network
            .decrypt(
                &self.session,
                DecryptRequest {
                    condition,
                    chain,
                    payload,
                    credential,
                },
            )
            .await
    }

    /// Release the session. Always call this, on success and on failure.
    pub async fn disconnect(mut self) -> Result<(), CryptoError> {
        self.released = true;
        info!("Disconnecting session {}", self.session.session_id);
        self.network
            .close(&self.session)
            .await
            .map_err(|e| CryptoError::NetworkUnreachable(e.to_string()))
    }
}

fn classify_decrypt_failure(e: NetworkError) -> CryptoError {
    match e {
        NetworkError::NotAuthorized(msg) => CryptoError::AccessDenied(msg),
        other => CryptoError::DecryptionFailed(other.to_string()),
    }
}

#[async_trait]
impl AuthenticatingNetwork for ClientHandle {
    fn network_name(&self) -> &str {
        &self.session.network_name
    }

    async fn freshness_anchor(&self) -> Result<FreshnessAnchor, NetworkError> {
        self.network.latest_blockhash(&self.session).await
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        warn!(
            "Session {} dropped without disconnect, closing in background",
            self.session.session_id
        );
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let network = self.network.clone();
            let session = self.session.clone();
            runtime.spawn(async move {
                if let Err(e) = network.close(&session).await {
                    warn!("Background close of {} failed: {}", session.session_id, e);
                }
            });
        }
    }
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle")
            .field("session", &self.session)
            .field("session_ttl", &self.session_ttl)
            .finish()
    }
}
