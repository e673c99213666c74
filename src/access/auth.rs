//! Challenge-response authentication against the decryption network.
//!
//! The network calls back into [`AuthNeededCallback`] whenever it needs a
//! fresh session credential. [`ChallengeResponseAuthenticator`] answers by
//! fetching a freshness anchor, generating a one-time identity, and signing
//! a canonical authorization message with it.

use crate::access::error::{AuthError, NetworkError};
use crate::access::siwe::{AuthorizationMessage, DEFAULT_DOMAIN};
use crate::access::types::{AuthNeededParams, AuthSig, SessionCredential, PERSONAL_SIGN_DERIVATION};
use crate::chain::identity::{to_checksum_address, EphemeralIdentityProvider};
use crate::chain::types::FreshnessAnchor;
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info};

/// Callback invoked when a session credential is missing or expired.
#[async_trait]
pub trait AuthNeededCallback: Send + Sync {
    async fn authenticate(&self, params: AuthNeededParams) -> Result<SessionCredential, AuthError>;
}

/// The side of the decryption network the authenticator talks to.
#[async_trait]
pub trait AuthenticatingNetwork: Send + Sync {
    /// Name the network identifies itself by.
    fn network_name(&self) -> &str;

    /// A recent block hash, fetched fresh on every call.
    async fn freshness_anchor(&self) -> Result<FreshnessAnchor, NetworkError>;
}

/// Builds and signs session credentials with ephemeral identities.
///
/// Failures propagate immediately; retrying is the caller's decision.
pub struct ChallengeResponseAuthenticator<'a> {
    network: &'a dyn AuthenticatingNetwork,
    identities: &'a EphemeralIdentityProvider,
    domain: String,
}

impl<'a> ChallengeResponseAuthenticator<'a> {
    pub fn new(
        network: &'a dyn AuthenticatingNetwork,
        identities: &'a EphemeralIdentityProvider,
    ) -> Self {
        Self {
            network,
            identities,
            domain: DEFAULT_DOMAIN.to_string(),
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }
}

#[async_trait]
impl<'a> AuthNeededCallback for ChallengeResponseAuthenticator<'a> {
    async fn authenticate(&self, params: AuthNeededParams) -> Result<SessionCredential, AuthError> {
        info!("Auth needed for {}", params.uri);

        let anchor = self.network.freshness_anchor().await?;
        debug!("Freshness anchor {}", anchor.block_hash);

        let identity = self.identities.new_identity().await?;

        let message = AuthorizationMessage {
            domain: self.domain.clone(),
            address: identity.address().to_string(),
            uri: params.uri.clone(),
            chain_id: identity.chain().chain_id,
            nonce: anchor.block_hash,
            issued_at: Utc::now(),
            expiration: params.expiration,
            resources: params.resource_ability_requests.clone(),
            network: self.network.network_name().to_string(),
        }
        .to_message()?;

        let sig = identity.sign_message(&message)?;
        let address = to_checksum_address(identity.address())?;
        info!("Session credential signed by {}", address);

        Ok(SessionCredential {
            auth_sig: AuthSig {
                sig,
                derived_via: PERSONAL_SIGN_DERIVATION.to_string(),
                signed_message: message,
                address,
            },
            expiration: params.expiration,
            resource_ability_requests: params.resource_ability_requests,
        })
    }
}
