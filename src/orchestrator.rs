//! Per-request workflow: fetch the job result, seal it under the access
//! condition, and open it again through the authentication exchange.

use crate::access::auth::ChallengeResponseAuthenticator;
use crate::access::client::{ClientHandle, ConditionalCryptoClient, DecryptionNetwork};
use crate::access::condition::AccessCondition;
use crate::access::error::CryptoError;
use crate::chain::identity::EphemeralIdentityProvider;
use crate::config::{ConfigError, Settings};
use crate::modules::upstream::{FetchError, JobRequest, RetryingFetcher};
use log::{error, info, warn};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Message returned when the signer does not satisfy the access condition.
pub const ACCESS_DENIED_MESSAGE: &str =
    "You do not meet the conditions required to view this content.";

#[derive(Debug, Error)]
pub enum RequestError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error("Failed to fetch data")]
    Upstream(#[from] FetchError),

    #[error("Failed to serialize job response: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl RequestError {
    /// True when the failure is the condition evaluating false.
    pub fn is_authorization_denied(&self) -> bool {
        matches!(self, RequestError::Crypto(e) if e.is_access_denied())
    }
}

pub struct RequestOrchestrator {
    settings: Arc<Settings>,
    condition: Arc<AccessCondition>,
    fetcher: RetryingFetcher,
    crypto: ConditionalCryptoClient,
    identities: EphemeralIdentityProvider,
}

impl RequestOrchestrator {
    pub fn new(
        settings: Arc<Settings>,
        condition: Arc<AccessCondition>,
        fetcher: RetryingFetcher,
        network: Arc<dyn DecryptionNetwork>,
        identities: EphemeralIdentityProvider,
    ) -> Self {
        let crypto = ConditionalCryptoClient::new(network).with_session_ttl(settings.session_ttl());
        Self {
            settings,
            condition,
            fetcher,
            crypto,
            identities,
        }
    }

    pub fn condition(&self) -> &AccessCondition {
        &self.condition
    }

    pub async fn handle(&self, prompt: &str) -> Result<Value, RequestError> {
        let config = self.settings.request_config().map_err(|e| {
            error!("Configuration check failed: {}", e);
            e
        })?;

        let job = JobRequest::new(&config.pk, &config.job_module, prompt);
        let data = self
            .fetcher
            .fetch(&self.settings.job_endpoint, &job)
            .await
            .map_err(|e| {
                error!("Job fetch failed: {}", e);
                e
            })?;
        info!("Fetched job result");
        let plaintext = serde_json::to_vec(&data)?;

        let handle = self.crypto.connect().await?;
        let outcome = self.round_trip(&handle, &plaintext).await;
        if let Err(e) = handle.disconnect().await {
            warn!("Disconnect failed: {}", e);
        }

        match outcome {
            Ok(decrypted) => {
                info!("Decrypted {} bytes", decrypted.len());
                Ok(parse_decrypted(&decrypted))
            }
            Err(e) if e.is_access_denied() => {
                info!("Access denied: {}", e);
                Err(e.into())
            }
            Err(e) => {
                error!("Decryption failed: {}", e);
                Err(e.into())
            }
        }
    }

    async fn round_trip(
        &self,
        handle: &ClientHandle,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let payload = handle.encrypt(&self.condition, plaintext).await?;
        let authenticator = ChallengeResponseAuthenticator::new(handle, &self.identities);
        handle
            .decrypt(&self.condition, &payload, &authenticator)
            .await
    }
}

/// Decrypted text as JSON, or as a JSON string when it does not parse.
pub fn parse_decrypted(bytes: &[u8]) -> Value {
    let text = String::from_utf8_lossy(bytes);
    serde_json::from_str(&text).unwrap_or_else(|_| Value::String(text.into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_decrypted() {
        assert_eq!(
            parse_decrypted(br#"{"stdout":"moo"}"#),
            serde_json::json!({"stdout": "moo"})
        );
        assert_eq!(
            parse_decrypted(b"plain text"),
            Value::String("plain text".to_string())
        );
    }

    #[test]
    fn test_authorization_denied_flag() {
        let denied = RequestError::Crypto(CryptoError::AccessDenied("no".to_string()));
        assert!(denied.is_authorization_denied());
        let failed = RequestError::Crypto(CryptoError::DecryptionFailed("bad".to_string()));
        assert!(!failed.is_authorization_denied());
        let upstream = RequestError::Upstream(FetchError::UpstreamUnavailable {
            attempts: 5,
            last_error: "refused".to_string(),
        });
        assert!(!upstream.is_authorization_denied());
        assert_eq!(upstream.to_string(), "Failed to fetch data");
    }
}
