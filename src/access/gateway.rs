//! HTTP/JSON gateway to a remote decryption network.
//!
//! Every operation is a `POST` under `<base>/web/`. Failures carry a JSON
//! body `{ "errorCode": ..., "message": ... }` which is classified into
//! [`NetworkError`] variants.

use crate::access::client::{DecryptRequest, DecryptionNetwork, NetworkSession};
use crate::access::condition::AccessCondition;
use crate::access::error::NetworkError;
use crate::access::local::NOT_AUTHORIZED_CODE;
use crate::access::types::{AuthSig, EncryptedPayload, ResourceAbilityRequest};
use crate::chain::types::FreshnessAnchor;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HandshakeRequest<'a> {
    network: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HandshakeResponse {
    session_id: String,
    network_name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionRequest<'a> {
    session_id: &'a str,
}

#[derive(Deserialize)]
struct BlockhashResponse {
    blockhash: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EncryptBody<'a> {
    session_id: &'a str,
    access_control_conditions: &'a AccessCondition,
    data_to_encrypt: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DecryptBody<'a> {
    session_id: &'a str,
    access_control_conditions: &'a AccessCondition,
    chain: &'a str,
    #[serde(flatten)]
    payload: &'a EncryptedPayload,
    auth_sig: &'a AuthSig,
    expiration: DateTime<Utc>,
    resource_ability_requests: &'a [ResourceAbilityRequest],
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DecryptResponse {
    decrypted_data: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct GatewayErrorBody {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Remote network reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpNetwork {
    base_url: String,
    network: String,
    http: reqwest::Client,
}

impl HttpNetwork {
    pub fn new(base_url: impl Into<String>, network: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            network: network.into(),
            http: reqwest::Client::new(),
        }
    }

    async fn send<B: Serialize + Sync + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, NetworkError> {
        let url = format!("{}/web/{}", self.base_url, path);
        debug!("POST {}", url);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| NetworkError::Unreachable(format!("{}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let error = classify_failure(status, &text);
            warn!("{} failed: {}", path, error);
            return Err(error);
        }
        Ok(response)
    }

    async fn post<B: Serialize + Sync + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, NetworkError> {
        self.send(path, body)
            .await?
            .json::<T>()
            .await
            .map_err(|e| NetworkError::Protocol(format!("invalid {} response: {}", path, e)))
    }
}

/// Map a failed gateway response onto a [`NetworkError`].
pub fn classify_failure(status: StatusCode, body: &str) -> NetworkError {
    let parsed: GatewayErrorBody = serde_json::from_str(body).unwrap_or_default();
    let code = parsed.error_code.unwrap_or_default();
    let message = parsed.message.unwrap_or_else(|| body.to_string());
    let detail = if code.is_empty() {
        format!("{} {}", status.as_u16(), message)
    } else {
        format!("{}: {}", code, message)
    };

    if code.contains(NOT_AUTHORIZED_CODE) || code.contains("NotAuthorized") {
        NetworkError::NotAuthorized(detail)
    } else if code.contains("Expired") || status == StatusCode::UNAUTHORIZED {
        NetworkError::CredentialExpired(detail)
    } else if status.is_server_error() {
        NetworkError::Unreachable(detail)
    } else {
        NetworkError::Rejected(detail)
    }
}

#[async_trait]
impl DecryptionNetwork for HttpNetwork {
    async fn handshake(&self) -> Result<NetworkSession, NetworkError> {
        let response: HandshakeResponse = self
            .post(
                "handshake",
                &HandshakeRequest {
                    network: &self.network,
                },
            )
            .await?;
        Ok(NetworkSession {
            session_id: response.session_id,
            network_name: response.network_name,
        })
    }

    async fn latest_blockhash(
        &self,
        session: &NetworkSession,
    ) -> Result<FreshnessAnchor, NetworkError> {
        let response: BlockhashResponse = self
            .post(
                "latest_blockhash",
                &SessionRequest {
                    session_id: &session.session_id,
                },
            )
            .await?;
        Ok(FreshnessAnchor::new(response.blockhash))
    }

    async fn encrypt(
        &self,
        session: &NetworkSession,
        condition: &AccessCondition,
        plaintext: &[u8],
    ) -> Result<EncryptedPayload, NetworkError> {
        self.post(
            "encrypt",
            &EncryptBody {
                session_id: &session.session_id,
                access_control_conditions: condition,
                data_to_encrypt: STANDARD.encode(plaintext),
            },
        )
        .await
    }

    async fn decrypt(
        &self,
        session: &NetworkSession,
        request: DecryptRequest<'_>,
    ) -> Result<Vec<u8>, NetworkError> {
        let response: DecryptResponse = self
            .post(
                "decrypt",
                &DecryptBody {
                    session_id: &session.session_id,
                    access_control_conditions: request.condition,
                    chain: request.chain,
                    payload: request.payload,
                    auth_sig: &request.credential.auth_sig,
                    expiration: request.credential.expiration,
                    resource_ability_requests: &request.credential.resource_ability_requests,
                },
            )
            .await?;
        STANDARD
            .decode(response.decrypted_data)
            .map_err(|e| NetworkError::Protocol(format!("invalid decrypted data: {}", e)))
    }

    async fn close(&self, session: &NetworkSession) -> Result<(), NetworkError> {
        self.send(
            "session/close",
            &SessionRequest {
                session_id: &session.session_id,
            },
        )
        .await?;
        Ok(())
    }
}
