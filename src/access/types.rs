//! Payloads and credentials exchanged with the decryption network.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// URI scheme of access-control-condition resources.
pub const CONDITION_RESOURCE_SCHEME: &str = "lit-accesscontrolcondition";

/// How the signature in an [`AuthSig`] was produced.
pub const PERSONAL_SIGN_DERIVATION: &str = "web3.eth.personal.sign";

/// Ciphertext sealed under an access condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedPayload {
    /// Base64 ciphertext, opaque to the client.
    pub ciphertext: String,

    /// Digest of the access condition the payload was sealed under.
    pub condition_hash: String,

    /// SHA-256 of the plaintext, hex-encoded.
    pub data_to_encrypt_hash: String,
}

/// Capability requested over a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ability {
    #[serde(rename = "access-control-condition-decryption")]
    AccessControlConditionDecryption,
    #[serde(rename = "access-control-condition-signing")]
    AccessControlConditionSigning,
}

impl Ability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Ability::AccessControlConditionDecryption => "access-control-condition-decryption",
            Ability::AccessControlConditionSigning => "access-control-condition-signing",
        }
    }

    /// ReCap namespace and action name.
    pub fn recap_action(&self) -> (&'static str, &'static str) {
        match self {
            Ability::AccessControlConditionDecryption => ("Threshold", "Decryption"),
            Ability::AccessControlConditionSigning => ("Threshold", "Signing"),
        }
    }
}

/// An access-control-condition resource, `*` meaning any condition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConditionResource {
    pub key: String,
}

impl ConditionResource {
    pub fn wildcard() -> Self {
        Self {
            key: "*".to_string(),
        }
    }

    pub fn uri(&self) -> String {
        format!("{}://{}", CONDITION_RESOURCE_SCHEME, self.key)
    }

    pub fn covers(&self, other: &ConditionResource) -> bool {
        self.key == "*" || self.key == other.key
    }
}

/// A (resource, ability) pair a session credential is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceAbilityRequest {
    pub resource: ConditionResource,
    pub ability: Ability,
}

impl ResourceAbilityRequest {
    /// Decrypt anything sealed under any condition.
    pub fn decrypt_any() -> Self {
        Self {
            resource: ConditionResource::wildcard(),
            ability: Ability::AccessControlConditionDecryption,
        }
    }
}

/// Parameters handed to the authentication callback.
#[derive(Debug, Clone)]
pub struct AuthNeededParams {
    /// Session URI the credential is issued for.
    pub uri: String,
    pub expiration: DateTime<Utc>,
    /// Exactly the pairs the network asked for.
    pub resource_ability_requests: Vec<ResourceAbilityRequest>,
    /// Chain the signer is expected on.
    pub chain: String,
}

/// Signed authorization message in wire form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSig {
    pub sig: String,
    pub derived_via: String,
    pub signed_message: String,
    pub address: String,
}

/// A time- and scope-bounded credential for one authorization exchange.
#[derive(Debug, Clone)]
pub struct SessionCredential {
    pub auth_sig: AuthSig,
    pub expiration: DateTime<Utc>,
    pub resource_ability_requests: Vec<ResourceAbilityRequest>,
}

impl SessionCredential {
    pub fn signer_address(&self) -> &str {
        &self.auth_sig.address
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expiration
    }

    /// True if every requested pair is granted by this credential.
    pub fn covers(&self, requests: &[ResourceAbilityRequest]) -> bool {
        requests.iter().all(|wanted| {
            self.resource_ability_requests
                .iter()
                .any(|granted| {
                    granted.ability == wanted.ability && granted.resource.covers(&wanted.resource)
                })
        })
    }
}
