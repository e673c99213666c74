//! Canonical authorization messages.
//!
//! Messages follow Sign-In with Ethereum (EIP-4361). The requested
//! resource/ability pairs are delegated through a ReCap resource
//! (`urn:recap:<base64url JSON>`) and restated in human-readable form at the
//! end of the statement, so the signer sees exactly what it authorizes.
//!
//! Rendering is deterministic: identical fields always produce
//! byte-identical text, which the network re-derives before checking the
//! signature.

use crate::access::types::{
    Ability, ConditionResource, ResourceAbilityRequest, CONDITION_RESOURCE_SCHEME,
};
use crate::chain::identity::to_checksum_address;
use crate::chain::error::SigningError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::BTreeMap;

/// Domain requesting the signature.
pub const DEFAULT_DOMAIN: &str = "localhost";

const RECAP_PREFIX: &str = "urn:recap:";
const PREAMBLE_SUFFIX: &str = " wants you to sign in with your Ethereum account:";

/// Fields of an authorization message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationMessage {
    pub domain: String,
    /// Signer address, any case; rendered EIP-55 checksummed.
    pub address: String,
    /// Resource URI the session is issued for.
    pub uri: String,
    pub chain_id: u64,
    /// Freshness anchor.
    pub nonce: String,
    pub issued_at: DateTime<Utc>,
    pub expiration: DateTime<Utc>,
    pub resources: Vec<ResourceAbilityRequest>,
    /// Name of the authenticating network.
    pub network: String,
}

impl AuthorizationMessage {
    /// Render the EIP-4361 text.
    pub fn to_message(&self) -> Result<String, SigningError> {
        let address = to_checksum_address(&self.address)?;

        let mut out = String::new();
        out.push_str(&self.domain);
        out.push_str(PREAMBLE_SUFFIX);
        out.push('\n');
        out.push_str(&address);
        out.push_str("\n\n");
        out.push_str(&self.statement());
        out.push_str("\n\n");
        out.push_str(&format!("URI: {}\n", self.uri));
        out.push_str("Version: 1\n");
        out.push_str(&format!("Chain ID: {}\n", self.chain_id));
        out.push_str(&format!("Nonce: {}\n", self.nonce));
        out.push_str(&format!("Issued At: {}\n", format_time(&self.issued_at)));
        out.push_str(&format!(
            "Expiration Time: {}\n",
            format_time(&self.expiration)
        ));
        out.push_str("Resources:\n");
        out.push_str(&format!("- {}", self.recap_uri()));
        Ok(out)
    }

    pub fn statement(&self) -> String {
        let mut statement = format!("Authorize a session with the {} network.", self.network);

        let grants = grouped_grants(&self.resources);
        if !grants.is_empty() {
            statement.push_str(
                " I further authorize the stated URI to perform the following actions on my behalf:",
            );
            for (i, (resource, actions)) in grants.iter().enumerate() {
                let rendered: Vec<String> = actions
                    .keys()
                    .map(|action| {
                        let (namespace, name) =
                            action.split_once('/').unwrap_or(("", action.as_str()));
                        format!("'{}': '{}'", namespace, name)
                    })
                    .collect();
                statement.push_str(&format!(
                    " ({}) {} for '{}'.",
                    i + 1,
                    rendered.join(", "),
                    resource
                ));
            }
        }

        statement
    }

    /// ReCap URI delegating the requested abilities.
    pub fn recap_uri(&self) -> String {
        let recap = Recap {
            att: grouped_grants(&self.resources),
            prf: Vec::new(),
        };
        let json = serde_json::to_vec(&recap).unwrap_or_default();
        format!("{}{}", RECAP_PREFIX, URL_SAFE_NO_PAD.encode(json))
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct Recap {
    att: BTreeMap<String, BTreeMap<String, Vec<serde_json::Value>>>,
    prf: Vec<serde_json::Value>,
}

fn grouped_grants(
    resources: &[ResourceAbilityRequest],
) -> BTreeMap<String, BTreeMap<String, Vec<serde_json::Value>>> {
    let mut att: BTreeMap<String, BTreeMap<String, Vec<serde_json::Value>>> = BTreeMap::new();
    for request in resources {
        let (namespace, name) = request.ability.recap_action();
        att.entry(request.resource.uri())
            .or_default()
            .insert(
                format!("{}/{}", namespace, name),
                vec![serde_json::Value::Object(Default::default())],
            );
    }
    att
}

fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Fields read back out of a signed authorization message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAuthorization {
    pub domain: String,
    pub address: String,
    pub uri: String,
    pub chain_id: u64,
    pub nonce: String,
    pub expiration: DateTime<Utc>,
    pub resources: Vec<ResourceAbilityRequest>,
}

impl ParsedAuthorization {
    pub fn parse(message: &str) -> Result<Self, String> {
        let mut lines = message.lines();
        let domain = lines
            .next()
            .and_then(|l| l.strip_suffix(PREAMBLE_SUFFIX))
            .ok_or("missing preamble")?
            .to_string();
        let address = lines.next().ok_or("missing address")?.trim().to_string();

        let mut uri = None;
        let mut chain_id = None;
        let mut nonce = None;
        let mut expiration = None;
        let mut resources = Vec::new();

        for line in lines {
            if let Some(v) = line.strip_prefix("URI: ") {
                uri = Some(v.to_string());
            } else if let Some(v) = line.strip_prefix("Chain ID: ") {
                chain_id = Some(v.parse::<u64>().map_err(|e| e.to_string())?);
            } else if let Some(v) = line.strip_prefix("Nonce: ") {
                nonce = Some(v.to_string());
            } else if let Some(v) = line.strip_prefix("Expiration Time: ") {
                let parsed = DateTime::parse_from_rfc3339(v).map_err(|e| e.to_string())?;
                expiration = Some(parsed.with_timezone(&Utc));
            } else if let Some(v) = line.strip_prefix("- ") {
                if let Some(encoded) = v.strip_prefix(RECAP_PREFIX) {
                    resources.extend(decode_recap(encoded)?);
                }
            }
        }

        Ok(Self {
            domain,
            address,
            uri: uri.ok_or("missing URI")?,
            chain_id: chain_id.ok_or("missing Chain ID")?,
            nonce: nonce.ok_or("missing Nonce")?,
            expiration: expiration.ok_or("missing Expiration Time")?,
            resources,
        })
    }
}

fn decode_recap(encoded: &str) -> Result<Vec<ResourceAbilityRequest>, String> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| format!("invalid recap encoding: {}", e))?;
    let recap: Recap =
        serde_json::from_slice(&bytes).map_err(|e| format!("invalid recap json: {}", e))?;

    let scheme = format!("{}://", CONDITION_RESOURCE_SCHEME);
    let mut out = Vec::new();
    for (resource_uri, actions) in recap.att {
        let key = match resource_uri.strip_prefix(&scheme) {
            Some(key) => key.to_string(),
            None => continue,
        };
        for action in actions.keys() {
            let ability = match action.as_str() {
                "Threshold/Decryption" => Ability::AccessControlConditionDecryption,
                "Threshold/Signing" => Ability::AccessControlConditionSigning,
                _ => continue,
            };
            out.push(ResourceAbilityRequest {
                resource: ConditionResource { key: key.clone() },
                ability,
            });
        }
    }
    Ok(out)
}
