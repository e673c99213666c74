//! Environment configuration.

use crate::access::condition::{AccessCondition, Comparator, DEFAULT_TOKEN_CONTRACT};
use crate::access::error::ConditionError;
use crate::modules::upstream::RetryPolicy;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_JOB_ENDPOINT: &str = "http://js-cli-wrapper.lilypad.tech";
pub const DEFAULT_JOB_MODULE: &str = "cowsay:v0.0.3";
pub const DEFAULT_CHAIN_RPC_URL: &str = "https://eth-sepolia.g.alchemy.com/v2/{key}";
pub const DEFAULT_CONDITION_NETWORK: &str = "cayenne";
pub const LOCAL_NETWORK_URL: &str = "local";
/// Upper bound on `SESSION_TTL_SECS`: one year.
pub const MAX_SESSION_TTL_SECS: i64 = 365 * 86_400;

const API_KEY_PLACEHOLDER: &str = "{key}";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    Missing(&'static str),

    #[error("Invalid value {value:?} for {name}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("Failed to read access condition from {path}: {reason}")]
    ConditionFile { path: String, reason: String },

    #[error(transparent)]
    Condition(#[from] ConditionError),
}

#[derive(Clone, PartialEq)]
pub struct Settings {
    pub port: u16,
    pub job_endpoint: String,
    pub job_module: String,
    pub pk: Option<String>,
    pub alchemy_api_key: Option<String>,
    /// May contain `{key}`, replaced by the API key.
    pub chain_rpc_url: String,
    /// Gateway base URL, or `local` for the in-process network.
    pub condition_network_url: Option<String>,
    pub condition_network: String,
    pub condition_chain: String,
    pub access_condition_path: Option<PathBuf>,
    pub fetch_max_attempts: u32,
    pub fetch_backoff: Duration,
    pub session_ttl_secs: i64,
}

/// Settings needed by every request, present and non-empty.
#[derive(Clone, PartialEq, Eq)]
pub struct RequestConfig {
    pub pk: String,
    pub job_module: String,
    pub chain_rpc_url: String,
}

impl std::fmt::Debug for RequestConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestConfig")
            .field("job_module", &self.job_module)
            .finish_non_exhaustive()
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build settings from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        Ok(Settings {
            port: parse_or(&lookup, "PORT", 8080)?,
            job_endpoint: var("JOB_ENDPOINT").unwrap_or_else(|| DEFAULT_JOB_ENDPOINT.to_string()),
            job_module: lookup("JOB_MODULE").unwrap_or_else(|| DEFAULT_JOB_MODULE.to_string()),
            pk: var("PK"),
            alchemy_api_key: var("ALCHEMY_API_KEY"),
            chain_rpc_url: var("CHAIN_RPC_URL")
                .unwrap_or_else(|| DEFAULT_CHAIN_RPC_URL.to_string()),
            condition_network_url: var("CONDITION_NETWORK_URL"),
            condition_network: var("CONDITION_NETWORK")
                .unwrap_or_else(|| DEFAULT_CONDITION_NETWORK.to_string()),
            condition_chain: var("CONDITION_CHAIN")
                .unwrap_or_else(|| crate::access::condition::DEFAULT_CHAIN.to_string()),
            access_condition_path: var("ACCESS_CONDITION_PATH").map(PathBuf::from),
            fetch_max_attempts: parse_or(
                &lookup,
                "FETCH_MAX_ATTEMPTS",
                crate::modules::upstream::DEFAULT_MAX_ATTEMPTS,
            )?,
            fetch_backoff: Duration::from_millis(parse_or(&lookup, "FETCH_BACKOFF_MS", 1000u64)?),
            session_ttl_secs: session_ttl_secs(&lookup)?,
        })
    }

    /// Chain RPC endpoint with the API key substituted.
    pub fn chain_rpc_url(&self) -> Result<String, ConfigError> {
        if !self.chain_rpc_url.contains(API_KEY_PLACEHOLDER) {
            return Ok(self.chain_rpc_url.clone());
        }
        let key = self
            .alchemy_api_key
            .as_deref()
            .ok_or(ConfigError::Missing("ALCHEMY_API_KEY"))?;
        Ok(self.chain_rpc_url.replace(API_KEY_PLACEHOLDER, key))
    }

    /// Check the per-request settings before any network call is made.
    pub fn request_config(&self) -> Result<RequestConfig, ConfigError> {
        let pk = self.pk.clone().ok_or(ConfigError::Missing("PK"))?;
        if self.job_module.trim().is_empty() {
            return Err(ConfigError::Missing("JOB_MODULE"));
        }
        Ok(RequestConfig {
            pk,
            job_module: self.job_module.clone(),
            chain_rpc_url: self.chain_rpc_url()?,
        })
    }

    /// The condition from `ACCESS_CONDITION_PATH`, or the default token-holder
    /// condition on the configured chain.
    pub fn access_condition(&self) -> Result<AccessCondition, ConfigError> {
        match &self.access_condition_path {
            Some(path) => {
                let json = std::fs::read_to_string(path).map_err(|e| ConfigError::ConditionFile {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?;
                Ok(AccessCondition::from_json(&json)?)
            }
            None => Ok(AccessCondition::erc20_balance(
                DEFAULT_TOKEN_CONTRACT,
                &self.condition_chain,
                Comparator::GreaterThan,
                0,
            )),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.fetch_max_attempts, self.fetch_backoff)
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::try_seconds(self.session_ttl_secs)
            .filter(|ttl| ttl.num_seconds() > 0 && ttl.num_seconds() <= MAX_SESSION_TTL_SECS)
            .unwrap_or_else(|| {
                chrono::Duration::seconds(crate::access::client::DEFAULT_SESSION_TTL_SECS)
            })
    }

    pub fn uses_local_network(&self) -> bool {
        match &self.condition_network_url {
            None => true,
            Some(url) => url.eq_ignore_ascii_case(LOCAL_NETWORK_URL),
        }
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("port", &self.port)
            .field("job_endpoint", &self.job_endpoint)
            .field("job_module", &self.job_module)
            .field("pk", &self.pk.as_ref().map(|_| "<set>"))
            .field("alchemy_api_key", &self.alchemy_api_key.as_ref().map(|_| "<set>"))
            .field("condition_network_url", &self.condition_network_url)
            .field("condition_network", &self.condition_network)
            .field("condition_chain", &self.condition_chain)
            .field("access_condition_path", &self.access_condition_path)
            .field("fetch_max_attempts", &self.fetch_max_attempts)
            .field("fetch_backoff", &self.fetch_backoff)
            .field("session_ttl_secs", &self.session_ttl_secs)
            .finish()
    }
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(default),
        Some(value) if value.trim().is_empty() => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
            value,
        }),
    }
}

fn session_ttl_secs<F>(lookup: &F) -> Result<i64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let secs = parse_or(
        lookup,
        "SESSION_TTL_SECS",
        crate::access::client::DEFAULT_SESSION_TTL_SECS,
    )?;
    if secs <= 0 || secs > MAX_SESSION_TTL_SECS {
        return Err(ConfigError::Invalid {
            name: "SESSION_TTL_SECS",
            value: secs.to_string(),
            reason: format!("must be between 1 and {}", MAX_SESSION_TTL_SECS),
        });
    }
    Ok(secs)
}
