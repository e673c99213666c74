//! Declarative access conditions evaluated by the decryption network.

use crate::access::error::ConditionError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Placeholder substituted with the authenticated signer's address.
pub const USER_ADDRESS_PLACEHOLDER: &str = ":userAddress";

/// ERC-20 token gating the default condition.
pub const DEFAULT_TOKEN_CONTRACT: &str = "0x71114745941707ACAeCf3C756c012d2388d4A943";

/// Chain the default condition is evaluated on.
pub const DEFAULT_CHAIN: &str = "sepolia";

/// Comparator of a return-value test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = "<=")]
    LessOrEqual,
    #[serde(rename = "=")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
}

impl Comparator {
    pub fn evaluate(&self, actual: u128, threshold: u128) -> bool {
        match self {
            Comparator::GreaterThan => actual > threshold,
            Comparator::GreaterOrEqual => actual >= threshold,
            Comparator::LessThan => actual < threshold,
            Comparator::LessOrEqual => actual <= threshold,
            Comparator::Equal => actual == threshold,
            Comparator::NotEqual => actual != threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnValueTest {
    pub comparator: Comparator,
    /// Decimal threshold, kept as a string to match on-chain integer widths.
    pub value: String,
}

/// One predicate of an access condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionClause {
    pub contract_address: String,
    pub standard_contract_type: String,
    pub chain: String,
    pub method: String,
    pub parameters: Vec<String>,
    pub return_value_test: ReturnValueTest,
}

impl ConditionClause {
    /// Parameters with the user-address placeholder replaced by `user_address`.
    pub fn resolved_parameters(&self, user_address: &str) -> Vec<String> {
        self.parameters
            .iter()
            .map(|p| {
                if p == USER_ADDRESS_PLACEHOLDER {
                    user_address.to_string()
                } else {
                    p.clone()
                }
            })
            .collect()
    }
}

/// An ordered, conjunctive list of clauses.
///
/// Immutable once built; shared read-only across requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessCondition {
    clauses: Vec<ConditionClause>,
}

impl AccessCondition {
    pub fn new(clauses: Vec<ConditionClause>) -> Result<Self, ConditionError> {
        if clauses.is_empty() {
            return Err(ConditionError::Empty);
        }
        for clause in &clauses {
            clause.return_value_test.value.parse::<u128>().map_err(|_| {
                ConditionError::Invalid(format!(
                    "threshold {:?} is not an unsigned integer",
                    clause.return_value_test.value
                ))
            })?;
        }
        Ok(Self { clauses })
    }

    /// `balanceOf(:userAddress) <comparator> <value>` on an ERC-20 contract.
    pub fn erc20_balance(
        contract_address: &str,
        chain: &str,
        comparator: Comparator,
        value: u128,
    ) -> Self {
        Self {
            clauses: vec![ConditionClause {
                contract_address: contract_address.to_string(),
                standard_contract_type: "ERC20".to_string(),
                chain: chain.to_string(),
                method: "balanceOf".to_string(),
                parameters: vec![USER_ADDRESS_PLACEHOLDER.to_string()],
                return_value_test: ReturnValueTest {
                    comparator,
                    value: value.to_string(),
                },
            }],
        }
    }

    /// Holders of more than zero of the default token on sepolia.
    pub fn default_token_holder() -> Self {
        Self::erc20_balance(
            DEFAULT_TOKEN_CONTRACT,
            DEFAULT_CHAIN,
            Comparator::GreaterThan,
            0,
        )
    }

    pub fn from_json(json: &str) -> Result<Self, ConditionError> {
        let clauses: Vec<ConditionClause> =
            serde_json::from_str(json).map_err(|e| ConditionError::Invalid(e.to_string()))?;
        Self::new(clauses)
    }

    pub fn clauses(&self) -> &[ConditionClause] {
        &self.clauses
    }

    /// Chain named by the first clause, used when requesting decryption.
    pub fn chain(&self) -> &str {
        self.clauses
            .first()
            .map(|c| c.chain.as_str())
            .unwrap_or(DEFAULT_CHAIN)
    }

    /// SHA-256 over the canonical JSON encoding, hex-encoded.
    ///
    /// Binds an encrypted payload to the exact condition it was sealed under.
    pub fn condition_hash(&self) -> String {
        // Field order is fixed by the struct definitions
        let canonical = serde_json::to_vec(&self.clauses).unwrap_or_default();
        hex::encode(Sha256::digest(&canonical))
    }
}
