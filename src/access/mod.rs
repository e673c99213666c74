//! Conditional-access encryption against a threshold decryption network.
//!
//! Plaintext is sealed under an [`AccessCondition`]; the network releases it
//! again only to a signer whose address satisfies the condition on-chain.
//!
//! # Flow
//!
//! ```text
//! ClientHandle::decrypt
//!   ├─ cached credential valid? ── yes ─────────────────────────┐
//!   └─ no: AuthNeededCallback                                   │
//!          ├─ latest blockhash (freshness anchor)               │
//!          ├─ new EphemeralIdentity                             │
//!          ├─ AuthorizationMessage (SIWE + ReCap)               │
//!          └─ personal_sign ──▶ SessionCredential ──────────────┤
//!                                                               ▼
//!                                         DecryptionNetwork::decrypt
//!                                           ├─ plaintext
//!                                           ├─ NotAuthorized ─▶ AccessDenied
//!                                           └─ other ─────────▶ DecryptionFailed
//! ```
//!
//! Two [`DecryptionNetwork`] backends ship with the crate: [`HttpNetwork`]
//! for a remote gateway and [`LocalNetwork`] running in-process.

pub mod auth;
pub mod client;
pub mod condition;
pub mod error;
pub mod gateway;
pub mod local;
pub mod siwe;
pub mod types;

pub use auth::{AuthNeededCallback, AuthenticatingNetwork, ChallengeResponseAuthenticator};
pub use client::{
    ClientHandle, ConditionalCryptoClient, DecryptRequest, DecryptionNetwork, NetworkSession,
};
pub use condition::{AccessCondition, Comparator, ConditionClause, ReturnValueTest};
pub use error::{AuthError, ConditionError, CryptoError, NetworkError};
pub use gateway::HttpNetwork;
pub use local::LocalNetwork;
pub use siwe::AuthorizationMessage;
pub use types::{
    Ability, AuthNeededParams, AuthSig, EncryptedPayload, ResourceAbilityRequest,
    SessionCredential,
};
