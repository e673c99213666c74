//! Prompt-to-result gateway that only releases compute-job output to
//! signers satisfying an on-chain access condition.

// Conditional-access encryption and the authentication exchange
pub mod access;

// Chain RPC and ephemeral signing identities
pub mod chain;

pub mod config;

// HTTP surface and upstream job client
pub mod modules;

pub mod orchestrator;

pub use access::{AccessCondition, ConditionalCryptoClient, CryptoError, DecryptionNetwork};
pub use config::Settings;
pub use orchestrator::{RequestError, RequestOrchestrator};
