//! Chain connectivity and ephemeral signing identities.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌───────────────────────────┐     ┌───────────────────┐
//! │ ChainClient │────▶│ EphemeralIdentityProvider │────▶│ EphemeralIdentity │
//! │ (JSON-RPC)  │     │  (connect + keygen)       │     │ (EIP-191 signer)  │
//! └─────────────┘     └───────────────────────────┘     └───────────────────┘
//!        │
//!        ▼
//! ┌─────────────┐
//! │  EVM node   │
//! └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use lilygate::chain::{ChainClient, EphemeralIdentityProvider};
//!
//! let client = Arc::new(ChainClient::new("https://eth-sepolia.g.alchemy.com/v2/KEY".to_string()));
//! let provider = EphemeralIdentityProvider::new(client);
//!
//! let identity = provider.new_identity().await?;
//! let signature = identity.sign_message("hello")?;
//! ```

pub mod client;
pub mod error;
pub mod identity;
pub mod types;

pub use client::{ChainClient, ChainRpc};
pub use error::{ChainError, SigningError};
pub use identity::{EphemeralIdentity, EphemeralIdentityProvider};
pub use types::{ChainInfo, FreshnessAnchor};
