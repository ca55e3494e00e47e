//! Product authenticity verifier
//!
//! A product is authentic only when its zero-knowledge Merkle membership
//! proof verifies, its NFC tag answers a challenge with the right diversified
//! AES-CMAC, and the Merkle root it proves against is one the issuer signed
//! and has not revoked.

pub mod config;
pub mod error;
pub mod membership;
pub mod orchestrator;
pub mod rate_limit;
pub mod redis_store;
pub mod root_registry;
pub mod root_signer;
pub mod server;
pub mod tag_auth;
pub mod trust_source;
pub mod types;

pub use error::{Result, VerifierError};
pub use orchestrator::VerificationEngine;
pub use types::{VerificationRequest, VerificationResult};
