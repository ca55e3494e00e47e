//! Error types for the verifier service

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VerifierError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// The verification key is missing, corrupt or unusable. Always fatal.
    #[error("Verification key error: {0}")]
    VerificationKey(String),

    /// The proof system rejected its own inputs after format checks passed.
    #[error("Proof system fault: {0}")]
    ProofSystem(String),

    #[error("Trust source error: {0}")]
    TrustSource(String),

    #[error("Root signature error: {0}")]
    RootSignature(String),

    #[error("Root {0} has been revoked")]
    RevokedRoot(String),

    #[error("Rate limit store error: {0}")]
    RateLimitStore(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Hex encoding error: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VerifierError {
    /// Faults that mean the deployment itself is broken rather than the
    /// product being counterfeit.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            VerifierError::Config(_)
                | VerifierError::VerificationKey(_)
                | VerifierError::ProofSystem(_)
                | VerifierError::TrustSource(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, VerifierError>;
