//! Verification engine combining the three authenticity checks
//!
//! The membership proof, tag response and root trust checks share no results,
//! so all three run concurrently and always run to completion. Faults inside
//! one check are logged and count as a failed check; only faults that mean
//! the deployment is misconfigured escape as errors.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, warn};

use crate::error::Result;
use crate::membership::MembershipVerifier;
use crate::root_registry::RootStore;
use crate::tag_auth::TagAuthenticator;
use crate::types::{VerificationRequest, VerificationResult};

/// Default upper bound on a single membership proof check
pub const DEFAULT_PROOF_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct VerificationEngine {
    roots: Arc<dyn RootStore>,
    tags: Arc<TagAuthenticator>,
    membership: Arc<MembershipVerifier>,
    proof_timeout: Duration,
}

impl VerificationEngine {
    pub fn new(
        roots: Arc<dyn RootStore>,
        tags: Arc<TagAuthenticator>,
        membership: Arc<MembershipVerifier>,
    ) -> Self {
        Self {
            roots,
            tags,
            membership,
            proof_timeout: DEFAULT_PROOF_TIMEOUT,
        }
    }

    pub fn with_proof_timeout(mut self, proof_timeout: Duration) -> Self {
        self.proof_timeout = proof_timeout;
        self
    }

    /// Run all three checks and combine them.
    ///
    /// `Err` is returned only for fatal configuration faults: a broken
    /// verifying key or an unusable trust store.
    pub async fn verify(&self, request: &VerificationRequest) -> Result<VerificationResult> {
        let (proof_valid, tag_auth_valid, root_valid) = tokio::join!(
            self.check_proof(request),
            self.check_tag(request),
            self.check_root(request.claimed_root()),
        );

        let result = VerificationResult::new(proof_valid?, tag_auth_valid, root_valid?);
        debug!(
            "Verification complete: authentic={} proof={} tag={} root={}",
            result.authentic, result.proof_valid, result.tag_auth_valid, result.root_valid
        );
        Ok(result)
    }

    async fn check_proof(&self, request: &VerificationRequest) -> Result<bool> {
        let membership = Arc::clone(&self.membership);
        let proof = request.proof.clone();
        let public_inputs = request.public_inputs.clone();

        let task = tokio::task::spawn_blocking(move || {
            membership.verify_membership_proof(&proof, &public_inputs)
        });

        match timeout(self.proof_timeout, task).await {
            Ok(Ok(Ok(valid))) => Ok(valid),
            Ok(Ok(Err(e))) if e.is_fatal() => Err(e),
            Ok(Ok(Err(e))) => {
                error!("Membership check fault: {}", e);
                Ok(false)
            }
            Ok(Err(join_error)) => {
                error!("Membership check aborted: {}", join_error);
                Ok(false)
            }
            Err(_) => {
                warn!("Membership check timed out after {:?}", self.proof_timeout);
                Ok(false)
            }
        }
    }

    async fn check_tag(&self, request: &VerificationRequest) -> bool {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.tags
                .verify_tag_auth(&request.tag_uid, &request.challenge, &request.tag_signature)
        }));

        outcome.unwrap_or_else(|_| {
            error!("Tag authentication panicked");
            false
        })
    }

    async fn check_root(&self, root: &str) -> Result<bool> {
        match self.roots.lookup(root).await {
            Ok(Some(trusted)) => {
                let expected = self.membership.circuit_version();
                if trusted.circuit_version != expected {
                    debug!(
                        "Root {} issued for circuit v{}, verifier runs v{}",
                        root, trusted.circuit_version, expected
                    );
                    return Ok(false);
                }
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(e) if e.is_fatal() => {
                error!("Root store unavailable: {}", e);
                Err(e)
            }
            Err(e) => {
                error!("Root lookup fault: {}", e);
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VerifierError;
    use crate::membership::tests::{fixture, test_verifier};
    use crate::root_registry::{RootRegistry, TrustedRoot};
    use crate::tag_auth::tests::{tag_response, test_authenticator, TEST_UID};
    use async_trait::async_trait;

    const CHALLENGE: &[u8] = b"server-nonce-42";

    struct Harness {
        registry: Arc<RootRegistry>,
        engine: VerificationEngine,
    }

    fn harness() -> Harness {
        let registry = Arc::new(RootRegistry::new());
        let engine = VerificationEngine::new(
            registry.clone(),
            Arc::new(test_authenticator()),
            Arc::new(test_verifier()),
        );
        Harness { registry, engine }
    }

    fn genuine_request() -> VerificationRequest {
        let fx = fixture();
        VerificationRequest {
            proof: fx.proof_bytes.clone(),
            public_inputs: fx.public_inputs.clone(),
            tag_signature: tag_response(&test_authenticator(), TEST_UID, CHALLENGE),
            challenge: CHALLENGE.to_vec(),
            tag_uid: TEST_UID.to_string(),
        }
    }

    #[tokio::test]
    async fn test_all_checks_pass() {
        let h = harness();
        let request = genuine_request();
        h.registry.add_root(request.claimed_root(), 1).unwrap();

        let result = h.engine.verify(&request).await.unwrap();
        assert_eq!(result, VerificationResult::new(true, true, true));
        assert!(result.authentic);
    }

    #[tokio::test]
    async fn test_unknown_root() {
        let h = harness();
        let result = h.engine.verify(&genuine_request()).await.unwrap();
        assert!(!result.authentic);
        assert!(!result.root_valid);
        assert!(result.proof_valid);
        assert!(result.tag_auth_valid);
    }

    #[tokio::test]
    async fn test_root_from_other_circuit_generation() {
        let h = harness();
        let request = genuine_request();
        h.registry.add_root(request.claimed_root(), 2).unwrap();

        let result = h.engine.verify(&request).await.unwrap();
        assert!(!result.root_valid);
        assert!(!result.authentic);
    }

    #[tokio::test]
    async fn test_empty_proof() {
        let h = harness();
        let mut request = genuine_request();
        h.registry.add_root(request.claimed_root(), 1).unwrap();
        request.proof.clear();

        let result = h.engine.verify(&request).await.unwrap();
        assert!(!result.authentic);
        assert!(!result.proof_valid);
        assert!(result.tag_auth_valid);
        assert!(result.root_valid);
    }

    #[tokio::test]
    async fn test_bad_tag_signature_still_reports_others() {
        let h = harness();
        let mut request = genuine_request();
        h.registry.add_root(request.claimed_root(), 1).unwrap();
        request.tag_signature.truncate(8);

        let result = h.engine.verify(&request).await.unwrap();
        assert_eq!(result, VerificationResult::new(true, false, true));
    }

    #[tokio::test]
    async fn test_missing_public_inputs() {
        let h = harness();
        let mut request = genuine_request();
        request.public_inputs.clear();

        let result = h.engine.verify(&request).await.unwrap();
        assert!(!result.proof_valid);
        assert!(!result.root_valid);
        assert!(result.tag_auth_valid);
    }

    #[tokio::test]
    async fn test_revocation_visible_to_next_request() {
        let h = harness();
        let request = genuine_request();
        h.registry.add_root(request.claimed_root(), 1).unwrap();
        assert!(h.engine.verify(&request).await.unwrap().authentic);

        h.registry.revoke_root(request.claimed_root()).unwrap();
        assert!(!h.engine.verify(&request).await.unwrap().authentic);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_unverified() {
        let h = harness();
        let request = genuine_request();
        h.registry.add_root(request.claimed_root(), 1).unwrap();
        let engine = h.engine.clone().with_proof_timeout(Duration::ZERO);

        let result = engine.verify(&request).await.unwrap();
        assert!(!result.proof_valid);
        assert!(!result.authentic);
    }

    struct FailingStore {
        fatal: bool,
    }

    #[async_trait]
    impl RootStore for FailingStore {
        async fn lookup(&self, _root: &str) -> Result<Option<TrustedRoot>> {
            if self.fatal {
                Err(VerifierError::TrustSource("trust source unreachable".into()))
            } else {
                Err(VerifierError::RootSignature("unexpected".into()))
            }
        }
    }

    #[tokio::test]
    async fn test_fatal_store_fault_propagates() {
        let engine = VerificationEngine::new(
            Arc::new(FailingStore { fatal: true }),
            Arc::new(test_authenticator()),
            Arc::new(test_verifier()),
        );
        let err = engine.verify(&genuine_request()).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_non_fatal_store_fault_is_false() {
        let engine = VerificationEngine::new(
            Arc::new(FailingStore { fatal: false }),
            Arc::new(test_authenticator()),
            Arc::new(test_verifier()),
        );
        let result = engine.verify(&genuine_request()).await.unwrap();
        assert_eq!(result, VerificationResult::new(true, true, false));
    }
}
