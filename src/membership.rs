//! Groth16 (BN254) verification of Merkle membership proofs
//!
//! The circuit proves that a secret leaf hashes to the public nullifier hash
//! and sits in the Merkle tree with the public root. Its verifying key is
//! loaded once, prepared, and shared read-only for the life of the process.

use ark_bn254::{Bn254, Fr};
use ark_ff::{BigInteger, PrimeField};
use ark_groth16::{prepare_verifying_key, Groth16, PreparedVerifyingKey, Proof, VerifyingKey};
use ark_serialize::CanonicalDeserialize;
use sha3::{Digest, Keccak256};
use std::path::Path;
use tracing::{debug, error, info};

use crate::error::{Result, VerifierError};
use crate::types::strip_hex_prefix;

/// Compressed Groth16 proof on BN254: A (G1, 32) + B (G2, 64) + C (G1, 32)
pub const PROOF_LEN: usize = 32 + 64 + 32;

/// Root and nullifier hash
pub const MIN_PUBLIC_INPUTS: usize = 2;

/// Hex digits in a 256-bit field element
const MAX_FIELD_HEX_DIGITS: usize = 64;

/// Parse a `0x`-prefixed big-endian field element, rejecting non-canonical values
pub fn parse_field_element(value: &str) -> Option<Fr> {
    let digits = value.strip_prefix("0x")?;
    if digits.is_empty() || digits.len() > MAX_FIELD_HEX_DIGITS {
        return None;
    }

    let mut padded = String::with_capacity(MAX_FIELD_HEX_DIGITS);
    for _ in digits.len()..MAX_FIELD_HEX_DIGITS {
        padded.push('0');
    }
    padded.push_str(digits);
    let bytes = hex::decode(&padded).ok()?;

    let element = Fr::from_be_bytes_mod_order(&bytes);
    // Values >= r would wrap; only accept their canonical form
    if element.into_bigint().to_bytes_be() != bytes {
        return None;
    }
    Some(element)
}

/// `0x` hex of a field element, as found in public inputs
pub fn field_element_hex(element: &Fr) -> String {
    format!("0x{}", hex::encode(element.into_bigint().to_bytes_be()))
}

/// Verifying key bound to one compiled circuit generation
pub struct MembershipVerifier {
    pvk: PreparedVerifyingKey<Bn254>,
    circuit_version: u32,
    fingerprint: [u8; 32],
    public_input_count: usize,
}

impl std::fmt::Debug for MembershipVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MembershipVerifier")
            .field("circuit_version", &self.circuit_version)
            .field("fingerprint", &hex::encode(self.fingerprint))
            .field("public_input_count", &self.public_input_count)
            .finish()
    }
}

impl MembershipVerifier {
    /// Load a compressed arkworks verifying key.
    ///
    /// When `expected_fingerprint` is given, the Keccak-256 of the key bytes
    /// must match it, pinning the deployment to one circuit build.
    pub fn from_bytes(
        vk_bytes: &[u8],
        circuit_version: u32,
        expected_fingerprint: Option<&str>,
    ) -> Result<Self> {
        let fingerprint: [u8; 32] = Keccak256::digest(vk_bytes).into();

        // An empty pin means no pin
        let expected_fingerprint = expected_fingerprint.filter(|f| !f.trim().is_empty());
        if let Some(expected) = expected_fingerprint {
            let expected = strip_hex_prefix(expected.trim()).to_lowercase();
            if expected != hex::encode(fingerprint) {
                return Err(VerifierError::VerificationKey(format!(
                    "Fingerprint mismatch: expected {}, got {}",
                    expected,
                    hex::encode(fingerprint)
                )));
            }
        }

        let vk = VerifyingKey::<Bn254>::deserialize_compressed(vk_bytes)
            .map_err(|e| VerifierError::VerificationKey(format!("Failed to deserialize: {}", e)))?;

        let public_input_count = vk.gamma_abc_g1.len().saturating_sub(1);
        if public_input_count < MIN_PUBLIC_INPUTS {
            return Err(VerifierError::VerificationKey(format!(
                "Circuit exposes {} public inputs, at least {} required",
                public_input_count, MIN_PUBLIC_INPUTS
            )));
        }

        info!(
            "Loaded verification key: circuit v{}, {} public inputs, fingerprint 0x{}",
            circuit_version,
            public_input_count,
            hex::encode(fingerprint)
        );

        Ok(Self {
            pvk: prepare_verifying_key(&vk),
            circuit_version,
            fingerprint,
            public_input_count,
        })
    }

    /// Load the verifying key from disk
    pub fn load(
        path: impl AsRef<Path>,
        circuit_version: u32,
        expected_fingerprint: Option<&str>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            VerifierError::VerificationKey(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_bytes(&bytes, circuit_version, expected_fingerprint)
    }

    pub fn circuit_version(&self) -> u32 {
        self.circuit_version
    }

    pub fn fingerprint(&self) -> [u8; 32] {
        self.fingerprint
    }

    pub fn public_input_count(&self) -> usize {
        self.public_input_count
    }

    /// Decode and bound-check a proof and its public inputs.
    ///
    /// `None` means the request is malformed and must not reach the pairing check.
    fn decode(&self, proof: &[u8], public_inputs: &[String]) -> Option<(Proof<Bn254>, Vec<Fr>)> {
        if proof.len() != PROOF_LEN {
            return None;
        }
        if public_inputs.len() < MIN_PUBLIC_INPUTS
            || public_inputs.len() != self.public_input_count
        {
            return None;
        }

        let inputs = public_inputs
            .iter()
            .map(|value| parse_field_element(value))
            .collect::<Option<Vec<_>>>()?;

        // Curve and subgroup checks happen here
        let proof = Proof::<Bn254>::deserialize_compressed(proof).ok()?;

        Some((proof, inputs))
    }

    /// Verify a membership proof.
    ///
    /// Malformed input yields `Ok(false)` without running the verifier. An
    /// error from the pairing check itself is a deployment fault and is
    /// returned as `Err`.
    pub fn verify_membership_proof(&self, proof: &[u8], public_inputs: &[String]) -> Result<bool> {
        let Some((proof, inputs)) = self.decode(proof, public_inputs) else {
            debug!("Membership proof rejected: malformed input");
            return Ok(false);
        };

        match Groth16::<Bn254>::verify_proof(&self.pvk, &proof, &inputs) {
            Ok(valid) => Ok(valid),
            Err(e) => {
                error!("Groth16 verifier fault: {}", e);
                Err(VerifierError::ProofSystem(e.to_string()))
            }
        }
    }
}
