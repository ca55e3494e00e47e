//! Issuer signatures over Merkle roots (secp256k1 ECDSA, Keccak-256)

use alloy_primitives::Address;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use sha3::{Digest, Keccak256};

use crate::error::{Result, VerifierError};
use crate::types::strip_hex_prefix;

const ROOT_DOMAIN: &[u8] = b"\x19Authenticity Root:\n";

/// Hash an issuer signs for a given root and circuit generation
pub fn root_signing_hash(root: &str, circuit_version: u32) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(ROOT_DOMAIN);
    hasher.update(circuit_version.to_be_bytes());
    hasher.update(root.as_bytes());
    hasher.finalize().into()
}

/// Ethereum-style address of a secp256k1 public key
fn address_of(key: &VerifyingKey) -> Address {
    let encoded = key.to_encoded_point(false);
    let hash = Keccak256::digest(&encoded.as_bytes()[1..]); // Skip the 0x04 prefix
    Address::from_slice(&hash[12..])
}

/// Parse a `0x`-prefixed issuer address
pub fn parse_address(address: &str) -> Result<Address> {
    address
        .parse::<Address>()
        .map_err(|e| VerifierError::Config(format!("Invalid issuer address {}: {}", address, e)))
}

/// Checks that roots were signed by the configured issuer
#[derive(Debug, Clone, Copy)]
pub struct IssuerVerifier {
    issuer: Address,
}

impl IssuerVerifier {
    pub fn new(issuer: Address) -> Self {
        Self { issuer }
    }

    pub fn from_hex(address: &str) -> Result<Self> {
        Ok(Self::new(parse_address(address)?))
    }

    pub fn issuer(&self) -> Address {
        self.issuer
    }

    /// Verify a 65-byte `r || s || v` signature over `root`
    pub fn verify(&self, root: &str, circuit_version: u32, signature_hex: &str) -> Result<()> {
        let signature_bytes = hex::decode(strip_hex_prefix(signature_hex))
            .map_err(|e| VerifierError::RootSignature(format!("Invalid signature hex: {}", e)))?;

        if signature_bytes.len() != 65 {
            return Err(VerifierError::RootSignature(format!(
                "Expected 65 signature bytes, got {}",
                signature_bytes.len()
            )));
        }

        let signature = Signature::from_slice(&signature_bytes[..64])
            .map_err(|e| VerifierError::RootSignature(format!("Invalid signature: {}", e)))?;

        // Accept both Ethereum (27/28) and raw (0/1) recovery bytes
        let v = signature_bytes[64];
        let v = if v >= 27 { v - 27 } else { v };
        let recovery_id = RecoveryId::from_byte(v)
            .ok_or_else(|| VerifierError::RootSignature(format!("Invalid recovery id {}", v)))?;

        let hash = root_signing_hash(root, circuit_version);
        let recovered = VerifyingKey::recover_from_prehash(&hash, &signature, recovery_id)
            .map_err(|e| VerifierError::RootSignature(format!("Recovery failed: {}", e)))?;

        let signer = address_of(&recovered);
        if signer != self.issuer {
            return Err(VerifierError::RootSignature(format!(
                "Root signed by {}, expected issuer {}",
                signer, self.issuer
            )));
        }

        Ok(())
    }
}

/// Issuer-side signer, used by tooling that publishes root manifests
pub struct RootSigner {
    signing_key: SigningKey,
    address: Address,
}

impl RootSigner {
    /// Create a new signer from private key hex
    pub fn new(private_key_hex: &str) -> Result<Self> {
        let private_key_bytes = hex::decode(strip_hex_prefix(private_key_hex))
            .map_err(|e| VerifierError::RootSignature(format!("Invalid private key hex: {}", e)))?;

        let signing_key = SigningKey::from_slice(&private_key_bytes)
            .map_err(|e| VerifierError::RootSignature(format!("Invalid private key: {}", e)))?;

        let address = address_of(signing_key.verifying_key());

        Ok(Self { signing_key, address })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Sign a root, returning `0x` + 65 bytes with `v = 27 | 28`
    pub fn sign_root(&self, root: &str, circuit_version: u32) -> Result<String> {
        let hash = root_signing_hash(root, circuit_version);

        let (signature, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(&hash)
            .map_err(|e| VerifierError::RootSignature(format!("Failed to sign: {}", e)))?;

        let mut bytes = Vec::with_capacity(65);
        bytes.extend_from_slice(&signature.to_bytes());
        bytes.push(27 + recovery_id.to_byte());

        Ok(format!("0x{}", hex::encode(bytes)))
    }
}
