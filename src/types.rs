//! Type definitions for the verifier service

use serde::{Deserialize, Serialize};

/// Drop a single leading `0x` from hex text
pub fn strip_hex_prefix(value: &str) -> &str {
    value.strip_prefix("0x").unwrap_or(value)
}

/// A fully decoded verification request as handed to the engine
#[derive(Debug, Clone, Default)]
pub struct VerificationRequest {
    /// Serialized Groth16 proof
    pub proof: Vec<u8>,

    /// Field elements as `0x` hex; `[0]` is the Merkle root, `[1]` the nullifier hash
    pub public_inputs: Vec<String>,

    /// Tag response to `challenge` (AES-128-CMAC, 16 bytes)
    pub tag_signature: Vec<u8>,

    /// Nonce presented to the tag
    pub challenge: Vec<u8>,

    /// Hex UID of the physical tag
    pub tag_uid: String,
}

impl VerificationRequest {
    /// The claimed Merkle root, or an empty string when absent
    pub fn claimed_root(&self) -> &str {
        self.public_inputs.first().map(String::as_str).unwrap_or("")
    }
}

/// Outcome of the three independent checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub authentic: bool,
    pub proof_valid: bool,
    pub tag_auth_valid: bool,
    pub root_valid: bool,
}

impl VerificationResult {
    pub fn new(proof_valid: bool, tag_auth_valid: bool, root_valid: bool) -> Self {
        Self {
            authentic: proof_valid && tag_auth_valid && root_valid,
            proof_valid,
            tag_auth_valid,
            root_valid,
        }
    }
}

/// A root the issuer signed, as carried in configuration and trust manifests
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SignedRoot {
    /// Merkle root as `0x` hex
    pub root: String,

    /// Circuit generation the root was issued under
    pub circuit_version: u32,

    /// 65-byte recoverable secp256k1 signature, `0x` hex
    pub signature: String,
}

/// Signed root list published by the trust source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootManifest {
    /// Address of the issuer that signed every entry
    pub issuer: String,

    #[serde(default)]
    pub roots: Vec<SignedRoot>,

    #[serde(default)]
    pub revoked: Vec<String>,
}

/// `POST /api/verify` body as received over the wire
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequestBody {
    /// Base64
    pub proof: Option<String>,
    pub public_inputs: Option<Vec<String>>,
    /// Base64
    pub tag_signature: Option<String>,
    /// Base64
    pub challenge: Option<String>,
    pub tag_uid: Option<String>,
}

/// `POST /api/verify` success body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponseBody {
    pub success: bool,

    #[serde(flatten)]
    pub result: VerificationResult,

    /// RFC 3339 time the verdict was computed
    pub timestamp: String,
}

/// Error body for every non-200 response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponseBody {
    pub success: bool,
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_hex_prefix_removes_one_prefix() {
        assert_eq!(strip_hex_prefix("0x04ab"), "04ab");
        assert_eq!(strip_hex_prefix("04ab"), "04ab");
        assert_eq!(strip_hex_prefix("0x0x04"), "0x04");
        assert_eq!(strip_hex_prefix(""), "");
    }

    #[test]
    fn test_authentic_is_conjunction() {
        for bits in 0u8..8 {
            let (p, t, r) = (bits & 1 != 0, bits & 2 != 0, bits & 4 != 0);
            let result = VerificationResult::new(p, t, r);
            assert_eq!(result.authentic, p && t && r);
            assert_eq!(
                (result.proof_valid, result.tag_auth_valid, result.root_valid),
                (p, t, r)
            );
        }
    }

    #[test]
    fn test_claimed_root_missing() {
        let request = VerificationRequest::default();
        assert_eq!(request.claimed_root(), "");
    }

    #[test]
    fn test_response_body_shape() {
        let body = VerifyResponseBody {
            success: true,
            result: VerificationResult::new(true, false, true),
            timestamp: "2026-01-01T00:00:00Z".to_string(),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["authentic"], false);
        assert_eq!(json["tagAuthValid"], false);
        assert_eq!(json["proofValid"], true);
    }
}
