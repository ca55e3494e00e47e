//! NFC tag challenge-response authentication
//!
//! Each tag holds a key diversified from the master key with NXP AN10922
//! (AES-128), the scheme NTAG424 DNA and DESFire EV3 personalisation uses.
//! A tag proves possession of its key by returning AES-128-CMAC(key, challenge).

use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use aes::Aes128;
use cmac::{Cmac, Mac};
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::error::{Result, VerifierError};
use crate::types::strip_hex_prefix;

/// AES-128-CMAC output width
pub const MAC_LEN: usize = 16;

/// AES-128 key width
pub const KEY_LEN: usize = 16;

/// Longest diversification input AN10922 allows for AES-128
const MAX_DIVERSIFICATION_INPUT: usize = 31;

const DIV_CONSTANT_AES128: u8 = 0x01;

/// Doubling in GF(2^128) used for CMAC subkeys
fn dbl(block: &[u8; 16]) -> [u8; 16] {
    let mut out = [0u8; 16];
    let mut carry = 0u8;
    for i in (0..16).rev() {
        out[i] = (block[i] << 1) | carry;
        carry = block[i] >> 7;
    }
    if carry != 0 {
        out[15] ^= 0x87;
    }
    out
}

/// AN10922 AES-128 key diversification of `input` (`UID || AID || SystemIdentifier`)
pub fn diversify_key(master_key: &[u8; KEY_LEN], input: &[u8]) -> Option<[u8; KEY_LEN]> {
    if input.is_empty() || input.len() > MAX_DIVERSIFICATION_INPUT {
        return None;
    }

    let cipher = Aes128::new(GenericArray::from_slice(master_key));

    let mut l = GenericArray::clone_from_slice(&[0u8; 16]);
    cipher.encrypt_block(&mut l);
    let mut l_bytes = [0u8; 16];
    l_bytes.copy_from_slice(&l);
    let k1 = dbl(&l_bytes);
    let k2 = dbl(&k1);

    // D = 0x01 || M, always processed as two blocks
    let mut data = [0u8; 32];
    data[0] = DIV_CONSTANT_AES128;
    data[1..=input.len()].copy_from_slice(input);
    let padded = input.len() + 1 < data.len();
    if padded {
        data[input.len() + 1] = 0x80;
    }

    let last_key = if padded { k2 } else { k1 };
    for (byte, key) in data[16..].iter_mut().zip(last_key.iter()) {
        *byte ^= key;
    }

    let mut block = GenericArray::clone_from_slice(&data[..16]);
    cipher.encrypt_block(&mut block);
    for (byte, next) in block.iter_mut().zip(data[16..].iter()) {
        *byte ^= next;
    }
    cipher.encrypt_block(&mut block);

    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&block);
    Some(key)
}

/// AES-128-CMAC of `challenge` under `key`
pub fn compute_response(key: &[u8; KEY_LEN], challenge: &[u8]) -> Result<[u8; MAC_LEN]> {
    let mut mac = <Cmac<Aes128> as Mac>::new_from_slice(key)
        .map_err(|e| VerifierError::Config(format!("Invalid CMAC key: {}", e)))?;
    mac.update(challenge);

    let mut out = [0u8; MAC_LEN];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// Decode a tag UID written as hex, optionally `0x`-prefixed or `:`-separated
fn decode_uid(tag_uid: &str) -> Option<Vec<u8>> {
    let cleaned: String = strip_hex_prefix(tag_uid.trim())
        .chars()
        .filter(|c| *c != ':')
        .collect();
    let uid = hex::decode(cleaned).ok()?;
    // ISO 14443 single, double and triple size UIDs
    if !(4..=10).contains(&uid.len()) {
        return None;
    }
    Some(uid)
}

/// Verifies tag responses against keys diversified from one master key
pub struct TagAuthenticator {
    master_key: [u8; KEY_LEN],
    application_id: Vec<u8>,
    system_identifier: Vec<u8>,
}

impl std::fmt::Debug for TagAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagAuthenticator")
            .field("application_id", &hex::encode(&self.application_id))
            .field("system_identifier", &hex::encode(&self.system_identifier))
            .finish_non_exhaustive()
    }
}

impl TagAuthenticator {
    pub fn new(
        master_key: [u8; KEY_LEN],
        application_id: Vec<u8>,
        system_identifier: Vec<u8>,
    ) -> Result<Self> {
        // Room for the shortest UID
        if application_id.len() + system_identifier.len() + 4 > MAX_DIVERSIFICATION_INPUT {
            return Err(VerifierError::Config(
                "Application ID and system identifier leave no room for the tag UID".to_string(),
            ));
        }
        Ok(Self {
            master_key,
            application_id,
            system_identifier,
        })
    }

    /// Build from the hex strings carried in configuration
    pub fn from_hex(
        master_key: &str,
        application_id: &str,
        system_identifier: &str,
    ) -> Result<Self> {
        let key_bytes = hex::decode(strip_hex_prefix(master_key))?;
        let master_key: [u8; KEY_LEN] = key_bytes.as_slice().try_into().map_err(|_| {
            VerifierError::Config(format!(
                "Tag master key must be {} bytes, got {}",
                KEY_LEN,
                key_bytes.len()
            ))
        })?;
        Self::new(
            master_key,
            hex::decode(strip_hex_prefix(application_id))?,
            hex::decode(strip_hex_prefix(system_identifier))?,
        )
    }

    /// Per-tag key for `tag_uid`
    pub fn tag_key(&self, tag_uid: &str) -> Option<[u8; KEY_LEN]> {
        let uid = decode_uid(tag_uid)?;
        let mut input = Vec::with_capacity(
            uid.len() + self.application_id.len() + self.system_identifier.len(),
        );
        input.extend_from_slice(&uid);
        input.extend_from_slice(&self.application_id);
        input.extend_from_slice(&self.system_identifier);
        diversify_key(&self.master_key, &input)
    }

    /// Check a tag's response to `challenge`.
    ///
    /// Every failure, including malformed input, is reported as `false`.
    pub fn verify_tag_auth(&self, tag_uid: &str, challenge: &[u8], signature: &[u8]) -> bool {
        if tag_uid.is_empty() || challenge.is_empty() || signature.len() != MAC_LEN {
            debug!("Tag auth rejected: malformed input");
            return false;
        }

        let Some(key) = self.tag_key(tag_uid) else {
            debug!("Tag auth rejected: unusable tag UID");
            return false;
        };

        let expected = match compute_response(&key, challenge) {
            Ok(mac) => mac,
            Err(_) => return false,
        };

        bool::from(expected.as_slice().ct_eq(signature))
    }
}
