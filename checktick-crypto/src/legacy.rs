//! Verification of bare possession keys from the pre-envelope scheme.
//!
//! Older surveys were unlocked by presenting the raw survey key; only a
//! salted hash of it was stored. New setups keep writing the hash of the
//! KEK so the legacy unlock keeps working.
//!
//! The stored hash blob is `memory_kib || iterations || parallelism`
//! (little-endian `u32` each) followed by the 32-byte Argon2id digest.

use crate::error::CryptoResult;
use crate::key::{derive_key_from_bytes, KdfParams, Salt, KEY_SIZE};
use checktick_types::{Blob, LegacyKeyHash};
use subtle::ConstantTimeEq;

const PARAMS_LEN: usize = 12;

/// Hashes `key` under a fresh salt.
pub fn hash_legacy_key(key: &[u8], params: &KdfParams) -> CryptoResult<LegacyKeyHash> {
    let salt = Salt::random();
    let digest = derive_key_from_bytes(key, salt.as_bytes(), params)?;

    let mut hash = Vec::with_capacity(PARAMS_LEN + KEY_SIZE);
    hash.extend_from_slice(&params.memory_kib.to_le_bytes());
    hash.extend_from_slice(&params.iterations.to_le_bytes());
    hash.extend_from_slice(&params.parallelism.to_le_bytes());
    hash.extend_from_slice(digest.as_bytes());

    Ok(LegacyKeyHash {
        hash: Blob::new(hash),
        salt: Blob::new(salt.as_bytes().to_vec()),
    })
}

/// Checks `key` against a stored hash in constant time.
///
/// Malformed records and out-of-range parameters verify as `false`.
pub fn verify_legacy_key(key: &[u8], stored: &LegacyKeyHash) -> bool {
    if key.is_empty() {
        return false;
    }
    let bytes = stored.hash.as_bytes();
    if bytes.len() != PARAMS_LEN + KEY_SIZE {
        return false;
    }
    let field = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
    let params = KdfParams {
        memory_kib: field(0),
        iterations: field(4),
        parallelism: field(8),
    };
    if !params.is_within_limits() {
        return false;
    }

    match derive_key_from_bytes(key, stored.salt.as_bytes(), &params) {
        Ok(candidate) => candidate.as_bytes().ct_eq(&bytes[PARAMS_LEN..]).into(),
        Err(_) => false,
    }
}
