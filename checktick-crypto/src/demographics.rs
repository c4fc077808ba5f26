//! Encryption of respondent demographics under the survey KEK.

use crate::cipher::{open_with_aad, seal_with_aad};
use crate::error::CryptoResult;
use crate::key::Kek;
use checktick_types::Blob;
use std::collections::BTreeMap;
use zeroize::Zeroizing;

const DEMOGRAPHICS_AAD: &[u8] = b"demographics";

/// Demographic fields keyed by name. `BTreeMap` keeps the JSON encoding
/// canonical (sorted keys).
pub type Demographics = BTreeMap<String, String>;

/// Serializes and seals demographics under `kek`.
pub fn encrypt_demographics(kek: &Kek, demographics: &Demographics) -> CryptoResult<Blob> {
    let json = Zeroizing::new(serde_json::to_vec(demographics)?);
    seal_with_aad(kek.as_bytes(), &json, DEMOGRAPHICS_AAD)
}

/// Opens demographics sealed by [`encrypt_demographics`].
///
/// Returns `None` for a wrong key, tampering, or a payload that is not a
/// string map.
pub fn decrypt_demographics(kek: &Kek, blob: &Blob) -> Option<Demographics> {
    let plaintext = open_with_aad(kek.as_bytes(), blob.as_bytes(), DEMOGRAPHICS_AAD).ok()?;
    serde_json::from_slice(&plaintext).ok()
}
