//! Key derivation from a federated identity.
//!
//! The inputs are not secret, so this is a fast HKDF rather than a
//! password hash. What protects the wrap is that only a session
//! authenticated as that exact identity can present the inputs.

use crate::error::{CryptoError, CryptoResult};
use crate::key::{DerivedKey, KEY_SIZE};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

const IDENTITY_INFO: &[u8] = b"checktick/identity-kek/v1";

/// Derives the identity wrapping key for `(provider, subject, salt)`.
///
/// Provider and subject are length-prefixed before hashing so that
/// `("ab", "c")` and `("a", "bc")` never collide.
pub fn derive_identity_key(
    provider: &str,
    subject: &str,
    salt: &[u8; 32],
) -> CryptoResult<DerivedKey> {
    if provider.is_empty() {
        return Err(CryptoError::MissingSecret("identity provider"));
    }
    if subject.is_empty() {
        return Err(CryptoError::MissingSecret("identity subject"));
    }

    let mut ikm = Zeroizing::new(Vec::with_capacity(8 + provider.len() + subject.len()));
    ikm.extend_from_slice(&(provider.len() as u32).to_be_bytes());
    ikm.extend_from_slice(provider.as_bytes());
    ikm.extend_from_slice(&(subject.len() as u32).to_be_bytes());
    ikm.extend_from_slice(subject.as_bytes());

    let hk = Hkdf::<Sha256>::new(Some(&salt[..]), &ikm);
    let mut okm = Zeroizing::new([0u8; KEY_SIZE]);
    hk.expand(IDENTITY_INFO, &mut okm[..])
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    Ok(DerivedKey::from_bytes(*okm))
}
