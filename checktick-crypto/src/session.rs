//! Keys protecting unlock credentials held in a web session.

use crate::error::{CryptoError, CryptoResult};
use crate::key::{DerivedKey, KEY_SIZE};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

const SESSION_INFO: &[u8] = b"checktick/session-credential/v1";

/// Derives the key that seals credentials stored for `session_id`.
///
/// `server_secret`, when configured, is used as the HKDF salt so that a
/// leaked session id alone does not open stored credentials.
pub fn derive_session_key(
    session_id: &[u8],
    server_secret: Option<&[u8]>,
) -> CryptoResult<DerivedKey> {
    if session_id.is_empty() {
        return Err(CryptoError::MissingSecret("session id"));
    }
    let hk = Hkdf::<Sha256>::new(server_secret, session_id);
    let mut okm = Zeroizing::new([0u8; KEY_SIZE]);
    hk.expand(SESSION_INFO, &mut okm[..])
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(DerivedKey::from_bytes(*okm))
}
