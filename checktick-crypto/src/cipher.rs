//! ChaCha20-Poly1305 authenticated encryption with a versioned blob format.
//!
//! Every sealed value is laid out as
//! `version (1) || nonce (12) || ciphertext || tag (16)`.
//! The version byte is authenticated as associated data, so a blob cannot be
//! relabelled to a different format without failing the tag check.

use crate::error::{AuthFailure, CryptoError, CryptoResult};
use crate::key::KEY_SIZE;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use checktick_types::Blob;
use rand::RngCore;
use zeroize::Zeroizing;

/// Current blob format: ChaCha20-Poly1305, 96-bit random nonce.
pub const FORMAT_VERSION: u8 = 1;

pub const NONCE_SIZE: usize = 12;

pub const TAG_SIZE: usize = 16;

/// Smallest well-formed blob (empty plaintext).
pub const MIN_SEALED_LEN: usize = 1 + NONCE_SIZE + TAG_SIZE;

/// Encrypts `plaintext` under `key` with a fresh random nonce.
pub fn seal(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> CryptoResult<Blob> {
    seal_with_aad(key, plaintext, &[])
}

/// Encrypts `plaintext`, additionally authenticating `aad`.
///
/// The same `aad` must be presented to [`open_with_aad`].
pub fn seal_with_aad(key: &[u8; KEY_SIZE], plaintext: &[u8], aad: &[u8]) -> CryptoResult<Blob> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));

    let mut nonce = [0u8; NONCE_SIZE];
    rand::rng().fill_bytes(&mut nonce);

    let associated = associated_data(FORMAT_VERSION, aad);
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: &associated,
            },
        )
        .map_err(|e| CryptoError::Encryption(format!("seal failed: {e}")))?;

    let mut out = Vec::with_capacity(1 + NONCE_SIZE + ciphertext.len());
    out.push(FORMAT_VERSION);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(Blob::new(out))
}

/// Decrypts a blob produced by [`seal`].
pub fn open(key: &[u8; KEY_SIZE], sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>, AuthFailure> {
    open_with_aad(key, sealed, &[])
}

/// Decrypts a blob produced by [`seal_with_aad`] with the same `aad`.
///
/// Fails closed on a wrong key, any modified byte, truncation, or an
/// unknown version.
pub fn open_with_aad(
    key: &[u8; KEY_SIZE],
    sealed: &[u8],
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>, AuthFailure> {
    if sealed.len() < MIN_SEALED_LEN {
        return Err(AuthFailure);
    }
    let version = sealed[0];
    if version != FORMAT_VERSION {
        return Err(AuthFailure);
    }

    let (nonce, ciphertext) = sealed[1..].split_at(NONCE_SIZE);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let associated = associated_data(version, aad);

    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad: &associated,
            },
        )
        .map(Zeroizing::new)
        .map_err(|_| AuthFailure)
}

fn associated_data(version: u8, aad: &[u8]) -> Vec<u8> {
    let mut associated = Vec::with_capacity(1 + aad.len());
    associated.push(version);
    associated.extend_from_slice(aad);
    associated
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; KEY_SIZE] = [7u8; KEY_SIZE];

    #[test]
    fn layout_matches_declared_format() {
        let blob = seal(&KEY, b"abc").unwrap();
        assert_eq!(blob.as_bytes()[0], FORMAT_VERSION);
        assert_eq!(blob.len(), 1 + NONCE_SIZE + 3 + TAG_SIZE);
    }

    #[test]
    fn round_trip() {
        let blob = seal(&KEY, b"payload").unwrap();
        let plain = open(&KEY, blob.as_bytes()).unwrap();
        assert_eq!(plain.as_slice(), b"payload");
    }

    #[test]
    fn empty_plaintext_round_trips() {
        let blob = seal(&KEY, b"").unwrap();
        assert_eq!(blob.len(), MIN_SEALED_LEN);
        assert!(open(&KEY, blob.as_bytes()).unwrap().is_empty());
    }

    #[test]
    fn nonces_are_fresh() {
        let a = seal(&KEY, b"same").unwrap();
        let b = seal(&KEY, b"same").unwrap();
        assert_ne!(a.as_bytes()[1..1 + NONCE_SIZE], b.as_bytes()[1..1 + NONCE_SIZE]);
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails() {
        let blob = seal(&KEY, b"payload").unwrap();
        assert!(matches!(
            open(&[8u8; KEY_SIZE], blob.as_bytes()),
            Err(AuthFailure)
        ));
    }

    #[test]
    fn aad_mismatch_fails() {
        let blob = seal_with_aad(&KEY, b"payload", b"survey-a").unwrap();
        assert!(open_with_aad(&KEY, blob.as_bytes(), b"survey-b").is_err());
        assert!(open(&KEY, blob.as_bytes()).is_err());
        assert!(open_with_aad(&KEY, blob.as_bytes(), b"survey-a").is_ok());
    }

    #[test]
    fn every_byte_flip_is_detected() {
        let blob = seal(&KEY, b"integrity").unwrap();
        for i in 0..blob.len() {
            let mut tampered = blob.to_storage();
            tampered[i] ^= 0x01;
            assert!(open(&KEY, &tampered).is_err(), "flip at {i} not detected");
        }
    }

    #[test]
    fn truncation_is_detected() {
        let blob = seal(&KEY, b"integrity").unwrap();
        for len in 0..blob.len() {
            assert!(open(&KEY, &blob.as_bytes()[..len]).is_err());
        }
    }

    #[test]
    fn unknown_version_is_rejected() {
        let mut bytes = seal(&KEY, b"v").unwrap().into_bytes();
        bytes[0] = 2;
        assert!(open(&KEY, &bytes).is_err());
    }
}
