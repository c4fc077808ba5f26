//! Envelope encryption of survey KEKs.
//!
//! One random KEK per survey, wrapped independently under up to four
//! secrets: a password, a recovery phrase, a federated identity and an
//! organization escrow key. Each wrap can be opened without knowledge of
//! the others.
//!
//! Passphrase wraps are framed so they carry their own salt and Argon2id
//! parameters:
//!
//! ```text
//! frame (1) || memory_kib (4, LE) || iterations (4, LE) || parallelism (4, LE)
//!           || salt (16) || sealed KEK (cipher format)
//! ```
//!
//! Identity and organization wraps are plain sealed blobs.

use crate::cipher::{open_with_aad, seal_with_aad};
use crate::error::{CryptoError, CryptoResult};
use crate::identity::derive_identity_key;
use crate::key::{derive_key, KdfParams, Kek, Salt, KEY_SIZE, SALT_SIZE};
use crate::recovery::{normalize_phrase, RecoveryPhrase};
use checktick_types::{Blob, FederatedIdentity, Organization, Survey};
use zeroize::Zeroizing;

const PASSPHRASE_FRAME_V1: u8 = 1;
const PASSPHRASE_HEADER_LEN: usize = 1 + 4 + 4 + 4 + SALT_SIZE;

// Per-method associated data, so a wrap made for one path never opens
// through another even when the derived keys happen to coincide.
const AAD_PASSWORD: &[u8] = b"kek:password";
const AAD_RECOVERY: &[u8] = b"kek:recovery";
const AAD_IDENTITY: &[u8] = b"kek:identity";
const AAD_ORGANIZATION: &[u8] = b"kek:organization";

/// Wraps and unwraps survey KEKs.
#[derive(Clone, Debug, Default)]
pub struct KeyEnvelope {
    params: KdfParams,
}

impl KeyEnvelope {
    /// Creates an envelope that derives new passphrase wraps with `params`.
    /// Unwrapping always uses the parameters recorded in the blob.
    pub fn new(params: KdfParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &KdfParams {
        &self.params
    }

    /// Generates a fresh random KEK.
    pub fn generate_kek() -> Kek {
        Kek::generate()
    }

    /// True iff the survey has at least one wrapped KEK.
    pub fn has_any_wrap(survey: &Survey) -> bool {
        survey.wrapped.has_any()
    }

    // ── Password ──

    pub fn wrap_with_password(&self, kek: &Kek, password: &str) -> CryptoResult<Blob> {
        if password.is_empty() {
            return Err(CryptoError::MissingSecret("password"));
        }
        self.seal_with_passphrase(kek, password, AAD_PASSWORD)
    }

    /// Returns `None` on a wrong password or a damaged blob.
    pub fn unwrap_with_password(&self, wrapped: &Blob, password: &str) -> Option<Kek> {
        if password.is_empty() {
            return None;
        }
        open_with_passphrase(wrapped, password, AAD_PASSWORD)
    }

    // ── Recovery phrase ──

    /// Wraps under the phrase and returns the `first...last` hint to store.
    pub fn wrap_with_recovery_phrase(
        &self,
        kek: &Kek,
        phrase: &RecoveryPhrase,
    ) -> CryptoResult<(Blob, String)> {
        let secret = phrase.expose();
        let wrapped = self.seal_with_passphrase(kek, &secret, AAD_RECOVERY)?;
        Ok((wrapped, phrase.hint()))
    }

    /// Unwraps with a phrase as typed by the user. Case and whitespace are
    /// normalized before derivation.
    pub fn unwrap_with_recovery_phrase(&self, wrapped: &Blob, phrase: &str) -> Option<Kek> {
        let normalized = normalize_phrase(phrase);
        if normalized.is_empty() {
            return None;
        }
        open_with_passphrase(wrapped, &normalized, AAD_RECOVERY)
    }

    // ── Federated identity ──

    pub fn wrap_with_identity(&self, kek: &Kek, identity: &FederatedIdentity) -> CryptoResult<Blob> {
        let key = derive_identity_key(
            &identity.provider,
            &identity.subject,
            &identity.derivation_salt,
        )?;
        seal_with_aad(key.as_bytes(), kek.as_bytes(), AAD_IDENTITY)
    }

    pub fn unwrap_with_identity(&self, wrapped: &Blob, identity: &FederatedIdentity) -> Option<Kek> {
        let key = derive_identity_key(
            &identity.provider,
            &identity.subject,
            &identity.derivation_salt,
        )
        .ok()?;
        let plaintext = open_with_aad(key.as_bytes(), wrapped.as_bytes(), AAD_IDENTITY).ok()?;
        Kek::from_slice(&plaintext).ok()
    }

    // ── Organization escrow ──

    /// Wraps under the organization's master key, used directly.
    pub fn wrap_with_org_key(&self, kek: &Kek, organization: &Organization) -> CryptoResult<Blob> {
        let master = organization
            .master_key
            .as_ref()
            .ok_or(CryptoError::MissingMasterKey)?;
        let master = master_key_bytes(master)?;
        seal_with_aad(&master, kek.as_bytes(), AAD_ORGANIZATION)
    }

    /// Administrative recovery through the organization escrow key.
    ///
    /// The survey must belong to `organization`; otherwise this returns
    /// `Err(OrganizationMismatch)` without touching any key material.
    /// `Ok(None)` covers a missing wrap, a missing or malformed master key,
    /// and authentication failure.
    pub fn unwrap_with_org_key(
        &self,
        survey: &Survey,
        organization: &Organization,
    ) -> CryptoResult<Option<Kek>> {
        if !survey.belongs_to(&organization.id) {
            return Err(CryptoError::OrganizationMismatch);
        }
        let Some(wrapped) = survey.wrapped.organization.as_ref() else {
            return Ok(None);
        };
        let Some(master) = organization.master_key.as_ref() else {
            return Ok(None);
        };
        let Ok(master) = master_key_bytes(master) else {
            return Ok(None);
        };

        Ok(open_with_aad(&master, wrapped.as_bytes(), AAD_ORGANIZATION)
            .ok()
            .and_then(|plain| Kek::from_slice(&plain).ok()))
    }

    fn seal_with_passphrase(&self, kek: &Kek, secret: &str, aad: &[u8]) -> CryptoResult<Blob> {
        let salt = Salt::random();
        let key = derive_key(secret, salt.as_bytes(), &self.params)?;
        let sealed = seal_with_aad(key.as_bytes(), kek.as_bytes(), aad)?;

        let mut framed = Vec::with_capacity(PASSPHRASE_HEADER_LEN + sealed.len());
        framed.push(PASSPHRASE_FRAME_V1);
        framed.extend_from_slice(&self.params.memory_kib.to_le_bytes());
        framed.extend_from_slice(&self.params.iterations.to_le_bytes());
        framed.extend_from_slice(&self.params.parallelism.to_le_bytes());
        framed.extend_from_slice(salt.as_bytes());
        framed.extend_from_slice(sealed.as_bytes());
        Ok(Blob::new(framed))
    }
}

fn open_with_passphrase(wrapped: &Blob, secret: &str, aad: &[u8]) -> Option<Kek> {
    let (params, salt, sealed) = parse_passphrase_frame(wrapped.as_bytes())?;
    let key = derive_key(secret, salt.as_bytes(), &params).ok()?;
    let plaintext = open_with_aad(key.as_bytes(), sealed, aad).ok()?;
    Kek::from_slice(&plaintext).ok()
}

fn parse_passphrase_frame(bytes: &[u8]) -> Option<(KdfParams, Salt, &[u8])> {
    if bytes.len() < PASSPHRASE_HEADER_LEN || bytes[0] != PASSPHRASE_FRAME_V1 {
        return None;
    }
    let read_u32 = |at: usize| -> Option<u32> {
        bytes
            .get(at..at + 4)
            .and_then(|s| s.try_into().ok())
            .map(u32::from_le_bytes)
    };
    let params = KdfParams {
        memory_kib: read_u32(1)?,
        iterations: read_u32(5)?,
        parallelism: read_u32(9)?,
    };
    if !params.is_within_limits() {
        return None;
    }

    let salt: [u8; SALT_SIZE] = bytes[13..PASSPHRASE_HEADER_LEN].try_into().ok()?;
    Some((params, Salt::from_bytes(salt), &bytes[PASSPHRASE_HEADER_LEN..]))
}

fn master_key_bytes(master: &Blob) -> CryptoResult<Zeroizing<[u8; KEY_SIZE]>> {
    let bytes: [u8; KEY_SIZE] =
        master
            .as_bytes()
            .try_into()
            .map_err(|_| CryptoError::InvalidMasterKey {
                expected: KEY_SIZE,
                actual: master.len(),
            })?;
    Ok(Zeroizing::new(bytes))
}
