//! Envelope encryption for CheckTick surveys.
//!
//! Each survey gets one random key-encryption key (KEK). Sensitive response
//! fields are sealed under it, and the KEK itself is only ever stored
//! wrapped:
//!
//! - **Password**: Argon2id-derived key, salt and cost carried in the blob.
//! - **Recovery phrase**: same, from a 12-word BIP39 phrase.
//! - **Federated identity**: HKDF-SHA256 over provider and subject.
//! - **Organization escrow**: the organization master key, used directly.
//!
//! All sealing uses ChaCha20-Poly1305 with a versioned blob format. Unwraps
//! return `Option` and never distinguish between a wrong secret and damaged
//! data.

pub mod cipher;
mod demographics;
mod envelope;
mod error;
mod identity;
mod key;
mod legacy;
pub mod recovery;
mod session;

pub use cipher::{open, open_with_aad, seal, seal_with_aad, FORMAT_VERSION, NONCE_SIZE, TAG_SIZE};
pub use demographics::{decrypt_demographics, encrypt_demographics, Demographics};
pub use envelope::KeyEnvelope;
pub use error::{AuthFailure, CryptoError, CryptoResult};
pub use identity::derive_identity_key;
pub use key::{
    derive_key, derive_key_from_bytes, DerivedKey, KdfParams, Kek, Salt, KEY_SIZE, SALT_SIZE,
};
pub use legacy::{hash_legacy_key, verify_legacy_key};
pub use recovery::{normalize_phrase, recovery_hint, RecoveryPhrase, PHRASE_WORDS};
pub use session::derive_session_key;
