//! Crypto error types.

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors raised while setting up or deriving keys.
///
/// Credential mismatches during unwrap are not errors: unwrap operations
/// return `None` instead.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("missing required secret: {0}")]
    MissingSecret(&'static str),

    #[error("organization has no master key configured")]
    MissingMasterKey,

    #[error("organization master key must be {expected} bytes, got {actual}")]
    InvalidMasterKey { expected: usize, actual: usize },

    #[error("invalid recovery phrase: {0}")]
    InvalidRecoveryPhrase(String),

    #[error("survey does not belong to the organization supplying the key")]
    OrganizationMismatch,

    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CryptoError {
    /// True for caller-side precondition failures (missing or malformed
    /// setup inputs), as opposed to internal primitive failures.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::MissingSecret(_)
                | Self::MissingMasterKey
                | Self::InvalidMasterKey { .. }
                | Self::InvalidRecoveryPhrase(_)
                | Self::OrganizationMismatch
        )
    }
}

/// Authenticated decryption failed: wrong key, tampered or truncated data,
/// or an unknown format version. Carries no detail on purpose.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("authentication failed")]
pub struct AuthFailure;
