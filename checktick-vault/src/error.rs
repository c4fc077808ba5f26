//! Vault error types.

use checktick_crypto::CryptoError;
use checktick_storage::StorageError;
use checktick_types::SurveyId;
use thiserror::Error;

/// Errors surfaced to callers of [`SurveyVault`](crate::SurveyVault).
///
/// For a survey that exists, a failed unlock always maps to
/// [`VaultError::InvalidCredentials`], whether the secret was wrong or the
/// method has no wrap. An unknown survey id is reported as
/// [`VaultError::NotFound`].
#[derive(Debug, Error)]
pub enum VaultError {
    #[error(transparent)]
    Precondition(#[from] CryptoError),

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("password too short (min {min} characters)")]
    PasswordTooShort { min: usize },

    #[error("encryption setup must request at least one unlock method")]
    NoUnlockMethod,

    #[error("user has no linked federated identity")]
    NoFederatedIdentity,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("survey is not owned by the organization")]
    NotInOrganization,

    #[error("survey {0} was re-keyed concurrently")]
    Conflict(SurveyId),

    /// The audit entry for an organization recovery could not be written,
    /// so the recovery was abandoned.
    #[error("audit log write failed: {0}")]
    Audit(String),

    #[error("storage error: {0}")]
    Storage(StorageError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl VaultError {
    pub(crate) fn from_storage(survey_id: &SurveyId, err: StorageError) -> Self {
        match err {
            StorageError::Conflict { .. } => Self::Conflict(*survey_id),
            StorageError::NotFound(what) => Self::NotFound(what),
            other => Self::Storage(other),
        }
    }
}

impl From<StorageError> for VaultError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(what) => Self::NotFound(what),
            other => Self::Storage(other),
        }
    }
}

pub type VaultResult<T> = Result<T, VaultError>;
