//! Survey, organization, identity and response records.

use crate::blob::Blob;
use crate::ids::{OrganizationId, ResponseId, SurveyId, UserId};
use crate::unlock::UnlockMethod;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The four independently optional wraps of a survey's KEK.
///
/// Every present field unwraps to the same KEK when opened with its own
/// secret. There is no constraint that any field is set.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedKeys {
    pub password: Option<Blob>,
    pub recovery: Option<Blob>,
    pub identity: Option<Blob>,
    pub organization: Option<Blob>,
}

impl WrappedKeys {
    /// True iff at least one wrap is present. This is the only place the
    /// "is this survey encrypted" question is answered.
    pub fn has_any(&self) -> bool {
        self.password.is_some()
            || self.recovery.is_some()
            || self.identity.is_some()
            || self.organization.is_some()
    }

    /// Password and recovery-phrase wraps are both present.
    pub fn has_dual(&self) -> bool {
        self.password.is_some() && self.recovery.is_some()
    }

    /// Returns the wrap an unlock method reads, if that method has one.
    pub fn for_method(&self, method: UnlockMethod) -> Option<&Blob> {
        match method {
            UnlockMethod::Password => self.password.as_ref(),
            UnlockMethod::Recovery => self.recovery.as_ref(),
            UnlockMethod::Identity => self.identity.as_ref(),
            UnlockMethod::OrgRecovery => self.organization.as_ref(),
            UnlockMethod::Legacy => None,
        }
    }

    /// Lists the unlock methods that currently have a wrap.
    pub fn configured_methods(&self) -> Vec<UnlockMethod> {
        [
            UnlockMethod::Password,
            UnlockMethod::Recovery,
            UnlockMethod::Identity,
            UnlockMethod::OrgRecovery,
        ]
        .into_iter()
        .filter(|m| self.for_method(*m).is_some())
        .collect()
    }
}

/// Hash and salt of a pre-envelope possession key. Verification only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyKeyHash {
    pub hash: Blob,
    pub salt: Blob,
}

/// A survey, reduced to the fields the encryption subsystem touches.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Survey {
    pub id: SurveyId,
    pub owner_id: UserId,
    pub organization_id: Option<OrganizationId>,
    pub name: String,
    pub wrapped: WrappedKeys,
    /// `first...last` word of the recovery phrase.
    pub recovery_hint: Option<String>,
    pub legacy_key_hash: Option<LegacyKeyHash>,
    /// Reserved for threshold recovery; stored but never interpreted.
    pub recovery_threshold: Option<u8>,
    /// Reserved for threshold recovery; stored but never interpreted.
    pub recovery_shares_count: Option<u8>,
    /// Bumped on every committed encryption setup.
    pub encryption_version: i64,
    pub created_at: DateTime<Utc>,
}

impl Survey {
    /// Creates an unencrypted survey.
    pub fn new(
        name: impl Into<String>,
        owner_id: UserId,
        organization_id: Option<OrganizationId>,
    ) -> Self {
        Self {
            id: SurveyId::new(),
            owner_id,
            organization_id,
            name: name.into(),
            wrapped: WrappedKeys::default(),
            recovery_hint: None,
            legacy_key_hash: None,
            recovery_threshold: None,
            recovery_shares_count: None,
            encryption_version: 0,
            created_at: Utc::now(),
        }
    }

    pub fn has_any_wrap(&self) -> bool {
        self.wrapped.has_any()
    }

    pub fn belongs_to(&self, organization_id: &OrganizationId) -> bool {
        self.organization_id.as_ref() == Some(organization_id)
    }
}

/// An organization and its escrow key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    /// Opaque high-entropy secret provisioned by the escrow service.
    pub master_key: Option<Blob>,
}

impl Organization {
    pub fn new(name: impl Into<String>, master_key: Option<Blob>) -> Self {
        Self {
            id: OrganizationId::new(),
            name: name.into(),
            master_key,
        }
    }
}

/// A user's federated (SSO) identity, used for automatic unlock.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederatedIdentity {
    pub user_id: UserId,
    pub provider: String,
    pub subject: String,
    pub derivation_salt: [u8; 32],
}

/// A submitted response. `answers` are stored in clear; sensitive
/// demographics only ever as ciphertext.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SurveyResponse {
    pub id: ResponseId,
    pub survey_id: SurveyId,
    pub submitted_by: Option<UserId>,
    pub encrypted_demographics: Option<Blob>,
    pub answers: serde_json::Map<String, serde_json::Value>,
    pub submitted_at: DateTime<Utc>,
}

impl SurveyResponse {
    pub fn new(
        survey_id: SurveyId,
        submitted_by: Option<UserId>,
        answers: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            id: ResponseId::new(),
            survey_id,
            submitted_by,
            encrypted_demographics: None,
            answers,
            submitted_at: Utc::now(),
        }
    }

    pub fn has_demographics(&self) -> bool {
        self.encrypted_demographics.is_some()
    }
}
