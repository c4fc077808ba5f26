//! Survey encryption workflows for CheckTick.
//!
//! [`SurveyVault`] ties the crypto envelope to storage and to per-session
//! unlock state:
//!
//! - **Setup** generates a fresh KEK per survey, wraps it under every
//!   requested method and commits all wrapped fields in one versioned write.
//! - **Unlock** verifies a credential by unwrapping, then keeps only the
//!   sealed credential in the session. The KEK is re-derived per request.
//! - **Organization recovery** unwraps through the escrow key and is audited
//!   before the session is granted access.
//! - **Responses** keep answers in clear and demographics sealed under the
//!   survey KEK.
//!
//! Authorization is the caller's concern: every method assumes the caller
//! already decided the actor may perform it.

mod audit;
mod config;
mod error;
mod session;

pub use audit::{AuditSink, RecoveryAuditLog};
pub use config::VaultConfig;
pub use error::{VaultError, VaultResult};
pub use session::{Clock, Credential, ManualClock, SessionCredentialStore, SystemClock};

use checktick_crypto::{
    decrypt_demographics, encrypt_demographics, hash_legacy_key, verify_legacy_key, CryptoError,
    Demographics, Kek, KeyEnvelope, RecoveryPhrase,
};
use checktick_storage::{AuditStore, Database, EncryptionFields, ResponseStore, SurveyStore};
use checktick_types::{
    OrganizationId, ResponseId, SessionId, Survey, SurveyId, SurveyResponse, UnlockMethod, UserId,
};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Initializes a `tracing` subscriber writing to stderr.
///
/// The filter comes from `RUST_LOG`, defaulting to `info`. Calling this more
/// than once is harmless.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

/// How the recovery-phrase wrap is set up.
#[derive(Default)]
pub enum RecoveryPhraseSetup {
    #[default]
    None,
    /// Generate a fresh 12-word phrase and return it in the receipt.
    Generate,
    /// Use a phrase the owner already holds.
    Provided(RecoveryPhrase),
}

/// Which unlock methods an encryption setup wraps the new KEK for.
/// Methods left out are cleared from the survey.
#[derive(Default)]
pub struct EncryptionSetup {
    pub password: Option<String>,
    pub recovery_phrase: RecoveryPhraseSetup,
    /// Wrap under the survey owner's linked federated identity.
    pub use_identity: bool,
    /// Wrap under the owning organization's escrow key.
    pub organization_escrow: bool,
}

/// Result of a committed setup. The recovery phrase appears here once and is
/// never stored.
#[derive(Debug)]
pub struct SetupReceipt {
    pub encryption_version: i64,
    pub methods: Vec<UnlockMethod>,
    pub recovery_phrase: Option<RecoveryPhrase>,
    pub recovery_hint: Option<String>,
}

/// A response as seen by a reader. `demographics` is `None` when the survey
/// is not unlocked in the session or the ciphertext does not open.
#[derive(Clone, Debug, PartialEq)]
pub struct ResponseView {
    pub id: ResponseId,
    pub answers: Map<String, Value>,
    pub demographics: Option<Demographics>,
}

/// A stored response and whether supplied demographics had to be dropped.
#[derive(Clone, Debug)]
pub struct RecordedResponse {
    pub response: SurveyResponse,
    pub demographics_dropped: bool,
}

pub struct SurveyVault {
    config: VaultConfig,
    envelope: KeyEnvelope,
    surveys: SurveyStore,
    responses: ResponseStore,
    audit: RecoveryAuditLog,
    sessions: SessionCredentialStore,
}

impl SurveyVault {
    /// Opens a vault on `db` with wall-clock time and the database audit log.
    pub fn open(db: Database, config: VaultConfig) -> VaultResult<Self> {
        let sink = Arc::new(AuditStore::new(db.clone()));
        Self::with_parts(db, config, Arc::new(SystemClock), sink)
    }

    /// Opens a vault with an explicit clock and audit sink.
    pub fn with_parts(
        db: Database,
        config: VaultConfig,
        clock: Arc<dyn Clock>,
        audit: Arc<dyn AuditSink>,
    ) -> VaultResult<Self> {
        config.validate()?;
        Ok(Self {
            envelope: KeyEnvelope::new(config.kdf),
            surveys: SurveyStore::new(db.clone()),
            responses: ResponseStore::new(db),
            audit: RecoveryAuditLog::new(audit, clock.clone()),
            sessions: SessionCredentialStore::new(&config, clock),
            config,
        })
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn surveys(&self) -> &SurveyStore {
        &self.surveys
    }

    pub fn responses(&self) -> &ResponseStore {
        &self.responses
    }

    pub fn sessions(&self) -> &SessionCredentialStore {
        &self.sessions
    }

    /// Starts the periodic sweep of expired session unlocks.
    pub fn spawn_session_sweeper(&self) -> JoinHandle<()> {
        self.sessions.spawn_sweeper(self.config.sweep_interval())
    }

    // ── Setup ──

    /// Generates a new KEK for the survey and wraps it for each requested
    /// method, replacing all previous wrapped fields in one write.
    ///
    /// Fails with [`VaultError::Conflict`] if another setup for the same
    /// survey committed after this one loaded the survey.
    pub fn setup_encryption(
        &self,
        survey_id: &SurveyId,
        setup: EncryptionSetup,
    ) -> VaultResult<SetupReceipt> {
        let survey = self.surveys.require_survey(survey_id)?;

        if setup.password.is_none()
            && matches!(setup.recovery_phrase, RecoveryPhraseSetup::None)
            && !setup.use_identity
            && !setup.organization_escrow
        {
            return Err(VaultError::NoUnlockMethod);
        }
        if let Some(password) = &setup.password {
            if password.chars().count() < self.config.min_password_len {
                return Err(VaultError::PasswordTooShort {
                    min: self.config.min_password_len,
                });
            }
        }

        let identity = if setup.use_identity {
            Some(
                self.surveys
                    .get_identity(&survey.owner_id)?
                    .ok_or(VaultError::NoFederatedIdentity)?,
            )
        } else {
            None
        };
        let organization = if setup.organization_escrow {
            let org_id = survey.organization_id.ok_or(VaultError::NotInOrganization)?;
            Some(
                self.surveys
                    .get_organization(&org_id)?
                    .ok_or_else(|| VaultError::NotFound(format!("organization {org_id}")))?,
            )
        } else {
            None
        };
        let phrase = match setup.recovery_phrase {
            RecoveryPhraseSetup::None => None,
            RecoveryPhraseSetup::Generate => Some(RecoveryPhrase::generate()?),
            RecoveryPhraseSetup::Provided(phrase) => Some(phrase),
        };

        let kek = KeyEnvelope::generate_kek();
        let mut fields = EncryptionFields::default();
        if let Some(password) = &setup.password {
            fields.wrapped.password = Some(self.envelope.wrap_with_password(&kek, password)?);
        }
        if let Some(phrase) = &phrase {
            let (wrapped, hint) = self.envelope.wrap_with_recovery_phrase(&kek, phrase)?;
            fields.wrapped.recovery = Some(wrapped);
            fields.recovery_hint = Some(hint);
        }
        if let Some(identity) = &identity {
            fields.wrapped.identity = Some(self.envelope.wrap_with_identity(&kek, identity)?);
        }
        if let Some(organization) = &organization {
            fields.wrapped.organization = Some(self.envelope.wrap_with_org_key(&kek, organization)?);
        }
        fields.legacy_key_hash = Some(hash_legacy_key(kek.as_bytes(), self.envelope.params())?);

        let version = self
            .surveys
            .commit_encryption(survey_id, survey.encryption_version, &fields)
            .map_err(|e| VaultError::from_storage(survey_id, e))?;

        let methods = fields.wrapped.configured_methods();
        info!(survey = %survey_id, version, ?methods, "survey encryption configured");
        Ok(SetupReceipt {
            encryption_version: version,
            methods,
            recovery_hint: fields.recovery_hint,
            recovery_phrase: phrase,
        })
    }

    // ── Owner unlocks ──

    pub fn unlock_with_password(
        &self,
        session: &SessionId,
        actor: UserId,
        survey_id: &SurveyId,
        password: &str,
    ) -> VaultResult<()> {
        let credential = Credential::Password {
            password: password.to_owned(),
        };
        self.unlock(session, actor, survey_id, credential)
    }

    /// The phrase may be typed with any capitalisation or spacing.
    pub fn unlock_with_recovery_phrase(
        &self,
        session: &SessionId,
        actor: UserId,
        survey_id: &SurveyId,
        phrase: &str,
    ) -> VaultResult<()> {
        let credential = Credential::Recovery {
            phrase: checktick_crypto::normalize_phrase(phrase).to_string(),
        };
        self.unlock(session, actor, survey_id, credential)
    }

    /// Unlocks with the actor's linked federated identity.
    pub fn unlock_with_identity(
        &self,
        session: &SessionId,
        actor: UserId,
        survey_id: &SurveyId,
    ) -> VaultResult<()> {
        let Some(identity) = self.surveys.get_identity(&actor)? else {
            warn!(survey = %survey_id, "identity unlock without linked identity");
            return Err(VaultError::InvalidCredentials);
        };
        self.unlock(session, actor, survey_id, Credential::identity(&identity))
    }

    /// True if `actor` could unlock the survey with no secret: the survey has
    /// an identity wrap and the actor has a linked federated identity.
    ///
    /// Only checks availability. Whether the identity actually opens the
    /// wrap is decided by [`unlock_with_identity`](Self::unlock_with_identity).
    pub fn can_unlock_automatically(&self, actor: UserId, survey_id: &SurveyId) -> VaultResult<bool> {
        let survey = self.surveys.require_survey(survey_id)?;
        if survey.wrapped.identity.is_none() {
            return Ok(false);
        }
        Ok(self.surveys.get_identity(&actor)?.is_some())
    }

    /// Unlocks a survey with a bare possession key from the pre-envelope
    /// scheme, verified against the stored hash.
    pub fn unlock_with_legacy_key(
        &self,
        session: &SessionId,
        actor: UserId,
        survey_id: &SurveyId,
        key: &[u8],
    ) -> VaultResult<()> {
        let credential = Credential::Legacy { key: key.to_vec() };
        self.unlock(session, actor, survey_id, credential)
    }

    fn unlock(
        &self,
        session: &SessionId,
        actor: UserId,
        survey_id: &SurveyId,
        credential: Credential,
    ) -> VaultResult<()> {
        let survey = self.surveys.require_survey(survey_id)?;
        let method = credential.method();

        if self.resolve(&survey, &credential).is_none() {
            warn!(survey = %survey_id, %method, "survey unlock failed");
            return Err(VaultError::InvalidCredentials);
        }

        self.sessions.store(session, survey_id, &credential)?;
        if let Err(e) = self.audit.record_unlock(actor, &survey, method) {
            error!(survey = %survey_id, error = %e, "unlock audit write failed");
        }
        info!(survey = %survey_id, %method, "survey unlocked");
        Ok(())
    }

    // ── Organization recovery ──

    /// Administrative recovery through the organization escrow key.
    ///
    /// The survey must belong to `organization_id`; that is checked before
    /// any key is touched. The audit entry is written before the session is
    /// granted access, and a failed audit write aborts the recovery.
    pub fn recover_with_organization_key(
        &self,
        session: &SessionId,
        actor: UserId,
        role: &str,
        organization_id: &OrganizationId,
        survey_id: &SurveyId,
    ) -> VaultResult<()> {
        let survey = self.surveys.require_survey(survey_id)?;
        if !survey.belongs_to(organization_id) {
            warn!(survey = %survey_id, org = %organization_id, %actor, "organization recovery for foreign survey refused");
            return Err(VaultError::NotInOrganization);
        }
        let organization = self
            .surveys
            .get_organization(organization_id)?
            .ok_or_else(|| VaultError::NotFound(format!("organization {organization_id}")))?;

        match self.envelope.unwrap_with_org_key(&survey, &organization) {
            Ok(Some(_)) => {}
            Ok(None) => {
                warn!(survey = %survey_id, %actor, "organization recovery failed to unwrap");
                return Err(VaultError::InvalidCredentials);
            }
            Err(CryptoError::OrganizationMismatch) => return Err(VaultError::NotInOrganization),
            Err(e) => return Err(e.into()),
        }

        self.audit.record(actor, role, &survey, &organization)?;
        self.sessions.store(
            session,
            survey_id,
            &Credential::OrgRecovery {
                organization_id: organization.id,
            },
        )?;
        warn!(
            survey = %survey_id,
            org = %organization.id,
            %actor,
            role,
            "survey key recovered with organization master key"
        );
        Ok(())
    }

    // ── Session access ──

    /// Re-derives the survey KEK from the session's unlock, if any.
    pub fn survey_key(&self, session: &SessionId, survey_id: &SurveyId) -> Option<Kek> {
        self.sessions.get_kek(session, survey_id, |credential| {
            let survey = match self.surveys.get_survey(survey_id) {
                Ok(survey) => survey?,
                Err(e) => {
                    warn!(survey = %survey_id, error = %e, "survey lookup failed during key re-derivation");
                    return None;
                }
            };
            self.resolve(&survey, credential)
        })
    }

    /// True if the session's unlock still re-derives the current KEK.
    pub fn is_unlocked(&self, session: &SessionId, survey_id: &SurveyId) -> bool {
        self.survey_key(session, survey_id).is_some()
    }

    pub fn lock(&self, session: &SessionId, survey_id: &SurveyId) -> bool {
        self.sessions.lock(session, survey_id)
    }

    pub fn lock_session(&self, session: &SessionId) -> usize {
        self.sessions.lock_session(session)
    }

    // ── Responses ──

    /// Stores a response. Demographics are sealed under the KEK unlocked in
    /// `session`. Without one the answers are still stored and the
    /// demographics are dropped, never written in clear.
    pub fn record_response(
        &self,
        survey_id: &SurveyId,
        session: Option<&SessionId>,
        submitted_by: Option<UserId>,
        answers: Map<String, Value>,
        demographics: Option<&Demographics>,
    ) -> VaultResult<RecordedResponse> {
        self.surveys.require_survey(survey_id)?;
        let mut response = SurveyResponse::new(*survey_id, submitted_by, answers);
        let mut demographics_dropped = false;

        if let Some(demographics) = demographics.filter(|d| !d.is_empty()) {
            match session.and_then(|s| self.survey_key(s, survey_id)) {
                Some(kek) => {
                    response.encrypted_demographics =
                        Some(encrypt_demographics(&kek, demographics)?);
                }
                None => {
                    warn!(survey = %survey_id, "survey not unlocked, demographics dropped");
                    demographics_dropped = true;
                }
            }
        }

        self.responses.insert_response(&response)?;
        Ok(RecordedResponse {
            response,
            demographics_dropped,
        })
    }

    /// Decrypts a response's demographics with the session's KEK.
    pub fn response_demographics(
        &self,
        session: &SessionId,
        response: &SurveyResponse,
    ) -> Option<Demographics> {
        let blob = response.encrypted_demographics.as_ref()?;
        let kek = self.survey_key(session, &response.survey_id)?;
        decrypt_demographics(&kek, blob)
    }

    /// Loads a response. Answers are always returned; demographics only
    /// when they can be opened in this session.
    pub fn read_response(
        &self,
        session: &SessionId,
        response_id: &ResponseId,
    ) -> VaultResult<ResponseView> {
        let response = self
            .responses
            .get_response(response_id)?
            .ok_or_else(|| VaultError::NotFound(format!("response {response_id}")))?;
        let demographics = self.response_demographics(session, &response);
        Ok(ResponseView {
            id: response.id,
            answers: response.answers,
            demographics,
        })
    }

    /// Runs the unwrap matching `credential` against the survey's current
    /// fields.
    fn resolve(&self, survey: &Survey, credential: &Credential) -> Option<Kek> {
        match credential {
            Credential::Password { password } => self
                .envelope
                .unwrap_with_password(survey.wrapped.password.as_ref()?, password),
            Credential::Recovery { phrase } => self
                .envelope
                .unwrap_with_recovery_phrase(survey.wrapped.recovery.as_ref()?, phrase),
            Credential::Identity { .. } => {
                let identity = credential.to_identity()?;
                self.envelope
                    .unwrap_with_identity(survey.wrapped.identity.as_ref()?, &identity)
            }
            Credential::OrgRecovery { organization_id } => {
                let organization = self.surveys.get_organization(organization_id).ok()??;
                self.envelope
                    .unwrap_with_org_key(survey, &organization)
                    .ok()
                    .flatten()
            }
            Credential::Legacy { key } => {
                let stored = survey.legacy_key_hash.as_ref()?;
                if !verify_legacy_key(key, stored) {
                    return None;
                }
                Kek::from_slice(key).ok()
            }
        }
    }
}
