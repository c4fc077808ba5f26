//! Session-scoped unlock state.
//!
//! A session never holds a survey KEK. After a successful unlock the secret
//! that opened the survey is sealed under a key derived from the session id
//! and kept for a bounded time. Each request re-derives the KEK from that
//! credential against the survey's current wrapped fields, so a re-keyed
//! survey or a rotated organization key takes effect immediately.
//!
//! Per `(session, survey)` the state machine is
//! `Absent -> Active -> (Expired | Absent)`. Expiry is checked lazily on
//! read; an expired record is deleted and behaves as absent.

use crate::config::VaultConfig;
use crate::error::VaultResult;
use checktick_crypto::{
    derive_session_key, open_with_aad, seal_with_aad, CryptoError, DerivedKey, Kek,
};
use checktick_types::{
    Blob, FederatedIdentity, OrganizationId, SessionId, SurveyId, UnlockMethod, UserId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Source of the current time.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The secret kept for re-deriving a survey KEK. Never the KEK itself,
/// except on the legacy path where the possession key is the KEK.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Credential {
    Password {
        password: String,
    },
    Recovery {
        phrase: String,
    },
    Identity {
        #[zeroize(skip)]
        user_id: UserId,
        provider: String,
        subject: String,
        derivation_salt: [u8; 32],
    },
    OrgRecovery {
        #[zeroize(skip)]
        organization_id: OrganizationId,
    },
    Legacy {
        key: Vec<u8>,
    },
}

impl Credential {
    pub fn identity(identity: &FederatedIdentity) -> Self {
        Self::Identity {
            user_id: identity.user_id,
            provider: identity.provider.clone(),
            subject: identity.subject.clone(),
            derivation_salt: identity.derivation_salt,
        }
    }

    /// The identity tuple carried by an identity credential.
    pub fn to_identity(&self) -> Option<FederatedIdentity> {
        match self {
            Self::Identity {
                user_id,
                provider,
                subject,
                derivation_salt,
            } => Some(FederatedIdentity {
                user_id: *user_id,
                provider: provider.clone(),
                subject: subject.clone(),
                derivation_salt: *derivation_salt,
            }),
            _ => None,
        }
    }

    pub fn method(&self) -> UnlockMethod {
        match self {
            Self::Password { .. } => UnlockMethod::Password,
            Self::Recovery { .. } => UnlockMethod::Recovery,
            Self::Identity { .. } => UnlockMethod::Identity,
            Self::OrgRecovery { .. } => UnlockMethod::OrgRecovery,
            Self::Legacy { .. } => UnlockMethod::Legacy,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({})", self.method())
    }
}

struct UnlockRecord {
    method: UnlockMethod,
    encrypted_credential: Blob,
    verified_at: DateTime<Utc>,
}

type RecordKey = (SessionId, SurveyId);

/// Sealed unlock credentials per `(session, survey)`, with a TTL.
#[derive(Clone)]
pub struct SessionCredentialStore {
    records: Arc<RwLock<HashMap<RecordKey, UnlockRecord>>>,
    clock: Arc<dyn Clock>,
    ttl: chrono::Duration,
    server_secret: Option<Arc<Zeroizing<Vec<u8>>>>,
}

impl SessionCredentialStore {
    pub fn new(config: &VaultConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            clock,
            ttl: config.session_ttl(),
            server_secret: config
                .session_secret
                .as_ref()
                .map(|s| Arc::new(Zeroizing::new(s.as_bytes().to_vec()))),
        }
    }

    pub fn ttl(&self) -> chrono::Duration {
        self.ttl
    }

    /// Seals and stores `credential`, replacing any earlier unlock of the
    /// same survey in this session. `verified_at` is set to now.
    pub fn store(
        &self,
        session: &SessionId,
        survey: &SurveyId,
        credential: &Credential,
    ) -> VaultResult<()> {
        let method = credential.method();
        let key = self.session_key(session)?;
        let payload = Zeroizing::new(serde_json::to_vec(credential).map_err(CryptoError::from)?);
        let sealed = seal_with_aad(key.as_bytes(), &payload, &binding(survey, method))?;

        let record = UnlockRecord {
            method,
            encrypted_credential: sealed,
            verified_at: self.clock.now(),
        };
        self.write().insert((session.clone(), *survey), record);
        debug!(%survey, %method, "session unlock stored");
        Ok(())
    }

    /// Returns the decrypted credential if an unexpired record exists.
    ///
    /// A record that no longer decrypts is discarded.
    pub fn credential(&self, session: &SessionId, survey: &SurveyId) -> Option<Credential> {
        let record_key = (session.clone(), *survey);
        let (method, sealed) = {
            let records = self.read();
            let record = records.get(&record_key)?;
            if self.is_expired(record) {
                None
            } else {
                Some((record.method, record.encrypted_credential.clone()))
            }
        }
        .or_else(|| {
            self.remove_if_expired(&record_key);
            None
        })?;

        let opened = self.session_key(session).ok().and_then(|key| {
            open_with_aad(key.as_bytes(), sealed.as_bytes(), &binding(survey, method)).ok()
        });
        let credential = opened
            .and_then(|plain| serde_json::from_slice::<Credential>(&plain).ok())
            .filter(|c| c.method() == method);

        if credential.is_none() {
            warn!(%survey, %method, "discarding session unlock that failed to decrypt");
            self.write().remove(&record_key);
        }
        credential
    }

    /// Re-derives the KEK: decrypts the stored credential and hands it to
    /// `resolve`, which re-runs the matching unwrap against current state.
    ///
    /// A credential that no longer resolves (the survey was re-keyed or the
    /// wrap removed) is dropped, leaving the survey locked.
    pub fn get_kek<F>(&self, session: &SessionId, survey: &SurveyId, resolve: F) -> Option<Kek>
    where
        F: FnOnce(&Credential) -> Option<Kek>,
    {
        let credential = self.credential(session, survey)?;
        let kek = resolve(&credential);
        if kek.is_none() {
            debug!(%survey, method = %credential.method(), "session unlock no longer resolves");
            self.write().remove(&(session.clone(), *survey));
        }
        kek
    }

    /// The method of the active unlock, without decrypting anything. The
    /// credential is not re-checked against the survey, so this can be
    /// stale until the next [`get_kek`](Self::get_kek).
    pub fn unlock_method(&self, session: &SessionId, survey: &SurveyId) -> Option<UnlockMethod> {
        let record_key = (session.clone(), *survey);
        let method = {
            let records = self.read();
            let record = records.get(&record_key)?;
            (!self.is_expired(record)).then_some(record.method)
        };
        if method.is_none() {
            self.remove_if_expired(&record_key);
        }
        method
    }

    pub fn is_unlocked(&self, session: &SessionId, survey: &SurveyId) -> bool {
        self.unlock_method(session, survey).is_some()
    }

    /// Forgets one survey's unlock. Returns whether a record existed.
    pub fn lock(&self, session: &SessionId, survey: &SurveyId) -> bool {
        let removed = self.write().remove(&(session.clone(), *survey)).is_some();
        if removed {
            debug!(%survey, "session unlock removed");
        }
        removed
    }

    /// Forgets every unlock held by a session (logout).
    pub fn lock_session(&self, session: &SessionId) -> usize {
        let mut records = self.write();
        let before = records.len();
        records.retain(|(s, _), _| s != session);
        before - records.len()
    }

    /// Deletes all expired records. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut records = self.write();
        let before = records.len();
        records.retain(|_, record| now.signed_duration_since(record.verified_at) <= self.ttl);
        before - records.len()
    }

    /// Number of records held, expired or not.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Runs [`sweep_expired`](Self::sweep_expired) every `interval` on the
    /// current tokio runtime until the handle is aborted.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // Skip first immediate tick
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = store.sweep_expired();
                if removed > 0 {
                    debug!(removed, "expired session unlocks swept");
                }
            }
        })
    }

    fn is_expired(&self, record: &UnlockRecord) -> bool {
        self.clock.now().signed_duration_since(record.verified_at) > self.ttl
    }

    fn remove_if_expired(&self, record_key: &RecordKey) {
        let mut records = self.write();
        let expired = records
            .get(record_key)
            .is_some_and(|record| self.is_expired(record));
        if expired {
            records.remove(record_key);
            debug!(survey = %record_key.1, "session unlock expired");
        }
    }

    fn session_key(&self, session: &SessionId) -> Result<DerivedKey, CryptoError> {
        derive_session_key(
            session.as_bytes(),
            self.server_secret.as_ref().map(|s| s.as_slice()),
        )
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<RecordKey, UnlockRecord>> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<RecordKey, UnlockRecord>> {
        self.records.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Associated data binding a sealed credential to its survey and method.
fn binding(survey: &SurveyId, method: UnlockMethod) -> Vec<u8> {
    let survey = survey.to_string();
    let mut aad = Vec::with_capacity(survey.len() + 1 + 16);
    aad.extend_from_slice(survey.as_bytes());
    aad.push(0x1F);
    aad.extend_from_slice(method.as_str().as_bytes());
    aad
}
