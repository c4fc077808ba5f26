//! Audit entries for survey unlocks and organization key recoveries.

use crate::error::{VaultError, VaultResult};
use crate::session::Clock;
use checktick_storage::{AuditStore, StorageResult};
use checktick_types::{
    AuditAction, AuditEntryId, AuditLogEntry, AuditScope, Organization, Survey, UnlockMethod,
    UserId,
};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::error;

/// Where audit entries are appended.
pub trait AuditSink: Send + Sync {
    fn append(&self, entry: &AuditLogEntry) -> StorageResult<()>;
}

impl AuditSink for AuditStore {
    fn append(&self, entry: &AuditLogEntry) -> StorageResult<()> {
        AuditStore::append(self, entry)
    }
}

/// Builds and writes the entries the vault is required to leave behind.
#[derive(Clone)]
pub struct RecoveryAuditLog {
    sink: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl RecoveryAuditLog {
    /// Entries are stamped with `clock`, the same clock that times session
    /// unlocks.
    pub fn new(sink: Arc<dyn AuditSink>, clock: Arc<dyn Clock>) -> Self {
        Self { sink, clock }
    }

    /// Records an administrative recovery through the organization key.
    ///
    /// Called only after the unwrap succeeded. An error here must abort the
    /// recovery.
    pub fn record(
        &self,
        actor: UserId,
        role: &str,
        survey: &Survey,
        organization: &Organization,
    ) -> VaultResult<AuditLogEntry> {
        let mut metadata = Map::new();
        metadata.insert("recovery_method".into(), Value::from("organization_master_key"));
        metadata.insert("actor_role".into(), Value::from(role));
        metadata.insert("survey_owner".into(), Value::from(survey.owner_id.to_string()));
        metadata.insert("survey_name".into(), Value::from(survey.name.clone()));

        let entry = AuditLogEntry {
            id: AuditEntryId::new(),
            actor,
            scope: AuditScope::Organization,
            survey_id: Some(survey.id),
            organization_id: Some(organization.id),
            action: AuditAction::KeyRecovery,
            target_user: survey.owner_id,
            metadata,
            created_at: self.clock.now(),
        };

        self.sink.append(&entry).map_err(|e| {
            error!(survey = %survey.id, error = %e, "key recovery audit write failed");
            VaultError::Audit(e.to_string())
        })?;
        Ok(entry)
    }

    /// Records a successful unlock by the survey's own credentials.
    pub fn record_unlock(
        &self,
        actor: UserId,
        survey: &Survey,
        method: UnlockMethod,
    ) -> VaultResult<AuditLogEntry> {
        let mut metadata = Map::new();
        metadata.insert("event".into(), Value::from("survey_unlocked"));
        metadata.insert("unlock_method".into(), Value::from(method.as_str()));

        let entry = AuditLogEntry {
            id: AuditEntryId::new(),
            actor,
            scope: AuditScope::Survey,
            survey_id: Some(survey.id),
            organization_id: survey.organization_id,
            action: AuditAction::Update,
            target_user: survey.owner_id,
            metadata,
            created_at: self.clock.now(),
        };

        self.sink
            .append(&entry)
            .map_err(|e| VaultError::Audit(e.to_string()))?;
        Ok(entry)
    }
}
