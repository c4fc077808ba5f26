//! Append-only audit log.
//!
//! The store exposes insert and query operations only. There is no update
//! or delete path for audit rows.

use crate::error::{StorageError, StorageResult};
use crate::{from_millis, to_millis, Database};
use checktick_types::{AuditAction, AuditLogEntry, SurveyId};
use duckdb::{params, Row};

const AUDIT_COLUMNS: &str = "id, actor, scope, survey_id, organization_id, action, \
     target_user, metadata_json, created_at";

#[derive(Clone)]
pub struct AuditStore {
    db: Database,
}

impl AuditStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Appends an entry. Re-using an existing id is rejected by the primary key.
    pub fn append(&self, entry: &AuditLogEntry) -> StorageResult<()> {
        let metadata_json = serde_json::to_string(&entry.metadata)?;
        let conn = self.db.lock()?;
        conn.execute(
            &format!("INSERT INTO audit_log ({AUDIT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"),
            params![
                entry.id.to_string(),
                entry.actor.to_string(),
                entry.scope.as_str(),
                entry.survey_id.map(|id| id.to_string()),
                entry.organization_id.map(|id| id.to_string()),
                entry.action.as_str(),
                entry.target_user.to_string(),
                metadata_json,
                to_millis(&entry.created_at),
            ],
        )?;
        Ok(())
    }

    /// Entries for a survey, oldest first.
    pub fn entries_for_survey(&self, survey_id: &SurveyId) -> StorageResult<Vec<AuditLogEntry>> {
        self.query(
            &format!(
                "SELECT {AUDIT_COLUMNS} FROM audit_log WHERE survey_id = ? ORDER BY created_at, id"
            ),
            &survey_id.to_string(),
        )
    }

    /// Entries with a given action across all surveys, oldest first.
    pub fn entries_with_action(&self, action: AuditAction) -> StorageResult<Vec<AuditLogEntry>> {
        self.query(
            &format!(
                "SELECT {AUDIT_COLUMNS} FROM audit_log WHERE action = ? ORDER BY created_at, id"
            ),
            action.as_str(),
        )
    }

    pub fn count(&self) -> StorageResult<usize> {
        let conn = self.db.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn query(&self, sql: &str, arg: &str) -> StorageResult<Vec<AuditLogEntry>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let raws = stmt
            .query_map(params![arg], read_row)?
            .collect::<Result<Vec<_>, _>>()?;
        raws.into_iter().map(RawEntry::into_entry).collect()
    }
}

struct RawEntry {
    id: String,
    actor: String,
    scope: String,
    survey_id: Option<String>,
    organization_id: Option<String>,
    action: String,
    target_user: String,
    metadata_json: String,
    created_at: i64,
}

fn read_row(row: &Row<'_>) -> duckdb::Result<RawEntry> {
    Ok(RawEntry {
        id: row.get(0)?,
        actor: row.get(1)?,
        scope: row.get(2)?,
        survey_id: row.get(3)?,
        organization_id: row.get(4)?,
        action: row.get(5)?,
        target_user: row.get(6)?,
        metadata_json: row.get(7)?,
        created_at: row.get(8)?,
    })
}

impl RawEntry {
    fn into_entry(self) -> StorageResult<AuditLogEntry> {
        Ok(AuditLogEntry {
            id: self.id.parse()?,
            actor: self.actor.parse()?,
            scope: self.scope.parse().map_err(StorageError::Corrupt)?,
            survey_id: self.survey_id.map(|s| s.parse()).transpose()?,
            organization_id: self.organization_id.map(|s| s.parse()).transpose()?,
            action: self.action.parse().map_err(StorageError::Corrupt)?,
            target_user: self.target_user.parse()?,
            metadata: serde_json::from_str(&self.metadata_json)?,
            created_at: from_millis(self.created_at)?,
        })
    }
}
