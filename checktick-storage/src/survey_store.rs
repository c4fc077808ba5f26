//! Surveys, organizations and federated identities.

use crate::error::{StorageError, StorageResult};
use crate::{from_millis, to_millis, Database};
use checktick_types::{
    Blob, FederatedIdentity, LegacyKeyHash, Organization, OrganizationId, Survey, SurveyId,
    UserId, WrappedKeys,
};
use duckdb::{params, Connection, Row};
use tracing::debug;

const SURVEY_COLUMNS: &str = "id, owner_id, organization_id, name, \
     kek_wrapped_password, kek_wrapped_recovery, kek_wrapped_identity, kek_wrapped_org, \
     recovery_hint, key_hash, key_salt, recovery_threshold, recovery_shares_count, \
     encryption_version, created_at";

/// Every encryption field of a survey, written together by a setup.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EncryptionFields {
    pub wrapped: WrappedKeys,
    pub recovery_hint: Option<String>,
    pub legacy_key_hash: Option<LegacyKeyHash>,
}

/// Repository for surveys and the key-holding records around them.
#[derive(Clone)]
pub struct SurveyStore {
    db: Database,
}

impl SurveyStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    // ── Surveys ──

    pub fn insert_survey(&self, survey: &Survey) -> StorageResult<()> {
        let conn = self.db.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO surveys ({SURVEY_COLUMNS}) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ),
            params![
                survey.id.to_string(),
                survey.owner_id.to_string(),
                survey.organization_id.map(|id| id.to_string()),
                survey.name,
                survey.wrapped.password.as_ref().map(Blob::to_storage),
                survey.wrapped.recovery.as_ref().map(Blob::to_storage),
                survey.wrapped.identity.as_ref().map(Blob::to_storage),
                survey.wrapped.organization.as_ref().map(Blob::to_storage),
                survey.recovery_hint,
                survey.legacy_key_hash.as_ref().map(|h| h.hash.to_storage()),
                survey.legacy_key_hash.as_ref().map(|h| h.salt.to_storage()),
                survey.recovery_threshold.map(i32::from),
                survey.recovery_shares_count.map(i32::from),
                survey.encryption_version,
                to_millis(&survey.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_survey(&self, id: &SurveyId) -> StorageResult<Option<Survey>> {
        let conn = self.db.lock()?;
        let result = conn.query_row(
            &format!("SELECT {SURVEY_COLUMNS} FROM surveys WHERE id = ?"),
            params![id.to_string()],
            SurveyRow::read,
        );
        match result {
            Ok(row) => row.into_survey().map(Some),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Like [`get_survey`](Self::get_survey) but a missing survey is an error.
    pub fn require_survey(&self, id: &SurveyId) -> StorageResult<Survey> {
        self.get_survey(id)?
            .ok_or_else(|| StorageError::NotFound(format!("survey {id}")))
    }

    /// Replaces every encryption field of a survey in one transaction.
    ///
    /// The write only lands if the stored `encryption_version` still equals
    /// `expected_version`; the version is then bumped and returned. A stale
    /// version yields [`StorageError::Conflict`] and leaves the row untouched.
    pub fn commit_encryption(
        &self,
        id: &SurveyId,
        expected_version: i64,
        fields: &EncryptionFields,
    ) -> StorageResult<i64> {
        let conn = self.db.lock()?;
        conn.execute_batch("BEGIN TRANSACTION")?;

        match update_encryption(&conn, id, expected_version, fields) {
            Ok(version) => {
                conn.execute_batch("COMMIT")?;
                debug!(survey = %id, version, "encryption fields committed");
                Ok(version)
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    // ── Organizations ──

    pub fn insert_organization(&self, org: &Organization) -> StorageResult<()> {
        let conn = self.db.lock()?;
        conn.execute(
            "INSERT INTO organizations (id, name, master_key) VALUES (?, ?, ?)",
            params![
                org.id.to_string(),
                org.name,
                org.master_key.as_ref().map(Blob::to_storage),
            ],
        )?;
        Ok(())
    }

    pub fn get_organization(&self, id: &OrganizationId) -> StorageResult<Option<Organization>> {
        let conn = self.db.lock()?;
        let result = conn.query_row(
            "SELECT id, name, master_key FROM organizations WHERE id = ?",
            params![id.to_string()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<Vec<u8>>>(2)?,
                ))
            },
        );
        match result {
            Ok((id, name, master_key)) => Ok(Some(Organization {
                id: id.parse()?,
                name,
                master_key: master_key.map(Blob::from_storage),
            })),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Installs or clears an organization's escrow key.
    pub fn set_master_key(&self, id: &OrganizationId, key: Option<&Blob>) -> StorageResult<()> {
        let conn = self.db.lock()?;
        let updated = conn.execute(
            "UPDATE organizations SET master_key = ? WHERE id = ?",
            params![key.map(Blob::to_storage), id.to_string()],
        )?;
        if updated == 0 {
            return Err(StorageError::NotFound(format!("organization {id}")));
        }
        Ok(())
    }

    // ── Federated identities ──

    /// Inserts or replaces the identity linked to a user.
    pub fn upsert_identity(&self, identity: &FederatedIdentity) -> StorageResult<()> {
        let conn = self.db.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO federated_identities (user_id, provider, subject, derivation_salt) \
             VALUES (?, ?, ?, ?)",
            params![
                identity.user_id.to_string(),
                identity.provider,
                identity.subject,
                identity.derivation_salt.to_vec(),
            ],
        )?;
        Ok(())
    }

    pub fn get_identity(&self, user_id: &UserId) -> StorageResult<Option<FederatedIdentity>> {
        let conn = self.db.lock()?;
        let result = conn.query_row(
            "SELECT provider, subject, derivation_salt FROM federated_identities WHERE user_id = ?",
            params![user_id.to_string()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                ))
            },
        );
        match result {
            Ok((provider, subject, salt)) => {
                let derivation_salt: [u8; 32] = salt.as_slice().try_into().map_err(|_| {
                    StorageError::Corrupt(format!("identity salt for {user_id} is {} bytes", salt.len()))
                })?;
                Ok(Some(FederatedIdentity {
                    user_id: *user_id,
                    provider,
                    subject,
                    derivation_salt,
                }))
            }
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn delete_identity(&self, user_id: &UserId) -> StorageResult<()> {
        let conn = self.db.lock()?;
        conn.execute(
            "DELETE FROM federated_identities WHERE user_id = ?",
            params![user_id.to_string()],
        )?;
        Ok(())
    }
}

fn update_encryption(
    conn: &Connection,
    id: &SurveyId,
    expected_version: i64,
    fields: &EncryptionFields,
) -> StorageResult<i64> {
    let wrapped = &fields.wrapped;
    let updated = conn.execute(
        "UPDATE surveys SET \
             kek_wrapped_password = ?, kek_wrapped_recovery = ?, \
             kek_wrapped_identity = ?, kek_wrapped_org = ?, \
             recovery_hint = ?, key_hash = ?, key_salt = ?, \
             encryption_version = encryption_version + 1 \
         WHERE id = ? AND encryption_version = ?",
        params![
            wrapped.password.as_ref().map(Blob::to_storage),
            wrapped.recovery.as_ref().map(Blob::to_storage),
            wrapped.identity.as_ref().map(Blob::to_storage),
            wrapped.organization.as_ref().map(Blob::to_storage),
            fields.recovery_hint,
            fields.legacy_key_hash.as_ref().map(|h| h.hash.to_storage()),
            fields.legacy_key_hash.as_ref().map(|h| h.salt.to_storage()),
            id.to_string(),
            expected_version,
        ],
    )?;

    if updated == 0 {
        let exists: i64 = conn.query_row(
            "SELECT COUNT(*) FROM surveys WHERE id = ?",
            params![id.to_string()],
            |row| row.get(0),
        )?;
        return Err(if exists == 0 {
            StorageError::NotFound(format!("survey {id}"))
        } else {
            StorageError::Conflict {
                survey_id: id.to_string(),
                expected: expected_version,
            }
        });
    }
    Ok(expected_version + 1)
}

struct SurveyRow {
    id: String,
    owner_id: String,
    organization_id: Option<String>,
    name: String,
    password: Option<Vec<u8>>,
    recovery: Option<Vec<u8>>,
    identity: Option<Vec<u8>>,
    organization: Option<Vec<u8>>,
    recovery_hint: Option<String>,
    key_hash: Option<Vec<u8>>,
    key_salt: Option<Vec<u8>>,
    recovery_threshold: Option<i32>,
    recovery_shares_count: Option<i32>,
    encryption_version: i64,
    created_at: i64,
}

impl SurveyRow {
    fn read(row: &Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            organization_id: row.get(2)?,
            name: row.get(3)?,
            password: row.get(4)?,
            recovery: row.get(5)?,
            identity: row.get(6)?,
            organization: row.get(7)?,
            recovery_hint: row.get(8)?,
            key_hash: row.get(9)?,
            key_salt: row.get(10)?,
            recovery_threshold: row.get(11)?,
            recovery_shares_count: row.get(12)?,
            encryption_version: row.get(13)?,
            created_at: row.get(14)?,
        })
    }

    fn into_survey(self) -> StorageResult<Survey> {
        let legacy_key_hash = match (self.key_hash, self.key_salt) {
            (Some(hash), Some(salt)) => Some(LegacyKeyHash {
                hash: Blob::from_storage(hash),
                salt: Blob::from_storage(salt),
            }),
            _ => None,
        };
        Ok(Survey {
            id: self.id.parse()?,
            owner_id: self.owner_id.parse()?,
            organization_id: self.organization_id.map(|s| s.parse()).transpose()?,
            name: self.name,
            wrapped: WrappedKeys {
                password: self.password.map(Blob::from_storage),
                recovery: self.recovery.map(Blob::from_storage),
                identity: self.identity.map(Blob::from_storage),
                organization: self.organization.map(Blob::from_storage),
            },
            recovery_hint: self.recovery_hint,
            legacy_key_hash,
            recovery_threshold: small_count(self.recovery_threshold)?,
            recovery_shares_count: small_count(self.recovery_shares_count)?,
            encryption_version: self.encryption_version,
            created_at: from_millis(self.created_at)?,
        })
    }
}

fn small_count(value: Option<i32>) -> StorageResult<Option<u8>> {
    value
        .map(|v| u8::try_from(v).map_err(|_| StorageError::Corrupt(format!("count out of range: {v}"))))
        .transpose()
}
