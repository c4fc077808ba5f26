use crate::error::StorageResult;
use duckdb::Connection;

pub(crate) fn initialize(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS organizations (
            id VARCHAR PRIMARY KEY,
            name VARCHAR NOT NULL,
            master_key BLOB
        );

        CREATE TABLE IF NOT EXISTS surveys (
            id VARCHAR PRIMARY KEY,
            owner_id VARCHAR NOT NULL,
            organization_id VARCHAR,
            name VARCHAR NOT NULL,
            kek_wrapped_password BLOB,
            kek_wrapped_recovery BLOB,
            kek_wrapped_identity BLOB,
            kek_wrapped_org BLOB,
            recovery_hint VARCHAR,
            key_hash BLOB,
            key_salt BLOB,
            recovery_threshold INTEGER,
            recovery_shares_count INTEGER,
            encryption_version BIGINT NOT NULL DEFAULT 0,
            created_at BIGINT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_surveys_org ON surveys(organization_id);

        CREATE TABLE IF NOT EXISTS federated_identities (
            user_id VARCHAR PRIMARY KEY,
            provider VARCHAR NOT NULL,
            subject VARCHAR NOT NULL,
            derivation_salt BLOB NOT NULL
        );

        CREATE TABLE IF NOT EXISTS survey_responses (
            id VARCHAR PRIMARY KEY,
            survey_id VARCHAR NOT NULL,
            submitted_by VARCHAR,
            encrypted_demographics BLOB,
            answers_json TEXT NOT NULL,
            submitted_at BIGINT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_responses_survey ON survey_responses(survey_id);

        CREATE TABLE IF NOT EXISTS audit_log (
            id VARCHAR PRIMARY KEY,
            actor VARCHAR NOT NULL,
            scope VARCHAR NOT NULL,
            survey_id VARCHAR,
            organization_id VARCHAR,
            action VARCHAR NOT NULL,
            target_user VARCHAR NOT NULL,
            metadata_json TEXT NOT NULL,
            created_at BIGINT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_audit_survey ON audit_log(survey_id);
        "#,
    )?;
    Ok(())
}
