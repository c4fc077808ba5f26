use checktick_storage::{
    AuditStore, Database, EncryptionFields, ResponseStore, StorageError, SurveyStore,
};
use checktick_types::{
    AuditAction, AuditEntryId, AuditLogEntry, AuditScope, Blob, LegacyKeyHash, Organization,
    Survey, SurveyResponse, UserId, WrappedKeys,
};
use chrono::Utc;
use pretty_assertions::assert_eq;

fn all_fields() -> EncryptionFields {
    EncryptionFields {
        wrapped: WrappedKeys {
            password: Some(Blob::new(vec![1; 40])),
            recovery: Some(Blob::new(vec![2; 40])),
            identity: Some(Blob::new(vec![3; 40])),
            organization: Some(Blob::new(vec![4; 40])),
        },
        recovery_hint: Some("apple...zebra".to_owned()),
        legacy_key_hash: Some(LegacyKeyHash {
            hash: Blob::new(vec![5; 44]),
            salt: Blob::new(vec![6; 16]),
        }),
    }
}

fn audit_entry(survey: &Survey, action: AuditAction) -> AuditLogEntry {
    let mut metadata = serde_json::Map::new();
    metadata.insert("unlock_method".into(), "password".into());
    AuditLogEntry {
        id: AuditEntryId::new(),
        actor: UserId::new(),
        scope: AuditScope::Survey,
        survey_id: Some(survey.id),
        organization_id: survey.organization_id,
        action,
        target_user: survey.owner_id,
        metadata,
        created_at: Utc::now(),
    }
}

#[test]
fn commit_writes_every_field_and_bumps_version() {
    let db = Database::open_in_memory().unwrap();
    let surveys = SurveyStore::new(db);
    let survey = Survey::new("Intake", UserId::new(), None);
    surveys.insert_survey(&survey).unwrap();

    let version = surveys.commit_encryption(&survey.id, 0, &all_fields()).unwrap();
    assert_eq!(version, 1);

    let loaded = surveys.require_survey(&survey.id).unwrap();
    assert_eq!(loaded.encryption_version, 1);
    assert_eq!(loaded.wrapped, all_fields().wrapped);
    assert_eq!(loaded.recovery_hint.as_deref(), Some("apple...zebra"));
    assert_eq!(loaded.legacy_key_hash, all_fields().legacy_key_hash);
}

#[test]
fn recommit_clears_fields_not_supplied() {
    let surveys = SurveyStore::new(Database::open_in_memory().unwrap());
    let survey = Survey::new("Intake", UserId::new(), None);
    surveys.insert_survey(&survey).unwrap();
    surveys.commit_encryption(&survey.id, 0, &all_fields()).unwrap();

    let password_only = EncryptionFields {
        wrapped: WrappedKeys {
            password: Some(Blob::new(vec![9; 40])),
            ..WrappedKeys::default()
        },
        ..EncryptionFields::default()
    };
    surveys.commit_encryption(&survey.id, 1, &password_only).unwrap();

    let loaded = surveys.require_survey(&survey.id).unwrap();
    assert_eq!(loaded.wrapped, password_only.wrapped);
    assert_eq!(loaded.recovery_hint, None);
    assert_eq!(loaded.legacy_key_hash, None);
    assert_eq!(loaded.encryption_version, 2);
}

#[test]
fn stale_version_conflicts_and_leaves_row_untouched() {
    let surveys = SurveyStore::new(Database::open_in_memory().unwrap());
    let survey = Survey::new("Intake", UserId::new(), None);
    surveys.insert_survey(&survey).unwrap();

    surveys.commit_encryption(&survey.id, 0, &all_fields()).unwrap();
    let err = surveys
        .commit_encryption(&survey.id, 0, &EncryptionFields::default())
        .unwrap_err();
    assert!(matches!(err, StorageError::Conflict { expected: 0, .. }));

    let loaded = surveys.require_survey(&survey.id).unwrap();
    assert_eq!(loaded.wrapped, all_fields().wrapped);
    assert_eq!(loaded.encryption_version, 1);
}

#[test]
fn organization_master_key_can_be_rotated() {
    let surveys = SurveyStore::new(Database::open_in_memory().unwrap());
    let org = Organization::new("Trust", Some(Blob::new(vec![1; 32])));
    surveys.insert_organization(&org).unwrap();

    let new_key = Blob::new(vec![2; 32]);
    surveys.set_master_key(&org.id, Some(&new_key)).unwrap();
    let loaded = surveys.get_organization(&org.id).unwrap().unwrap();
    assert_eq!(loaded.master_key, Some(new_key));

    surveys.set_master_key(&org.id, None).unwrap();
    assert_eq!(surveys.get_organization(&org.id).unwrap().unwrap().master_key, None);
}

#[test]
fn responses_keep_answers_and_ciphertext() {
    let db = Database::open_in_memory().unwrap();
    let responses = ResponseStore::new(db);
    let survey = Survey::new("Intake", UserId::new(), None);

    let mut answers = serde_json::Map::new();
    answers.insert("q1".into(), serde_json::json!("yes"));
    answers.insert("q2".into(), serde_json::json!(4));

    let mut with_demo = SurveyResponse::new(survey.id, Some(UserId::new()), answers.clone());
    with_demo.encrypted_demographics = Some(Blob::new(vec![0xEE; 64]));
    let without_demo = SurveyResponse::new(survey.id, None, answers.clone());
    responses.insert_response(&with_demo).unwrap();
    responses.insert_response(&without_demo).unwrap();

    let loaded = responses.get_response(&with_demo.id).unwrap().unwrap();
    assert_eq!(loaded.answers, answers);
    assert_eq!(loaded.encrypted_demographics, with_demo.encrypted_demographics);
    assert_eq!(loaded.submitted_by, with_demo.submitted_by);

    assert_eq!(responses.list_for_survey(&survey.id).unwrap().len(), 2);
    assert_eq!(responses.count_for_survey(&survey.id).unwrap(), 2);
}

#[test]
fn audit_entries_are_append_only() {
    let db = Database::open_in_memory().unwrap();
    let audit = AuditStore::new(db);
    let survey = Survey::new("Intake", UserId::new(), None);

    let first = audit_entry(&survey, AuditAction::Update);
    audit.append(&first).unwrap();
    audit.append(&audit_entry(&survey, AuditAction::KeyRecovery)).unwrap();

    // Same id again must not overwrite the stored row.
    let mut rewrite = first.clone();
    rewrite.action = AuditAction::Remove;
    assert!(audit.append(&rewrite).is_err());

    let entries = audit.entries_for_survey(&survey.id).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries.iter().find(|e| e.id == first.id).unwrap().action, AuditAction::Update);
    assert_eq!(audit.entries_with_action(AuditAction::KeyRecovery).unwrap().len(), 1);
    assert_eq!(audit.count().unwrap(), 2);
}

#[test]
fn audit_metadata_round_trips() {
    let audit = AuditStore::new(Database::open_in_memory().unwrap());
    let survey = Survey::new("Intake", UserId::new(), None);
    let entry = audit_entry(&survey, AuditAction::Update);
    audit.append(&entry).unwrap();

    let loaded = audit.entries_for_survey(&survey.id).unwrap().remove(0);
    assert_eq!(loaded.metadata, entry.metadata);
    assert_eq!(loaded.scope, AuditScope::Survey);
    assert_eq!(loaded.created_at.timestamp_millis(), entry.created_at.timestamp_millis());
}

#[test]
fn file_database_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("checktick.duckdb");
    let survey = Survey::new("Intake", UserId::new(), None);

    {
        let surveys = SurveyStore::new(Database::open(&path).unwrap());
        surveys.insert_survey(&survey).unwrap();
        surveys.commit_encryption(&survey.id, 0, &all_fields()).unwrap();
    }

    let surveys = SurveyStore::new(Database::open(&path).unwrap());
    let loaded = surveys.require_survey(&survey.id).unwrap();
    assert_eq!(loaded.encryption_version, 1);
    assert_eq!(loaded.wrapped, all_fields().wrapped);
}

#[test]
fn stores_share_one_in_memory_database() {
    let db = Database::open_in_memory().unwrap();
    let surveys = SurveyStore::new(db.clone());
    let again = SurveyStore::new(db);
    let survey = Survey::new("Intake", UserId::new(), None);
    surveys.insert_survey(&survey).unwrap();
    assert!(again.get_survey(&survey.id).unwrap().is_some());
}
