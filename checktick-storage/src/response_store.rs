//! Survey responses. Answers are stored in clear JSON, demographics only as
//! the ciphertext produced by the crypto layer.

use crate::error::StorageResult;
use crate::{from_millis, to_millis, Database};
use checktick_types::{Blob, ResponseId, SurveyId, SurveyResponse};
use duckdb::{params, Row};

const RESPONSE_COLUMNS: &str =
    "id, survey_id, submitted_by, encrypted_demographics, answers_json, submitted_at";

#[derive(Clone)]
pub struct ResponseStore {
    db: Database,
}

impl ResponseStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn insert_response(&self, response: &SurveyResponse) -> StorageResult<()> {
        let answers_json = serde_json::to_string(&response.answers)?;
        let conn = self.db.lock()?;
        conn.execute(
            &format!("INSERT INTO survey_responses ({RESPONSE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?)"),
            params![
                response.id.to_string(),
                response.survey_id.to_string(),
                response.submitted_by.map(|u| u.to_string()),
                response.encrypted_demographics.as_ref().map(Blob::to_storage),
                answers_json,
                to_millis(&response.submitted_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_response(&self, id: &ResponseId) -> StorageResult<Option<SurveyResponse>> {
        let conn = self.db.lock()?;
        let result = conn.query_row(
            &format!("SELECT {RESPONSE_COLUMNS} FROM survey_responses WHERE id = ?"),
            params![id.to_string()],
            read_row,
        );
        match result {
            Ok(raw) => raw_to_response(raw).map(Some),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Responses for a survey, oldest first.
    pub fn list_for_survey(&self, survey_id: &SurveyId) -> StorageResult<Vec<SurveyResponse>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RESPONSE_COLUMNS} FROM survey_responses \
             WHERE survey_id = ? ORDER BY submitted_at, id"
        ))?;
        let raws = stmt
            .query_map(params![survey_id.to_string()], read_row)?
            .collect::<Result<Vec<_>, _>>()?;
        raws.into_iter().map(raw_to_response).collect()
    }

    pub fn count_for_survey(&self, survey_id: &SurveyId) -> StorageResult<usize> {
        let conn = self.db.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM survey_responses WHERE survey_id = ?",
            params![survey_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

type RawResponse = (String, String, Option<String>, Option<Vec<u8>>, String, i64);

fn read_row(row: &Row<'_>) -> duckdb::Result<RawResponse> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn raw_to_response(raw: RawResponse) -> StorageResult<SurveyResponse> {
    let (id, survey_id, submitted_by, demographics, answers_json, submitted_at) = raw;
    Ok(SurveyResponse {
        id: id.parse()?,
        survey_id: survey_id.parse()?,
        submitted_by: submitted_by.map(|s| s.parse()).transpose()?,
        encrypted_demographics: demographics.map(Blob::from_storage),
        answers: serde_json::from_str(&answers_json)?,
        submitted_at: from_millis(submitted_at)?,
    })
}
