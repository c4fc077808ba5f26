//! Storage error types.

use thiserror::Error;

/// Errors raised by the DuckDB repositories.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] duckdb::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid identifier in row: {0}")]
    InvalidId(#[from] uuid::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Another encryption setup committed between load and commit.
    #[error("survey {survey_id} changed concurrently (expected version {expected})")]
    Conflict { survey_id: String, expected: i64 },

    #[error("connection lock poisoned: {0}")]
    Lock(String),
}

pub type StorageResult<T> = Result<T, StorageError>;
