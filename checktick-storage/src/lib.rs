//! DuckDB persistence for CheckTick survey encryption.
//!
//! Stores the records the encryption subsystem reads and writes:
//!
//! - surveys with their wrapped KEKs, recovery hint and legacy key hash
//! - organizations and their escrow keys
//! - federated identities used for automatic unlock
//! - responses, with demographics only ever as ciphertext
//! - the append-only audit log
//!
//! All stores share one [`Database`] handle so that an in-memory database is
//! visible to every store and setup commits are serialized on one connection.
//! Byte columns are read and written through `Blob::from_storage` /
//! `Blob::to_storage` only.

mod audit_store;
mod error;
mod response_store;
mod schema;
mod survey_store;

pub use audit_store::AuditStore;
pub use error::{StorageError, StorageResult};
pub use response_store::ResponseStore;
pub use survey_store::{EncryptionFields, SurveyStore};

use chrono::{DateTime, Utc};
use duckdb::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

/// Shared DuckDB connection with the encryption schema applied.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens or creates a database file.
    pub fn open(path: &Path) -> StorageResult<Self> {
        Self::open_with_limits(path, "256MB", 2)
    }

    /// Opens a database file with explicit DuckDB resource limits.
    pub fn open_with_limits(path: &Path, memory_limit: &str, threads: u32) -> StorageResult<Self> {
        let conn = open_duckdb_with_wal_recovery(path, memory_limit, threads)?;
        schema::initialize(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory database (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::Lock(e.to_string()))
    }
}

/// Open a DuckDB connection with stale WAL recovery and resource limits.
///
/// If the initial open fails and a `.wal` file exists alongside the database,
/// it is removed and the open is retried once.
pub fn open_duckdb_with_wal_recovery(
    path: &Path,
    memory_limit: &str,
    threads: u32,
) -> StorageResult<Connection> {
    let conn = match Connection::open(path) {
        Ok(c) => c,
        Err(first_err) => {
            let wal_path = path.with_extension(
                path.extension()
                    .map(|ext| format!("{}.wal", ext.to_string_lossy()))
                    .unwrap_or_else(|| "wal".to_string()),
            );
            if wal_path.exists() {
                warn!(wal = %wal_path.display(), "DuckDB open failed, removing stale WAL and retrying");
                if std::fs::remove_file(&wal_path).is_ok() {
                    let c = Connection::open(path)?;
                    apply_resource_limits(&c, memory_limit, threads)?;
                    return Ok(c);
                }
            }
            return Err(first_err.into());
        }
    };
    apply_resource_limits(&conn, memory_limit, threads)?;
    Ok(conn)
}

fn apply_resource_limits(conn: &Connection, memory_limit: &str, threads: u32) -> StorageResult<()> {
    conn.execute_batch(&format!(
        "PRAGMA memory_limit='{}'; PRAGMA threads={};",
        memory_limit.replace('\'', ""),
        threads
    ))?;
    Ok(())
}

pub(crate) fn to_millis(at: &DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> StorageResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StorageError::Corrupt(format!("timestamp out of range: {ms}")))
}
