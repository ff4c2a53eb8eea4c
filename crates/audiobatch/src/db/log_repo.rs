//! Append-only per-file processing log.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::Serialize;

use super::{Database, DatabaseError};

/// One applied transition of a file record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingLogEntry {
    pub id: i64,
    pub file_record_id: String,
    pub batch_job_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_status: Option<String>,
    pub to_status: String,
    pub cause: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ProcessingLogEntry {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            file_record_id: row.get("file_record_id")?,
            batch_job_id: row.get("batch_job_id")?,
            from_status: row.get("from_status")?,
            to_status: row.get("to_status")?,
            cause: row.get("cause")?,
            error_code: row.get("error_code")?,
            message: row.get("message")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Fields of a log entry before it gets an id.
#[derive(Debug, Clone)]
pub struct NewLogEntry<'a> {
    pub file_record_id: &'a str,
    pub batch_job_id: &'a str,
    pub from_status: Option<&'a str>,
    pub to_status: &'a str,
    pub cause: &'a str,
    pub error_code: Option<&'a str>,
    pub message: Option<&'a str>,
}

pub fn append(db: &Database, entry: &NewLogEntry<'_>) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| append_with(conn, entry))
}

/// [`append`] on a caller's connection or transaction.
pub fn append_with(conn: &Connection, entry: &NewLogEntry<'_>) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO processing_logs (file_record_id, batch_job_id, from_status, to_status,
         cause, error_code, message, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            entry.file_record_id,
            entry.batch_job_id,
            entry.from_status,
            entry.to_status,
            entry.cause,
            entry.error_code,
            entry.message,
            Utc::now(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Log entries of a record, oldest first.
pub fn list_for_record(db: &Database, record_id: &str) -> Result<Vec<ProcessingLogEntry>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM processing_logs WHERE file_record_id = ?1 ORDER BY id")?;
        let rows = stmt
            .query_map(params![record_id], ProcessingLogEntry::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
