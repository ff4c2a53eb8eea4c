//! Append-only notification delivery outcomes.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use serde::Serialize;

use super::{Database, DatabaseError};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRow {
    pub id: i64,
    pub notification_id: String,
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_job_id: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DeliveryRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            notification_id: row.get("notification_id")?,
            event: row.get("event")?,
            batch_job_id: row.get("batch_job_id")?,
            success: row.get("success")?,
            message_id: row.get("message_id")?,
            error: row.get("error")?,
            created_at: row.get("created_at")?,
        })
    }
}

#[allow(clippy::too_many_arguments)]
pub fn append(
    db: &Database,
    notification_id: &str,
    event: &str,
    batch_job_id: Option<&str>,
    success: bool,
    message_id: Option<&str>,
    error: Option<&str>,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO notification_deliveries (notification_id, event, batch_job_id, success,
             message_id, error, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![notification_id, event, batch_job_id, success, message_id, error, Utc::now()],
        )?;
        Ok(())
    })
}

/// Deliveries fired for a job, oldest first.
pub fn list_for_job(db: &Database, job_id: &str) -> Result<Vec<DeliveryRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM notification_deliveries WHERE batch_job_id = ?1 ORDER BY id")?;
        let rows = stmt
            .query_map(params![job_id], DeliveryRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Most recent deliveries of one channel.
pub fn list_for_notification(
    db: &Database,
    notification_id: &str,
    limit: u64,
) -> Result<Vec<DeliveryRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM notification_deliveries WHERE notification_id = ?1
             ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![notification_id, limit as i64], DeliveryRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_list() {
        let db = Database::open_in_memory().unwrap();
        append(&db, "n1", "batch_completed", Some("j1"), true, Some("msg-1"), None).unwrap();
        append(&db, "n1", "file_failed", Some("j1"), false, None, Some("HTTP 500")).unwrap();
        append(&db, "n2", "system_alert", None, true, None, None).unwrap();

        let for_job = list_for_job(&db, "j1").unwrap();
        assert_eq!(for_job.len(), 2);
        assert!(for_job[0].success);
        assert_eq!(for_job[1].error.as_deref(), Some("HTTP 500"));

        let recent = list_for_notification(&db, "n1", 1).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].event, "file_failed");
    }
}
