//! Job repository: CRUD operations for the `batch_jobs` table.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::types::{ToSql, Type};
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use serde_json::Value;

use super::{Database, DatabaseError};
use crate::orchestrator::job::{BatchJob, JobCounters, JobOptions, JobStatus};

fn json_column<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, rusqlite::Error> {
    serde_json::from_value(value)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
}

fn from_row(row: &Row<'_>) -> Result<BatchJob, rusqlite::Error> {
    let status: String = row.get("status")?;
    let status: JobStatus = status
        .parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, e.into()))?;
    let options: JobOptions = json_column(row.get("options")?)?;
    let error_summary: Option<Value> = row.get("error_summary")?;
    let error_summary: Option<BTreeMap<String, u64>> =
        error_summary.map(json_column).transpose()?;

    Ok(BatchJob {
        id: row.get("id")?,
        folder_id: row.get("folder_id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        priority: row.get("priority")?,
        status,
        counters: JobCounters {
            total_files: row.get("total_files")?,
            processed_files: row.get("processed_files")?,
            failed_files: row.get("failed_files")?,
            skipped_files: row.get("skipped_files")?,
            cancelled_files: row.get("cancelled_files")?,
        },
        options,
        error_summary,
        started_at: row.get("started_at")?,
        completed_at: row.get("completed_at")?,
        created_at: row.get("created_at")?,
    })
}

/// Counters workers bump as records finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobCounter {
    Processed,
    Failed,
    Cancelled,
}

impl JobCounter {
    fn column(&self) -> &'static str {
        match self {
            Self::Processed => "processed_files",
            Self::Failed => "failed_files",
            Self::Cancelled => "cancelled_files",
        }
    }
}

/// Query filter parameters for job listing.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub folder_id: Option<String>,
    pub status: Option<JobStatus>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &BatchJob) -> Result<(), DatabaseError> {
    let options = serde_json::to_value(&job.options).map_err(|e| DatabaseError::Json {
        column: "options",
        source: e,
    })?;
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO batch_jobs (id, folder_id, name, description, priority, status,
             total_files, processed_files, failed_files, skipped_files, cancelled_files,
             options, error_summary, started_at, completed_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, NULL, ?13, ?14, ?15)",
            params![
                job.id,
                job.folder_id,
                job.name,
                job.description,
                job.priority,
                job.status.as_str(),
                job.counters.total_files,
                job.counters.processed_files,
                job.counters.failed_files,
                job.counters.skipped_files,
                job.counters.cancelled_files,
                options,
                job.started_at,
                job.completed_at,
                job.created_at,
            ],
        )?;
        Ok(())
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<BatchJob>, DatabaseError> {
    db.with_conn(|conn| {
        let job = conn
            .query_row("SELECT * FROM batch_jobs WHERE id = ?1", params![id], from_row)
            .optional()?;
        Ok(job)
    })
}

/// Queries jobs with filters, newest first, returning (rows, total_count).
pub fn query(db: &Database, filter: &JobFilter) -> Result<(Vec<BatchJob>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(ref folder_id) = filter.folder_id {
            conditions.push(format!("folder_id = ?{}", param_values.len() + 1));
            param_values.push(Box::new(folder_id.clone()));
        }
        if let Some(status) = filter.status {
            conditions.push(format!("status = ?{}", param_values.len() + 1));
            param_values.push(Box::new(status.as_str()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM batch_jobs {}", where_clause);
        let total: u64 = conn.query_row(
            &count_sql,
            params_from_iter(param_values.iter().map(|p| p.as_ref())),
            |r| r.get(0),
        )?;

        let limit = filter.limit.unwrap_or(100) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT * FROM batch_jobs {} ORDER BY created_at DESC, rowid DESC LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let mut stmt = conn.prepare(&query_sql)?;
        let rows = stmt
            .query_map(
                params_from_iter(param_values.iter().map(|p| p.as_ref())),
                from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

/// Jobs that have not reached a terminal status, oldest first.
pub fn list_active(db: &Database) -> Result<Vec<BatchJob>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM batch_jobs
             WHERE status IN ('pending', 'running', 'cancelling')
             ORDER BY created_at, rowid",
        )?;
        let rows = stmt
            .query_map([], from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// The non-terminal job for a folder, if there is one.
pub fn find_active_for_folder(db: &Database, folder_id: &str) -> Result<Option<BatchJob>, DatabaseError> {
    db.with_conn(|conn| {
        let job = conn
            .query_row(
                "SELECT * FROM batch_jobs
                 WHERE folder_id = ?1 AND status IN ('pending', 'running', 'cancelling')
                 ORDER BY created_at DESC LIMIT 1",
                params![folder_id],
                from_row,
            )
            .optional()?;
        Ok(job)
    })
}

/// Counts jobs with the given status.
pub fn count_by_status(db: &Database, status: JobStatus) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM batch_jobs WHERE status = ?1",
            params![status.as_str()],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Sets the admission totals once scanning is done.
pub fn set_totals(db: &Database, id: &str, total: u64, skipped: u64) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE batch_jobs SET total_files = ?2, skipped_files = ?3 WHERE id = ?1",
            params![id, total, skipped],
        )?;
        Ok(())
    })
}

/// Adds `delta` to one counter in a single statement, so concurrent
/// workers never lose an update.
pub fn increment(db: &Database, id: &str, counter: JobCounter, delta: i64) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!(
            "UPDATE batch_jobs SET {col} = MAX({col} + ?2, 0) WHERE id = ?1",
            col = counter.column()
        );
        conn.execute(&sql, params![id, delta])?;
        Ok(())
    })
}

/// Updates only the status of a job.
pub fn update_status(db: &Database, id: &str, status: JobStatus) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE batch_jobs SET status = ?2 WHERE id = ?1",
            params![id, status.as_str()],
        )?;
        Ok(())
    })
}

/// Moves a pending or running job to `cancelling`. Returns false when the
/// job is in any other state, including terminal ones.
pub fn request_cancel(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE batch_jobs SET status = 'cancelling'
             WHERE id = ?1 AND status IN ('pending', 'running')",
            params![id],
        )?;
        Ok(changed == 1)
    })
}

/// Moves a job to `running`, stamping `started_at` on first start and
/// clearing any earlier outcome. A `cancelling` job is left alone and
/// false is returned.
pub fn mark_running(db: &Database, id: &str, at: DateTime<Utc>) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE batch_jobs SET status = 'running', started_at = COALESCE(started_at, ?2),
             completed_at = NULL, error_summary = NULL WHERE id = ?1 AND status <> 'cancelling'",
            params![id, at],
        )?;
        Ok(changed == 1)
    })
}

/// Records a terminal status with its error summary.
pub fn finish(
    db: &Database,
    id: &str,
    status: JobStatus,
    error_summary: &BTreeMap<String, u64>,
    at: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    let summary = serde_json::to_value(error_summary).map_err(|e| DatabaseError::Json {
        column: "error_summary",
        source: e,
    })?;
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE batch_jobs SET status = ?2, error_summary = ?3, completed_at = ?4 WHERE id = ?1",
            params![id, status.as_str(), summary, at],
        )?;
        Ok(())
    })
}
