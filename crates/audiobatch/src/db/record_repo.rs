//! Record repository: persistence for the `file_records` table.

use std::collections::{BTreeMap, HashSet};

use rusqlite::types::{ToSql, Type};
use rusqlite::{params, params_from_iter, OptionalExtension, Row};

use super::{Database, DatabaseError};
use crate::tracker::error_code::ErrorCode;
use crate::tracker::record::{FileProcessingRecord, Pagination, RecordFilter, RecordSort};
use crate::tracker::status::FileStatus;

fn conversion_error(index: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, message.into())
}

fn from_row(row: &Row<'_>) -> Result<FileProcessingRecord, rusqlite::Error> {
    let status: String = row.get("status")?;
    let status: FileStatus = status.parse().map_err(|e| conversion_error(0, e))?;
    let error_code: Option<String> = row.get("error_code")?;
    let error_code = error_code
        .map(|c| c.parse::<ErrorCode>())
        .transpose()
        .map_err(|e| conversion_error(0, e))?;

    Ok(FileProcessingRecord {
        id: row.get("id")?,
        batch_job_id: row.get("batch_job_id")?,
        folder_id: row.get("folder_id")?,
        file_name: row.get("file_name")?,
        remote_path: row.get("remote_path")?,
        local_path: row.get("local_path")?,
        file_size: row.get::<_, Option<i64>>("file_size")?.map(|s| s.max(0) as u64),
        status,
        error_code,
        error_message: row.get("error_message")?,
        error_details: row.get("error_details")?,
        retry_count: row.get("retry_count")?,
        max_retries: row.get("max_retries")?,
        processing_started_at: row.get("processing_started_at")?,
        processing_completed_at: row.get("processing_completed_at")?,
        duration_ms: row.get("duration_ms")?,
        result_ref: row.get("result_ref")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

const INSERT_SQL: &str = "INSERT INTO file_records (id, batch_job_id, folder_id, file_name,
    remote_path, local_path, file_size, status, error_code, error_message, error_details,
    retry_count, max_retries, processing_started_at, processing_completed_at, duration_ms,
    result_ref, created_at, updated_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)";

/// Inserts on a caller's connection or transaction.
pub fn insert_with(conn: &rusqlite::Connection, r: &FileProcessingRecord) -> Result<(), DatabaseError> {
    conn.execute(
        INSERT_SQL,
        params![
            r.id,
            r.batch_job_id,
            r.folder_id,
            r.file_name,
            r.remote_path,
            r.local_path,
            r.file_size.map(|s| s as i64),
            r.status.as_str(),
            r.error_code.map(|c| c.as_str()),
            r.error_message,
            r.error_details,
            r.retry_count,
            r.max_retries,
            r.processing_started_at,
            r.processing_completed_at,
            r.duration_ms,
            r.result_ref,
            r.created_at,
            r.updated_at,
        ],
    )?;
    Ok(())
}

/// Inserts a single record.
pub fn insert(db: &Database, record: &FileProcessingRecord) -> Result<(), DatabaseError> {
    db.with_conn(|conn| insert_with(conn, record))
}

/// Inserts records in one transaction, preserving their order.
pub fn insert_many(db: &Database, records: &[FileProcessingRecord]) -> Result<(), DatabaseError> {
    db.with_tx(|tx| {
        for record in records {
            insert_with(tx, record)?;
        }
        Ok(())
    })
}

/// Overwrites every mutable field of a record.
pub fn update(db: &Database, r: &FileProcessingRecord) -> Result<(), DatabaseError> {
    db.with_conn(|conn| update_with(conn, r))
}

/// [`update`] on a caller's connection or transaction.
pub fn update_with(conn: &rusqlite::Connection, r: &FileProcessingRecord) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE file_records SET local_path=?2, file_size=?3, status=?4, error_code=?5,
         error_message=?6, error_details=?7, retry_count=?8, max_retries=?9,
         processing_started_at=?10, processing_completed_at=?11, duration_ms=?12,
         result_ref=?13, updated_at=?14
         WHERE id=?1",
        params![
            r.id,
            r.local_path,
            r.file_size.map(|s| s as i64),
            r.status.as_str(),
            r.error_code.map(|c| c.as_str()),
            r.error_message,
            r.error_details,
            r.retry_count,
            r.max_retries,
            r.processing_started_at,
            r.processing_completed_at,
            r.duration_ms,
            r.result_ref,
            r.updated_at,
        ],
    )?;
    Ok(())
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<FileProcessingRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let record = conn
            .query_row("SELECT * FROM file_records WHERE id = ?1", params![id], from_row)
            .optional()?;
        Ok(record)
    })
}

/// Builds WHERE conditions for a record filter. Placeholders are numbered
/// from `?1` in the order of the returned values.
pub(crate) fn filter_conditions(filter: &RecordFilter) -> (String, Vec<Box<dyn ToSql>>) {
    let mut conditions = Vec::new();
    let mut param_values: Vec<Box<dyn ToSql>> = Vec::new();

    if let Some(ref job_id) = filter.batch_job_id {
        conditions.push(format!("batch_job_id = ?{}", param_values.len() + 1));
        param_values.push(Box::new(job_id.clone()));
    }
    if let Some(ref folder_id) = filter.folder_id {
        conditions.push(format!("folder_id = ?{}", param_values.len() + 1));
        param_values.push(Box::new(folder_id.clone()));
    }
    if let Some(status) = filter.status {
        conditions.push(format!("status = ?{}", param_values.len() + 1));
        param_values.push(Box::new(status.as_str()));
    }
    if let Some(code) = filter.error_code {
        conditions.push(format!("error_code = ?{}", param_values.len() + 1));
        param_values.push(Box::new(code.as_str()));
    }
    if let Some(ref name) = filter.file_name {
        conditions.push(format!(
            "LOWER(file_name) LIKE ?{}",
            param_values.len() + 1
        ));
        param_values.push(Box::new(format!("%{}%", name.to_lowercase())));
    }
    if let Some(from) = filter.from_date {
        conditions.push(format!("created_at >= ?{}", param_values.len() + 1));
        param_values.push(Box::new(from));
    }
    if let Some(to) = filter.to_date {
        conditions.push(format!("created_at <= ?{}", param_values.len() + 1));
        param_values.push(Box::new(to));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };
    (where_clause, param_values)
}

/// Queries records with filters, returning (rows, total_count).
pub fn query(
    db: &Database,
    filter: &RecordFilter,
    page: Pagination,
    sort: RecordSort,
) -> Result<(Vec<FileProcessingRecord>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let (where_clause, mut param_values) = filter_conditions(filter);

        let count_sql = format!("SELECT COUNT(*) FROM file_records {}", where_clause);
        let total: u64 = conn.query_row(
            &count_sql,
            params_from_iter(param_values.iter().map(|p| p.as_ref())),
            |r| r.get(0),
        )?;

        param_values.push(Box::new(page.limit as i64));
        param_values.push(Box::new(page.offset as i64));
        // Sort columns come from a closed enum, never from input text.
        let query_sql = format!(
            "SELECT * FROM file_records {} ORDER BY {} {}, id LIMIT ?{} OFFSET ?{}",
            where_clause,
            sort.field.column(),
            if sort.descending { "DESC" } else { "ASC" },
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

/// Records of a job in any of `statuses`, in admission order.
pub fn list_for_job(
    db: &Database,
    job_id: &str,
    statuses: &[FileStatus],
) -> Result<Vec<FileProcessingRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let placeholders: Vec<String> = (0..statuses.len()).map(|i| format!("?{}", i + 2)).collect();
        let sql = format!(
            "SELECT * FROM file_records WHERE batch_job_id = ?1 AND status IN ({})
             ORDER BY rowid",
            placeholders.join(", ")
        );
        let mut values: Vec<&dyn ToSql> = vec![&job_id];
        let names: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
        values.extend(names.iter().map(|n| n as &dyn ToSql));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values), from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Records in any of `statuses` across every job.
pub fn list_by_status(
    db: &Database,
    statuses: &[FileStatus],
) -> Result<Vec<FileProcessingRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let placeholders: Vec<String> = (0..statuses.len()).map(|i| format!("?{}", i + 1)).collect();
        let sql = format!(
            "SELECT * FROM file_records WHERE status IN ({}) ORDER BY rowid",
            placeholders.join(", ")
        );
        let names: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(names), from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Remote paths of a folder that already reached a final verdict in some
/// job: completed, failed, or rejected at admission. Records skipped by a
/// cancel never ran and do not count.
pub fn settled_remote_paths(db: &Database, folder_id: &str) -> Result<HashSet<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT DISTINCT remote_path FROM file_records
             WHERE folder_id = ?1
               AND (status IN ('completed', 'failed')
                    OR (status = 'skipped' AND COALESCE(error_code, '') <> 'CANCELLED'))",
        )?;
        let paths = stmt
            .query_map(params![folder_id], |r| r.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(paths)
    })
}

/// Failed records of a job grouped by error code.
pub fn error_summary(db: &Database, job_id: &str) -> Result<BTreeMap<String, u64>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT COALESCE(error_code, 'UNKNOWN_ERROR'), COUNT(*) FROM file_records
             WHERE batch_job_id = ?1 AND status = 'failed' GROUP BY 1",
        )?;
        let summary = stmt
            .query_map(params![job_id], |r| Ok((r.get::<_, String>(0)?, r.get::<_, u64>(1)?)))?
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        Ok(summary)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::job_repo;
    use crate::orchestrator::job::{BatchJob, JobOptions};
    use crate::tracker::record::{NewRecord, RecordSortField};
    use chrono::Utc;

    fn setup() -> (Database, BatchJob) {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO external_folders (id, name, storage_type, storage_config, monitor_type,
                 monitor_config, processing_config, is_active, created_at, updated_at)
                 VALUES ('f1', 'F', 'local', '{}', 'polling', '{}', '{}', 1, ?1, ?1)",
                params![Utc::now()],
            )?;
            Ok(())
        })
        .unwrap();
        let job = BatchJob::new("f1", "Job", &JobOptions::default());
        job_repo::insert(&db, &job).unwrap();
        (db, job)
    }

    fn record(job: &BatchJob, name: &str) -> FileProcessingRecord {
        NewRecord {
            batch_job_id: job.id.clone(),
            folder_id: job.folder_id.clone(),
            file_name: name.to_string(),
            remote_path: format!("in/{}", name),
            file_size: Some(100),
            max_retries: 3,
        }
        .into_record()
    }

    #[test]
    fn test_insert_update_find() {
        let (db, job) = setup();
        let mut r = record(&job, "a.mp3");
        insert(&db, &r).unwrap();

        r.status = FileStatus::Failed;
        r.error_code = Some(ErrorCode::Timeout);
        r.error_details = Some(serde_json::json!({"attempt": 1}));
        update(&db, &r).unwrap();

        let found = find_by_id(&db, &r.id).unwrap().unwrap();
        assert_eq!(found.status, FileStatus::Failed);
        assert_eq!(found.error_code, Some(ErrorCode::Timeout));
        assert_eq!(found.error_details, r.error_details);
        assert_eq!(found.file_size, Some(100));
    }

    #[test]
    fn test_list_for_job_keeps_admission_order() {
        let (db, job) = setup();
        let records: Vec<_> = ["c.mp3", "a.mp3", "b.mp3"]
            .iter()
            .map(|n| record(&job, n))
            .collect();
        insert_many(&db, &records).unwrap();

        let listed = list_for_job(&db, &job.id, &[FileStatus::Discovered]).unwrap();
        let names: Vec<_> = listed.iter().map(|r| r.file_name.as_str()).collect();
        assert_eq!(names, vec!["c.mp3", "a.mp3", "b.mp3"]);
        assert!(list_for_job(&db, &job.id, &[FileStatus::Queued]).unwrap().is_empty());
    }

    #[test]
    fn test_query_filter_sort_and_page() {
        let (db, job) = setup();
        for name in ["b.mp3", "a.mp3", "c.wav", "d.mp3"] {
            insert(&db, &record(&job, name)).unwrap();
        }

        let filter = RecordFilter {
            file_name: Some("MP3".to_string()),
            ..Default::default()
        };
        let sort = RecordSort {
            field: RecordSortField::FileName,
            descending: false,
        };
        let (rows, total) = query(&db, &filter, Pagination { limit: 2, offset: 0 }, sort).unwrap();
        assert_eq!(total, 3);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].file_name, "a.mp3");
        assert_eq!(rows[1].file_name, "b.mp3");
    }

    #[test]
    fn test_settled_paths_and_error_summary() {
        let (db, job) = setup();
        let mut done = record(&job, "done.mp3");
        done.status = FileStatus::Completed;
        let mut bad = record(&job, "bad.mp3");
        bad.status = FileStatus::Failed;
        bad.error_code = Some(ErrorCode::ConnectionFailed);
        let mut bad2 = record(&job, "bad2.mp3");
        bad2.status = FileStatus::Failed;
        bad2.error_code = Some(ErrorCode::ConnectionFailed);
        insert_many(&db, &[done, bad, bad2]).unwrap();

        let mut rejected = record(&job, "notes.pdf");
        rejected.status = FileStatus::Skipped;
        rejected.error_code = Some(ErrorCode::ValidationFailed);
        let mut cancelled = record(&job, "later.mp3");
        cancelled.status = FileStatus::Skipped;
        cancelled.error_code = Some(ErrorCode::Cancelled);
        insert_many(&db, &[rejected, cancelled, record(&job, "queued.mp3")]).unwrap();

        let paths = settled_remote_paths(&db, "f1").unwrap();
        let mut sorted: Vec<_> = paths.iter().map(String::as_str).collect();
        sorted.sort();
        assert_eq!(sorted, ["in/bad.mp3", "in/bad2.mp3", "in/done.mp3", "in/notes.pdf"]);

        let summary = error_summary(&db, &job.id).unwrap();
        assert_eq!(summary.get("CONNECTION_FAILED"), Some(&2));
    }

    #[test]
    fn test_list_by_status_across_jobs() {
        let (db, job) = setup();
        let mut r = record(&job, "x.mp3");
        r.status = FileStatus::Downloading;
        insert(&db, &r).unwrap();
        insert(&db, &record(&job, "y.mp3")).unwrap();

        let stuck = list_by_status(&db, &[FileStatus::Downloading, FileStatus::Processing]).unwrap();
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].id, r.id);
    }
}
