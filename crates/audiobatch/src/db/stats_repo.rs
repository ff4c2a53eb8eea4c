//! Aggregate statistics over file records.

use rusqlite::params_from_iter;

use super::record_repo::filter_conditions;
use super::{Database, DatabaseError};
use crate::tracker::record::{ProcessingStats, RecordFilter};
use crate::tracker::status::FileStatus;

/// Counts per status, success rate and average duration of finished records.
pub fn processing_stats(db: &Database, filter: &RecordFilter) -> Result<ProcessingStats, DatabaseError> {
    db.with_conn(|conn| {
        let (where_clause, param_values) = filter_conditions(filter);

        let mut stats = ProcessingStats::default();

        let sql = format!(
            "SELECT status, COUNT(*) FROM file_records {} GROUP BY status",
            where_clause
        );
        let mut stmt = conn.prepare(&sql)?;
        let counts = stmt
            .query_map(
                params_from_iter(param_values.iter().map(|p| p.as_ref())),
                |r| Ok((r.get::<_, String>(0)?, r.get::<_, u64>(1)?)),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        for (status, count) in counts {
            match status.parse::<FileStatus>() {
                Ok(status) => stats.add_status(status, count),
                Err(e) => log::warn!("Ignoring {} records: {}", count, e),
            }
        }

        let sql = format!(
            "SELECT AVG(duration_ms), COALESCE(SUM(retry_count), 0) FROM file_records {}",
            where_clause
        );
        let (avg, retries): (Option<f64>, u64) = conn.query_row(
            &sql,
            params_from_iter(param_values.iter().map(|p| p.as_ref())),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        stats.average_duration_ms = avg;
        stats.total_retries = retries;

        stats.finish();
        Ok(stats)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params;

    fn seed(db: &Database) {
        db.with_conn(|conn| {
            conn.execute_batch(
                "INSERT INTO external_folders (id, name, storage_type, storage_config, monitor_type,
                    monitor_config, processing_config, is_active, created_at, updated_at)
                 VALUES ('f1', 'F', 'local', '{}', 'polling', '{}', '{}', 1, 'now', 'now');
                 INSERT INTO batch_jobs (id, folder_id, name, status, options, created_at)
                 VALUES ('j1', 'f1', 'J', 'running', '{}', 'now');
                 INSERT INTO batch_jobs (id, folder_id, name, status, options, created_at)
                 VALUES ('j2', 'f1', 'J', 'running', '{}', 'now');",
            )?;
            let rows = [
                ("r1", "j1", "completed", Some(100), 0),
                ("r2", "j1", "completed", Some(300), 1),
                ("r3", "j1", "failed", Some(50), 3),
                ("r4", "j1", "skipped", None, 0),
                ("r5", "j2", "queued", None, 0),
            ];
            for (id, job, status, duration, retries) in rows {
                conn.execute(
                    "INSERT INTO file_records (id, batch_job_id, folder_id, file_name, remote_path,
                     status, duration_ms, retry_count, created_at, updated_at)
                     VALUES (?1, ?2, 'f1', ?1, ?1, ?3, ?4, ?5, 'now', 'now')",
                    params![id, job, status, duration, retries],
                )?;
            }
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_stats_for_job() {
        let db = Database::open_in_memory().unwrap();
        seed(&db);

        let stats = processing_stats(
            &db,
            &RecordFilter {
                batch_job_id: Some("j1".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(stats.total, 4);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.total_retries, 4);
        assert_eq!(stats.average_duration_ms, Some(150.0));
        assert!((stats.success_rate - 200.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_stats_empty() {
        let db = Database::open_in_memory().unwrap();
        let stats = processing_stats(&db, &RecordFilter::default()).unwrap();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.average_duration_ms, None);
    }
}
