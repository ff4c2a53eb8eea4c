//! Versioned schema changes, recorded in `_migrations`.

use rusqlite::{params, Connection};

use super::error::DatabaseError;

/// `(version, name, sql)`, ascending by version.
const MIGRATIONS: &[(u32, &str, &str)] = &[
    (1, "configuration", include_str!("sql/001_create_configuration.sql")),
    (2, "jobs_and_records", include_str!("sql/002_create_jobs_and_records.sql")),
    (3, "processing_logs", include_str!("sql/003_create_processing_logs.sql")),
    (4, "notification_deliveries", include_str!("sql/004_create_notification_deliveries.sql")),
];

pub fn latest_version() -> u32 {
    MIGRATIONS.last().map(|(v, _, _)| *v).unwrap_or(0)
}

/// Applies every migration newer than the recorded version. Each one and
/// its bookkeeping row commit together.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;
    let applied: u32 = conn.query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |r| r.get(0))?;

    for &(version, name, sql) in MIGRATIONS.iter().filter(|(v, _, _)| *v > applied) {
        log::info!("Applying schema migration {} ({})", version, name);
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(sql).map_err(|e| DatabaseError::Migration {
            version,
            reason: e.to_string(),
        })?;
        tx.execute(
            "INSERT INTO _migrations (version, name) VALUES (?1, ?2)",
            params![version, name],
        )?;
        tx.commit()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        conn
    }

    fn recorded(conn: &Connection) -> u32 {
        conn.query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn test_rerun_applies_nothing_new() {
        let conn = fresh();
        run_all(&conn).unwrap();
        run_all(&conn).unwrap();
        assert_eq!(recorded(&conn), latest_version());
    }

    #[test]
    fn test_schema_has_every_table() {
        let conn = fresh();
        run_all(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        for table in [
            "batch_jobs",
            "batch_settings",
            "external_folders",
            "file_records",
            "notification_configs",
            "notification_deliveries",
            "processing_logs",
        ] {
            assert!(tables.iter().any(|t| t == table), "missing table {}", table);
        }
    }

    #[test]
    fn test_deleting_a_folder_removes_its_jobs_and_records() {
        let conn = fresh();
        run_all(&conn).unwrap();

        conn.execute_batch(
            "INSERT INTO external_folders (id, name, storage_type, storage_config, monitor_type,
                monitor_config, processing_config, is_active, created_at, updated_at)
             VALUES ('f1', 'Folder', 'local', '{}', 'polling', '{}', '{}', 1, 'now', 'now');
             INSERT INTO batch_jobs (id, folder_id, name, status, options, created_at)
             VALUES ('j1', 'f1', 'Job', 'pending', '{}', 'now');
             INSERT INTO file_records (id, batch_job_id, folder_id, file_name, remote_path,
                status, created_at, updated_at)
             VALUES ('r1', 'j1', 'f1', 'a.mp3', 'a.mp3', 'queued', 'now', 'now');
             DELETE FROM external_folders WHERE id = 'f1';",
        )
        .unwrap();

        let jobs: u32 = conn.query_row("SELECT COUNT(*) FROM batch_jobs", [], |r| r.get(0)).unwrap();
        let records: u32 = conn.query_row("SELECT COUNT(*) FROM file_records", [], |r| r.get(0)).unwrap();
        assert_eq!((jobs, records), (0, 0));
    }
}
