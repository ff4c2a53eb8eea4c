//! Folder repository: CRUD for the `external_folders` table.

use rusqlite::{params, OptionalExtension, Row};
use serde_json::Value;

use super::{Database, DatabaseError};
use crate::config::{ExternalFolderConfig, ProcessingConfig, ProviderConfig};

fn from_row(row: &Row<'_>) -> Result<ExternalFolderConfig, rusqlite::Error> {
    let processing: Value = row.get("processing_config")?;
    let processing_config: ProcessingConfig = serde_json::from_value(processing)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))?;

    Ok(ExternalFolderConfig {
        id: row.get("id")?,
        name: row.get("name")?,
        storage_config: ProviderConfig::new(
            row.get::<_, String>("storage_type")?,
            row.get("storage_config")?,
        ),
        monitor_config: ProviderConfig::new(
            row.get::<_, String>("monitor_type")?,
            row.get("monitor_config")?,
        ),
        processing_config,
        is_active: row.get("is_active")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn processing_json(folder: &ExternalFolderConfig) -> Result<Value, DatabaseError> {
    serde_json::to_value(&folder.processing_config).map_err(|e| DatabaseError::Json {
        column: "processing_config",
        source: e,
    })
}

/// Inserts a new folder profile.
pub fn insert(db: &Database, folder: &ExternalFolderConfig) -> Result<(), DatabaseError> {
    let processing = processing_json(folder)?;
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO external_folders (id, name, storage_type, storage_config, monitor_type,
             monitor_config, processing_config, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                folder.id,
                folder.name,
                folder.storage_config.provider_type,
                folder.storage_config.config,
                folder.monitor_config.provider_type,
                folder.monitor_config.config,
                processing,
                folder.is_active,
                folder.created_at,
                folder.updated_at,
            ],
        )?;
        Ok(())
    })
}

/// Overwrites every field except `id` and `created_at`.
/// Returns false when no folder has that id.
pub fn update(db: &Database, folder: &ExternalFolderConfig) -> Result<bool, DatabaseError> {
    let processing = processing_json(folder)?;
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE external_folders SET name=?2, storage_type=?3, storage_config=?4,
             monitor_type=?5, monitor_config=?6, processing_config=?7, is_active=?8, updated_at=?9
             WHERE id=?1",
            params![
                folder.id,
                folder.name,
                folder.storage_config.provider_type,
                folder.storage_config.config,
                folder.monitor_config.provider_type,
                folder.monitor_config.config,
                processing,
                folder.is_active,
                folder.updated_at,
            ],
        )?;
        Ok(changed > 0)
    })
}

/// Finds a folder by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<ExternalFolderConfig>, DatabaseError> {
    db.with_conn(|conn| {
        let folder = conn
            .query_row(
                "SELECT * FROM external_folders WHERE id = ?1",
                params![id],
                from_row,
            )
            .optional()?;
        Ok(folder)
    })
}

/// Lists folders by name, optionally only the active ones.
pub fn list(db: &Database, active_only: bool) -> Result<Vec<ExternalFolderConfig>, DatabaseError> {
    db.with_conn(|conn| {
        let sql = if active_only {
            "SELECT * FROM external_folders WHERE is_active = 1 ORDER BY name"
        } else {
            "SELECT * FROM external_folders ORDER BY name"
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map([], from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Deletes a folder. Its jobs and records cascade with it.
pub fn delete(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute("DELETE FROM external_folders WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    })
}

pub fn count(db: &Database) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row("SELECT COUNT(*) FROM external_folders", [], |r| r.get(0))?;
        Ok(count)
    })
}
