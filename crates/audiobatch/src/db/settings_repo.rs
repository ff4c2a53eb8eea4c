//! Key/value settings stored as JSON in `batch_settings`.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde_json::Value;

use super::{Database, DatabaseError};

/// Reads a settings value by key.
pub fn get(db: &Database, key: &str) -> Result<Option<Value>, DatabaseError> {
    db.with_conn(|conn| {
        let value = conn
            .query_row(
                "SELECT value FROM batch_settings WHERE key = ?1",
                params![key],
                |r| r.get::<_, Value>(0),
            )
            .optional()?;
        Ok(value)
    })
}

/// Inserts or replaces a settings value.
pub fn put(db: &Database, key: &str, value: &Value) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO batch_settings (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, Utc::now()],
        )?;
        Ok(())
    })
}
