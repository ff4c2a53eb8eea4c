//! Notification channel repository: CRUD for `notification_configs`.

use rusqlite::{params, OptionalExtension, Row};
use serde_json::Value;

use super::{Database, DatabaseError};
use crate::config::{NotificationCondition, NotificationConfig};

fn from_row(row: &Row<'_>) -> Result<NotificationConfig, rusqlite::Error> {
    let conditions: Value = row.get("conditions")?;
    let conditions: Vec<NotificationCondition> = serde_json::from_value(conditions)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))?;

    Ok(NotificationConfig {
        id: row.get("id")?,
        notification_type: row.get("notification_type")?,
        name: row.get("name")?,
        config: row.get("config")?,
        conditions,
        is_active: row.get("is_active")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn conditions_json(notification: &NotificationConfig) -> Result<Value, DatabaseError> {
    serde_json::to_value(&notification.conditions).map_err(|e| DatabaseError::Json {
        column: "conditions",
        source: e,
    })
}

pub fn insert(db: &Database, notification: &NotificationConfig) -> Result<(), DatabaseError> {
    let conditions = conditions_json(notification)?;
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO notification_configs (id, notification_type, name, config, conditions,
             is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                notification.id,
                notification.notification_type,
                notification.name,
                notification.config,
                conditions,
                notification.is_active,
                notification.created_at,
                notification.updated_at,
            ],
        )?;
        Ok(())
    })
}

pub fn update(db: &Database, notification: &NotificationConfig) -> Result<bool, DatabaseError> {
    let conditions = conditions_json(notification)?;
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE notification_configs SET notification_type=?2, name=?3, config=?4,
             conditions=?5, is_active=?6, updated_at=?7 WHERE id=?1",
            params![
                notification.id,
                notification.notification_type,
                notification.name,
                notification.config,
                conditions,
                notification.is_active,
                notification.updated_at,
            ],
        )?;
        Ok(changed > 0)
    })
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<NotificationConfig>, DatabaseError> {
    db.with_conn(|conn| {
        let found = conn
            .query_row(
                "SELECT * FROM notification_configs WHERE id = ?1",
                params![id],
                from_row,
            )
            .optional()?;
        Ok(found)
    })
}

pub fn list(db: &Database, active_only: bool) -> Result<Vec<NotificationConfig>, DatabaseError> {
    db.with_conn(|conn| {
        let sql = if active_only {
            "SELECT * FROM notification_configs WHERE is_active = 1 ORDER BY name"
        } else {
            "SELECT * FROM notification_configs ORDER BY name"
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map([], from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

pub fn delete(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute("DELETE FROM notification_configs WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    })
}

pub fn count(db: &Database) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 =
            conn.query_row("SELECT COUNT(*) FROM notification_configs", [], |r| r.get(0))?;
        Ok(count)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NewNotification, NotificationEvent};
    use serde_json::json;

    fn sample(name: &str, active: bool) -> NotificationConfig {
        NewNotification {
            notification_type: "webhook".to_string(),
            name: name.to_string(),
            config: json!({"webhookUrl": "https://hooks.example.com/x"}),
            conditions: vec![NotificationCondition::on(NotificationEvent::BatchCompleted)],
            is_active: active,
        }
        .into_config()
    }

    #[test]
    fn test_insert_and_find_keeps_conditions() {
        let db = Database::open_in_memory().unwrap();
        let n = sample("Ops", true);
        insert(&db, &n).unwrap();

        let found = find_by_id(&db, &n.id).unwrap().unwrap();
        assert_eq!(found.conditions, n.conditions);
        assert_eq!(found.config, n.config);
    }

    #[test]
    fn test_list_active_only() {
        let db = Database::open_in_memory().unwrap();
        insert(&db, &sample("On", true)).unwrap();
        insert(&db, &sample("Off", false)).unwrap();

        let active = list(&db, true).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "On");
        assert_eq!(count(&db).unwrap(), 2);
    }

    #[test]
    fn test_update_and_delete() {
        let db = Database::open_in_memory().unwrap();
        let mut n = sample("Ops", true);
        insert(&db, &n).unwrap();

        n.conditions.clear();
        assert!(update(&db, &n).unwrap());
        assert!(find_by_id(&db, &n.id).unwrap().unwrap().conditions.is_empty());

        assert!(delete(&db, &n.id).unwrap());
        assert!(find_by_id(&db, &n.id).unwrap().is_none());
    }
}
