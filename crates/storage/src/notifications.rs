//! Notification feed persistence.

use crate::error::StorageError;
use crate::store::{from_micros, from_micros_opt, to_micros, SqliteStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetpulse_core::{NotificationQuery, NotificationRecord, NotificationStats, NotificationType};
use fleetpulse_notify::{NotificationStore, StoreError};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};

const NOTIFICATION_COLUMNS: &str =
    "id, user_id, type, title, message, device_id, source, is_read, read_at, metadata, created_at";

fn notification_from_row(row: &Row<'_>) -> Result<NotificationRecord, StorageError> {
    let kind: String = row.get(2)?;
    let metadata: String = row.get(9)?;
    Ok(NotificationRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        notification_type: kind
            .parse::<NotificationType>()
            .map_err(StorageError::corrupt)?,
        title: row.get(3)?,
        message: row.get(4)?,
        device_id: row.get(5)?,
        source: row.get(6)?,
        is_read: row.get(7)?,
        read_at: from_micros_opt(row.get(8)?)?,
        metadata: serde_json::from_str(&metadata).map_err(StorageError::corrupt)?,
        created_at: from_micros(row.get(10)?)?,
    })
}

fn select_notification(
    conn: &Connection,
    id: &str,
    user_id: &str,
) -> Result<Option<NotificationRecord>, StorageError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM notifications WHERE id = ?1 AND user_id = ?2",
        NOTIFICATION_COLUMNS
    ))?;
    let mut rows = stmt.query([id, user_id])?;
    match rows.next()? {
        Some(row) => Ok(Some(notification_from_row(row)?)),
        None => Ok(None),
    }
}

#[async_trait]
impl NotificationStore for SqliteStore {
    async fn insert(&self, record: &NotificationRecord) -> Result<(), StoreError> {
        let record = record.clone();
        Ok(self
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO notifications
                     (id, user_id, type, title, message, device_id, source, is_read, read_at, metadata, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5,
                             (SELECT id FROM devices WHERE id = ?6),
                             ?7, ?8, ?9, ?10, ?11)",
                    params![
                        record.id,
                        record.user_id,
                        record.notification_type.as_str(),
                        record.title,
                        record.message,
                        record.device_id,
                        record.source,
                        record.is_read,
                        record.read_at.map(to_micros),
                        record.metadata.to_string(),
                        to_micros(record.created_at),
                    ],
                )?;
                Ok(())
            })
            .await?)
    }

    async fn get(&self, id: &str, user_id: &str) -> Result<Option<NotificationRecord>, StoreError> {
        let (id, user_id) = (id.to_string(), user_id.to_string());
        Ok(self
            .call(move |conn| select_notification(conn, &id, &user_id))
            .await?)
    }

    async fn list(
        &self,
        user_id: &str,
        query: &NotificationQuery,
    ) -> Result<Vec<NotificationRecord>, StoreError> {
        let mut sql = format!(
            "SELECT {} FROM notifications WHERE user_id = ?",
            NOTIFICATION_COLUMNS
        );
        let mut args: Vec<Value> = vec![Value::Text(user_id.to_string())];
        if query.unread_only {
            sql.push_str(" AND is_read = 0");
        }
        if let Some(kind) = query.notification_type {
            sql.push_str(" AND type = ?");
            args.push(Value::Text(kind.as_str().to_string()));
        }
        sql.push_str(" ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?");
        args.push(Value::Integer(i64::from(query.limit)));
        args.push(Value::Integer(i64::from(query.offset)));

        Ok(self
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let mut rows = stmt.query(params_from_iter(args))?;
                let mut records = Vec::new();
                while let Some(row) = rows.next()? {
                    records.push(notification_from_row(row)?);
                }
                Ok(records)
            })
            .await?)
    }

    async fn mark_read(
        &self,
        id: &str,
        user_id: &str,
        read_at: DateTime<Utc>,
    ) -> Result<Option<NotificationRecord>, StoreError> {
        let (id, user_id) = (id.to_string(), user_id.to_string());
        Ok(self
            .call(move |conn| {
                conn.execute(
                    "UPDATE notifications SET is_read = 1, read_at = ?1
                     WHERE id = ?2 AND user_id = ?3 AND is_read = 0",
                    params![to_micros(read_at), id, user_id],
                )?;
                select_notification(conn, &id, &user_id)
            })
            .await?)
    }

    async fn mark_all_read(&self, user_id: &str, read_at: DateTime<Utc>) -> Result<u64, StoreError> {
        let user_id = user_id.to_string();
        Ok(self
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE notifications SET is_read = 1, read_at = ?1
                     WHERE user_id = ?2 AND is_read = 0",
                    params![to_micros(read_at), user_id],
                )?;
                Ok(changed as u64)
            })
            .await?)
    }

    async fn unread_count(&self, user_id: &str) -> Result<u64, StoreError> {
        let user_id = user_id.to_string();
        Ok(self
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND is_read = 0",
                    [&user_id],
                    |row| row.get(0),
                )?;
                Ok(count as u64)
            })
            .await?)
    }

    async fn stats_by_type(&self, user_id: &str) -> Result<NotificationStats, StoreError> {
        let user_id = user_id.to_string();
        Ok(self
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT type, COUNT(*), SUM(CASE WHEN is_read = 0 THEN 1 ELSE 0 END)
                     FROM notifications WHERE user_id = ?1 GROUP BY type",
                )?;
                let mut rows = stmt.query([&user_id])?;
                let mut stats = NotificationStats::default();
                while let Some(row) = rows.next()? {
                    let kind: String = row.get(0)?;
                    let total: i64 = row.get(1)?;
                    let unread: i64 = row.get(2)?;
                    stats.record(
                        kind.parse::<NotificationType>()
                            .map_err(StorageError::corrupt)?,
                        total as u64,
                        unread as u64,
                    );
                }
                Ok(stats)
            })
            .await?)
    }

    async fn delete(&self, id: &str, user_id: &str) -> Result<bool, StoreError> {
        let (id, user_id) = (id.to_string(), user_id.to_string());
        Ok(self
            .call(move |conn| {
                let removed = conn.execute(
                    "DELETE FROM notifications WHERE id = ?1 AND user_id = ?2",
                    [&id, &user_id],
                )?;
                Ok(removed > 0)
            })
            .await?)
    }

    async fn delete_all(&self, user_id: &str) -> Result<u64, StoreError> {
        let user_id = user_id.to_string();
        Ok(self
            .call(move |conn| {
                let removed =
                    conn.execute("DELETE FROM notifications WHERE user_id = ?1", [&user_id])?;
                Ok(removed as u64)
            })
            .await?)
    }
}
