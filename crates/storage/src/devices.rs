//! Durable device table.

use crate::error::StorageError;
use crate::store::{from_micros, from_micros_opt, to_micros, SqliteStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetpulse_core::{DeviceRecord, DeviceStatus};
use fleetpulse_presence::{DeviceDirectory, DirectoryError};
use rusqlite::{params, Connection, Row};

const DEVICE_COLUMNS: &str =
    "id, owner_user_id, name, device_type, status, updated_at, last_seen_at";

fn device_from_row(row: &Row<'_>) -> Result<DeviceRecord, StorageError> {
    let status: String = row.get(4)?;
    Ok(DeviceRecord {
        id: row.get(0)?,
        owner_user_id: row.get(1)?,
        name: row.get(2)?,
        device_type: row.get(3)?,
        status: status.parse::<DeviceStatus>().map_err(StorageError::corrupt)?,
        updated_at: from_micros(row.get(5)?)?,
        last_seen_at: from_micros_opt(row.get(6)?)?,
    })
}

fn select_device(conn: &Connection, device_id: &str) -> Result<Option<DeviceRecord>, StorageError> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM devices WHERE id = ?1", DEVICE_COLUMNS))?;
    let mut rows = stmt.query([device_id])?;
    match rows.next()? {
        Some(row) => Ok(Some(device_from_row(row)?)),
        None => Ok(None),
    }
}

impl SqliteStore {
    pub async fn register_device(&self, device: &DeviceRecord) -> Result<(), StorageError> {
        let device = device.clone();
        self.call(move |conn| {
            let inserted = conn.execute(
                "INSERT INTO devices (id, owner_user_id, name, device_type, status, updated_at, last_seen_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO NOTHING",
                params![
                    device.id,
                    device.owner_user_id,
                    device.name,
                    device.device_type,
                    device.status.as_str(),
                    to_micros(device.updated_at),
                    device.last_seen_at.map(to_micros),
                ],
            )?;
            if inserted == 0 {
                return Err(StorageError::Conflict(format!("device {}", device.id)));
            }
            tracing::debug!("Registered device {} for {}", device.id, device.owner_user_id);
            Ok(())
        })
        .await
    }

    pub async fn device(&self, device_id: &str) -> Result<Option<DeviceRecord>, StorageError> {
        let device_id = device_id.to_string();
        self.call(move |conn| select_device(conn, &device_id)).await
    }

    pub async fn list_devices(&self, owner_user_id: &str) -> Result<Vec<DeviceRecord>, StorageError> {
        let owner = owner_user_id.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM devices WHERE owner_user_id = ?1 ORDER BY name, id",
                DEVICE_COLUMNS
            ))?;
            let mut rows = stmt.query([&owner])?;
            let mut devices = Vec::new();
            while let Some(row) = rows.next()? {
                devices.push(device_from_row(row)?);
            }
            Ok(devices)
        })
        .await
    }

    /// Rename a device the user owns; `None` if there is no such device
    pub async fn rename_device(
        &self,
        device_id: &str,
        owner_user_id: &str,
        name: &str,
    ) -> Result<Option<DeviceRecord>, StorageError> {
        let (device_id, owner, name) =
            (device_id.to_string(), owner_user_id.to_string(), name.to_string());
        self.call(move |conn| {
            let changed = conn.execute(
                "UPDATE devices SET name = ?1, updated_at = ?2 WHERE id = ?3 AND owner_user_id = ?4",
                params![name, to_micros(Utc::now()), device_id, owner],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            select_device(conn, &device_id)
        })
        .await
    }

    /// Delete a device the user owns and return what was removed. Its
    /// notifications stay, with the device reference cleared.
    pub async fn delete_device(
        &self,
        device_id: &str,
        owner_user_id: &str,
    ) -> Result<Option<DeviceRecord>, StorageError> {
        let (device_id, owner) = (device_id.to_string(), owner_user_id.to_string());
        self.call(move |conn| {
            let Some(device) = select_device(conn, &device_id)? else {
                return Ok(None);
            };
            if device.owner_user_id != owner {
                return Ok(None);
            }
            conn.execute("DELETE FROM devices WHERE id = ?1", [&device_id])?;
            tracing::info!("Deleted device {}", device_id);
            Ok(Some(device))
        })
        .await
    }
}

#[async_trait]
impl DeviceDirectory for SqliteStore {
    async fn get_device(&self, device_id: &str) -> Result<Option<DeviceRecord>, DirectoryError> {
        Ok(self.device(device_id).await?)
    }

    async fn list_device_ids(&self) -> Result<Vec<String>, DirectoryError> {
        Ok(self
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT id FROM devices ORDER BY id")?;
                let ids = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(ids)
            })
            .await?)
    }

    async fn list_device_statuses(&self) -> Result<Vec<(String, DeviceStatus)>, DirectoryError> {
        Ok(self
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT id, status FROM devices ORDER BY id")?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
                    .collect::<Result<Vec<_>, _>>()?;
                rows.into_iter()
                    .map(|(id, status)| -> Result<(String, DeviceStatus), StorageError> {
                        let status = status.parse::<DeviceStatus>().map_err(StorageError::corrupt)?;
                        Ok((id, status))
                    })
                    .collect()
            })
            .await?)
    }

    async fn update_status(
        &self,
        device_id: &str,
        status: DeviceStatus,
        last_seen_at: Option<DateTime<Utc>>,
    ) -> Result<bool, DirectoryError> {
        let device_id = device_id.to_string();
        Ok(self
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE devices
                     SET status = ?1, updated_at = ?2, last_seen_at = COALESCE(?3, last_seen_at)
                     WHERE id = ?4",
                    params![
                        status.as_str(),
                        to_micros(Utc::now()),
                        last_seen_at.map(to_micros),
                        device_id
                    ],
                )?;
                Ok(changed > 0)
            })
            .await?)
    }
}
