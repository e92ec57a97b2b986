use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetpulse_core::{DeviceRecord, DeviceStatus};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("device directory unavailable: {0}")]
    Unavailable(String),
}

/// Durable device table as seen by the presence subsystem
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    async fn get_device(&self, device_id: &str) -> Result<Option<DeviceRecord>, DirectoryError>;

    async fn list_device_ids(&self) -> Result<Vec<String>, DirectoryError>;

    /// `(device_id, stored_status)` for every device
    async fn list_device_statuses(&self) -> Result<Vec<(String, DeviceStatus)>, DirectoryError>;

    /// Write a new status. Returns `false` if the device no longer exists.
    /// `last_seen_at = None` keeps the stored value.
    async fn update_status(
        &self,
        device_id: &str,
        status: DeviceStatus,
        last_seen_at: Option<DateTime<Utc>>,
    ) -> Result<bool, DirectoryError>;
}
