//! Typed business events.
//!
//! Each helper only shapes the title, message, source and metadata for one
//! kind of event and hands it to [`NotificationDispatcher::create_notification`].
//! A store failure is logged and reported as `None`; the operation that raised
//! the event carries on regardless.

use crate::dispatcher::NotificationDispatcher;
use fleetpulse_core::{DeviceRecord, DeviceStatus, NewNotification, NotificationRecord, NotificationType};
use serde_json::json;

pub const SOURCE_DEVICE_MANAGEMENT: &str = "device_management";
pub const SOURCE_AUTH: &str = "auth";
pub const SOURCE_COMMAND: &str = "command";
pub const SOURCE_PRESENCE: &str = "presence";
pub const SOURCE_TELEMETRY: &str = "telemetry";

impl NotificationDispatcher {
    async fn emit(&self, user_id: &str, notification: NewNotification) -> Option<NotificationRecord> {
        let title = notification.title.clone();
        match self.create_notification(user_id, notification).await {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::error!("Dropped '{}' notification for {}: {}", title, user_id, e);
                None
            }
        }
    }

    pub async fn device_created(&self, user_id: &str, device: &DeviceRecord) -> Option<NotificationRecord> {
        self.emit(
            user_id,
            NewNotification::new(
                "Device Created",
                format!("Device '{}' ({}) was added to your fleet", device.name, device.device_type),
            )
            .kind(NotificationType::Success)
            .device(&device.id)
            .source(SOURCE_DEVICE_MANAGEMENT)
            .metadata(json!({
                "action": "created",
                "device_name": device.name,
                "device_type": device.device_type,
            })),
        )
        .await
    }

    pub async fn device_updated(
        &self,
        user_id: &str,
        device: &DeviceRecord,
        changed: &[&str],
    ) -> Option<NotificationRecord> {
        let message = if changed.is_empty() {
            format!("Device '{}' was updated", device.name)
        } else {
            format!("Device '{}' was updated: {}", device.name, changed.join(", "))
        };
        self.emit(
            user_id,
            NewNotification::new("Device Updated", message)
                .kind(NotificationType::Info)
                .device(&device.id)
                .source(SOURCE_DEVICE_MANAGEMENT)
                .metadata(json!({
                    "action": "updated",
                    "device_name": device.name,
                    "changed_fields": changed,
                })),
        )
        .await
    }

    /// The device row is gone, so the id travels in metadata only
    pub async fn device_deleted(
        &self,
        user_id: &str,
        device_id: &str,
        device_name: &str,
    ) -> Option<NotificationRecord> {
        self.emit(
            user_id,
            NewNotification::new(
                "Device Deleted",
                format!("Device '{}' was removed from your fleet", device_name),
            )
            .kind(NotificationType::Warning)
            .source(SOURCE_DEVICE_MANAGEMENT)
            .metadata(json!({
                "action": "deleted",
                "device_id": device_id,
                "device_name": device_name,
            })),
        )
        .await
    }

    pub async fn device_status_changed(
        &self,
        user_id: &str,
        device: &DeviceRecord,
        from: DeviceStatus,
        to: DeviceStatus,
    ) -> Option<NotificationRecord> {
        let kind = match to {
            DeviceStatus::Online => NotificationType::Success,
            DeviceStatus::Offline => NotificationType::Warning,
        };
        self.emit(
            user_id,
            NewNotification::new(
                format!("Device {}", if to == DeviceStatus::Online { "Online" } else { "Offline" }),
                format!("Device '{}' is now {}", device.name, to),
            )
            .kind(kind)
            .device(&device.id)
            .source(SOURCE_PRESENCE)
            .metadata(json!({
                "previous_status": from,
                "status": to,
                "last_seen_at": device.last_seen_at,
            })),
        )
        .await
    }

    pub async fn login_success(&self, user_id: &str, remote_addr: Option<&str>) -> Option<NotificationRecord> {
        let message = match remote_addr {
            Some(addr) => format!("New sign-in from {}", addr),
            None => "New sign-in to your account".to_string(),
        };
        self.emit(
            user_id,
            NewNotification::new("Login Successful", message)
                .kind(NotificationType::Info)
                .source(SOURCE_AUTH)
                .metadata(json!({ "remote_addr": remote_addr })),
        )
        .await
    }

    pub async fn command_completed(
        &self,
        user_id: &str,
        device_id: &str,
        command: &str,
        success: bool,
        detail: Option<&str>,
    ) -> Option<NotificationRecord> {
        let (kind, title, verb) = if success {
            (NotificationType::Success, "Command Completed", "completed")
        } else {
            (NotificationType::Error, "Command Failed", "failed")
        };
        let mut message = format!("Command '{}' {} on device {}", command, verb, device_id);
        if let Some(detail) = detail {
            message.push_str(": ");
            message.push_str(detail);
        }
        self.emit(
            user_id,
            NewNotification::new(title, message)
                .kind(kind)
                .device(device_id)
                .source(SOURCE_COMMAND)
                .metadata(json!({
                    "command": command,
                    "success": success,
                    "detail": detail,
                })),
        )
        .await
    }

    pub async fn bulk_operation_summary(
        &self,
        user_id: &str,
        operation: &str,
        succeeded: usize,
        failed: usize,
    ) -> Option<NotificationRecord> {
        let kind = match (succeeded, failed) {
            (_, 0) => NotificationType::Success,
            (0, _) => NotificationType::Error,
            _ => NotificationType::Warning,
        };
        self.emit(
            user_id,
            NewNotification::new(
                "Bulk Operation Finished",
                format!(
                    "{}: {} succeeded, {} failed",
                    operation, succeeded, failed
                ),
            )
            .kind(kind)
            .source(SOURCE_DEVICE_MANAGEMENT)
            .metadata(json!({
                "operation": operation,
                "succeeded": succeeded,
                "failed": failed,
                "total": succeeded + failed,
            })),
        )
        .await
    }

    pub async fn telemetry_rejected(
        &self,
        user_id: &str,
        device_id: &str,
        reason: &str,
    ) -> Option<NotificationRecord> {
        self.emit(
            user_id,
            NewNotification::new(
                "Telemetry Rejected",
                format!("Telemetry from device {} was rejected: {}", device_id, reason),
            )
            .kind(NotificationType::Error)
            .device(device_id)
            .source(SOURCE_TELEMETRY)
            .metadata(json!({ "reason": reason })),
        )
        .await
    }
}
