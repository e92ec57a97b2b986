//! Notification records and their wire representation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Default origin tag for notifications without an explicit source
pub const DEFAULT_SOURCE: &str = "system";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Success,
    #[default]
    Info,
    Warning,
    Error,
}

impl NotificationType {
    pub const ALL: [NotificationType; 4] = [
        NotificationType::Success,
        NotificationType::Info,
        NotificationType::Warning,
        NotificationType::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown notification type '{}'", other)),
        }
    }
}

/// Caller-supplied part of a notification
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub device_id: Option<String>,
    pub source: String,
    pub metadata: JsonValue,
}

impl NewNotification {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            notification_type: NotificationType::Info,
            title: title.into(),
            message: message.into(),
            device_id: None,
            source: DEFAULT_SOURCE.to_string(),
            metadata: JsonValue::Object(Default::default()),
        }
    }

    pub fn kind(mut self, notification_type: NotificationType) -> Self {
        self.notification_type = notification_type;
        self
    }

    pub fn device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Persisted notification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationRecord {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub device_id: Option<String>,
    pub source: String,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
}

impl NotificationRecord {
    /// Build an unread record with a fresh id; the store decides when it exists
    pub fn from_new(user_id: impl Into<String>, new: NewNotification) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            notification_type: new.notification_type,
            title: new.title,
            message: new.message,
            device_id: new.device_id,
            source: new.source,
            is_read: false,
            read_at: None,
            metadata: new.metadata,
            created_at: Utc::now(),
        }
    }

    pub fn view(&self) -> NotificationView {
        NotificationView::from(self)
    }
}

/// Shape pushed to clients and returned by read APIs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationView {
    pub id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub device_id: Option<String>,
    pub source: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    pub user_id: String,
}

impl From<&NotificationRecord> for NotificationView {
    fn from(record: &NotificationRecord) -> Self {
        Self {
            id: record.id.clone(),
            notification_type: record.notification_type,
            title: record.title.clone(),
            message: record.message.clone(),
            device_id: record.device_id.clone(),
            source: record.source.clone(),
            is_read: record.is_read,
            created_at: record.created_at,
            user_id: record.user_id.clone(),
        }
    }
}

/// Listing filter; results are newest first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationQuery {
    pub unread_only: bool,
    pub notification_type: Option<NotificationType>,
    pub limit: u32,
    pub offset: u32,
}

impl Default for NotificationQuery {
    fn default() -> Self {
        Self {
            unread_only: false,
            notification_type: None,
            limit: crate::config::DEFAULT_LIST_LIMIT,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TypeCounts {
    pub total: u64,
    pub unread: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct NotificationStats {
    pub total: u64,
    pub unread: u64,
    pub by_type: BTreeMap<NotificationType, TypeCounts>,
}

impl NotificationStats {
    pub fn record(&mut self, notification_type: NotificationType, total: u64, unread: u64) {
        let entry = self.by_type.entry(notification_type).or_default();
        entry.total += total;
        entry.unread += unread;
        self.total += total;
        self.unread += unread;
    }
}
