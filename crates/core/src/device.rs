//! Device presence models shared by the cache, the reconciler and the durable store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Durable device status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    #[default]
    Offline,
}

impl DeviceStatus {
    pub fn from_presence(is_online: bool) -> Self {
        if is_online {
            Self::Online
        } else {
            Self::Offline
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(Self::Online),
            "offline" => Ok(Self::Offline),
            other => Err(format!("unknown device status '{}'", other)),
        }
    }
}

/// Row of the durable device table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceRecord {
    pub id: String,
    pub owner_user_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: String,
    pub status: DeviceStatus,
    pub updated_at: DateTime<Utc>,
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl DeviceRecord {
    pub fn new(
        id: impl Into<String>,
        owner_user_id: impl Into<String>,
        name: impl Into<String>,
        device_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            owner_user_id: owner_user_id.into(),
            name: name.into(),
            device_type: device_type.into(),
            status: DeviceStatus::Offline,
            updated_at: Utc::now(),
            last_seen_at: None,
        }
    }
}

/// Cache view of one device: online flag plus last-seen timestamp
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PresenceStatus {
    pub is_online: bool,
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl PresenceStatus {
    pub fn offline() -> Self {
        Self::default()
    }

    pub fn desired_status(&self) -> DeviceStatus {
        DeviceStatus::from_presence(self.is_online)
    }
}
