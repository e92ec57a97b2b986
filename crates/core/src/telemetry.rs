use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One telemetry sample submitted by a device
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryPoint {
    pub device_id: String,
    #[serde(default = "Utc::now")]
    pub recorded_at: DateTime<Utc>,
    pub metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl TelemetryPoint {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            recorded_at: Utc::now(),
            metrics: BTreeMap::new(),
            tags: BTreeMap::new(),
        }
    }

    pub fn metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}
