//! Telemetry samples. A plain append-only table standing in for a
//! time-series backend.

use crate::error::StorageError;
use crate::store::{from_micros, to_micros, SqliteStore};
use async_trait::async_trait;
use fleetpulse_core::TelemetryPoint;
use fleetpulse_presence::{IngestError, TelemetrySink};
use rusqlite::params;

impl SqliteStore {
    /// Most recent samples for a device, newest first
    pub async fn recent_telemetry(
        &self,
        device_id: &str,
        limit: u32,
    ) -> Result<Vec<TelemetryPoint>, StorageError> {
        let device_id = device_id.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT device_id, recorded_at, metrics, tags FROM telemetry
                 WHERE device_id = ?1 ORDER BY recorded_at DESC, id DESC LIMIT ?2",
            )?;
            let mut rows = stmt.query(params![device_id, limit])?;
            let mut points = Vec::new();
            while let Some(row) = rows.next()? {
                let metrics: String = row.get(2)?;
                let tags: String = row.get(3)?;
                points.push(TelemetryPoint {
                    device_id: row.get(0)?,
                    recorded_at: from_micros(row.get(1)?)?,
                    metrics: serde_json::from_str(&metrics).map_err(StorageError::corrupt)?,
                    tags: serde_json::from_str(&tags).map_err(StorageError::corrupt)?,
                });
            }
            Ok(points)
        })
        .await
    }
}

#[async_trait]
impl TelemetrySink for SqliteStore {
    async fn write_point(&self, point: &TelemetryPoint) -> Result<(), IngestError> {
        let metrics = serde_json::to_string(&point.metrics)
            .map_err(|e| IngestError::Invalid(e.to_string()))?;
        let tags =
            serde_json::to_string(&point.tags).map_err(|e| IngestError::Invalid(e.to_string()))?;
        let (device_id, recorded_at) = (point.device_id.clone(), to_micros(point.recorded_at));

        Ok(self
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO telemetry (device_id, recorded_at, metrics, tags)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![device_id, recorded_at, metrics, tags],
                )?;
                Ok(())
            })
            .await?)
    }
}
