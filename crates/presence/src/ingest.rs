// Telemetry Ingestion Hook
//
// Every accepted telemetry point doubles as a heartbeat. The point is written
// first; the presence refresh comes after and never fails the ingest.

use crate::tracker::PresenceTracker;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetpulse_core::TelemetryPoint;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid telemetry: {0}")]
    Invalid(String),
    #[error("telemetry sink failed: {0}")]
    Sink(String),
}

/// Where accepted points end up
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn write_point(&self, point: &TelemetryPoint) -> Result<(), IngestError>;
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IngestReceipt {
    pub device_id: String,
    pub accepted_at: DateTime<Utc>,
    /// Whether the presence cache took the heartbeat
    pub presence_recorded: bool,
}

pub struct TelemetryIngestor {
    sink: Arc<dyn TelemetrySink>,
    presence: Arc<PresenceTracker>,
}

impl TelemetryIngestor {
    pub fn new(sink: Arc<dyn TelemetrySink>, presence: Arc<PresenceTracker>) -> Self {
        Self { sink, presence }
    }

    fn validate(point: &TelemetryPoint) -> Result<(), IngestError> {
        if point.device_id.trim().is_empty() {
            return Err(IngestError::Invalid("device_id is empty".to_string()));
        }
        if point.metrics.is_empty() {
            return Err(IngestError::Invalid(format!(
                "no metrics for device {}",
                point.device_id
            )));
        }
        if let Some((name, _)) = point.metrics.iter().find(|(_, v)| !v.is_finite()) {
            return Err(IngestError::Invalid(format!(
                "metric '{}' is not a finite number",
                name
            )));
        }
        Ok(())
    }

    pub async fn ingest(&self, point: &TelemetryPoint) -> Result<IngestReceipt, IngestError> {
        Self::validate(point)?;
        self.sink.write_point(point).await?;

        let presence_recorded = self.presence.mark_online(&point.device_id).await;
        tracing::debug!(
            "Ingested {} metrics from {}",
            point.metrics.len(),
            point.device_id
        );

        Ok(IngestReceipt {
            device_id: point.device_id.clone(),
            accepted_at: Utc::now(),
            presence_recorded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryPresenceStore;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSink {
        points: Mutex<Vec<TelemetryPoint>>,
        fail: bool,
    }

    #[async_trait]
    impl TelemetrySink for RecordingSink {
        async fn write_point(&self, point: &TelemetryPoint) -> Result<(), IngestError> {
            if self.fail {
                return Err(IngestError::Sink("disk full".to_string()));
            }
            self.points.lock().unwrap().push(point.clone());
            Ok(())
        }
    }

    fn ingestor(sink: Arc<RecordingSink>, store: &MemoryPresenceStore) -> (TelemetryIngestor, Arc<PresenceTracker>) {
        let tracker = Arc::new(PresenceTracker::new(
            Arc::new(store.clone()),
            Duration::from_secs(60),
            Duration::from_millis(500),
        ));
        (TelemetryIngestor::new(sink, tracker.clone()), tracker)
    }

    #[tokio::test]
    async fn test_ingest_marks_device_online() {
        let sink = Arc::new(RecordingSink::default());
        let store = MemoryPresenceStore::new();
        let (ingestor, tracker) = ingestor(sink.clone(), &store);

        let point = TelemetryPoint::new("d1").metric("temp", 21.5);
        let receipt = ingestor.ingest(&point).await.unwrap();

        assert_eq!(receipt.device_id, "d1");
        assert!(receipt.presence_recorded);
        assert!(tracker.is_online("d1").await);
        assert_eq!(sink.points.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cache_outage_does_not_fail_ingest() {
        let sink = Arc::new(RecordingSink::default());
        let store = MemoryPresenceStore::new();
        store.set_reachable(false);
        let (ingestor, _tracker) = ingestor(sink.clone(), &store);

        let receipt = ingestor
            .ingest(&TelemetryPoint::new("d1").metric("temp", 1.0))
            .await
            .unwrap();
        assert!(!receipt.presence_recorded);
        assert_eq!(sink.points.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_points_are_not_heartbeats() {
        let sink = Arc::new(RecordingSink::default());
        let store = MemoryPresenceStore::new();
        let (ingestor, tracker) = ingestor(sink.clone(), &store);

        let empty = TelemetryPoint::new("d1");
        assert!(matches!(ingestor.ingest(&empty).await, Err(IngestError::Invalid(_))));

        let nan = TelemetryPoint::new("d1").metric("temp", f64::NAN);
        assert!(matches!(ingestor.ingest(&nan).await, Err(IngestError::Invalid(_))));

        let anonymous = TelemetryPoint::new("  ").metric("temp", 1.0);
        assert!(matches!(ingestor.ingest(&anonymous).await, Err(IngestError::Invalid(_))));

        assert!(!tracker.is_online("d1").await);
        assert!(sink.points.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sink_failure_skips_presence() {
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..Default::default()
        });
        let store = MemoryPresenceStore::new();
        let (ingestor, tracker) = ingestor(sink, &store);

        let result = ingestor
            .ingest(&TelemetryPoint::new("d1").metric("temp", 1.0))
            .await;
        assert!(matches!(result, Err(IngestError::Sink(_))));
        assert!(!tracker.is_online("d1").await);
    }
}
