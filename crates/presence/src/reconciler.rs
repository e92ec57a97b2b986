// Presence Reconciler
//
// Brings the durable device table in line with the presence cache. Runs once
// at start and then on a fixed interval; only rows whose status differs are
// written, and a run is skipped outright when the cache cannot answer.

use crate::directory::{DeviceDirectory, DirectoryError};
use crate::tracker::{PresenceLookup, PresenceTracker};
use chrono::{DateTime, Utc};
use fleetpulse_core::DeviceStatus;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

/// Summary of one reconciliation pass
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ReconcileReport {
    pub started_at: DateTime<Utc>,
    /// Devices compared against the cache
    pub checked: usize,
    /// Rows written
    pub updated: usize,
    /// Rows whose write failed
    pub failed: usize,
    /// The pass did not compare anything (cache or directory unavailable)
    pub skipped: bool,
}

impl ReconcileReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            checked: 0,
            updated: 0,
            failed: 0,
            skipped: false,
        }
    }

    fn skipped(started_at: DateTime<Utc>) -> Self {
        Self {
            skipped: true,
            ..Self::new(started_at)
        }
    }
}

/// Result of reconciling a single device on demand
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum SyncOutcome {
    Updated {
        from: DeviceStatus,
        to: DeviceStatus,
    },
    Unchanged {
        status: DeviceStatus,
    },
    /// Cache unavailable; stored status left as is
    Skipped {
        status: DeviceStatus,
    },
}

struct ReconcilerTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct PresenceReconciler {
    tracker: Arc<PresenceTracker>,
    directory: Arc<dyn DeviceDirectory>,
    interval: Duration,
    task: Mutex<Option<ReconcilerTask>>,
}

impl PresenceReconciler {
    pub fn new(
        tracker: Arc<PresenceTracker>,
        directory: Arc<dyn DeviceDirectory>,
        interval: Duration,
    ) -> Self {
        Self {
            tracker,
            directory,
            interval,
            task: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Spawn the background loop. Returns `false` if it is already running.
    pub async fn start(self: &Arc<Self>) -> bool {
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            tracing::debug!("Presence reconciler already running");
            return false;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run_loop(shutdown_rx).await });
        *task = Some(ReconcilerTask { shutdown, handle });

        tracing::info!(
            "Presence reconciler started (interval {:?})",
            self.interval
        );
        true
    }

    /// Stop the loop. A pass already in progress finishes; no new pass starts
    /// after this returns. Returns `false` if nothing was running.
    pub async fn stop(&self) -> bool {
        let task = self.task.lock().await.take();
        let Some(task) = task else {
            return false;
        };

        let _ = task.shutdown.send(true);
        if let Err(e) = task.handle.await {
            tracing::error!("Presence reconciler task ended abnormally: {}", e);
        }
        tracing::info!("Presence reconciler stopped");
        true
    }

    pub async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    async fn run_loop(&self, mut shutdown: watch::Receiver<bool>) {
        // First tick completes immediately: that is the run at start.
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }
            if *shutdown.borrow() {
                break;
            }

            let report = self.run_once().await;
            if report.updated > 0 || report.failed > 0 {
                tracing::info!(
                    "Reconciled presence: {} checked, {} updated, {} failed",
                    report.checked,
                    report.updated,
                    report.failed
                );
            }
        }
    }

    /// One full pass over every known device
    pub async fn run_once(&self) -> ReconcileReport {
        let started_at = Utc::now();

        let devices = match self.directory.list_device_statuses().await {
            Ok(devices) => devices,
            Err(e) => {
                tracing::warn!("Skipping reconciliation, device listing failed: {}", e);
                return ReconcileReport::skipped(started_at);
            }
        };

        let mut report = ReconcileReport::new(started_at);
        if devices.is_empty() {
            return report;
        }

        let ids: Vec<String> = devices.iter().map(|(id, _)| id.clone()).collect();
        let presence = match self.tracker.lookup(&ids).await {
            PresenceLookup::Available(presence) => presence,
            PresenceLookup::Unavailable { reason } => {
                tracing::warn!("Skipping reconciliation, presence unavailable: {}", reason);
                return ReconcileReport::skipped(started_at);
            }
        };

        report.checked = devices.len();
        for (device_id, stored) in devices {
            let current = presence.get(&device_id).copied().unwrap_or_default();
            let desired = current.desired_status();
            if desired == stored {
                continue;
            }

            match self
                .directory
                .update_status(&device_id, desired, current.last_seen_at)
                .await
            {
                Ok(true) => {
                    tracing::debug!("Device {} {} -> {}", device_id, stored, desired);
                    report.updated += 1;
                }
                Ok(false) => {
                    tracing::debug!("Device {} disappeared during reconciliation", device_id);
                }
                Err(e) => {
                    tracing::warn!("Status write for {} failed: {}", device_id, e);
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Reconcile one device now instead of waiting for the next tick
    pub async fn sync_one(&self, device_id: &str) -> Result<SyncOutcome, ReconcileError> {
        let device = self
            .directory
            .get_device(device_id)
            .await?
            .ok_or_else(|| ReconcileError::DeviceNotFound(device_id.to_string()))?;

        let ids = [device_id.to_string()];
        let current = match self.tracker.lookup(&ids).await {
            PresenceLookup::Available(presence) => {
                presence.get(device_id).copied().unwrap_or_default()
            }
            PresenceLookup::Unavailable { .. } => {
                return Ok(SyncOutcome::Skipped {
                    status: device.status,
                });
            }
        };

        let desired = current.desired_status();
        if desired == device.status {
            return Ok(SyncOutcome::Unchanged { status: desired });
        }

        if !self
            .directory
            .update_status(device_id, desired, current.last_seen_at)
            .await?
        {
            return Err(ReconcileError::DeviceNotFound(device_id.to_string()));
        }

        tracing::info!("Device {} synced {} -> {}", device_id, device.status, desired);
        Ok(SyncOutcome::Updated {
            from: device.status,
            to: desired,
        })
    }
}
