// Gateway Method Handlers
//
// Each handler returns the response payload or an `anyhow::Error` wrapping a
// `ProtocolError`; anything else surfaces as INTERNAL_ERROR.

use crate::protocol::{GatewayRequest, ProtocolError};
use crate::session::GatewaySession;
use anyhow::Result;
use fleetpulse_core::{
    DeviceRecord, DeviceStatus, NotificationQuery, NotificationType, NotificationView,
    NotificationsConfig, TelemetryPoint,
};
use fleetpulse_notify::{ConnectionRegistry, NotificationDispatcher, NotifyError};
use fleetpulse_presence::{
    IngestError, PresenceLookup, PresenceReconciler, PresenceTracker, ReconcileError,
    SyncOutcome, TelemetryIngestor,
};
use fleetpulse_storage::{SqliteStore, StorageError};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

const DEFAULT_TELEMETRY_LIMIT: u32 = 20;
const MAX_TELEMETRY_LIMIT: u32 = 500;

fn fail(error: ProtocolError) -> anyhow::Error {
    anyhow::Error::new(error)
}

/// Turn a handler error into the wire error
pub(crate) fn to_protocol_error(err: anyhow::Error) -> ProtocolError {
    match err.downcast::<ProtocolError>() {
        Ok(protocol) => protocol,
        Err(other) => ProtocolError::internal(other.to_string()),
    }
}

fn notify_failure(err: NotifyError) -> anyhow::Error {
    match err {
        NotifyError::NotFound(id) => fail(ProtocolError::not_found(format!(
            "Notification not found: {}",
            id
        ))),
        NotifyError::InvalidInput(reason) => fail(ProtocolError::invalid_request(reason)),
        NotifyError::Store(e) => {
            tracing::warn!("Notification store error: {}", e);
            fail(ProtocolError::unavailable("Notification store unavailable"))
        }
    }
}

fn storage_failure(err: StorageError) -> anyhow::Error {
    match err {
        StorageError::Conflict(what) => {
            fail(ProtocolError::invalid_request(format!("Already exists: {}", what)))
        }
        other => {
            tracing::warn!("Storage error: {}", other);
            fail(ProtocolError::unavailable("Device store unavailable"))
        }
    }
}

fn parse_params<T: DeserializeOwned>(request: &GatewayRequest) -> Result<T> {
    let params = if request.params.is_null() {
        json!({})
    } else {
        request.params.clone()
    };
    serde_json::from_value(params).map_err(|e| {
        fail(ProtocolError::invalid_request(format!(
            "Invalid params for {}: {}",
            request.method, e
        )))
    })
}

fn require_non_empty<'a>(field: &str, value: &'a str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(fail(ProtocolError::invalid_request(format!(
            "'{}' cannot be empty",
            field
        ))));
    }
    Ok(trimmed)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ListParams {
    unread_only: bool,
    #[serde(rename = "type")]
    notification_type: Option<NotificationType>,
    limit: Option<u32>,
    offset: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct IdParams {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RegisterDeviceParams {
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(rename = "type")]
    device_type: String,
}

#[derive(Debug, Deserialize)]
struct RenameDeviceParams {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct BulkDeleteParams {
    ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RecentTelemetryParams {
    device_id: String,
    #[serde(default)]
    limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct CommandReportParams {
    device_id: String,
    command: String,
    success: bool,
    #[serde(default)]
    detail: Option<String>,
}

pub struct MethodHandlers {
    store: Arc<SqliteStore>,
    tracker: Arc<PresenceTracker>,
    reconciler: Arc<PresenceReconciler>,
    dispatcher: Arc<NotificationDispatcher>,
    ingestor: TelemetryIngestor,
    notifications: NotificationsConfig,
    started_at: Instant,
}

impl MethodHandlers {
    pub fn new(
        store: Arc<SqliteStore>,
        tracker: Arc<PresenceTracker>,
        reconciler: Arc<PresenceReconciler>,
        dispatcher: Arc<NotificationDispatcher>,
        notifications: NotificationsConfig,
    ) -> Self {
        let ingestor = TelemetryIngestor::new(store.clone(), tracker.clone());
        Self {
            store,
            tracker,
            reconciler,
            dispatcher,
            ingestor,
            notifications,
            started_at: Instant::now(),
        }
    }

    pub fn dispatcher(&self) -> &Arc<NotificationDispatcher> {
        &self.dispatcher
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        self.dispatcher.registry()
    }

    pub fn store(&self) -> &Arc<SqliteStore> {
        &self.store
    }

    fn uptime_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    /// Fetch a device owned by the session's user. Devices owned by someone
    /// else read as missing.
    async fn owned_device(&self, session: &GatewaySession, device_id: &str) -> Result<DeviceRecord> {
        match self.store.device(device_id).await.map_err(storage_failure)? {
            Some(device) if device.owner_user_id == session.user_id => Ok(device),
            _ => Err(fail(ProtocolError::not_found(format!(
                "Device not found: {}",
                device_id
            )))),
        }
    }

    /// Handle health check
    pub async fn health(&self, _session: &GatewaySession, _request: &GatewayRequest) -> Result<JsonValue> {
        Ok(json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_ms": self.uptime_ms(),
            "presence_backend": self.tracker.backend(),
            "connected_users": self.registry().connected_count().await,
        }))
    }

    /// Handle status request
    pub async fn status(&self, session: &GatewaySession, _request: &GatewayRequest) -> Result<JsonValue> {
        Ok(json!({
            "uptime_ms": self.uptime_ms(),
            "user_id": session.user_id,
            "connection_id": session.id,
            "connected_at": session.connected_at.to_rfc3339(),
            "connected_users": self.registry().connected_count().await,
            "reconciler_running": self.reconciler.is_running().await,
            "reconcile_interval_secs": self.reconciler.interval().as_secs(),
            "presence_ttl_secs": self.tracker.ttl().as_secs(),
        }))
    }

    pub async fn notifications_list(
        &self,
        session: &GatewaySession,
        request: &GatewayRequest,
    ) -> Result<JsonValue> {
        let params: ListParams = parse_params(request)?;
        let query = NotificationQuery {
            unread_only: params.unread_only,
            notification_type: params.notification_type,
            limit: self.notifications.effective_limit(params.limit),
            offset: params.offset.unwrap_or(0),
        };

        let records = self
            .dispatcher
            .list_notifications(&session.user_id, &query)
            .await
            .map_err(notify_failure)?;
        let views: Vec<NotificationView> = records.iter().map(NotificationView::from).collect();

        Ok(json!({
            "notifications": views,
            "limit": query.limit,
            "offset": query.offset,
        }))
    }

    pub async fn notifications_read(
        &self,
        session: &GatewaySession,
        request: &GatewayRequest,
    ) -> Result<JsonValue> {
        let params: IdParams = parse_params(request)?;
        let record = self
            .dispatcher
            .mark_read(&params.id, &session.user_id)
            .await
            .map_err(notify_failure)?;
        Ok(serde_json::to_value(record.view())?)
    }

    pub async fn notifications_read_all(
        &self,
        session: &GatewaySession,
        _request: &GatewayRequest,
    ) -> Result<JsonValue> {
        let updated = self
            .dispatcher
            .mark_all_read(&session.user_id)
            .await
            .map_err(notify_failure)?;
        Ok(json!({ "updated": updated }))
    }

    pub async fn notifications_unread_count(
        &self,
        session: &GatewaySession,
        _request: &GatewayRequest,
    ) -> Result<JsonValue> {
        let count = self
            .dispatcher
            .unread_count(&session.user_id)
            .await
            .map_err(notify_failure)?;
        Ok(json!({ "count": count }))
    }

    pub async fn notifications_stats(
        &self,
        session: &GatewaySession,
        _request: &GatewayRequest,
    ) -> Result<JsonValue> {
        let stats = self
            .dispatcher
            .stats_by_type(&session.user_id)
            .await
            .map_err(notify_failure)?;
        Ok(serde_json::to_value(stats)?)
    }

    pub async fn notifications_delete(
        &self,
        session: &GatewaySession,
        request: &GatewayRequest,
    ) -> Result<JsonValue> {
        let params: IdParams = parse_params(request)?;
        self.dispatcher
            .delete_notification(&params.id, &session.user_id)
            .await
            .map_err(notify_failure)?;
        Ok(json!({ "deleted": 1 }))
    }

    pub async fn notifications_clear(
        &self,
        session: &GatewaySession,
        _request: &GatewayRequest,
    ) -> Result<JsonValue> {
        let deleted = self
            .dispatcher
            .clear_notifications(&session.user_id)
            .await
            .map_err(notify_failure)?;
        Ok(json!({ "deleted": deleted }))
    }

    /// Devices owned by the user, with live presence
    pub async fn device_list(&self, session: &GatewaySession, _request: &GatewayRequest) -> Result<JsonValue> {
        let devices = self
            .store
            .list_devices(&session.user_id)
            .await
            .map_err(storage_failure)?;
        let ids: Vec<String> = devices.iter().map(|d| d.id.clone()).collect();
        let presence = self.tracker.batch_status(&ids).await;

        let entries: Vec<JsonValue> = devices
            .iter()
            .map(|device| {
                let live = presence.get(&device.id).copied().unwrap_or_default();
                json!({
                    "id": device.id,
                    "name": device.name,
                    "type": device.device_type,
                    "status": device.status,
                    "is_online": live.is_online,
                    "last_seen_at": live.last_seen_at.or(device.last_seen_at),
                })
            })
            .collect();
        Ok(json!({ "devices": entries }))
    }

    pub async fn device_register(
        &self,
        session: &GatewaySession,
        request: &GatewayRequest,
    ) -> Result<JsonValue> {
        let params: RegisterDeviceParams = parse_params(request)?;
        let name = require_non_empty("name", &params.name)?;
        let device_type = require_non_empty("type", &params.device_type)?;
        let id = match params.id.as_deref() {
            Some(id) => require_non_empty("id", id)?.to_string(),
            None => Uuid::new_v4().to_string(),
        };

        let device = DeviceRecord::new(id, &session.user_id, name, device_type);
        self.store
            .register_device(&device)
            .await
            .map_err(storage_failure)?;
        self.dispatcher.device_created(&session.user_id, &device).await;

        Ok(serde_json::to_value(device)?)
    }

    pub async fn device_rename(
        &self,
        session: &GatewaySession,
        request: &GatewayRequest,
    ) -> Result<JsonValue> {
        let params: RenameDeviceParams = parse_params(request)?;
        let name = require_non_empty("name", &params.name)?;
        let device = self
            .store
            .rename_device(&params.id, &session.user_id, name)
            .await
            .map_err(storage_failure)?
            .ok_or_else(|| fail(ProtocolError::not_found(format!("Device not found: {}", params.id))))?;

        self.dispatcher
            .device_updated(&session.user_id, &device, &["name"])
            .await;
        Ok(serde_json::to_value(device)?)
    }

    pub async fn device_delete(
        &self,
        session: &GatewaySession,
        request: &GatewayRequest,
    ) -> Result<JsonValue> {
        let params: IdParams = parse_params(request)?;
        let device = self
            .store
            .delete_device(&params.id, &session.user_id)
            .await
            .map_err(storage_failure)?
            .ok_or_else(|| fail(ProtocolError::not_found(format!("Device not found: {}", params.id))))?;

        self.tracker.forget(&device.id).await;
        self.dispatcher
            .device_deleted(&session.user_id, &device.id, &device.name)
            .await;
        Ok(json!({ "deleted": device.id }))
    }

    /// Delete several devices; one summary notification instead of one per device
    pub async fn device_bulk_delete(
        &self,
        session: &GatewaySession,
        request: &GatewayRequest,
    ) -> Result<JsonValue> {
        let params: BulkDeleteParams = parse_params(request)?;
        if params.ids.is_empty() {
            return Err(fail(ProtocolError::invalid_request("'ids' cannot be empty")));
        }

        let mut deleted = Vec::new();
        let mut failed = Vec::new();
        for id in &params.ids {
            match self.store.delete_device(id, &session.user_id).await {
                Ok(Some(device)) => {
                    self.tracker.forget(&device.id).await;
                    deleted.push(device.id);
                }
                Ok(None) => failed.push(id.clone()),
                Err(e) => {
                    tracing::warn!("Bulk delete of {} failed: {}", id, e);
                    failed.push(id.clone());
                }
            }
        }

        self.dispatcher
            .bulk_operation_summary(&session.user_id, "Delete devices", deleted.len(), failed.len())
            .await;
        Ok(json!({ "deleted": deleted, "failed": failed }))
    }

    /// Cache first; the stored row answers when the cache cannot
    pub async fn device_status(
        &self,
        session: &GatewaySession,
        request: &GatewayRequest,
    ) -> Result<JsonValue> {
        let params: IdParams = parse_params(request)?;
        let device = self.owned_device(session, &params.id).await?;

        let ids = [device.id.clone()];
        let payload = match self.tracker.lookup(&ids).await {
            PresenceLookup::Available(presence) => {
                let live = presence.get(&device.id).copied().unwrap_or_default();
                json!({
                    "device_id": device.id,
                    "status": live.desired_status(),
                    "is_online": live.is_online,
                    "last_seen_at": live.last_seen_at.or(device.last_seen_at),
                    "source": "cache",
                })
            }
            PresenceLookup::Unavailable { .. } => json!({
                "device_id": device.id,
                "status": device.status,
                "is_online": device.status == DeviceStatus::Online,
                "last_seen_at": device.last_seen_at,
                "source": "store",
            }),
        };
        Ok(payload)
    }

    /// Reconcile one device now
    pub async fn device_sync(&self, session: &GatewaySession, request: &GatewayRequest) -> Result<JsonValue> {
        let params: IdParams = parse_params(request)?;
        let device = self.owned_device(session, &params.id).await?;

        let outcome = self.reconciler.sync_one(&device.id).await.map_err(|e| match e {
            ReconcileError::DeviceNotFound(id) => {
                fail(ProtocolError::not_found(format!("Device not found: {}", id)))
            }
            ReconcileError::Directory(e) => {
                tracing::warn!("Device sync failed: {}", e);
                fail(ProtocolError::unavailable("Device store unavailable"))
            }
        })?;

        if let SyncOutcome::Updated { from, to } = outcome {
            let refreshed = match self.store.device(&device.id).await {
                Ok(Some(refreshed)) => refreshed,
                _ => device.clone(),
            };
            self.dispatcher
                .device_status_changed(&session.user_id, &refreshed, from, to)
                .await;
        }

        Ok(json!({ "device_id": device.id, "result": outcome }))
    }

    pub async fn telemetry_submit(
        &self,
        session: &GatewaySession,
        request: &GatewayRequest,
    ) -> Result<JsonValue> {
        let point: TelemetryPoint = parse_params(request)?;
        self.owned_device(session, &point.device_id).await?;

        match self.ingestor.ingest(&point).await {
            Ok(receipt) => Ok(serde_json::to_value(receipt)?),
            Err(IngestError::Invalid(reason)) => {
                self.dispatcher
                    .telemetry_rejected(&session.user_id, &point.device_id, &reason)
                    .await;
                Err(fail(ProtocolError::invalid_request(reason)))
            }
            Err(IngestError::Sink(reason)) => {
                tracing::warn!("Telemetry sink failed for {}: {}", point.device_id, reason);
                Err(fail(ProtocolError::unavailable("Telemetry store unavailable")))
            }
        }
    }

    pub async fn telemetry_recent(
        &self,
        session: &GatewaySession,
        request: &GatewayRequest,
    ) -> Result<JsonValue> {
        let params: RecentTelemetryParams = parse_params(request)?;
        self.owned_device(session, &params.device_id).await?;

        let limit = params
            .limit
            .unwrap_or(DEFAULT_TELEMETRY_LIMIT)
            .clamp(1, MAX_TELEMETRY_LIMIT);
        let points = self
            .store
            .recent_telemetry(&params.device_id, limit)
            .await
            .map_err(storage_failure)?;
        Ok(json!({ "device_id": params.device_id, "points": points }))
    }

    /// A device (or its operator) reports the result of a command
    pub async fn command_report(
        &self,
        session: &GatewaySession,
        request: &GatewayRequest,
    ) -> Result<JsonValue> {
        let params: CommandReportParams = parse_params(request)?;
        let command = require_non_empty("command", &params.command)?;
        self.owned_device(session, &params.device_id).await?;

        let record = self
            .dispatcher
            .command_completed(
                &session.user_id,
                &params.device_id,
                command,
                params.success,
                params.detail.as_deref(),
            )
            .await;
        Ok(json!({
            "recorded": record.is_some(),
            "notification_id": record.map(|r| r.id),
        }))
    }
}
