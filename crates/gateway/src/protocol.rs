// FleetPulse WebSocket Protocol
//
// Frame types exchanged with connected users.
//
// Protocol flow:
// 1. Client sends a "connect" request carrying its bearer token
// 2. Server responds with "hello-ok" for that request id
// 3. Bi-directional request/response communication
// 4. Server pushes events (notification, shutdown)

use fleetpulse_core::NotificationView;
use fleetpulse_notify::PushEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

pub const PROTOCOL_VERSION: u32 = 1;

/// Gateway frame - top-level message type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayFrame {
    #[serde(rename = "req")]
    Request(GatewayRequest),

    #[serde(rename = "res")]
    Response(GatewayResponse),

    #[serde(rename = "event")]
    Event(GatewayEvent),
}

/// Request frame from client to gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayRequest {
    /// Unique request ID
    pub id: String,

    /// Method name (e.g., "health", "notifications.list", "telemetry.submit")
    pub method: String,

    /// Method parameters
    #[serde(default)]
    pub params: JsonValue,
}

impl GatewayRequest {
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: JsonValue) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    /// Build the opening `connect` request
    pub fn connect(id: impl Into<String>, token: &str) -> Self {
        Self::new(id, "connect", serde_json::json!({ "token": token }))
    }
}

/// Response frame from gateway to client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayResponse {
    /// Request ID being responded to
    pub id: String,

    /// Success flag
    pub ok: bool,

    /// Response payload (if ok)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<JsonValue>,

    /// Error details (if not ok)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ProtocolError>,
}

impl GatewayResponse {
    pub fn ok(id: String, payload: JsonValue) -> Self {
        Self {
            id,
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn error(id: String, error: ProtocolError) -> Self {
        Self {
            id,
            ok: false,
            payload: None,
            error: Some(error),
        }
    }

    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }
}

/// Protocol error type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProtocolError {
    /// Error code
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Whether the request is retryable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,

    /// Retry after milliseconds (if retryable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl ProtocolError {
    // Standard error codes
    pub const INVALID_REQUEST: &'static str = "INVALID_REQUEST";
    pub const UNAUTHORIZED: &'static str = "UNAUTHORIZED";
    pub const NOT_FOUND: &'static str = "NOT_FOUND";
    pub const UNAVAILABLE: &'static str = "UNAVAILABLE";
    pub const INTERNAL_ERROR: &'static str = "INTERNAL_ERROR";

    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            retryable: None,
            retry_after_ms: None,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(Self::INVALID_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(Self::UNAUTHORIZED, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Self::NOT_FOUND, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(Self::UNAVAILABLE, message).with_retryable(1000)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Self::INTERNAL_ERROR, message)
    }

    pub fn with_retryable(mut self, retry_after_ms: u64) -> Self {
        self.retryable = Some(true);
        self.retry_after_ms = Some(retry_after_ms);
        self
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ProtocolError {}

/// Event frame from gateway to client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "payload")]
pub enum GatewayEvent {
    /// New notification for the connected user
    #[serde(rename = "notification")]
    Notification(NotificationView),

    /// Gateway shutting down
    #[serde(rename = "shutdown")]
    Shutdown(ShutdownEvent),
}

impl From<PushEvent> for GatewayEvent {
    fn from(event: PushEvent) -> Self {
        match event {
            PushEvent::Notification(view) => Self::Notification(view),
        }
    }
}

/// Shutdown event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShutdownEvent {
    /// Shutdown reason
    pub reason: String,

    /// Expected restart time (milliseconds)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_expected_ms: Option<u64>,
}

/// Hello-ok payload (response to connect request)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloOkPayload {
    /// Protocol version info
    pub protocol: ProtocolVersion,

    /// Authenticated user
    pub user_id: String,

    /// This connection's id
    pub connection_id: String,

    /// Unread notifications at connect time (absent if the store was unreachable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unread_count: Option<u64>,

    /// Server time (RFC 3339)
    pub server_time: String,

    /// Gateway policy
    pub policy: GatewayPolicy,
}

/// Protocol version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolVersion {
    /// Minimum supported version
    pub min: u32,

    /// Maximum supported version
    pub max: u32,
}

/// Gateway policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayPolicy {
    /// Maximum payload size
    pub max_payload: usize,

    /// Events buffered per connection before pushes start failing
    pub outbound_buffer: usize,

    /// Time allowed for the connect request (milliseconds)
    pub handshake_timeout_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetpulse_core::{NewNotification, NotificationRecord};
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let req = GatewayRequest::new("test-1", "health", JsonValue::Null);

        let req_json = serde_json::to_string(&req).unwrap();
        assert!(req_json.contains("\"method\":\"health\""));
        assert!(req_json.contains("\"id\":\"test-1\""));

        let frame = GatewayFrame::Request(req);
        let frame_json = serde_json::to_string(&frame).unwrap();
        assert!(frame_json.contains("\"type\":\"req\""));
        assert!(frame_json.contains("\"method\":\"health\""));
    }

    #[test]
    fn test_request_params_default_to_null() {
        let frame: GatewayFrame = serde_json::from_value(json!({
            "type": "req",
            "data": {"id": "1", "method": "notifications.unreadCount"}
        }))
        .unwrap();
        match frame {
            GatewayFrame::Request(req) => assert!(req.params.is_null()),
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[test]
    fn test_response_ok() {
        let res = GatewayResponse::ok("test-1".to_string(), json!({"status": "ok"}));

        let json = serde_json::to_string(&res).unwrap();
        assert!(json.contains("\"ok\":true"));
        assert!(json.contains("\"status\":\"ok\""));
    }

    #[test]
    fn test_response_error() {
        let res = GatewayResponse::error(
            "test-1".to_string(),
            ProtocolError::invalid_request("Invalid params"),
        );

        let json = serde_json::to_string(&res).unwrap();
        assert!(json.contains("\"ok\":false"));
        assert!(json.contains("\"code\":\"INVALID_REQUEST\""));
        assert_eq!(res.error_code(), Some(ProtocolError::INVALID_REQUEST));
    }

    #[test]
    fn test_unavailable_is_retryable() {
        let err = ProtocolError::unavailable("store down");
        assert_eq!(err.retryable, Some(true));
        assert_eq!(err.to_string(), "UNAVAILABLE: store down");
    }

    #[test]
    fn test_notification_event_frame() {
        let record = NotificationRecord::from_new("u1", NewNotification::new("t", "m"));
        let event = GatewayEvent::from(PushEvent::Notification(record.view()));
        let json = serde_json::to_value(GatewayFrame::Event(event)).unwrap();

        assert_eq!(json["type"], "event");
        assert_eq!(json["data"]["event"], "notification");
        assert_eq!(json["data"]["payload"]["id"], record.id.as_str());
        assert_eq!(json["data"]["payload"]["is_read"], false);
    }
}
