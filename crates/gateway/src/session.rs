// Gateway Session
//
// Per-connection identity, handed to every method handler.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Authenticated gateway connection
#[derive(Debug, Clone)]
pub struct GatewaySession {
    /// Connection ID (also the push channel id)
    pub id: String,

    /// User the bearer token resolved to
    pub user_id: String,

    /// Peer address
    pub remote_addr: Option<String>,

    /// Session start timestamp
    pub connected_at: DateTime<Utc>,
}

impl GatewaySession {
    pub fn new(user_id: impl Into<String>, remote_addr: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            remote_addr,
            connected_at: Utc::now(),
        }
    }
}
