// Presence Store Interface
//
// Backends only store and report; deciding what a failure means for the
// caller is the tracker's job.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetpulse_core::PresenceStatus;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PresenceError {
    #[error("presence store unreachable: {0}")]
    Unavailable(String),
    #[error("presence call timed out after {0:?}")]
    Timeout(Duration),
    #[error("corrupt presence value for {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

impl From<redis::RedisError> for PresenceError {
    fn from(err: redis::RedisError) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// Ephemeral key/value cache with per-key TTL
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Set (or refresh) the online key for `ttl` and record `seen_at`
    async fn set_online(
        &self,
        device_id: &str,
        ttl: Duration,
        seen_at: DateTime<Utc>,
    ) -> Result<(), PresenceError>;

    /// Drop the online key immediately, still recording `seen_at`
    async fn set_offline(&self, device_id: &str, seen_at: DateTime<Utc>)
        -> Result<(), PresenceError>;

    /// Forget the device entirely: online key and last-seen record
    async fn remove(&self, device_id: &str) -> Result<(), PresenceError>;

    async fn is_online(&self, device_id: &str) -> Result<bool, PresenceError>;

    /// One round trip for the whole id set. Ids the cache knows nothing
    /// about may be omitted from the result.
    async fn batch(
        &self,
        device_ids: &[String],
    ) -> Result<HashMap<String, PresenceStatus>, PresenceError>;
}
