// Redis Presence Store
//
// Key layout:
//   presence:online:{device_id}     "1" with EX = ttl
//   presence:last_seen:{device_id}  RFC 3339 timestamp, kept for a week

use crate::store::{PresenceError, PresenceStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetpulse_core::PresenceStatus;
use redis::aio::MultiplexedConnection;
use std::collections::HashMap;
use std::time::Duration;

const ONLINE_PREFIX: &str = "presence:online:";
const LAST_SEEN_PREFIX: &str = "presence:last_seen:";
const LAST_SEEN_RETENTION_SECS: u64 = 7 * 24 * 3600;

fn online_key(device_id: &str) -> String {
    format!("{}{}", ONLINE_PREFIX, device_id)
}

fn last_seen_key(device_id: &str) -> String {
    format!("{}{}", LAST_SEEN_PREFIX, device_id)
}

fn parse_last_seen(device_id: &str, raw: Option<String>) -> Result<Option<DateTime<Utc>>, PresenceError> {
    match raw {
        None => Ok(None),
        Some(value) => DateTime::parse_from_rfc3339(&value)
            .map(|ts| Some(ts.with_timezone(&Utc)))
            .map_err(|e| PresenceError::Corrupt {
                key: last_seen_key(device_id),
                reason: e.to_string(),
            }),
    }
}

/// Presence store backed by a shared Redis instance
#[derive(Clone)]
pub struct RedisPresenceStore {
    conn: MultiplexedConnection,
}

impl RedisPresenceStore {
    /// Open a multiplexed connection and verify it with PING
    pub async fn connect(redis_url: &str) -> Result<Self, PresenceError> {
        let client = redis::Client::open(redis_url)?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        tracing::info!("Connected to Redis presence store at {}", redis_url);
        Ok(Self { conn })
    }
}

#[async_trait]
impl PresenceStore for RedisPresenceStore {
    fn name(&self) -> &str {
        "redis"
    }

    async fn set_online(
        &self,
        device_id: &str,
        ttl: Duration,
        seen_at: DateTime<Utc>,
    ) -> Result<(), PresenceError> {
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(online_key(device_id))
            .arg("1")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .ignore()
            .cmd("SET")
            .arg(last_seen_key(device_id))
            .arg(seen_at.to_rfc3339())
            .arg("EX")
            .arg(LAST_SEEN_RETENTION_SECS)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_offline(
        &self,
        device_id: &str,
        seen_at: DateTime<Utc>,
    ) -> Result<(), PresenceError> {
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .cmd("DEL")
            .arg(online_key(device_id))
            .ignore()
            .cmd("SET")
            .arg(last_seen_key(device_id))
            .arg(seen_at.to_rfc3339())
            .arg("EX")
            .arg(LAST_SEEN_RETENTION_SECS)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn remove(&self, device_id: &str) -> Result<(), PresenceError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("DEL")
            .arg(online_key(device_id))
            .arg(last_seen_key(device_id))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn is_online(&self, device_id: &str) -> Result<bool, PresenceError> {
        let mut conn = self.conn.clone();
        let exists: bool = redis::cmd("EXISTS")
            .arg(online_key(device_id))
            .query_async(&mut conn)
            .await?;
        Ok(exists)
    }

    async fn batch(
        &self,
        device_ids: &[String],
    ) -> Result<HashMap<String, PresenceStatus>, PresenceError> {
        if device_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let online_keys: Vec<String> = device_ids.iter().map(|id| online_key(id)).collect();
        let seen_keys: Vec<String> = device_ids.iter().map(|id| last_seen_key(id)).collect();

        let mut conn = self.conn.clone();
        let (online, seen): (Vec<Option<String>>, Vec<Option<String>>) = redis::pipe()
            .cmd("MGET")
            .arg(&online_keys)
            .cmd("MGET")
            .arg(&seen_keys)
            .query_async(&mut conn)
            .await?;

        let mut statuses = HashMap::with_capacity(device_ids.len());
        for ((id, online), seen) in device_ids.iter().zip(online).zip(seen) {
            let last_seen_at = match parse_last_seen(id, seen) {
                Ok(ts) => ts,
                Err(e) => {
                    tracing::warn!("Ignoring unreadable last-seen value: {}", e);
                    None
                }
            };
            statuses.insert(
                id.clone(),
                PresenceStatus {
                    is_online: online.is_some(),
                    last_seen_at,
                },
            );
        }
        Ok(statuses)
    }
}
