// In-process Presence Store
//
// Single-node TTL map. Expiry is lazy: an entry past its deadline reads as
// absent and is dropped on the next purge.

use crate::store::{PresenceError, PresenceStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetpulse_core::PresenceStatus;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Default)]
struct PresenceTable {
    /// Online key deadlines
    online: HashMap<String, Instant>,
    last_seen: HashMap<String, DateTime<Utc>>,
}

#[derive(Clone)]
pub struct MemoryPresenceStore {
    table: Arc<RwLock<PresenceTable>>,
    reachable: Arc<AtomicBool>,
}

impl MemoryPresenceStore {
    pub fn new() -> Self {
        Self {
            table: Arc::new(RwLock::new(PresenceTable::default())),
            reachable: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulate the cache going away (or coming back)
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    fn check_reachable(&self) -> Result<(), PresenceError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PresenceError::Unavailable(
                "memory presence store marked unreachable".to_string(),
            ))
        }
    }

    /// Drop expired online keys, returning how many went
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut table = self.table.write().await;
        let before = table.online.len();
        table.online.retain(|_, deadline| *deadline > now);
        before - table.online.len()
    }

    /// Number of devices currently online
    pub async fn online_count(&self) -> usize {
        let now = Instant::now();
        let table = self.table.read().await;
        table.online.values().filter(|d| **d > now).count()
    }
}

impl Default for MemoryPresenceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PresenceStore for MemoryPresenceStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn set_online(
        &self,
        device_id: &str,
        ttl: Duration,
        seen_at: DateTime<Utc>,
    ) -> Result<(), PresenceError> {
        self.check_reachable()?;
        let mut table = self.table.write().await;
        table
            .online
            .insert(device_id.to_string(), Instant::now() + ttl);
        table.last_seen.insert(device_id.to_string(), seen_at);
        Ok(())
    }

    async fn set_offline(
        &self,
        device_id: &str,
        seen_at: DateTime<Utc>,
    ) -> Result<(), PresenceError> {
        self.check_reachable()?;
        let mut table = self.table.write().await;
        table.online.remove(device_id);
        table.last_seen.insert(device_id.to_string(), seen_at);
        Ok(())
    }

    async fn remove(&self, device_id: &str) -> Result<(), PresenceError> {
        self.check_reachable()?;
        let mut table = self.table.write().await;
        table.online.remove(device_id);
        table.last_seen.remove(device_id);
        Ok(())
    }

    async fn is_online(&self, device_id: &str) -> Result<bool, PresenceError> {
        self.check_reachable()?;
        let table = self.table.read().await;
        Ok(table
            .online
            .get(device_id)
            .is_some_and(|deadline| *deadline > Instant::now()))
    }

    async fn batch(
        &self,
        device_ids: &[String],
    ) -> Result<HashMap<String, PresenceStatus>, PresenceError> {
        self.check_reachable()?;
        let now = Instant::now();
        let table = self.table.read().await;
        Ok(device_ids
            .iter()
            .map(|id| {
                let status = PresenceStatus {
                    is_online: table.online.get(id).is_some_and(|d| *d > now),
                    last_seen_at: table.last_seen.get(id).copied(),
                };
                (id.clone(), status)
            })
            .collect())
    }
}
