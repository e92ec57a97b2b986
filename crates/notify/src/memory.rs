// In-process Notification Store
//
// Insertion-ordered, so "newest first" is simply reverse order.

use crate::store::{NotificationStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetpulse_core::{NotificationQuery, NotificationRecord, NotificationStats};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct MemoryNotificationStore {
    records: Arc<RwLock<Vec<NotificationRecord>>>,
    available: Arc<AtomicBool>,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(Vec::new())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulate the store going down
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store marked unavailable".to_string()))
        }
    }
}

impl Default for MemoryNotificationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn insert(&self, record: &NotificationRecord) -> Result<(), StoreError> {
        self.check()?;
        self.records.write().await.push(record.clone());
        Ok(())
    }

    async fn get(&self, id: &str, user_id: &str) -> Result<Option<NotificationRecord>, StoreError> {
        self.check()?;
        Ok(self
            .records
            .read()
            .await
            .iter()
            .find(|r| r.id == id && r.user_id == user_id)
            .cloned())
    }

    async fn list(
        &self,
        user_id: &str,
        query: &NotificationQuery,
    ) -> Result<Vec<NotificationRecord>, StoreError> {
        self.check()?;
        let records = self.records.read().await;
        Ok(records
            .iter()
            .rev()
            .filter(|r| r.user_id == user_id)
            .filter(|r| !query.unread_only || !r.is_read)
            .filter(|r| {
                query
                    .notification_type
                    .map_or(true, |t| t == r.notification_type)
            })
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .cloned()
            .collect())
    }

    async fn mark_read(
        &self,
        id: &str,
        user_id: &str,
        read_at: DateTime<Utc>,
    ) -> Result<Option<NotificationRecord>, StoreError> {
        self.check()?;
        let mut records = self.records.write().await;
        Ok(records
            .iter_mut()
            .find(|r| r.id == id && r.user_id == user_id)
            .map(|r| {
                if !r.is_read {
                    r.is_read = true;
                    r.read_at = Some(read_at);
                }
                r.clone()
            }))
    }

    async fn mark_all_read(&self, user_id: &str, read_at: DateTime<Utc>) -> Result<u64, StoreError> {
        self.check()?;
        let mut records = self.records.write().await;
        let mut changed = 0;
        for record in records
            .iter_mut()
            .filter(|r| r.user_id == user_id && !r.is_read)
        {
            record.is_read = true;
            record.read_at = Some(read_at);
            changed += 1;
        }
        Ok(changed)
    }

    async fn unread_count(&self, user_id: &str) -> Result<u64, StoreError> {
        self.check()?;
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|r| r.user_id == user_id && !r.is_read)
            .count() as u64)
    }

    async fn stats_by_type(&self, user_id: &str) -> Result<NotificationStats, StoreError> {
        self.check()?;
        let mut stats = NotificationStats::default();
        for record in self.records.read().await.iter().filter(|r| r.user_id == user_id) {
            stats.record(record.notification_type, 1, u64::from(!record.is_read));
        }
        Ok(stats)
    }

    async fn delete(&self, id: &str, user_id: &str) -> Result<bool, StoreError> {
        self.check()?;
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| !(r.id == id && r.user_id == user_id));
        Ok(records.len() < before)
    }

    async fn delete_all(&self, user_id: &str) -> Result<u64, StoreError> {
        self.check()?;
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| r.user_id != user_id);
        Ok((before - records.len()) as u64)
    }
}
