// Notification Store Interface
//
// Every call is scoped by owner; a record belonging to someone else is
// indistinguishable from a missing one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetpulse_core::{NotificationQuery, NotificationRecord, NotificationStats};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("notification store unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt notification row: {0}")]
    Corrupt(String),
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert(&self, record: &NotificationRecord) -> Result<(), StoreError>;

    async fn get(&self, id: &str, user_id: &str) -> Result<Option<NotificationRecord>, StoreError>;

    /// Newest first
    async fn list(
        &self,
        user_id: &str,
        query: &NotificationQuery,
    ) -> Result<Vec<NotificationRecord>, StoreError>;

    /// Returns the record after the update, or `None` if the user has no such
    /// notification. An already-read record keeps its original `read_at`.
    async fn mark_read(
        &self,
        id: &str,
        user_id: &str,
        read_at: DateTime<Utc>,
    ) -> Result<Option<NotificationRecord>, StoreError>;

    /// Number of records that flipped to read
    async fn mark_all_read(&self, user_id: &str, read_at: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn unread_count(&self, user_id: &str) -> Result<u64, StoreError>;

    async fn stats_by_type(&self, user_id: &str) -> Result<NotificationStats, StoreError>;

    async fn delete(&self, id: &str, user_id: &str) -> Result<bool, StoreError>;

    async fn delete_all(&self, user_id: &str) -> Result<u64, StoreError>;
}
