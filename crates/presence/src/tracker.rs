// Presence Tracker
//
// Caller-facing presence API. Every backend call is bounded by a timeout and
// no failure escapes: reads degrade to "offline", writes degrade to no-ops.
// `lookup` is the one call that reports unavailability, for callers that must
// not confuse "cache said absent" with "cache could not answer".

use crate::store::{PresenceError, PresenceStore};
use chrono::Utc;
use fleetpulse_core::{PresenceConfig, PresenceStatus};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Result of a batched presence query
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceLookup {
    /// The cache answered; every requested id has an entry
    Available(HashMap<String, PresenceStatus>),
    /// The cache could not be queried
    Unavailable { reason: String },
}

impl PresenceLookup {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }
}

pub struct PresenceTracker {
    store: Arc<dyn PresenceStore>,
    ttl: Duration,
    op_timeout: Duration,
}

impl PresenceTracker {
    pub fn new(store: Arc<dyn PresenceStore>, ttl: Duration, op_timeout: Duration) -> Self {
        Self {
            store,
            ttl,
            op_timeout,
        }
    }

    pub fn from_config(store: Arc<dyn PresenceStore>, config: &PresenceConfig) -> Self {
        Self::new(
            store,
            Duration::from_secs(config.ttl_secs),
            Duration::from_millis(config.op_timeout_ms),
        )
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn backend(&self) -> &str {
        self.store.name()
    }

    async fn guarded<T, F>(&self, fut: F) -> Result<T, PresenceError>
    where
        F: Future<Output = Result<T, PresenceError>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(PresenceError::Timeout(self.op_timeout)),
        }
    }

    /// Record activity for a device. Returns whether the cache took the write.
    pub async fn mark_online(&self, device_id: &str) -> bool {
        match self
            .guarded(self.store.set_online(device_id, self.ttl, Utc::now()))
            .await
        {
            Ok(()) => {
                tracing::debug!("Device {} marked online", device_id);
                true
            }
            Err(e) => {
                tracing::warn!("Presence write skipped for {}: {}", device_id, e);
                false
            }
        }
    }

    /// Force a device offline without waiting for its TTL
    pub async fn mark_offline(&self, device_id: &str) -> bool {
        match self
            .guarded(self.store.set_offline(device_id, Utc::now()))
            .await
        {
            Ok(()) => {
                tracing::debug!("Device {} marked offline", device_id);
                true
            }
            Err(e) => {
                tracing::warn!("Presence write skipped for {}: {}", device_id, e);
                false
            }
        }
    }

    /// Drop every trace of a device that no longer exists
    pub async fn forget(&self, device_id: &str) -> bool {
        match self.guarded(self.store.remove(device_id)).await {
            Ok(()) => {
                tracing::debug!("Presence for {} removed", device_id);
                true
            }
            Err(e) => {
                tracing::warn!("Presence removal skipped for {}: {}", device_id, e);
                false
            }
        }
    }

    pub async fn is_online(&self, device_id: &str) -> bool {
        match self.guarded(self.store.is_online(device_id)).await {
            Ok(online) => online,
            Err(e) => {
                tracing::warn!("Presence read for {} degraded to offline: {}", device_id, e);
                false
            }
        }
    }

    /// Batched status for listings; everyone reads offline if the cache is down
    pub async fn batch_status(&self, device_ids: &[String]) -> HashMap<String, PresenceStatus> {
        match self.lookup(device_ids).await {
            PresenceLookup::Available(statuses) => statuses,
            PresenceLookup::Unavailable { .. } => device_ids
                .iter()
                .map(|id| (id.clone(), PresenceStatus::offline()))
                .collect(),
        }
    }

    pub async fn lookup(&self, device_ids: &[String]) -> PresenceLookup {
        if device_ids.is_empty() {
            return PresenceLookup::Available(HashMap::new());
        }

        match self.guarded(self.store.batch(device_ids)).await {
            Ok(mut statuses) => {
                for id in device_ids {
                    statuses.entry(id.clone()).or_default();
                }
                PresenceLookup::Available(statuses)
            }
            Err(e) => {
                tracing::warn!(
                    "Presence batch of {} devices failed on {}: {}",
                    device_ids.len(),
                    self.store.name(),
                    e
                );
                PresenceLookup::Unavailable {
                    reason: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryPresenceStore;
    use async_trait::async_trait;
    use chrono::DateTime;

    fn tracker(store: &MemoryPresenceStore) -> PresenceTracker {
        PresenceTracker::new(
            Arc::new(store.clone()),
            Duration::from_secs(60),
            Duration::from_millis(500),
        )
    }

    /// Store whose calls never complete
    struct HangingStore;

    #[async_trait]
    impl PresenceStore for HangingStore {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn set_online(
            &self,
            _device_id: &str,
            _ttl: Duration,
            _seen_at: DateTime<Utc>,
        ) -> Result<(), PresenceError> {
            std::future::pending().await
        }

        async fn set_offline(
            &self,
            _device_id: &str,
            _seen_at: DateTime<Utc>,
        ) -> Result<(), PresenceError> {
            std::future::pending().await
        }

        async fn remove(&self, _device_id: &str) -> Result<(), PresenceError> {
            std::future::pending().await
        }

        async fn is_online(&self, _device_id: &str) -> Result<bool, PresenceError> {
            std::future::pending().await
        }

        async fn batch(
            &self,
            _device_ids: &[String],
        ) -> Result<HashMap<String, PresenceStatus>, PresenceError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_mark_online_then_expire() {
        let store = MemoryPresenceStore::new();
        let tracker = tracker(&store);

        assert!(tracker.mark_online("d1").await);
        assert!(tracker.is_online("d1").await);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!tracker.is_online("d1").await);
    }

    #[tokio::test]
    async fn test_mark_offline_is_immediate() {
        let store = MemoryPresenceStore::new();
        let tracker = tracker(&store);

        tracker.mark_online("d1").await;
        assert!(tracker.mark_offline("d1").await);
        assert!(!tracker.is_online("d1").await);
    }

    #[tokio::test]
    async fn test_forget_leaves_no_last_seen() {
        let store = MemoryPresenceStore::new();
        let tracker = tracker(&store);

        tracker.mark_online("d1").await;
        assert!(tracker.forget("d1").await);

        let batch = tracker.batch_status(&["d1".to_string()]).await;
        assert!(!batch["d1"].is_online);
        assert_eq!(batch["d1"].last_seen_at, None);
    }

    #[tokio::test]
    async fn test_outage_degrades_without_error() {
        let store = MemoryPresenceStore::new();
        let tracker = tracker(&store);
        tracker.mark_online("d1").await;

        store.set_reachable(false);
        assert!(!tracker.mark_online("d1").await);
        assert!(!tracker.is_online("d1").await);

        let ids = vec!["d1".to_string(), "d2".to_string()];
        let batch = tracker.batch_status(&ids).await;
        assert_eq!(batch.len(), 2);
        assert!(batch.values().all(|s| !s.is_online));

        assert!(!tracker.lookup(&ids).await.is_available());
    }

    #[tokio::test]
    async fn test_lookup_fills_unknown_ids() {
        let store = MemoryPresenceStore::new();
        let tracker = tracker(&store);
        tracker.mark_online("d1").await;

        let ids = vec!["d1".to_string(), "ghost".to_string()];
        match tracker.lookup(&ids).await {
            PresenceLookup::Available(statuses) => {
                assert!(statuses["d1"].is_online);
                assert!(statuses["d1"].last_seen_at.is_some());
                assert_eq!(statuses["ghost"], PresenceStatus::offline());
            }
            other => panic!("expected available lookup, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_unavailable() {
        let tracker = PresenceTracker::new(
            Arc::new(HangingStore),
            Duration::from_secs(60),
            Duration::from_millis(200),
        );

        assert!(!tracker.mark_online("d1").await);
        assert!(!tracker.is_online("d1").await);
        match tracker.lookup(&["d1".to_string()]).await {
            PresenceLookup::Unavailable { reason } => assert!(reason.contains("timed out")),
            other => panic!("expected unavailable lookup, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_lookup_skips_backend() {
        let store = MemoryPresenceStore::new();
        store.set_reachable(false);
        let tracker = tracker(&store);
        assert_eq!(
            tracker.lookup(&[]).await,
            PresenceLookup::Available(HashMap::new())
        );
    }
}
