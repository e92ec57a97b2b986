// Notification Dispatcher
//
// Persist first, then try the user's live channel. Delivery is best effort:
// a failed push drops the channel from the registry and is otherwise ignored.

use crate::channel::PushEvent;
use crate::registry::ConnectionRegistry;
use crate::store::{NotificationStore, StoreError};
use chrono::Utc;
use fleetpulse_core::{
    NewNotification, NotificationQuery, NotificationRecord, NotificationStats,
};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification not found: {0}")]
    NotFound(String),
    #[error("invalid notification: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct NotificationDispatcher {
    store: Arc<dyn NotificationStore>,
    registry: ConnectionRegistry,
}

impl NotificationDispatcher {
    pub fn new(store: Arc<dyn NotificationStore>, registry: ConnectionRegistry) -> Self {
        Self { store, registry }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Store a notification for `user_id` and push it if they are connected.
    /// The persisted record is returned whether or not the push landed.
    pub async fn create_notification(
        &self,
        user_id: &str,
        notification: NewNotification,
    ) -> Result<NotificationRecord, NotifyError> {
        if user_id.trim().is_empty() {
            return Err(NotifyError::InvalidInput("user_id is empty".to_string()));
        }
        if notification.title.trim().is_empty() {
            return Err(NotifyError::InvalidInput("title is empty".to_string()));
        }

        let record = NotificationRecord::from_new(user_id, notification);
        self.store.insert(&record).await?;
        tracing::debug!(
            "Stored {} notification {} for {}",
            record.notification_type,
            record.id,
            user_id
        );

        self.push(&record).await;
        Ok(record)
    }

    async fn push(&self, record: &NotificationRecord) {
        let Some(channel) = self.registry.get(&record.user_id).await else {
            return;
        };

        let event = PushEvent::Notification(record.view());
        match channel.send(&event).await {
            Ok(()) => {
                tracing::debug!("Pushed notification {} to {}", record.id, record.user_id);
            }
            Err(e) => {
                tracing::warn!(
                    "Push to {} on channel {} failed, dropping channel: {}",
                    record.user_id,
                    channel.id(),
                    e
                );
                self.registry.release(&record.user_id, channel.id()).await;
            }
        }
    }

    pub async fn list_notifications(
        &self,
        user_id: &str,
        query: &NotificationQuery,
    ) -> Result<Vec<NotificationRecord>, NotifyError> {
        Ok(self.store.list(user_id, query).await?)
    }

    /// Mark one notification read. Someone else's notification is reported
    /// as not found.
    pub async fn mark_read(
        &self,
        notification_id: &str,
        user_id: &str,
    ) -> Result<NotificationRecord, NotifyError> {
        self.store
            .mark_read(notification_id, user_id, Utc::now())
            .await?
            .ok_or_else(|| NotifyError::NotFound(notification_id.to_string()))
    }

    /// Returns how many notifications changed; zero on a repeat call
    pub async fn mark_all_read(&self, user_id: &str) -> Result<u64, NotifyError> {
        let changed = self.store.mark_all_read(user_id, Utc::now()).await?;
        if changed > 0 {
            tracing::debug!("Marked {} notifications read for {}", changed, user_id);
        }
        Ok(changed)
    }

    pub async fn unread_count(&self, user_id: &str) -> Result<u64, NotifyError> {
        Ok(self.store.unread_count(user_id).await?)
    }

    pub async fn stats_by_type(&self, user_id: &str) -> Result<NotificationStats, NotifyError> {
        Ok(self.store.stats_by_type(user_id).await?)
    }

    pub async fn delete_notification(
        &self,
        notification_id: &str,
        user_id: &str,
    ) -> Result<(), NotifyError> {
        if self.store.delete(notification_id, user_id).await? {
            Ok(())
        } else {
            Err(NotifyError::NotFound(notification_id.to_string()))
        }
    }

    pub async fn clear_notifications(&self, user_id: &str) -> Result<u64, NotifyError> {
        let removed = self.store.delete_all(user_id).await?;
        tracing::info!("Cleared {} notifications for {}", removed, user_id);
        Ok(removed)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::channel::{Channel, ChannelError};
    use crate::memory::MemoryNotificationStore;
    use async_trait::async_trait;
    use fleetpulse_core::NotificationType;
    use std::sync::Mutex;

    /// Channel that records what it was sent, or fails every send
    pub(crate) struct RecordingChannel {
        id: String,
        fail: bool,
        pub(crate) sent: Mutex<Vec<PushEvent>>,
    }

    impl RecordingChannel {
        pub(crate) fn new(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                fail: false,
                sent: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn failing(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                fail: true,
                sent: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Channel for RecordingChannel {
        fn id(&self) -> &str {
            &self.id
        }

        async fn send(&self, event: &PushEvent) -> Result<(), ChannelError> {
            if self.fail {
                return Err(ChannelError::Transport("socket reset".to_string()));
            }
            self.sent.lock().unwrap().push(event.clone());
            Ok(())
        }

        async fn closed(&self) {
            std::future::pending::<()>().await
        }
    }

    pub(crate) fn dispatcher() -> (NotificationDispatcher, MemoryNotificationStore) {
        let store = MemoryNotificationStore::new();
        let dispatcher =
            NotificationDispatcher::new(Arc::new(store.clone()), ConnectionRegistry::new());
        (dispatcher, store)
    }

    #[tokio::test]
    async fn test_live_user_gets_push() {
        let (dispatcher, _store) = dispatcher();
        let channel = RecordingChannel::new("c1");
        dispatcher.registry().register("U1", channel.clone()).await;

        let record = dispatcher
            .create_notification(
                "U1",
                NewNotification::new("Device Created", "Sensor A was added")
                    .kind(NotificationType::Success)
                    .source("device_management"),
            )
            .await
            .unwrap();

        assert!(!record.is_read);
        let sent = channel.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], PushEvent::Notification(record.view()));
    }

    #[tokio::test]
    async fn test_offline_user_still_persisted() {
        let (dispatcher, _store) = dispatcher();
        let other = RecordingChannel::new("c-other");
        dispatcher.registry().register("U1", other.clone()).await;

        let record = dispatcher
            .create_notification("U2", NewNotification::new("Hello", "World"))
            .await
            .unwrap();

        assert_eq!(other.sent_count(), 0);
        let listed = dispatcher
            .list_notifications("U2", &NotificationQuery::default())
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, record.id);
    }

    #[tokio::test]
    async fn test_push_failure_drops_channel_keeps_record() {
        let (dispatcher, store) = dispatcher();
        dispatcher
            .registry()
            .register("U1", RecordingChannel::failing("c1"))
            .await;

        let record = dispatcher
            .create_notification("U1", NewNotification::new("t", "m"))
            .await
            .unwrap();

        assert!(!dispatcher.registry().is_connected("U1").await);
        assert_eq!(store.len().await, 1);
        assert_eq!(
            dispatcher.unread_count("U1").await.unwrap(),
            1,
            "record {} should be unread",
            record.id
        );
    }

    #[tokio::test]
    async fn test_store_failure_is_surfaced_and_not_pushed() {
        let (dispatcher, store) = dispatcher();
        let channel = RecordingChannel::new("c1");
        dispatcher.registry().register("U1", channel.clone()).await;
        store.set_available(false);

        let result = dispatcher
            .create_notification("U1", NewNotification::new("t", "m"))
            .await;
        assert!(matches!(result, Err(NotifyError::Store(_))));
        assert_eq!(channel.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_rejects_blank_title() {
        let (dispatcher, store) = dispatcher();
        let result = dispatcher
            .create_notification("U1", NewNotification::new("  ", "m"))
            .await;
        assert!(matches!(result, Err(NotifyError::InvalidInput(_))));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_mark_read_enforces_ownership() {
        let (dispatcher, _store) = dispatcher();
        let record = dispatcher
            .create_notification("U1", NewNotification::new("t", "m"))
            .await
            .unwrap();

        assert!(matches!(
            dispatcher.mark_read(&record.id, "U2").await,
            Err(NotifyError::NotFound(_))
        ));
        assert!(matches!(
            dispatcher.mark_read("missing", "U1").await,
            Err(NotifyError::NotFound(_))
        ));

        let read = dispatcher.mark_read(&record.id, "U1").await.unwrap();
        assert!(read.is_read);
        let first_read_at = read.read_at;
        assert!(first_read_at.is_some());

        let again = dispatcher.mark_read(&record.id, "U1").await.unwrap();
        assert_eq!(again.read_at, first_read_at);
    }

    #[tokio::test]
    async fn test_mark_all_read_is_idempotent() {
        let (dispatcher, _store) = dispatcher();
        for i in 0..3 {
            dispatcher
                .create_notification("U1", NewNotification::new(format!("n{}", i), "m"))
                .await
                .unwrap();
        }
        dispatcher
            .create_notification("U2", NewNotification::new("other", "m"))
            .await
            .unwrap();

        assert_eq!(dispatcher.mark_all_read("U1").await.unwrap(), 3);
        assert_eq!(dispatcher.unread_count("U1").await.unwrap(), 0);
        assert_eq!(dispatcher.mark_all_read("U1").await.unwrap(), 0);
        assert_eq!(dispatcher.unread_count("U1").await.unwrap(), 0);
        assert_eq!(dispatcher.unread_count("U2").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_listing_filters_and_order() {
        let (dispatcher, _store) = dispatcher();
        let first = dispatcher
            .create_notification(
                "U1",
                NewNotification::new("first", "m").kind(NotificationType::Error),
            )
            .await
            .unwrap();
        let second = dispatcher
            .create_notification("U1", NewNotification::new("second", "m"))
            .await
            .unwrap();
        dispatcher.mark_read(&second.id, "U1").await.unwrap();

        let all = dispatcher
            .list_notifications("U1", &NotificationQuery::default())
            .await
            .unwrap();
        assert_eq!(
            all.iter().map(|r| r.title.as_str()).collect::<Vec<_>>(),
            vec!["second", "first"]
        );

        let unread = dispatcher
            .list_notifications(
                "U1",
                &NotificationQuery {
                    unread_only: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].id, first.id);

        let errors = dispatcher
            .list_notifications(
                "U1",
                &NotificationQuery {
                    notification_type: Some(NotificationType::Error),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(errors.len(), 1);

        let paged = dispatcher
            .list_notifications(
                "U1",
                &NotificationQuery {
                    limit: 1,
                    offset: 1,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(paged.len(), 1);
        assert_eq!(paged[0].id, first.id);
    }

    #[tokio::test]
    async fn test_stats_delete_and_clear() {
        let (dispatcher, _store) = dispatcher();
        let warn = dispatcher
            .create_notification(
                "U1",
                NewNotification::new("w", "m").kind(NotificationType::Warning),
            )
            .await
            .unwrap();
        dispatcher
            .create_notification("U1", NewNotification::new("i", "m"))
            .await
            .unwrap();
        dispatcher.mark_read(&warn.id, "U1").await.unwrap();

        let stats = dispatcher.stats_by_type("U1").await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.unread, 1);
        assert_eq!(stats.by_type[&NotificationType::Warning].unread, 0);

        assert!(matches!(
            dispatcher.delete_notification(&warn.id, "U2").await,
            Err(NotifyError::NotFound(_))
        ));
        dispatcher.delete_notification(&warn.id, "U1").await.unwrap();
        assert_eq!(dispatcher.clear_notifications("U1").await.unwrap(), 1);
        assert_eq!(dispatcher.stats_by_type("U1").await.unwrap().total, 0);
    }
}
