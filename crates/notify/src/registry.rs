// Connection Registry
//
// At most one live push channel per user; the newest registration wins. Each
// mutation is a single map operation under one write-lock acquisition.

use crate::channel::Channel;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct ConnectionRegistry {
    channels: Arc<RwLock<HashMap<String, Arc<dyn Channel>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Map `user_id` to `channel`, replacing any previous one without closing
    /// it. The mapping is released when the channel reports it has closed.
    pub async fn register(&self, user_id: &str, channel: Arc<dyn Channel>) {
        let channel_id = channel.id().to_string();
        let previous = {
            let mut channels = self.channels.write().await;
            channels.insert(user_id.to_string(), channel.clone())
        };
        if let Some(previous) = previous {
            tracing::debug!(
                "Channel {} for user {} superseded by {}",
                previous.id(),
                user_id,
                channel_id
            );
        }
        tracing::info!("User {} connected on channel {}", user_id, channel_id);

        let registry = self.clone();
        let user_id = user_id.to_string();
        tokio::spawn(async move {
            channel.closed().await;
            registry.release(&user_id, &channel_id).await;
        });
    }

    /// Remove whatever channel the user has
    pub async fn unregister(&self, user_id: &str) -> bool {
        let removed = self.channels.write().await.remove(user_id);
        if let Some(channel) = &removed {
            tracing::info!("User {} disconnected (channel {})", user_id, channel.id());
        }
        removed.is_some()
    }

    /// Remove the user's channel only if it is still `channel_id`
    pub async fn release(&self, user_id: &str, channel_id: &str) -> bool {
        let mut channels = self.channels.write().await;
        if channels
            .get(user_id)
            .is_some_and(|current| current.id() == channel_id)
        {
            channels.remove(user_id);
            tracing::info!("User {} released channel {}", user_id, channel_id);
            true
        } else {
            false
        }
    }

    pub async fn get(&self, user_id: &str) -> Option<Arc<dyn Channel>> {
        self.channels.read().await.get(user_id).cloned()
    }

    pub async fn is_connected(&self, user_id: &str) -> bool {
        self.channels.read().await.contains_key(user_id)
    }

    pub async fn connected_count(&self) -> usize {
        self.channels.read().await.len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
