// Push Channel Capability
//
// The dispatcher only ever sees this trait. Transports (the WebSocket gateway,
// test doubles) decide how an event hits the wire and when the channel is gone.

use async_trait::async_trait;
use fleetpulse_core::NotificationView;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel closed")]
    Closed,
    #[error("channel outbound buffer full")]
    Full,
    #[error("channel transport error: {0}")]
    Transport(String),
}

/// Events pushed to a live user channel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum PushEvent {
    Notification(NotificationView),
}

impl PushEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Notification(_) => "notification",
        }
    }
}

#[async_trait]
pub trait Channel: Send + Sync {
    /// Unique per connection; lets the registry tell a stale channel from its
    /// replacement
    fn id(&self) -> &str;

    async fn send(&self, event: &PushEvent) -> Result<(), ChannelError>;

    /// Resolves once the underlying transport has gone away
    async fn closed(&self);
}
