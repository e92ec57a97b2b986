//! fleetpulse_notify
//! Durable notification feed with best-effort live push to connected users.

pub mod channel;
pub mod dispatcher;
pub mod events;
pub mod memory;
pub mod registry;
pub mod store;

pub use channel::{Channel, ChannelError, PushEvent};
pub use dispatcher::{NotificationDispatcher, NotifyError};
pub use memory::MemoryNotificationStore;
pub use registry::ConnectionRegistry;
pub use store::{NotificationStore, StoreError};
