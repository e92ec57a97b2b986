pub mod config;
pub mod device;
pub mod error;
pub mod notification;
pub mod telemetry;

// Re-export commonly used types
pub use config::{
    Config, GatewayConfig, NotificationsConfig, PresenceBackend, PresenceConfig, ReconcilerConfig,
    StorageConfig,
};
pub use device::{DeviceRecord, DeviceStatus, PresenceStatus};
pub use error::{DomainError, FleetError, InfraError};
pub use notification::{
    NewNotification, NotificationQuery, NotificationRecord, NotificationStats, NotificationType,
    NotificationView,
};
pub use telemetry::TelemetryPoint;
