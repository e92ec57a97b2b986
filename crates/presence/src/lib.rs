//! fleetpulse_presence
//! Device presence: TTL cache backends, the degrading tracker façade, the
//! cache→durable reconciler and the telemetry ingestion hook.

pub mod directory;
pub mod ingest;
pub mod memory;
pub mod reconciler;
pub mod redis_store;
pub mod store;
pub mod tracker;

pub use directory::{DeviceDirectory, DirectoryError};
pub use ingest::{IngestError, IngestReceipt, TelemetryIngestor, TelemetrySink};
pub use memory::MemoryPresenceStore;
pub use reconciler::{PresenceReconciler, ReconcileError, ReconcileReport, SyncOutcome};
pub use redis_store::RedisPresenceStore;
pub use store::{PresenceError, PresenceStore};
pub use tracker::{PresenceLookup, PresenceTracker};
