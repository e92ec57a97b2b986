//! fleetpulse_storage
//! SQLite backing for the device table, notification feed, telemetry samples
//! and API tokens.

pub mod devices;
pub mod error;
pub mod notifications;
pub mod store;
pub mod telemetry;
pub mod tokens;

pub use error::StorageError;
pub use store::SqliteStore;
pub use tokens::StoredToken;
