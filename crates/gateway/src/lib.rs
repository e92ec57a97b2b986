// FleetPulse Gateway
//
// WebSocket front door: bearer-token handshake, per-user push channels for the
// notification dispatcher, and the method handlers for notifications, devices,
// presence and telemetry.

pub mod auth;
pub mod handlers;
pub mod protocol;
pub mod server;
pub mod session;

pub use auth::{generate_token, hash_token, TokenAuth, TokenInfo};
pub use handlers::MethodHandlers;
pub use protocol::*;
pub use server::GatewayServer;
pub use session::GatewaySession;
