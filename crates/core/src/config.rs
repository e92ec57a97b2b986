//! FleetPulse Configuration
//!
//! Configuration structures with per-field serde defaults so a partial YAML
//! file is always enough to start the service.

use crate::error::FleetError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ============================================================================
// Constants
// ============================================================================

/// Presence key lifetime (seconds)
pub const DEFAULT_PRESENCE_TTL_SECS: u64 = 60;
/// Bound on a single presence cache call (milliseconds)
pub const DEFAULT_PRESENCE_TIMEOUT_MS: u64 = 2000;
/// Default Redis endpoint
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
/// Reconciliation interval (seconds)
pub const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 30;
/// Default page size for notification listing
pub const DEFAULT_LIST_LIMIT: u32 = 50;
/// Hard cap on notification page size
pub const DEFAULT_MAX_LIST_LIMIT: u32 = 200;
/// Bound on a single durable store call (milliseconds)
pub const DEFAULT_STORAGE_TIMEOUT_MS: u64 = 5000;
/// Default gateway host
pub const DEFAULT_GATEWAY_HOST: &str = "127.0.0.1";
/// Default gateway port
pub const DEFAULT_GATEWAY_PORT: u16 = 18790;
/// Per-connection outbound frame buffer
pub const DEFAULT_OUTBOUND_BUFFER: usize = 64;
/// Seconds a client has to send its `connect` frame
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;

// ============================================================================
// Helper functions for paths (required for serde defaults)
// ============================================================================

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

fn default_fleetpulse_dir() -> PathBuf {
    home_dir().join(".fleetpulse")
}

// ============================================================================
// Main Config
// ============================================================================

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Presence cache configuration
    #[serde(default)]
    pub presence: PresenceConfig,
    /// Reconciliation loop configuration
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    /// Notification feed configuration
    #[serde(default)]
    pub notifications: NotificationsConfig,
    /// Durable store configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// Push gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,
}

// ============================================================================
// Presence Config
// ============================================================================

/// Which presence cache implementation to use
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PresenceBackend {
    /// Process-local TTL map (single node, lost on restart)
    #[default]
    Memory,
    /// Shared Redis instance
    Redis,
}

/// Presence cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    #[serde(default)]
    pub backend: PresenceBackend,
    #[serde(default = "PresenceConfig::default_redis_url")]
    pub redis_url: String,
    /// Seconds a device stays online after its last telemetry
    #[serde(default = "PresenceConfig::default_ttl_secs")]
    pub ttl_secs: u64,
    /// Per-call timeout against the cache
    #[serde(default = "PresenceConfig::default_op_timeout_ms")]
    pub op_timeout_ms: u64,
}

impl PresenceConfig {
    fn default_redis_url() -> String {
        DEFAULT_REDIS_URL.to_string()
    }
    fn default_ttl_secs() -> u64 {
        DEFAULT_PRESENCE_TTL_SECS
    }
    fn default_op_timeout_ms() -> u64 {
        DEFAULT_PRESENCE_TIMEOUT_MS
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            backend: PresenceBackend::Memory,
            redis_url: DEFAULT_REDIS_URL.to_string(),
            ttl_secs: DEFAULT_PRESENCE_TTL_SECS,
            op_timeout_ms: DEFAULT_PRESENCE_TIMEOUT_MS,
        }
    }
}

// ============================================================================
// Reconciler Config
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    #[serde(default = "ReconcilerConfig::default_enabled")]
    pub enabled: bool,
    #[serde(default = "ReconcilerConfig::default_interval_secs")]
    pub interval_secs: u64,
}

impl ReconcilerConfig {
    fn default_enabled() -> bool {
        true
    }
    fn default_interval_secs() -> u64 {
        DEFAULT_RECONCILE_INTERVAL_SECS
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: DEFAULT_RECONCILE_INTERVAL_SECS,
        }
    }
}

// ============================================================================
// Notifications Config
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    /// Page size used when a listing request gives none
    #[serde(default = "NotificationsConfig::default_list_limit")]
    pub list_limit: u32,
    /// Largest page a client may ask for
    #[serde(default = "NotificationsConfig::default_max_list_limit")]
    pub max_list_limit: u32,
}

impl NotificationsConfig {
    fn default_list_limit() -> u32 {
        DEFAULT_LIST_LIMIT
    }
    fn default_max_list_limit() -> u32 {
        DEFAULT_MAX_LIST_LIMIT
    }

    /// Clamp a requested page size into `1..=max_list_limit`
    pub fn effective_limit(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.list_limit)
            .clamp(1, self.max_list_limit.max(1))
    }
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            list_limit: DEFAULT_LIST_LIMIT,
            max_list_limit: DEFAULT_MAX_LIST_LIMIT,
        }
    }
}

// ============================================================================
// Storage Config
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database path
    #[serde(default = "StorageConfig::default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "StorageConfig::default_op_timeout_ms")]
    pub op_timeout_ms: u64,
}

impl StorageConfig {
    fn default_db_path() -> PathBuf {
        default_fleetpulse_dir().join("fleetpulse.sqlite")
    }
    fn default_op_timeout_ms() -> u64 {
        DEFAULT_STORAGE_TIMEOUT_MS
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: Self::default_db_path(),
            op_timeout_ms: DEFAULT_STORAGE_TIMEOUT_MS,
        }
    }
}

// ============================================================================
// Gateway Config
// ============================================================================

/// Push gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "GatewayConfig::default_host")]
    pub host: String,
    #[serde(default = "GatewayConfig::default_port")]
    pub port: u16,
    /// Frames queued per connection before a push counts as failed
    #[serde(default = "GatewayConfig::default_outbound_buffer")]
    pub outbound_buffer: usize,
    #[serde(default = "GatewayConfig::default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
}

impl GatewayConfig {
    fn default_host() -> String {
        DEFAULT_GATEWAY_HOST.to_string()
    }
    fn default_port() -> u16 {
        DEFAULT_GATEWAY_PORT
    }
    fn default_outbound_buffer() -> usize {
        DEFAULT_OUTBOUND_BUFFER
    }
    fn default_handshake_timeout_secs() -> u64 {
        DEFAULT_HANDSHAKE_TIMEOUT_SECS
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_GATEWAY_HOST.to_string(),
            port: DEFAULT_GATEWAY_PORT,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            handshake_timeout_secs: DEFAULT_HANDSHAKE_TIMEOUT_SECS,
        }
    }
}

// ============================================================================
// Config Loading and Validation
// ============================================================================

/// Configuration loader with validation
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file or default locations
    pub fn load(path: Option<&str>) -> Result<Config, FleetError> {
        let config_path = Self::resolve_config_path(path)?;
        Self::load_from(&config_path)
    }

    /// Load and validate a specific file
    pub fn load_from(path: &Path) -> Result<Config, FleetError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FleetError::config_parse_error(format!("Failed to read: {}", e)))?;
        let config: Config = serde_yml::from_str(&content)
            .map_err(|e| FleetError::config_parse_error(format!("Failed to parse: {}", e)))?;
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Resolve configuration file path
    fn resolve_config_path(path: Option<&str>) -> Result<PathBuf, FleetError> {
        if let Some(p) = path {
            return Ok(PathBuf::from(p));
        }

        let default_paths = [
            default_fleetpulse_dir().join("config.yaml"),
            PathBuf::from("./fleetpulse.yaml"),
        ];

        default_paths
            .into_iter()
            .find(|p| p.exists())
            .ok_or_else(|| {
                FleetError::config_not_found(
                    "Config not found. Run `fleetpulse config-sample` or create ~/.fleetpulse/config.yaml",
                )
            })
    }
}

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(config: &Config) -> Result<(), FleetError> {
        if config.presence.ttl_secs == 0 {
            return Err(FleetError::config_invalid(
                "presence.ttl_secs",
                "TTL must be at least one second",
            ));
        }

        if config.presence.op_timeout_ms == 0 {
            return Err(FleetError::config_invalid(
                "presence.op_timeout_ms",
                "Timeout must be positive",
            ));
        }

        if config.storage.op_timeout_ms == 0 {
            return Err(FleetError::config_invalid(
                "storage.op_timeout_ms",
                "Timeout must be positive",
            ));
        }

        if config.presence.backend == PresenceBackend::Redis
            && !config.presence.redis_url.starts_with("redis")
        {
            return Err(FleetError::config_invalid(
                "presence.redis_url",
                format!("Unsupported Redis URL '{}'", config.presence.redis_url),
            ));
        }

        if config.reconciler.interval_secs == 0 {
            return Err(FleetError::config_invalid(
                "reconciler.interval_secs",
                "Interval must be at least one second",
            ));
        }

        if config.notifications.list_limit > config.notifications.max_list_limit {
            return Err(FleetError::config_invalid(
                "notifications.list_limit",
                format!(
                    "Default page size {} exceeds max_list_limit {}",
                    config.notifications.list_limit, config.notifications.max_list_limit
                ),
            ));
        }

        if config.gateway.outbound_buffer == 0 {
            return Err(FleetError::config_invalid(
                "gateway.outbound_buffer",
                "Buffer must hold at least one frame",
            ));
        }

        Ok(())
    }
}

impl Config {
    /// Load configuration (explicit path or default locations)
    pub fn load(path: &Option<String>) -> Result<Self, FleetError> {
        ConfigLoader::load(path.as_deref())
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), FleetError> {
        let content = serde_yml::to_string(self)
            .map_err(|e| FleetError::config_parse_error(format!("Serialization failed: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Generate a sample configuration
    pub fn sample() -> Self {
        Config {
            presence: PresenceConfig {
                backend: PresenceBackend::Redis,
                ..PresenceConfig::default()
            },
            reconciler: ReconcilerConfig::default(),
            notifications: NotificationsConfig::default(),
            storage: StorageConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_presence_contract() {
        let config = Config::default();
        assert_eq!(config.presence.ttl_secs, 60);
        assert_eq!(config.reconciler.interval_secs, 30);
        assert!(config.reconciler.enabled);
        assert_eq!(config.presence.backend, PresenceBackend::Memory);
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = "presence:\n  backend: redis\n  ttl_secs: 90\ngateway:\n  port: 9000\n";
        let config: Config = serde_yml::from_str(yaml).unwrap();
        assert_eq!(config.presence.backend, PresenceBackend::Redis);
        assert_eq!(config.presence.ttl_secs, 90);
        assert_eq!(config.presence.op_timeout_ms, DEFAULT_PRESENCE_TIMEOUT_MS);
        assert_eq!(config.gateway.port, 9000);
        assert_eq!(config.gateway.host, DEFAULT_GATEWAY_HOST);
        assert_eq!(config.reconciler.interval_secs, 30);
    }

    #[test]
    fn test_validator_rejects_zero_ttl() {
        let mut config = Config::default();
        config.presence.ttl_secs = 0;
        let err = ConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("presence.ttl_secs"));
    }

    #[test]
    fn test_validator_rejects_zero_storage_timeout() {
        let mut config = Config::default();
        config.storage.op_timeout_ms = 0;
        let err = ConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("storage.op_timeout_ms"));
    }

    #[test]
    fn test_validator_rejects_page_size_above_cap() {
        let mut config = Config::default();
        config.notifications.list_limit = 500;
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_effective_limit_clamps() {
        let notifications = NotificationsConfig::default();
        assert_eq!(notifications.effective_limit(None), DEFAULT_LIST_LIMIT);
        assert_eq!(notifications.effective_limit(Some(0)), 1);
        assert_eq!(
            notifications.effective_limit(Some(10_000)),
            DEFAULT_MAX_LIST_LIMIT
        );
    }

    #[test]
    fn test_save_and_load_sample() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleetpulse.yaml");
        Config::sample().save(&path).unwrap();

        let loaded = ConfigLoader::load_from(&path).unwrap();
        assert_eq!(loaded.presence.backend, PresenceBackend::Redis);
        assert_eq!(loaded.gateway.port, DEFAULT_GATEWAY_PORT);
    }

    #[test]
    fn test_missing_explicit_path_is_parse_error() {
        let err = ConfigLoader::load(Some("/definitely/not/here.yaml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }
}
