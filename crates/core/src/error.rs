//! FleetPulse Error Types
//!
//! This module defines a layered error hierarchy:
//! - `DomainError`: Business logic errors (config, validation, missing records)
//! - `InfraError`: Infrastructure errors (IO, serialization, database, cache)
//! - `FleetError`: Top-level error that wraps both categories

use std::fmt;

/// Domain-level errors representing business logic failures
#[derive(Debug)]
pub enum DomainError {
    /// Configuration file not found at the specified path
    ConfigNotFound { path: String },
    /// Configuration validation failed
    ConfigInvalid { field: String, reason: String },
    /// Configuration parsing failed
    ConfigParse { source: String },
    /// Input rejected before reaching any store
    InvalidInput { field: String, reason: String },
    /// Record does not exist (or is not visible to the caller)
    NotFound { kind: String, id: String },
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigNotFound { path } => write!(f, "Config not found: {}", path),
            Self::ConfigInvalid { field, reason } => {
                write!(f, "Config invalid [{}]: {}", field, reason)
            }
            Self::ConfigParse { source } => write!(f, "Config parse error: {}", source),
            Self::InvalidInput { field, reason } => {
                write!(f, "Invalid input [{}]: {}", field, reason)
            }
            Self::NotFound { kind, id } => write!(f, "{} not found: {}", kind, id),
        }
    }
}

impl std::error::Error for DomainError {}

/// Infrastructure-level errors representing external system failures
#[derive(Debug)]
pub enum InfraError {
    /// IO operation failed
    Io(std::io::Error),
    /// JSON serialization/deserialization failed
    Json(serde_json::Error),
    /// YAML serialization/deserialization failed
    Yaml(serde_yml::Error),
    /// Durable store operation failed
    Database { reason: String },
    /// Presence cache operation failed
    Cache { reason: String },
    /// Network listener or transport failure
    Network { addr: String, reason: String },
}

impl fmt::Display for InfraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "IO error: {}", err),
            Self::Json(err) => write!(f, "JSON error: {}", err),
            Self::Yaml(err) => write!(f, "YAML error: {}", err),
            Self::Database { reason } => write!(f, "Database error: {}", reason),
            Self::Cache { reason } => write!(f, "Cache error: {}", reason),
            Self::Network { addr, reason } => write!(f, "Network error [{}]: {}", addr, reason),
        }
    }
}

impl std::error::Error for InfraError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Json(e) => Some(e),
            Self::Yaml(e) => Some(e),
            Self::Database { .. } | Self::Cache { .. } | Self::Network { .. } => None,
        }
    }
}

impl From<std::io::Error> for InfraError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for InfraError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}

impl From<serde_yml::Error> for InfraError {
    fn from(err: serde_yml::Error) -> Self {
        Self::Yaml(err)
    }
}

/// Top-level error type for FleetPulse
///
/// Wraps both domain and infrastructure errors so the host process has one
/// error type while library crates keep their own narrow enums.
#[derive(Debug)]
pub enum FleetError {
    /// Business logic error
    Domain(DomainError),
    /// Infrastructure/external system error
    Infra(InfraError),
    /// Generic error for edge cases
    Other(String),
}

impl fmt::Display for FleetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Domain(e) => write!(f, "{}", e),
            Self::Infra(e) => write!(f, "{}", e),
            Self::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for FleetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Domain(e) => Some(e),
            Self::Infra(e) => Some(e),
            Self::Other(_) => None,
        }
    }
}

impl From<DomainError> for FleetError {
    fn from(err: DomainError) -> Self {
        Self::Domain(err)
    }
}

impl From<InfraError> for FleetError {
    fn from(err: InfraError) -> Self {
        Self::Infra(err)
    }
}

impl From<std::io::Error> for FleetError {
    fn from(err: std::io::Error) -> Self {
        Self::Infra(InfraError::Io(err))
    }
}

impl From<serde_json::Error> for FleetError {
    fn from(err: serde_json::Error) -> Self {
        Self::Infra(InfraError::Json(err))
    }
}

impl From<serde_yml::Error> for FleetError {
    fn from(err: serde_yml::Error) -> Self {
        Self::Infra(InfraError::Yaml(err))
    }
}

impl FleetError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::Domain(DomainError::ConfigNotFound { path: path.into() })
    }

    pub fn config_parse_error(source: impl Into<String>) -> Self {
        Self::Domain(DomainError::ConfigParse {
            source: source.into(),
        })
    }

    pub fn config_invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Domain(DomainError::ConfigInvalid {
            field: field.into(),
            reason: reason.into(),
        })
    }

    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Domain(DomainError::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        })
    }

    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self::Domain(DomainError::NotFound {
            kind: kind.into(),
            id: id.into(),
        })
    }

    pub fn database(reason: impl Into<String>) -> Self {
        Self::Infra(InfraError::Database {
            reason: reason.into(),
        })
    }

    pub fn cache(reason: impl Into<String>) -> Self {
        Self::Infra(InfraError::Cache {
            reason: reason.into(),
        })
    }

    pub fn network(addr: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Infra(InfraError::Network {
            addr: addr.into(),
            reason: reason.into(),
        })
    }

    /// Whether the failure came from an external system rather than the caller
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Infra(InfraError::Database { .. })
                | Self::Infra(InfraError::Cache { .. })
                | Self::Infra(InfraError::Network { .. })
        )
    }
}
