//! # Sync Error Types
//!
//! Error types for engine operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Local input    │  │   Transport     │  │     Backend             │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  NetworkError   │  │  Unauthorized (401)     │ │
//! │  │  MissingField   │  │  Timeout        │  │  ServerError(code,body) │ │
//! │  │  InvalidInput   │  │                 │  │  InvalidResponse        │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐                              │
//! │  │    Storage      │  │    Lifecycle    │                              │
//! │  │                 │  │                 │                              │
//! │  │  Database       │  │  ShuttingDown   │                              │
//! │  │  ConfigLoad/Save│  │  ChannelError   │                              │
//! │  │  Serialization  │  │  AlreadyRegist. │                              │
//! │  └─────────────────┘  └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use beacon_core::{CoreError, ValidationError};
use thiserror::Error;

/// Result type alias for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Engine error type covering every failure a caller can observe.
///
/// Cloneable so a single flush outcome can be reported to several waiters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    // =========================================================================
    // Local Input Errors
    // =========================================================================
    /// Non-positive timeout/batch size/interval, negative retry count.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Empty identifier or callback URL. Rejected before any I/O.
    #[error("Missing required field: {0}")]
    MissingRequiredField(String),

    /// Present but malformed input (e.g. a non-http callback URL).
    #[error("Invalid {field}: {reason}")]
    InvalidInput { field: String, reason: String },

    // =========================================================================
    // Transport / Backend Errors
    // =========================================================================
    /// Timeout, reset, DNS failure... after the attempt budget ran out.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// HTTP 401. Never retried.
    #[error("Unauthorized")]
    Unauthorized,

    /// Non-2xx status other than 401.
    #[error("Server error {code}: {body}")]
    ServerError { code: u16, body: String },

    /// A 2xx body that could not be decoded.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// A deadline-bounded operation ran out of time.
    #[error("Timed out after {0} ms")]
    Timeout(u64),

    // =========================================================================
    // Storage / Config Errors
    // =========================================================================
    #[error("Database error: {0}")]
    Database(String),

    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    /// The component has been shut down.
    #[error("Engine is shutting down")]
    ShuttingDown,

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// A default client is already registered for this process.
    #[error("A default client is already registered")]
    AlreadyRegistered,
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<ValidationError> for SyncError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::Required { field } => SyncError::MissingRequiredField(field),
            other => SyncError::InvalidInput {
                field: other.field().to_string(),
                reason: other.to_string(),
            },
        }
    }
}

impl From<CoreError> for SyncError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(v) => v.into(),
            other => SyncError::SerializationFailed(other.to_string()),
        }
    }
}

impl From<beacon_db::DbError> for SyncError {
    fn from(err: beacon_db::DbError) -> Self {
        SyncError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::NetworkError(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if the transport should try again.
    ///
    /// ## Retryable Errors
    /// - Transport failures (timeout, reset)
    /// - 5xx responses
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::NetworkError(_) => true,
            SyncError::ServerError { code, .. } => *code >= 500,
            _ => false,
        }
    }

    /// Returns true if repeating the same request can never succeed.
    pub fn is_terminal(&self) -> bool {
        match self {
            SyncError::Unauthorized
            | SyncError::InvalidConfiguration(_)
            | SyncError::MissingRequiredField(_)
            | SyncError::InvalidInput { .. } => true,
            SyncError::ServerError { code, .. } => *code < 500,
            _ => false,
        }
    }

    /// Returns true for errors raised before any I/O happened.
    pub fn is_local_rejection(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfiguration(_)
                | SyncError::MissingRequiredField(_)
                | SyncError::InvalidInput { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::NetworkError("reset".into()).is_retryable());
        assert!(SyncError::ServerError { code: 503, body: String::new() }.is_retryable());

        assert!(!SyncError::Unauthorized.is_retryable());
        assert!(!SyncError::ServerError { code: 404, body: String::new() }.is_retryable());
        assert!(!SyncError::InvalidResponse("eof".into()).is_retryable());
    }

    #[test]
    fn test_terminal_errors() {
        assert!(SyncError::Unauthorized.is_terminal());
        assert!(SyncError::ServerError { code: 422, body: String::new() }.is_terminal());
        assert!(!SyncError::ServerError { code: 500, body: String::new() }.is_terminal());
        assert!(!SyncError::NetworkError("timeout".into()).is_terminal());
    }

    #[test]
    fn test_validation_conversion() {
        let err: SyncError = ValidationError::required("deviceId").into();
        assert_eq!(err, SyncError::MissingRequiredField("deviceId".into()));
        assert!(err.is_local_rejection());

        let err: SyncError = ValidationError::InvalidFormat {
            field: "callbackUrl".into(),
            reason: "unsupported scheme 'ftp'".into(),
        }
        .into();
        assert!(matches!(err, SyncError::InvalidInput { ref field, .. } if field == "callbackUrl"));
    }
}
