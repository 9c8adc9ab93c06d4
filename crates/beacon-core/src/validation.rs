//! # Validation Module
//!
//! Local checks applied before anything is persisted, queued or sent.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Host app                                                      │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                  │
//! │  ├── empty ids            → Required (dropped, never queued)            │
//! │  └── malformed callbacks  → InvalidFormat                               │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Backend                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use url::Url;

use crate::error::ValidationError;
use crate::MAX_IDENTIFIER_LEN;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validates a device or profile identifier and returns it trimmed.
///
/// ## Example
/// ```rust
/// use beacon_core::validation::validate_identifier;
///
/// assert_eq!(validate_identifier("profileId", " p1 ").unwrap(), "p1");
/// assert!(validate_identifier("profileId", "   ").is_err());
/// ```
pub fn validate_identifier(field: &str, value: &str) -> ValidationResult<String> {
    let value = value.trim();

    if value.is_empty() {
        return Err(ValidationError::required(field));
    }

    if value.chars().count() > MAX_IDENTIFIER_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_IDENTIFIER_LEN,
        });
    }

    Ok(value.to_string())
}

/// Validates an engagement callback URL.
///
/// ## Rules
/// - Must not be empty
/// - Must parse as an absolute URL
/// - Scheme must be `http` or `https`
pub fn validate_callback_url(value: &str) -> ValidationResult<String> {
    let value = value.trim();

    if value.is_empty() {
        return Err(ValidationError::required("callbackUrl"));
    }

    let parsed = Url::parse(value).map_err(|e| ValidationError::InvalidFormat {
        field: "callbackUrl".to_string(),
        reason: e.to_string(),
    })?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ValidationError::InvalidFormat {
                field: "callbackUrl".to_string(),
                reason: format!("unsupported scheme '{}'", other),
            })
        }
    }

    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(ValidationError::InvalidFormat {
            field: "callbackUrl".to_string(),
            reason: "missing host".to_string(),
        });
    }

    Ok(value.to_string())
}
