//! # Session
//!
//! Rolling session identity with a fixed 24 hour lifetime.
//!
//! ```text
//! created_at                                   created_at + 24h
//!     │◄──────────────── valid ─────────────────────►│ expired ...
//!     ▼                                              ▼
//! ────●──────────────────────────────────────────────●──────────────►
//!
//! The TTL is NOT sliding: reads never extend it.
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::SESSION_TTL_HOURS;

/// An opaque session token and its creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Opaque session identifier (UUID v4).
    pub session_id: String,

    /// When the session was minted.
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Mints a fresh session starting at `now`.
    pub fn mint(now: DateTime<Utc>) -> Self {
        Session {
            session_id: Uuid::new_v4().to_string(),
            created_at: now,
        }
    }

    /// The fixed session lifetime.
    pub fn ttl() -> Duration {
        Duration::hours(SESSION_TTL_HOURS)
    }

    /// Instant after which the session is expired.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + Self::ttl()
    }

    /// Returns true if `now − created_at > 24h`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.created_at) > Self::ttl()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_ttl_is_exclusive() {
        let now = Utc::now();
        let session = Session::mint(now);

        assert!(!session.is_expired_at(now));
        assert!(!session.is_expired_at(now + Duration::hours(24)));
        assert!(session.is_expired_at(now + Duration::hours(24) + Duration::seconds(1)));
    }

    #[test]
    fn test_minted_sessions_are_distinct() {
        let now = Utc::now();
        assert_ne!(Session::mint(now).session_id, Session::mint(now).session_id);
    }

    #[test]
    fn test_session_serializes_camel_case() {
        let session = Session::mint(Utc::now());
        let json = serde_json::to_value(&session).unwrap();
        assert!(json.get("sessionId").is_some());
        assert!(json.get("createdAt").is_some());
    }
}
