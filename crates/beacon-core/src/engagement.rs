//! # Engagement Events
//!
//! Telemetry records for push notification lifecycle moments.
//!
//! ## Priority
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │   Delivered  → normal priority, waits for batch size or timer           │
//! │   Opened     → high priority, flushes immediately                       │
//! │   Clicked    → high priority, flushes immediately                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The serialized form doubles as the persisted form and the wire form sent
//! to each callback URL:
//! ```json
//! {"type":"clicked","callbackUrl":"https://...","notificationId":"n-1",
//!  "timestamp":"2024-05-01T10:00:00Z","metadata":{"target":"home"}}
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ValidationError;
use crate::notification::NotificationPayload;
use crate::validation::{validate_callback_url, ValidationResult};
use crate::MAX_EVENT_AGE_DAYS;

// =============================================================================
// Engagement Type
// =============================================================================

/// Notification lifecycle moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngagementType {
    Delivered,
    Opened,
    Clicked,
}

impl EngagementType {
    /// High-priority events trigger an immediate flush.
    pub fn is_high_priority(&self) -> bool {
        matches!(self, EngagementType::Opened | EngagementType::Clicked)
    }
}

impl std::fmt::Display for EngagementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngagementType::Delivered => write!(f, "delivered"),
            EngagementType::Opened => write!(f, "opened"),
            EngagementType::Clicked => write!(f, "clicked"),
        }
    }
}

impl std::str::FromStr for EngagementType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "delivered" => Ok(EngagementType::Delivered),
            "opened" => Ok(EngagementType::Opened),
            "clicked" => Ok(EngagementType::Clicked),
            other => Err(ValidationError::InvalidFormat {
                field: "type".to_string(),
                reason: format!("unknown engagement type '{}'", other),
            }),
        }
    }
}

// =============================================================================
// Engagement Event
// =============================================================================

/// A pending engagement record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngagementEvent {
    #[serde(rename = "type")]
    pub event_type: EngagementType,

    pub callback_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_id: Option<String>,

    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl EngagementEvent {
    /// Creates a validated event.
    pub fn new(
        event_type: EngagementType,
        callback_url: &str,
        notification_id: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> ValidationResult<Self> {
        Ok(EngagementEvent {
            event_type,
            callback_url: validate_callback_url(callback_url)?,
            notification_id: notification_id.filter(|id| !id.trim().is_empty()),
            timestamp,
            metadata: BTreeMap::new(),
        })
    }

    /// Builds an event from a probed notification payload.
    ///
    /// Navigation fields are carried as metadata.
    pub fn from_notification(
        event_type: EngagementType,
        payload: &NotificationPayload,
        now: DateTime<Utc>,
    ) -> ValidationResult<Self> {
        let callback_url = payload
            .callback_url
            .as_deref()
            .ok_or_else(|| ValidationError::required("callbackUrl"))?;

        let mut event = Self::new(event_type, callback_url, payload.notification_id.clone(), now)?;

        let navigation = [
            ("target", &payload.target),
            ("navigate_to_screen", &payload.navigate_to_screen),
            ("navigate_to_url", &payload.navigate_to_url),
        ];
        for (key, value) in navigation {
            if let Some(value) = value {
                event.metadata.insert(key.to_string(), value.clone());
            }
        }

        Ok(event)
    }

    /// Adds one metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Maximum age before an event is dropped unsent.
    pub fn max_age() -> Duration {
        Duration::days(MAX_EVENT_AGE_DAYS)
    }

    /// Returns true if the event is older than seven days at `now`.
    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.timestamp) > Self::max_age()
    }

    /// Identity used to remove delivered events from the queue.
    ///
    /// Events without a notification id have no removal key.
    pub fn removal_key(&self) -> Option<(&str, EngagementType)> {
        self.notification_id
            .as_deref()
            .map(|id| (id, self.event_type))
    }
}

/// Groups events by callback URL, preserving first-seen URL order and the
/// relative order of events within each group.
pub fn group_by_callback(events: &[EngagementEvent]) -> Vec<(String, Vec<EngagementEvent>)> {
    let mut groups: Vec<(String, Vec<EngagementEvent>)> = Vec::new();

    for event in events {
        match groups.iter_mut().find(|(url, _)| *url == event.callback_url) {
            Some((_, group)) => group.push(event.clone()),
            None => groups.push((event.callback_url.clone(), vec![event.clone()])),
        }
    }

    groups
}
