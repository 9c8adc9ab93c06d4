//! # Notification Payload Probing
//!
//! Push providers disagree on where custom fields live. Some put them at the
//! top level of the payload, others nest them under `data` (sometimes as a
//! JSON-encoded string). Every lookup probes nested `data` first and falls
//! back to the top level.
//!
//! ```text
//! {                                   {
//!   "aps": {...},                       "callbackUrl": "https://...",
//!   "data": {                           "notificationId": "n-1"
//!     "callbackUrl": "https://...",   }
//!     "notificationId": "n-1"
//!   }                                  ▲ top-level fallback
//! }
//!   ▲ preferred
//! ```

use serde_json::{Map, Value};

/// Keys probed for each field, in priority order.
const CALLBACK_URL_KEYS: &[&str] = &["callbackUrl"];
const NOTIFICATION_ID_KEYS: &[&str] = &["notificationId"];
const TARGET_KEYS: &[&str] = &["target"];
const SCREEN_KEYS: &[&str] = &["navigate_to_screen"];
const URL_KEYS: &[&str] = &["navigate_to_url"];
const IMAGE_KEYS: &[&str] = &["image_url", "imageUrl"];

/// The fields the engine reads from a raw notification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationPayload {
    pub callback_url: Option<String>,
    pub notification_id: Option<String>,
    pub target: Option<String>,
    pub navigate_to_screen: Option<String>,
    pub navigate_to_url: Option<String>,
    pub image_url: Option<String>,
}

impl NotificationPayload {
    /// Extracts the known fields from a raw payload.
    pub fn from_raw(raw: &Map<String, Value>) -> Self {
        let nested = nested_data(raw);
        let probe = |keys: &[&str]| {
            nested
                .as_ref()
                .and_then(|data| lookup(data, keys))
                .or_else(|| lookup(raw, keys))
        };

        NotificationPayload {
            callback_url: probe(CALLBACK_URL_KEYS),
            notification_id: probe(NOTIFICATION_ID_KEYS),
            target: probe(TARGET_KEYS),
            navigate_to_screen: probe(SCREEN_KEYS),
            navigate_to_url: probe(URL_KEYS),
            image_url: probe(IMAGE_KEYS),
        }
    }

    /// Parses a JSON document; anything but an object yields an empty payload.
    pub fn from_json_str(json: &str) -> Self {
        match serde_json::from_str::<Value>(json) {
            Ok(Value::Object(map)) => Self::from_raw(&map),
            _ => Self::default(),
        }
    }
}

/// Returns the `data` object, decoding it if it was sent as a JSON string.
fn nested_data(raw: &Map<String, Value>) -> Option<Map<String, Value>> {
    match raw.get("data")? {
        Value::Object(map) => Some(map.clone()),
        Value::String(encoded) => match serde_json::from_str::<Value>(encoded) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        },
        _ => None,
    }
}

/// First non-empty scalar under any of `keys`. Numbers are stringified.
fn lookup(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match map.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_nested_data_preferred() {
        let raw = as_map(json!({
            "callbackUrl": "https://top.example.com",
            "data": {
                "callbackUrl": "https://nested.example.com",
                "notificationId": "n-1"
            }
        }));

        let payload = NotificationPayload::from_raw(&raw);
        assert_eq!(payload.callback_url.as_deref(), Some("https://nested.example.com"));
        assert_eq!(payload.notification_id.as_deref(), Some("n-1"));
    }

    #[test]
    fn test_top_level_fallback() {
        let raw = as_map(json!({
            "data": { "target": "home" },
            "callbackUrl": "https://top.example.com",
            "navigate_to_url": "https://shop.example.com/sale"
        }));

        let payload = NotificationPayload::from_raw(&raw);
        assert_eq!(payload.callback_url.as_deref(), Some("https://top.example.com"));
        assert_eq!(payload.target.as_deref(), Some("home"));
        assert_eq!(
            payload.navigate_to_url.as_deref(),
            Some("https://shop.example.com/sale")
        );
        assert_eq!(payload.navigate_to_screen, None);
    }

    #[test]
    fn test_string_encoded_data_and_numeric_ids() {
        let raw = as_map(json!({
            "data": "{\"notificationId\": 42, \"navigate_to_screen\": \"cart\"}"
        }));

        let payload = NotificationPayload::from_raw(&raw);
        assert_eq!(payload.notification_id.as_deref(), Some("42"));
        assert_eq!(payload.navigate_to_screen.as_deref(), Some("cart"));
    }

    #[test]
    fn test_empty_values_ignored() {
        let payload = NotificationPayload::from_json_str(
            r#"{"data": {"callbackUrl": "  "}, "callbackUrl": "https://cb.example.com"}"#,
        );
        assert_eq!(payload.callback_url.as_deref(), Some("https://cb.example.com"));

        assert_eq!(NotificationPayload::from_json_str("[]"), NotificationPayload::default());
    }
}
