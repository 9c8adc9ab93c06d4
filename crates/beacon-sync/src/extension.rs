//! # Notification Service Context
//!
//! Runs inside the short-lived notification extension process.
//!
//! ```text
//! process(raw, content)
//!    │
//!    ├── probe payload (callbackUrl, notificationId, image_url)
//!    │
//!    ├──┬── record "delivered" ── one POST, no retry ──┐
//!    │  │                                              ├── both bounded by
//!    │  └── fetch image_url ──── resolve MIME ─────────┘   the same deadline
//!    │
//!    └── content + attachment (if it arrived in time), else content as-is
//! ```
//!
//! Nothing is queued or persisted here; the extension may be killed at any
//! moment after the deadline.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};
use url::Url;

use beacon_core::{Clock, EngagementEvent, EngagementType, NotificationPayload, SystemClock};

use crate::config::SdkConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::{HttpClient, ReqwestClient, RequestSpec, RetryingTransport};

// =============================================================================
// Content
// =============================================================================

/// An image attached to a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub url: String,
    pub mime_type: String,
    pub data: Bytes,
}

/// The notification as it will be displayed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationContent {
    pub title: Option<String>,
    pub body: Option<String>,
    pub attachment: Option<Attachment>,
}

impl NotificationContent {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        NotificationContent {
            title: Some(title.into()),
            body: Some(body.into()),
            attachment: None,
        }
    }
}

// =============================================================================
// MIME Resolution
// =============================================================================

/// Identifies PNG, JPEG, GIF and WebP by their magic bytes.
pub fn sniff_mime(data: &[u8]) -> Option<&'static str> {
    if data.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        Some("image/png")
    } else if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if data.len() >= 12 && &data[..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        Some("image/webp")
    } else {
        None
    }
}

/// Prefers an `image/*` Content-Type, falling back to sniffing.
pub fn resolve_mime(content_type: Option<&str>, data: &[u8]) -> Option<String> {
    let declared = content_type
        .and_then(|value| value.split(';').next())
        .map(|value| value.trim().to_ascii_lowercase())
        .filter(|value| value.starts_with("image/") && value.len() > "image/".len());

    declared.or_else(|| sniff_mime(data).map(str::to_string))
}

// =============================================================================
// Attachment Fetching
// =============================================================================

/// Raw bytes of a downloaded attachment.
#[derive(Debug, Clone)]
pub struct FetchedAttachment {
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// Downloads attachment bytes.
#[async_trait]
pub trait AttachmentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> SyncResult<FetchedAttachment>;
}

/// Single-attempt GET through the engine's [`HttpClient`].
pub struct HttpAttachmentFetcher {
    transport: RetryingTransport,
}

impl HttpAttachmentFetcher {
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        HttpAttachmentFetcher {
            transport: RetryingTransport::new(client),
        }
    }
}

#[async_trait]
impl AttachmentFetcher for HttpAttachmentFetcher {
    async fn fetch(&self, url: &str) -> SyncResult<FetchedAttachment> {
        let response = self.transport.send_once(RequestSpec::get(url)).await?;

        if !response.is_success() {
            return Err(SyncError::ServerError {
                code: response.status,
                body: String::from_utf8_lossy(&response.body).into_owned(),
            });
        }
        if response.body.is_empty() {
            return Err(SyncError::InvalidResponse("empty attachment body".into()));
        }

        Ok(FetchedAttachment {
            content_type: response.header("Content-Type").map(str::to_string),
            data: response.body,
        })
    }
}

// =============================================================================
// Service Context
// =============================================================================

/// Entry point for the notification extension.
pub struct NotificationServiceContext {
    transport: RetryingTransport,
    fetcher: Arc<dyn AttachmentFetcher>,
    clock: Arc<dyn Clock>,
    budget: Duration,
    enable_tracking: bool,
}

impl NotificationServiceContext {
    pub fn new(config: &SdkConfig, client: Arc<dyn HttpClient>, clock: Arc<dyn Clock>) -> Self {
        NotificationServiceContext {
            transport: RetryingTransport::new(client.clone()),
            fetcher: Arc::new(HttpAttachmentFetcher::new(client)),
            clock,
            budget: config.extension_budget(),
            enable_tracking: config.enable_tracking,
        }
    }

    /// Context over a real HTTP client and the system clock.
    pub fn from_config(config: &SdkConfig) -> SyncResult<Self> {
        config.validate()?;
        let client = ReqwestClient::new(config.request_timeout(), config.api_key.clone())?;
        Ok(Self::new(config, Arc::new(client), Arc::new(SystemClock)))
    }

    /// Replaces the attachment downloader.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn AttachmentFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Records delivery and enriches `content`, returning within the budget.
    pub async fn process(
        &self,
        raw: &Map<String, Value>,
        content: NotificationContent,
    ) -> NotificationContent {
        let payload = NotificationPayload::from_raw(raw);
        let deadline = Instant::now() + self.budget;

        let (delivered, attachment) = tokio::join!(
            timeout_at(deadline, self.record_delivered(&payload)),
            timeout_at(deadline, self.fetch_attachment(&payload)),
        );

        match delivered {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Delivered event not recorded"),
            Err(_) => warn!(
                budget_ms = self.budget.as_millis() as u64,
                "Delivered event abandoned at deadline"
            ),
        }

        match attachment {
            Ok(Some(attachment)) => {
                info!(mime = %attachment.mime_type, bytes = attachment.data.len(), "Attached image");
                NotificationContent {
                    attachment: Some(attachment),
                    ..content
                }
            }
            Ok(None) => content,
            Err(_) => {
                warn!(
                    budget_ms = self.budget.as_millis() as u64,
                    "Attachment abandoned at deadline"
                );
                content
            }
        }
    }

    async fn record_delivered(&self, payload: &NotificationPayload) -> SyncResult<()> {
        if !self.enable_tracking {
            return Ok(());
        }

        let event = match EngagementEvent::from_notification(
            EngagementType::Delivered,
            payload,
            self.clock.now(),
        ) {
            Ok(event) => event,
            Err(e) => {
                debug!(error = %e, "Notification carries no engagement target");
                return Ok(());
            }
        };

        let request = RequestSpec::post_json(&event.callback_url, &[&event])?;
        self.transport.execute(&request, 1).await?;
        debug!(notification_id = ?event.notification_id, "Delivered event recorded");
        Ok(())
    }

    async fn fetch_attachment(&self, payload: &NotificationPayload) -> Option<Attachment> {
        let url = payload.image_url.as_deref()?;

        match Url::parse(url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
            _ => {
                debug!(url = %url, "Ignoring unusable image url");
                return None;
            }
        }

        let fetched = match self.fetcher.fetch(url).await {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!(url = %url, error = %e, "Attachment download failed");
                return None;
            }
        };

        let Some(mime_type) = resolve_mime(fetched.content_type.as_deref(), &fetched.data) else {
            debug!(url = %url, "Attachment is not a recognised image");
            return None;
        };

        Some(Attachment {
            url: url.to_string(),
            mime_type,
            data: fetched.data,
        })
    }
}
