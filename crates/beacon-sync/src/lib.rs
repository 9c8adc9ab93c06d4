//! # beacon-sync: Sync Engine for the Beacon SDK
//!
//! Tracks what changed about the user (device, profile, cart, wishlist),
//! pushes those diffs to the backend, and reports notification engagement
//! in batches.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Beacon Engine                                    │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                 BeaconClient (host-facing handle)                │  │
//! │  └───────┬──────────────────────┬───────────────────────┬───────────┘  │
//! │          ▼                      ▼                       ▼              │
//! │  ┌────────────────┐  ┌────────────────────┐  ┌──────────────────────┐  │
//! │  │ SessionManager │  │ SyncCoordinator    │  │ EngagementBatcher    │  │
//! │  │                │  │                    │  │                      │  │
//! │  │ 24h identity,  │◄─│ change flags,      │  │ actor task, size /   │  │
//! │  │ not sliding    │  │ merge ids, push    │  │ timer / priority     │  │
//! │  └───────┬────────┘  └─────────┬──────────┘  └──────────┬───────────┘  │
//! │          │                     │                        │              │
//! │          │                     ▼                        ▼              │
//! │          │           ┌───────────────────────────────────────────┐     │
//! │          │           │ RetryingTransport (flat 1s / 2s retries)  │     │
//! │          │           │      └── HttpClient (reqwest)             │     │
//! │          │           └───────────────────────────────────────────┘     │
//! │          ▼                                                             │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │            beacon-db StateRepository (SQLite key-value)          │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! │                                                                         │
//! │  NOTIFICATION EXTENSION (separate process):                            │
//! │  NotificationServiceContext ── delivered event + image attachment      │
//! │  within a 5s budget, no queue, no persistence                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`client`] - `BeaconClient` and the process-wide default instance
//! - [`coordinator`] - Change-flag push to the sync endpoint
//! - [`engagement`] - Engagement batcher actor and its handle
//! - [`extension`] - Notification extension context and attachments
//! - [`session`] - Session minting and restoration
//! - [`transport`] - HTTP seam and the retry policy
//! - [`capabilities`] - Per-context platform capabilities
//! - [`emitter`] - Observer trait for engine events
//! - [`config`] - `SdkConfig` loading and validation
//! - [`logging`] - `tracing` subscriber bootstrap
//! - [`error`] - Sync error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use beacon_db::{Database, DbConfig};
//! use beacon_sync::{BeaconClient, MainAppCapabilities, NoOpEmitter, SdkConfig};
//! use std::sync::Arc;
//!
//! let config = SdkConfig::load_or_default(None);
//! beacon_sync::logging::init_tracing(config.verbose_logging);
//!
//! let db = Database::new(DbConfig::new("beacon.db")).await?;
//! let client = Arc::new(
//!     BeaconClient::start(config, db, Arc::new(MainAppCapabilities::new()), Arc::new(NoOpEmitter))
//!         .await?,
//! );
//! beacon_sync::register_default(client.clone())?;
//!
//! client.set_profile_id("p-123").await?;
//! client.sync().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod capabilities;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod emitter;
pub mod engagement;
pub mod error;
pub mod extension;
pub mod logging;
pub mod session;
pub mod transport;

// =============================================================================
// Re-exports
// =============================================================================

pub use capabilities::{
    BackgroundTaskGuard, ExecutionContext, MainAppCapabilities, NoCapabilities,
    PlatformCapabilities,
};
pub use client::{default_client, register_default, BeaconClient};
pub use config::SdkConfig;
pub use coordinator::{SyncCoordinator, SyncRequest, SyncResponse};
pub use emitter::{NoOpEmitter, SyncEventEmitter};
pub use engagement::{BatcherConfig, EngagementBatcher, EngagementHandle, FlushOutcome};
pub use error::{SyncError, SyncResult};
pub use extension::{
    Attachment, AttachmentFetcher, NotificationContent, NotificationServiceContext,
};
pub use session::SessionManager;
pub use transport::{HttpClient, HttpResponse, Method, RequestSpec, ReqwestClient, RetryingTransport};
