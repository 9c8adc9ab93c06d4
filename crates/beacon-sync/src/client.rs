//! # Beacon Client
//!
//! The object host apps hold. Wires every subsystem together and exposes
//! them behind one handle.
//!
//! ## Startup
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  BeaconClient::start(config, db, capabilities, emitter)                 │
//! │                                                                         │
//! │  1. config.validate()          ──► InvalidConfiguration is fatal        │
//! │  2. ReqwestClient              ──► shared by push and engagement        │
//! │  3. SessionManager             ──► restores the stored session lazily   │
//! │  4. SyncCoordinator::hydrate   ──► snapshots from the store, flags off  │
//! │  5. EngagementBatcher::start   ──► loads queue, drops stale events      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Default Instance
//! At most one client may be registered process-wide with
//! [`register_default`]; a second registration fails with
//! `AlreadyRegistered`. Nothing is created implicitly.

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

use beacon_core::{
    Cart, ChangeFlags, Clock, DeviceType, EngagementEvent, EngagementType, NotificationPayload,
    Session, SystemClock, Wishlist,
};
use beacon_db::Database;

use crate::capabilities::PlatformCapabilities;
use crate::config::SdkConfig;
use crate::coordinator::{CoordinatorSettings, SyncCoordinator, SyncRequest, SyncResponse};
use crate::emitter::SyncEventEmitter;
use crate::engagement::{BatcherConfig, EngagementBatcher, EngagementHandle, FlushOutcome};
use crate::error::{SyncError, SyncResult};
use crate::session::SessionManager;
use crate::transport::{HttpClient, ReqwestClient, RetryingTransport};

static DEFAULT_CLIENT: OnceCell<Arc<BeaconClient>> = OnceCell::new();

/// Registers the process-wide default client. Only the first call succeeds.
pub fn register_default(client: Arc<BeaconClient>) -> SyncResult<()> {
    DEFAULT_CLIENT
        .set(client)
        .map_err(|_| SyncError::AlreadyRegistered)?;
    info!("Registered default Beacon client");
    Ok(())
}

/// The registered default client, if any.
pub fn default_client() -> Option<Arc<BeaconClient>> {
    DEFAULT_CLIENT.get().cloned()
}

/// Handle to a running engine instance.
pub struct BeaconClient {
    config: SdkConfig,
    db: Database,
    clock: Arc<dyn Clock>,
    capabilities: Arc<dyn PlatformCapabilities>,
    sessions: Arc<SessionManager>,
    coordinator: SyncCoordinator,
    engagement: EngagementHandle,
}

impl BeaconClient {
    /// Starts an engine over the real network and the system clock.
    pub async fn start(
        config: SdkConfig,
        db: Database,
        capabilities: Arc<dyn PlatformCapabilities>,
        emitter: Arc<dyn SyncEventEmitter>,
    ) -> SyncResult<Self> {
        config.validate()?;
        let http = ReqwestClient::new(config.request_timeout(), config.api_key.clone())?;
        Self::start_with(
            config,
            db,
            Arc::new(http),
            Arc::new(SystemClock),
            capabilities,
            emitter,
        )
        .await
    }

    /// Starts an engine over the given HTTP client and clock.
    pub async fn start_with(
        config: SdkConfig,
        db: Database,
        http: Arc<dyn HttpClient>,
        clock: Arc<dyn Clock>,
        capabilities: Arc<dyn PlatformCapabilities>,
        emitter: Arc<dyn SyncEventEmitter>,
    ) -> SyncResult<Self> {
        config.validate()?;

        let transport = RetryingTransport::new(http);
        let store = db.state();

        let sessions = Arc::new(SessionManager::new(
            store.clone(),
            clock.clone(),
            emitter.clone(),
        ));

        let coordinator = SyncCoordinator::hydrate(
            CoordinatorSettings::from_config(&config),
            store.clone(),
            transport.clone(),
            sessions.clone(),
            emitter.clone(),
            clock.clone(),
        )
        .await?;

        let engagement = EngagementBatcher::start(
            store,
            transport,
            clock.clone(),
            capabilities.clone(),
            emitter,
            BatcherConfig::from_config(&config, capabilities.as_ref()),
        )
        .await?;

        info!(
            endpoint = %config.endpoint(),
            context = ?capabilities.context(),
            tracking = config.enable_tracking,
            "Beacon client started"
        );

        Ok(BeaconClient {
            config,
            db,
            clock,
            capabilities,
            sessions,
            coordinator,
            engagement,
        })
    }

    pub fn config(&self) -> &SdkConfig {
        &self.config
    }

    pub fn capabilities(&self) -> &dyn PlatformCapabilities {
        self.capabilities.as_ref()
    }

    pub fn coordinator(&self) -> &SyncCoordinator {
        &self.coordinator
    }

    pub fn engagement(&self) -> &EngagementHandle {
        &self.engagement
    }

    // =========================================================================
    // Session
    // =========================================================================

    pub async fn current_session(&self) -> SyncResult<Session> {
        self.sessions.current().await
    }

    pub async fn refresh_session(&self) -> SyncResult<Session> {
        self.sessions.force_refresh().await
    }

    // =========================================================================
    // State
    // =========================================================================

    pub async fn set_device_id(&self, device_id: &str) -> SyncResult<()> {
        self.coordinator.set_device_id(device_id).await
    }

    pub async fn set_profile_id(&self, profile_id: &str) -> SyncResult<()> {
        self.coordinator.set_profile_id(profile_id).await
    }

    pub async fn clear_profile_id(&self) -> SyncResult<()> {
        self.coordinator.clear_profile_id().await
    }

    pub async fn set_cart(&self, cart: Cart) -> SyncResult<()> {
        self.coordinator.set_cart(cart).await
    }

    pub async fn set_wishlist(&self, wishlist: Wishlist) -> SyncResult<()> {
        self.coordinator.set_wishlist(wishlist).await
    }

    pub async fn set_push_token(&self, token: &str, device_type: DeviceType) -> SyncResult<()> {
        self.coordinator.set_push_token(token, device_type).await
    }

    pub async fn flags(&self) -> ChangeFlags {
        self.coordinator.flags().await
    }

    pub async fn merge_profile_ids(&self) -> Vec<String> {
        self.coordinator.merge_profile_ids().await
    }

    pub async fn last_sync_at(&self) -> Option<DateTime<Utc>> {
        self.coordinator.last_sync_at().await
    }

    // =========================================================================
    // Sync
    // =========================================================================

    pub async fn push(&self, request: SyncRequest) -> SyncResult<SyncResponse> {
        self.coordinator.push(request).await
    }

    /// Pushes the current diff with no overrides.
    pub async fn sync(&self) -> SyncResult<SyncResponse> {
        self.push(SyncRequest::default()).await
    }

    // =========================================================================
    // Engagement
    // =========================================================================

    /// Records an engagement with a received notification.
    ///
    /// Dropped silently while tracking is disabled.
    pub async fn track_notification(
        &self,
        kind: EngagementType,
        raw: &Map<String, Value>,
    ) -> SyncResult<()> {
        if !self.config.enable_tracking {
            debug!(kind = %kind, "Tracking disabled, engagement dropped");
            return Ok(());
        }

        let payload = NotificationPayload::from_raw(raw);
        let event = EngagementEvent::from_notification(kind, &payload, self.clock.now())?;
        self.engagement.track(event).await
    }

    pub async fn flush_engagement(&self) -> SyncResult<FlushOutcome> {
        self.engagement.flush_now().await
    }

    pub async fn pending_engagement(&self) -> SyncResult<Vec<EngagementEvent>> {
        self.engagement.pending().await
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Stops the batcher (running its final flush) and closes the store.
    pub async fn shutdown(&self) -> SyncResult<()> {
        info!("Beacon client shutting down");
        self.engagement.shutdown().await?;
        self.db.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{MainAppCapabilities, NoCapabilities};
    use crate::emitter::recording::{Recorded, RecordingEmitter};
    use crate::emitter::NoOpEmitter;
    use crate::transport::fake::{Reply, ScriptedClient};
    use beacon_core::ManualClock;
    use beacon_db::DbConfig;
    use serde_json::json;

    async fn start(
        config: SdkConfig,
        http: Arc<ScriptedClient>,
        emitter: Arc<dyn SyncEventEmitter>,
    ) -> SyncResult<BeaconClient> {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        BeaconClient::start_with(
            config,
            db,
            http,
            Arc::new(ManualClock::new(Utc::now())),
            Arc::new(NoCapabilities),
            emitter,
        )
        .await
    }

    fn notification(id: &str) -> Map<String, Value> {
        match json!({
            "callbackUrl": "https://cb.example.com/engage",
            "notificationId": id,
            "target": "promo"
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_invalid_config_is_fatal() {
        let config = SdkConfig {
            engagement_batch_size: 0,
            ..Default::default()
        };
        let result = start(config, Arc::new(ScriptedClient::new()), Arc::new(NoOpEmitter)).await;

        assert!(matches!(result, Err(SyncError::InvalidConfiguration(_))));
    }

    #[tokio::test]
    async fn test_track_notification_queues_and_flushes() {
        let http = Arc::new(ScriptedClient::new());
        let client = start(SdkConfig::default(), http.clone(), Arc::new(NoOpEmitter))
            .await
            .unwrap();

        client
            .track_notification(EngagementType::Delivered, &notification("n1"))
            .await
            .unwrap();
        let pending = client.pending_engagement().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].metadata.get("target").map(String::as_str), Some("promo"));

        let outcome = client.flush_engagement().await.unwrap();
        assert_eq!(outcome, FlushOutcome::Delivered { sent: 1, remaining: 0 });
        assert_eq!(http.requests()[0].url, "https://cb.example.com/engage");
    }

    #[tokio::test]
    async fn test_track_notification_without_callback_is_rejected() {
        let http = Arc::new(ScriptedClient::new());
        let client = start(SdkConfig::default(), http.clone(), Arc::new(NoOpEmitter))
            .await
            .unwrap();

        let raw = Map::new();
        let err = client
            .track_notification(EngagementType::Opened, &raw)
            .await
            .unwrap_err();

        assert_eq!(err, SyncError::MissingRequiredField("callbackUrl".into()));
        assert!(client.pending_engagement().await.unwrap().is_empty());
        assert_eq!(http.calls(), 0);
    }

    #[tokio::test]
    async fn test_tracking_disabled_drops_engagement() {
        let http = Arc::new(ScriptedClient::new());
        let config = SdkConfig {
            enable_tracking: false,
            ..Default::default()
        };
        let client = start(config, http.clone(), Arc::new(NoOpEmitter)).await.unwrap();

        client
            .track_notification(EngagementType::Clicked, &notification("n1"))
            .await
            .unwrap();

        assert!(client.pending_engagement().await.unwrap().is_empty());
        assert_eq!(http.calls(), 0);
    }

    #[tokio::test]
    async fn test_sync_emits_session_and_completion() {
        let http = Arc::new(ScriptedClient::new());
        let emitter = Arc::new(RecordingEmitter::default());
        let client = start(SdkConfig::default(), http.clone(), emitter.clone())
            .await
            .unwrap();

        client.set_profile_id("p1").await.unwrap();
        client.sync().await.unwrap();

        let session = client.current_session().await.unwrap();
        assert_eq!(
            emitter.events(),
            vec![
                Recorded::SessionStarted(session.session_id.clone()),
                Recorded::SyncCompleted(session.session_id),
            ]
        );
        assert!(client.last_sync_at().await.is_some());
    }

    #[tokio::test]
    async fn test_shutdown_flushes_pending_engagement() {
        let http = Arc::new(ScriptedClient::new());
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let caps = MainAppCapabilities::new();
        let client = BeaconClient::start_with(
            SdkConfig::default(),
            db,
            http.clone(),
            Arc::new(ManualClock::new(Utc::now())),
            Arc::new(caps.clone()),
            Arc::new(NoOpEmitter),
        )
        .await
        .unwrap();

        client
            .track_notification(EngagementType::Delivered, &notification("n1"))
            .await
            .unwrap();
        assert_eq!(http.calls(), 0);

        client.shutdown().await.unwrap();

        assert_eq!(http.calls(), 1);
        assert_eq!(caps.active_background_tasks(), 0);
    }

    #[tokio::test]
    async fn test_failed_sync_surfaces_error() {
        let http = Arc::new(ScriptedClient::new());
        http.push(Reply::status(401));
        let client = start(SdkConfig::default(), http.clone(), Arc::new(NoOpEmitter))
            .await
            .unwrap();
        client.set_profile_id("p1").await.unwrap();
        client.set_profile_id("p2").await.unwrap();

        assert_eq!(client.sync().await.unwrap_err(), SyncError::Unauthorized);
        assert!(client.flags().await.profile_changed);
        assert_eq!(client.merge_profile_ids().await, vec!["p1".to_string()]);
    }

    #[tokio::test]
    async fn test_default_registration_is_single_shot() {
        let first = start(
            SdkConfig::default(),
            Arc::new(ScriptedClient::new()),
            Arc::new(NoOpEmitter),
        )
        .await
        .map(Arc::new)
        .unwrap();
        let second = start(
            SdkConfig::default(),
            Arc::new(ScriptedClient::new()),
            Arc::new(NoOpEmitter),
        )
        .await
        .map(Arc::new)
        .unwrap();

        register_default(first.clone()).unwrap();
        assert_eq!(
            register_default(second).unwrap_err(),
            SyncError::AlreadyRegistered
        );

        let registered = default_client().unwrap();
        assert!(Arc::ptr_eq(&registered, &first));
    }
}
