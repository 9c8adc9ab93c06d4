//! # Sync Coordinator
//!
//! Owns the in-memory change tracker and pushes diffs to the backend.
//!
//! ## Push Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          push(request)                                  │
//! │                                                                         │
//! │  tracking disabled? ──yes──► Ok(SyncResponse::default())                │
//! │       │ no                   (no network, no state change)              │
//! │       ▼                                                                 │
//! │  lock state ─────────────────────────────────────────────┐              │
//! │       │                                                   │ held until  │
//! │       ▼                                                   │ the outcome │
//! │  build {context, options} from flags + snapshots          │ is applied  │
//! │       │                                                   │             │
//! │       ▼                                                   │             │
//! │  RetryingTransport::execute(max_retry_attempts)           │             │
//! │       │                                                   │             │
//! │   ┌───┴──────────────┐                                    │             │
//! │   ▼ 2xx + valid JSON ▼ anything else                      │             │
//! │  clear flags,       flags + merge ids untouched,          │             │
//! │  clear merge ids,   error returned as-is                  │             │
//! │  stamp last_sync_at                                       │             │
//! │   └──────────────────┴────────────────────────────────────┘             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Format
//! ```json
//! {
//!   "context": {
//!     "sessionId": "…",
//!     "deviceId": "d1", "deviceIdChanged": false,
//!     "profile": {"id": "p2"}, "profileChanged": true,
//!     "cart": {"items": [...]}, "cartChanged": false,
//!     "mergeProfileIds": ["p1"]
//!   },
//!   "options": {"sdkVersion": "0.1.0", "platform": "ios", "pushToken": "…"}
//! }
//! ```
//! A `…Changed` field is present when its block is present or the flag is
//! raised (a cleared profile sends `profileChanged: true` without a block).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use beacon_core::{
    Cart, ChangeFlags, ChangeTracker, Clock, Commit, DeviceType, Session, Wishlist,
};
use beacon_db::StateRepository;

use crate::config::SdkConfig;
use crate::emitter::SyncEventEmitter;
use crate::error::{SyncError, SyncResult};
use crate::session::SessionManager;
use crate::transport::{RequestSpec, RetryingTransport};

/// SDK version reported in every push.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

// =============================================================================
// Settings
// =============================================================================

/// The slice of [`SdkConfig`] the coordinator needs.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub endpoint: String,
    pub enable_tracking: bool,
    pub enable_push_notifications: bool,
    pub max_attempts: u32,
    pub platform: String,
}

impl CoordinatorSettings {
    pub fn from_config(config: &SdkConfig) -> Self {
        CoordinatorSettings {
            endpoint: config.endpoint().to_string(),
            enable_tracking: config.enable_tracking,
            enable_push_notifications: config.enable_push_notifications,
            max_attempts: config.sync_attempts(),
            platform: std::env::consts::OS.to_string(),
        }
    }
}

// =============================================================================
// Request / Response
// =============================================================================

/// Caller input for one push.
#[derive(Debug, Clone, Default)]
pub struct SyncRequest {
    /// Sent instead of the committed cart; always marks the cart changed.
    /// Never committed.
    pub cart_override: Option<Cart>,

    /// Extra client metadata merged into `options`.
    pub options: Map<String, Value>,
}

impl SyncRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cart(mut self, cart: Cart) -> Self {
        self.cart_override = Some(cart);
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// Decoded backend acknowledgement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse {
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl SyncResponse {
    /// Empty (or `null`) bodies decode as an empty object.
    pub fn decode(body: &[u8]) -> SyncResult<Self> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }

        match serde_json::from_slice::<Value>(body) {
            Ok(Value::Object(data)) => Ok(SyncResponse { data }),
            Ok(Value::Null) => Ok(Self::default()),
            Ok(other) => Err(SyncError::InvalidResponse(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            ))),
            Err(e) => Err(SyncError::InvalidResponse(e.to_string())),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// =============================================================================
// Payload
// =============================================================================

#[derive(Debug, Serialize)]
struct SyncPayload {
    context: SyncContext,
    options: Map<String, Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncContext {
    session_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_id_changed: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    profile: Option<ProfileBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    profile_changed: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    cart: Option<Cart>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cart_changed: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    wishlist: Option<Wishlist>,
    #[serde(skip_serializing_if = "Option::is_none")]
    wishlist_changed: Option<bool>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    merge_profile_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ProfileBlock {
    id: String,
}

fn flag_field(block_present: bool, flag: bool) -> Option<bool> {
    (block_present || flag).then_some(flag)
}

// =============================================================================
// Coordinator State
// =============================================================================

struct CoordinatorState {
    tracker: ChangeTracker,
    push_token: Option<String>,
    device_type: Option<DeviceType>,
    last_sync_at: Option<DateTime<Utc>>,
}

impl CoordinatorState {
    fn build_payload(
        &self,
        session: &Session,
        request: &SyncRequest,
        settings: &CoordinatorSettings,
    ) -> SyncPayload {
        let tracked = self.tracker.state();
        let flags = self.tracker.flags();

        let device_id = tracked.device_id.clone();
        let profile = tracked.profile_id.clone().map(|id| ProfileBlock { id });

        let (cart, cart_changed) = match request.cart_override {
            Some(ref cart) => (Some(cart.clone()), Some(true)),
            None => {
                let cart = tracked.cart.clone();
                let changed = flag_field(cart.is_some(), flags.cart_changed);
                (cart, changed)
            }
        };
        let wishlist = tracked.wishlist.clone();

        let context = SyncContext {
            session_id: session.session_id.clone(),
            device_id_changed: flag_field(device_id.is_some(), flags.device_id_changed),
            device_id,
            profile_changed: flag_field(profile.is_some(), flags.profile_changed),
            profile,
            cart,
            cart_changed,
            wishlist_changed: flag_field(wishlist.is_some(), flags.wishlist_changed),
            wishlist,
            merge_profile_ids: self.tracker.merge_profile_ids().to_vec(),
        };

        let mut options = request.options.clone();
        options.insert("sdkVersion".into(), SDK_VERSION.into());
        options.insert("platform".into(), settings.platform.clone().into());
        if settings.enable_push_notifications {
            if let Some(ref token) = self.push_token {
                options.insert("pushToken".into(), token.clone().into());
            }
            if let Some(device_type) = self.device_type {
                options.insert("deviceType".into(), device_type.to_string().into());
            }
        }

        SyncPayload { context, options }
    }
}

// =============================================================================
// Sync Coordinator
// =============================================================================

/// Façade over change tracking and the backend push.
pub struct SyncCoordinator {
    state: Mutex<CoordinatorState>,
    store: StateRepository,
    transport: RetryingTransport,
    sessions: Arc<SessionManager>,
    emitter: Arc<dyn SyncEventEmitter>,
    clock: Arc<dyn Clock>,
    settings: CoordinatorSettings,
}

impl SyncCoordinator {
    /// Hydrates tracker snapshots from the store. Flags start lowered.
    pub async fn hydrate(
        settings: CoordinatorSettings,
        store: StateRepository,
        transport: RetryingTransport,
        sessions: Arc<SessionManager>,
        emitter: Arc<dyn SyncEventEmitter>,
        clock: Arc<dyn Clock>,
    ) -> SyncResult<Self> {
        let tracked = store.load_tracked_state().await?;
        let state = CoordinatorState {
            tracker: ChangeTracker::hydrate(tracked),
            push_token: store.push_token().await?,
            device_type: store.device_type().await?,
            last_sync_at: store.last_sync_at().await?,
        };

        debug!(
            endpoint = %settings.endpoint,
            tracking = settings.enable_tracking,
            "Sync coordinator hydrated"
        );

        Ok(SyncCoordinator {
            state: Mutex::new(state),
            store,
            transport,
            sessions,
            emitter,
            clock,
            settings,
        })
    }

    // =========================================================================
    // Setters
    // =========================================================================

    /// Commits a device id. Never triggers a push.
    pub async fn set_device_id(&self, device_id: &str) -> SyncResult<()> {
        self.commit(|tracker| Ok(tracker.set_device_id(device_id)?))
            .await
    }

    /// Commits a profile id; a replaced id is queued for merging.
    pub async fn set_profile_id(&self, profile_id: &str) -> SyncResult<()> {
        self.commit(|tracker| Ok(tracker.set_profile_id(profile_id)?))
            .await
    }

    /// Forgets the current profile (logout).
    pub async fn clear_profile_id(&self) -> SyncResult<()> {
        self.commit(|tracker| Ok(tracker.clear_profile_id())).await
    }

    pub async fn set_cart(&self, cart: Cart) -> SyncResult<()> {
        self.commit(|tracker| Ok(tracker.set_cart(cart))).await
    }

    pub async fn set_wishlist(&self, wishlist: Wishlist) -> SyncResult<()> {
        self.commit(|tracker| Ok(tracker.set_wishlist(wishlist))).await
    }

    /// Records the push registration sent in `options`.
    pub async fn set_push_token(&self, token: &str, device_type: DeviceType) -> SyncResult<()> {
        let token = token.trim();
        if token.is_empty() {
            return Err(SyncError::MissingRequiredField("pushToken".into()));
        }

        let mut state = self.state.lock().await;
        self.store.set_push_registration(token, device_type).await?;
        state.push_token = Some(token.to_string());
        state.device_type = Some(device_type);
        Ok(())
    }

    /// Runs a tracker operation on a copy and keeps it only once the store
    /// has accepted the resulting commit.
    async fn commit<F>(&self, operation: F) -> SyncResult<()>
    where
        F: FnOnce(&mut ChangeTracker) -> SyncResult<Commit>,
    {
        let mut state = self.state.lock().await;
        let mut tracker = state.tracker.clone();
        let commit = operation(&mut tracker)?;

        if commit != Commit::Unchanged {
            debug!(?commit, "Persisting tracked state");
            self.store.persist_commit(&commit).await?;
        }

        state.tracker = tracker;
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub async fn flags(&self) -> ChangeFlags {
        self.state.lock().await.tracker.flags()
    }

    pub async fn merge_profile_ids(&self) -> Vec<String> {
        self.state.lock().await.tracker.merge_profile_ids().to_vec()
    }

    pub async fn device_id(&self) -> Option<String> {
        self.state.lock().await.tracker.state().device_id.clone()
    }

    pub async fn profile_id(&self) -> Option<String> {
        self.state.lock().await.tracker.state().profile_id.clone()
    }

    pub async fn cart(&self) -> Option<Cart> {
        self.state.lock().await.tracker.state().cart.clone()
    }

    pub async fn wishlist(&self) -> Option<Wishlist> {
        self.state.lock().await.tracker.state().wishlist.clone()
    }

    pub async fn last_sync_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().await.last_sync_at
    }

    // =========================================================================
    // Push
    // =========================================================================

    /// Sends the current diff and clears it once acknowledged.
    ///
    /// The state lock is held only while the payload is built and while the
    /// outcome is applied; setters and accessors run freely while the request
    /// is on the wire.
    pub async fn push(&self, request: SyncRequest) -> SyncResult<SyncResponse> {
        if !self.settings.enable_tracking {
            debug!("Tracking disabled, skipping push");
            return Ok(SyncResponse::default());
        }

        let session = self.sessions.current().await?;

        let (spec, sent) = {
            let state = self.state.lock().await;
            let payload = state.build_payload(&session, &request, &self.settings);
            let spec = RequestSpec::post_json(&self.settings.endpoint, &payload)?;
            (spec, state.tracker.begin_push())
        };

        let result = match self
            .transport
            .execute(&spec, self.settings.max_attempts)
            .await
        {
            Ok(body) => SyncResponse::decode(&body),
            Err(err) => Err(err),
        };

        let mut state = self.state.lock().await;

        let response = match result {
            Ok(response) => response,
            Err(err) => {
                state.tracker.record_push_failed();
                warn!(error = %err, "Push failed, change flags kept");
                self.emitter.emit_error(&err);
                return Err(err);
            }
        };

        let commit = state.tracker.acknowledge(&sent);
        let now = self.clock.now();
        state.last_sync_at = Some(now);

        if let Err(e) = self.store.persist_commit(&commit).await {
            warn!(error = %e, "Failed to persist merge ids after push");
        }
        if let Err(e) = self.store.set_last_sync_at(now).await {
            warn!(error = %e, "Failed to persist last sync time");
        }

        info!(session_id = %session.session_id, "Push acknowledged");
        self.emitter.emit_sync_completed(&session.session_id);

        Ok(response)
    }
}
