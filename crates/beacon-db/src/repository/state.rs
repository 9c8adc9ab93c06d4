//! # Engine State Repository
//!
//! Typed accessors for every key the engine persists.
//!
//! ## Key Layout
//! ```text
//! ┌──────────────────────┬───────────────────────────┬──────────────────────┐
//! │ key                  │ value (JSON)              │ owner                │
//! ├──────────────────────┼───────────────────────────┼──────────────────────┤
//! │ device_id            │ "d1"                      │ SyncCoordinator      │
//! │ profile_id           │ "p1"                      │ SyncCoordinator      │
//! │ cart / wishlist      │ {"items":[...]}           │ SyncCoordinator      │
//! │ cart_initialized     │ true                      │ SyncCoordinator      │
//! │ wishlist_initialized │ true                      │ SyncCoordinator      │
//! │ merge_profile_ids    │ ["p0"]                    │ SyncCoordinator      │
//! │ push_token           │ "tok"                     │ SyncCoordinator      │
//! │ device_type          │ "ios"                     │ SyncCoordinator      │
//! │ last_sync_at         │ "2024-05-01T10:00:00Z"    │ SyncCoordinator      │
//! │ session              │ {"sessionId":..}          │ SessionManager       │
//! │ pending_events       │ [{"type":"opened",..}]    │ EngagementBatcher    │
//! │ schema_version       │ 1                         │ Database::new        │
//! └──────────────────────┴───────────────────────────┴──────────────────────┘
//! ```

use beacon_core::{
    Cart, Commit, DeviceType, EngagementEvent, Session, TrackedState, Wishlist,
};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::DbResult;
use crate::repository::kv::KvRepository;

/// Version of the stored value format.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Persisted key names.
pub mod keys {
    pub const DEVICE_ID: &str = "device_id";
    pub const PROFILE_ID: &str = "profile_id";
    pub const SESSION: &str = "session";
    pub const CART: &str = "cart";
    pub const WISHLIST: &str = "wishlist";
    pub const CART_INITIALIZED: &str = "cart_initialized";
    pub const WISHLIST_INITIALIZED: &str = "wishlist_initialized";
    pub const PENDING_EVENTS: &str = "pending_events";
    pub const MERGE_PROFILE_IDS: &str = "merge_profile_ids";
    pub const PUSH_TOKEN: &str = "push_token";
    pub const DEVICE_TYPE: &str = "device_type";
    pub const LAST_SYNC_AT: &str = "last_sync_at";
    pub const SCHEMA_VERSION: &str = "schema_version";
}

/// Result of comparing the stored schema version with the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaCheck {
    /// No version was stored; the current one was written.
    Initialized,
    /// Stored version matches.
    Current,
    /// Stored version was older and has been bumped.
    Upgraded { from: u32 },
    /// Stored version is newer than this build understands; left untouched.
    Newer { found: u32 },
}

/// Repository for typed engine state.
#[derive(Debug, Clone)]
pub struct StateRepository {
    kv: KvRepository,
}

impl StateRepository {
    /// Creates a new StateRepository.
    pub fn new(kv: KvRepository) -> Self {
        StateRepository { kv }
    }

    // =========================================================================
    // Schema Version
    // =========================================================================

    /// Compares the stored schema version with [`CURRENT_SCHEMA_VERSION`].
    pub async fn reconcile_schema_version(&self) -> DbResult<SchemaCheck> {
        let stored: Option<u32> = self.kv.get_json(keys::SCHEMA_VERSION).await?;

        let check = match stored {
            None => {
                self.kv
                    .set_json(keys::SCHEMA_VERSION, &CURRENT_SCHEMA_VERSION)
                    .await?;
                SchemaCheck::Initialized
            }
            Some(v) if v == CURRENT_SCHEMA_VERSION => SchemaCheck::Current,
            Some(v) if v < CURRENT_SCHEMA_VERSION => {
                info!(
                    from = v,
                    to = CURRENT_SCHEMA_VERSION,
                    "Upgrading stored schema version"
                );
                self.kv
                    .set_json(keys::SCHEMA_VERSION, &CURRENT_SCHEMA_VERSION)
                    .await?;
                SchemaCheck::Upgraded { from: v }
            }
            Some(v) => {
                warn!(
                    found = v,
                    supported = CURRENT_SCHEMA_VERSION,
                    "Stored schema version is newer than this build"
                );
                SchemaCheck::Newer { found: v }
            }
        };

        Ok(check)
    }

    pub async fn schema_version(&self) -> DbResult<Option<u32>> {
        self.kv.get_json(keys::SCHEMA_VERSION).await
    }

    // =========================================================================
    // Identity
    // =========================================================================

    pub async fn device_id(&self) -> DbResult<Option<String>> {
        self.kv.get_json(keys::DEVICE_ID).await
    }

    pub async fn set_device_id(&self, device_id: &str) -> DbResult<()> {
        self.kv.set_json(keys::DEVICE_ID, device_id).await
    }

    pub async fn profile_id(&self) -> DbResult<Option<String>> {
        self.kv.get_json(keys::PROFILE_ID).await
    }

    /// Stores the profile id, or removes it when `None`.
    pub async fn set_profile_id(&self, profile_id: Option<&str>) -> DbResult<()> {
        match profile_id {
            Some(id) => self.kv.set_json(keys::PROFILE_ID, id).await,
            None => self.kv.remove(keys::PROFILE_ID).await.map(|_| ()),
        }
    }

    pub async fn merge_profile_ids(&self) -> DbResult<Vec<String>> {
        Ok(self
            .kv
            .get_json(keys::MERGE_PROFILE_IDS)
            .await?
            .unwrap_or_default())
    }

    pub async fn set_merge_profile_ids(&self, ids: &[String]) -> DbResult<()> {
        self.kv.set_json(keys::MERGE_PROFILE_IDS, ids).await
    }

    // =========================================================================
    // Session
    // =========================================================================

    pub async fn session(&self) -> DbResult<Option<Session>> {
        self.kv.get_json(keys::SESSION).await
    }

    pub async fn set_session(&self, session: &Session) -> DbResult<()> {
        self.kv.set_json(keys::SESSION, session).await
    }

    // =========================================================================
    // Cart / Wishlist Snapshots
    // =========================================================================

    pub async fn cart(&self) -> DbResult<Option<Cart>> {
        self.kv.get_json(keys::CART).await
    }

    /// Stores the cart snapshot and marks the cart initialized.
    ///
    /// The snapshot is written before the flag so a crash in between leaves
    /// the next start treating the stored cart as a fresh baseline.
    pub async fn set_cart(&self, cart: &Cart) -> DbResult<()> {
        self.kv.set_json(keys::CART, cart).await?;
        self.kv.set_json(keys::CART_INITIALIZED, &true).await
    }

    pub async fn cart_initialized(&self) -> DbResult<bool> {
        Ok(self
            .kv
            .get_json(keys::CART_INITIALIZED)
            .await?
            .unwrap_or(false))
    }

    pub async fn wishlist(&self) -> DbResult<Option<Wishlist>> {
        self.kv.get_json(keys::WISHLIST).await
    }

    /// Stores the wishlist snapshot and marks the wishlist initialized.
    pub async fn set_wishlist(&self, wishlist: &Wishlist) -> DbResult<()> {
        self.kv.set_json(keys::WISHLIST, wishlist).await?;
        self.kv.set_json(keys::WISHLIST_INITIALIZED, &true).await
    }

    pub async fn wishlist_initialized(&self) -> DbResult<bool> {
        Ok(self
            .kv
            .get_json(keys::WISHLIST_INITIALIZED)
            .await?
            .unwrap_or(false))
    }

    // =========================================================================
    // Pending Engagement Events
    // =========================================================================

    /// Reads the pending queue entry by entry.
    ///
    /// An entry that no longer decodes is dropped on its own so the rest of
    /// the queue survives the next write.
    pub async fn pending_events(&self) -> DbResult<Vec<EngagementEvent>> {
        let raw: Vec<serde_json::Value> = self
            .kv
            .get_json(keys::PENDING_EVENTS)
            .await?
            .unwrap_or_default();

        let stored = raw.len();
        let events: Vec<EngagementEvent> = raw
            .into_iter()
            .filter_map(|value| match serde_json::from_value(value) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(error = %e, "Dropping undecodable pending event");
                    None
                }
            })
            .collect();

        if events.len() < stored {
            warn!(
                dropped = stored - events.len(),
                kept = events.len(),
                "Pending queue had undecodable entries"
            );
        }

        Ok(events)
    }

    /// Replaces the whole pending queue.
    pub async fn set_pending_events(&self, events: &[EngagementEvent]) -> DbResult<()> {
        self.kv.set_json(keys::PENDING_EVENTS, events).await
    }

    // =========================================================================
    // Push Registration & Bookkeeping
    // =========================================================================

    pub async fn push_token(&self) -> DbResult<Option<String>> {
        self.kv.get_json(keys::PUSH_TOKEN).await
    }

    pub async fn device_type(&self) -> DbResult<Option<DeviceType>> {
        self.kv.get_json(keys::DEVICE_TYPE).await
    }

    pub async fn set_push_registration(&self, token: &str, device_type: DeviceType) -> DbResult<()> {
        self.kv.set_json(keys::PUSH_TOKEN, token).await?;
        self.kv.set_json(keys::DEVICE_TYPE, &device_type).await
    }

    pub async fn last_sync_at(&self) -> DbResult<Option<DateTime<Utc>>> {
        self.kv.get_json(keys::LAST_SYNC_AT).await
    }

    pub async fn set_last_sync_at(&self, at: DateTime<Utc>) -> DbResult<()> {
        self.kv.set_json(keys::LAST_SYNC_AT, &at).await
    }

    // =========================================================================
    // Change Tracker Bridge
    // =========================================================================

    /// Reads every snapshot the change tracker compares against.
    pub async fn load_tracked_state(&self) -> DbResult<TrackedState> {
        Ok(TrackedState {
            device_id: self.device_id().await?,
            profile_id: self.profile_id().await?,
            cart: self.cart().await?,
            cart_initialized: self.cart_initialized().await?,
            wishlist: self.wishlist().await?,
            wishlist_initialized: self.wishlist_initialized().await?,
            merge_profile_ids: self.merge_profile_ids().await?,
        })
    }

    /// Writes whatever a tracker operation says must be persisted.
    pub async fn persist_commit(&self, commit: &Commit) -> DbResult<()> {
        match commit {
            Commit::Unchanged => Ok(()),
            Commit::DeviceId(id) => self.set_device_id(id).await,
            Commit::Profile {
                profile_id,
                merge_profile_ids,
            } => {
                self.set_profile_id(profile_id.as_deref()).await?;
                self.set_merge_profile_ids(merge_profile_ids).await
            }
            Commit::Cart(cart) => self.set_cart(cart).await,
            Commit::Wishlist(wishlist) => self.set_wishlist(wishlist).await,
            Commit::Acknowledged { merge_profile_ids } => {
                self.set_merge_profile_ids(merge_profile_ids).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use beacon_core::{CartItem, EngagementType};

    async fn state() -> StateRepository {
        Database::new(DbConfig::in_memory()).await.unwrap().state()
    }

    #[tokio::test]
    async fn test_schema_version_written_on_open() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        assert_eq!(
            db.state().schema_version().await.unwrap(),
            Some(CURRENT_SCHEMA_VERSION)
        );
        assert_eq!(
            db.state().reconcile_schema_version().await.unwrap(),
            SchemaCheck::Current
        );
    }

    #[tokio::test]
    async fn test_schema_version_upgrade_and_newer() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let state = db.state();

        db.kv().set(keys::SCHEMA_VERSION, "0").await.unwrap();
        assert_eq!(
            state.reconcile_schema_version().await.unwrap(),
            SchemaCheck::Upgraded { from: 0 }
        );
        assert_eq!(state.schema_version().await.unwrap(), Some(CURRENT_SCHEMA_VERSION));

        let future = CURRENT_SCHEMA_VERSION + 1;
        db.kv()
            .set(keys::SCHEMA_VERSION, &future.to_string())
            .await
            .unwrap();
        assert_eq!(
            state.reconcile_schema_version().await.unwrap(),
            SchemaCheck::Newer { found: future }
        );
        assert_eq!(state.schema_version().await.unwrap(), Some(future));
    }

    #[tokio::test]
    async fn test_fresh_store_defaults() {
        let state = state().await;

        assert_eq!(state.load_tracked_state().await.unwrap(), TrackedState::default());
        assert!(state.pending_events().await.unwrap().is_empty());
        assert_eq!(state.session().await.unwrap(), None);
        assert_eq!(state.last_sync_at().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_commits_round_trip_through_tracked_state() {
        let state = state().await;
        let cart = Cart::new(vec![CartItem::new("sku-1", 2)]);

        state
            .persist_commit(&Commit::DeviceId("d1".to_string()))
            .await
            .unwrap();
        state
            .persist_commit(&Commit::Profile {
                profile_id: Some("p2".to_string()),
                merge_profile_ids: vec!["p1".to_string()],
            })
            .await
            .unwrap();
        state.persist_commit(&Commit::Cart(cart.clone())).await.unwrap();

        let loaded = state.load_tracked_state().await.unwrap();
        assert_eq!(loaded.device_id.as_deref(), Some("d1"));
        assert_eq!(loaded.profile_id.as_deref(), Some("p2"));
        assert_eq!(loaded.merge_profile_ids, vec!["p1".to_string()]);
        assert_eq!(loaded.cart, Some(cart));
        assert!(loaded.cart_initialized);
        assert!(!loaded.wishlist_initialized);

        state
            .persist_commit(&Commit::Acknowledged {
                merge_profile_ids: vec![],
            })
            .await
            .unwrap();
        state
            .persist_commit(&Commit::Profile {
                profile_id: None,
                merge_profile_ids: vec![],
            })
            .await
            .unwrap();
        let loaded = state.load_tracked_state().await.unwrap();
        assert!(loaded.merge_profile_ids.is_empty());
        assert_eq!(loaded.profile_id, None);
    }

    #[tokio::test]
    async fn test_pending_events_and_push_registration() {
        let state = state().await;
        let event = EngagementEvent::new(
            EngagementType::Opened,
            "https://cb.example.com",
            Some("n-1".to_string()),
            Utc::now(),
        )
        .unwrap();

        state.set_pending_events(&[event.clone()]).await.unwrap();
        assert_eq!(state.pending_events().await.unwrap(), vec![event]);

        state
            .set_push_registration("tok", DeviceType::Android)
            .await
            .unwrap();
        assert_eq!(state.push_token().await.unwrap().as_deref(), Some("tok"));
        assert_eq!(state.device_type().await.unwrap(), Some(DeviceType::Android));
    }

    #[tokio::test]
    async fn test_undecodable_pending_event_skipped_individually() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let event = EngagementEvent::new(
            EngagementType::Clicked,
            "https://cb.example.com",
            Some("n-1".to_string()),
            Utc::now(),
        )
        .unwrap();
        let stored = serde_json::json!([{"type": "dismissed"}, event, 42]);
        db.kv()
            .set(keys::PENDING_EVENTS, &stored.to_string())
            .await
            .unwrap();

        assert_eq!(db.state().pending_events().await.unwrap(), vec![event]);
    }

    #[tokio::test]
    async fn test_corrupt_session_reads_as_absent() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.kv().set(keys::SESSION, "{\"sessionId\":").await.unwrap();

        assert_eq!(db.state().session().await.unwrap(), None);
    }
}
