//! # Session Manager
//!
//! Owns the rolling session identity.
//!
//! ```text
//! current()
//!    │
//!    ├── in-memory session unexpired? ──► return it
//!    │
//!    ├── stored session unexpired? ─────► cache + return it
//!    │
//!    └── mint ──► persist ──► emit_session_started ──► return it
//! ```
//!
//! Reads and writes go through one async mutex, so two concurrent callers
//! can never mint two different sessions.

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use beacon_core::{Clock, Session};
use beacon_db::StateRepository;

use crate::emitter::SyncEventEmitter;
use crate::error::SyncResult;

/// Serialized access to the current session.
pub struct SessionManager {
    current: Mutex<Option<Session>>,
    store: StateRepository,
    clock: Arc<dyn Clock>,
    emitter: Arc<dyn SyncEventEmitter>,
}

impl SessionManager {
    pub fn new(
        store: StateRepository,
        clock: Arc<dyn Clock>,
        emitter: Arc<dyn SyncEventEmitter>,
    ) -> Self {
        SessionManager {
            current: Mutex::new(None),
            store,
            clock,
            emitter,
        }
    }

    /// Returns the live session, restoring or minting one as needed.
    pub async fn current(&self) -> SyncResult<Session> {
        let mut current = self.current.lock().await;
        let now = self.clock.now();

        if let Some(ref session) = *current {
            if !session.is_expired_at(now) {
                return Ok(session.clone());
            }
            debug!(session_id = %session.session_id, "Session expired");
        }

        if let Some(stored) = self.store.session().await? {
            if !stored.is_expired_at(now) {
                debug!(session_id = %stored.session_id, "Restored session from store");
                *current = Some(stored.clone());
                return Ok(stored);
            }
        }

        let session = self.mint_locked(&mut current).await?;
        Ok(session)
    }

    /// Replaces the session regardless of its age.
    pub async fn force_refresh(&self) -> SyncResult<Session> {
        let mut current = self.current.lock().await;
        self.mint_locked(&mut current).await
    }

    /// Mints and persists a session while the caller holds the lock.
    ///
    /// The store is written before memory so a failed write leaves the
    /// previous state intact.
    async fn mint_locked(&self, current: &mut Option<Session>) -> SyncResult<Session> {
        let session = Session::mint(self.clock.now());
        self.store.set_session(&session).await?;

        info!(
            session_id = %session.session_id,
            expires_at = %session.expires_at(),
            "Started new session"
        );

        *current = Some(session.clone());
        self.emitter.emit_session_started(&session);
        Ok(session)
    }
}
