//! # Event Emitter
//!
//! Observer seam for host apps (analytics dashboards, debug overlays, tests).
//!
//! ```text
//! SessionManager ──── emit_session_started ────┐
//! SyncCoordinator ─── emit_sync_completed ─────┤
//! EngagementBatcher ─ emit_engagement_flushed ─┼──► Arc<dyn SyncEventEmitter>
//! (any) ───────────── emit_error ──────────────┘
//! ```
//!
//! Emitters are called from engine tasks and must not block.

use beacon_core::Session;

use crate::error::SyncError;

/// Trait for observing engine events.
pub trait SyncEventEmitter: Send + Sync {
    /// A new session was minted (first use, expiry or forced refresh).
    fn emit_session_started(&self, session: &Session);

    /// A push was acknowledged by the backend.
    fn emit_sync_completed(&self, session_id: &str);

    /// An engagement batch was delivered.
    fn emit_engagement_flushed(&self, sent: usize, remaining: usize);

    /// A background operation failed.
    fn emit_error(&self, error: &SyncError);
}

/// No-op event emitter.
pub struct NoOpEmitter;

impl SyncEventEmitter for NoOpEmitter {
    fn emit_session_started(&self, _session: &Session) {}
    fn emit_sync_completed(&self, _session_id: &str) {}
    fn emit_engagement_flushed(&self, _sent: usize, _remaining: usize) {}
    fn emit_error(&self, _error: &SyncError) {}
}

/// Emitter that records every event, for tests.
#[cfg(test)]
pub(crate) mod recording {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Recorded {
        SessionStarted(String),
        SyncCompleted(String),
        EngagementFlushed { sent: usize, remaining: usize },
        Error(String),
    }

    #[derive(Default)]
    pub struct RecordingEmitter {
        events: Mutex<Vec<Recorded>>,
    }

    impl RecordingEmitter {
        pub fn events(&self) -> Vec<Recorded> {
            self.events.lock().unwrap().clone()
        }

        fn push(&self, event: Recorded) {
            self.events.lock().unwrap().push(event);
        }
    }

    impl SyncEventEmitter for RecordingEmitter {
        fn emit_session_started(&self, session: &Session) {
            self.push(Recorded::SessionStarted(session.session_id.clone()));
        }

        fn emit_sync_completed(&self, session_id: &str) {
            self.push(Recorded::SyncCompleted(session_id.to_string()));
        }

        fn emit_engagement_flushed(&self, sent: usize, remaining: usize) {
            self.push(Recorded::EngagementFlushed { sent, remaining });
        }

        fn emit_error(&self, error: &SyncError) {
            self.push(Recorded::Error(error.to_string()));
        }
    }
}
