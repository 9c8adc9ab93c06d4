//! # Repository Module
//!
//! ```text
//! SyncCoordinator / SessionManager / EngagementBatcher
//!       │
//!       │  db.state().pending_events()
//!       ▼
//! StateRepository ── typed keys, corrupt values read as absent
//!       │
//!       ▼
//! KvRepository ── get / set / remove on `kv_store`
//!       │
//!       ▼
//! SQLite
//! ```
//!
//! - [`KvRepository`](kv::KvRepository) - raw JSON values by key
//! - [`StateRepository`](state::StateRepository) - every engine key, typed

pub mod kv;
pub mod state;
