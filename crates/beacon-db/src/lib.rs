//! # beacon-db: Persistent Key-Value Store
//!
//! Durable source of truth for the Beacon engine across restarts. Everything
//! is stored as JSON text under a fixed key in a single SQLite table.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Beacon Data Flow                                 │
//! │                                                                         │
//! │  SyncCoordinator / SessionManager / EngagementBatcher                   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     beacon-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │◄───│ KvRepository  │    │ 001_kv_store │  │   │
//! │  │   │  SqlitePool   │    │ StateRepo     │    │  (embedded)  │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite database file (or `:memory:` in tests)                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use beacon_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::in_memory()).await?;
//! db.state().set_device_id("d1").await?;
//! assert_eq!(db.state().device_id().await?.as_deref(), Some("d1"));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::kv::KvRepository;
pub use repository::state::{keys, SchemaCheck, StateRepository, CURRENT_SCHEMA_VERSION};
