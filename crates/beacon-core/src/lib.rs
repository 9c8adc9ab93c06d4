//! # beacon-core: Pure Domain Logic for the Beacon Engine
//!
//! This crate contains the state model of the Beacon SDK engine as pure
//! functions and value types with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Beacon Engine Architecture                       │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 Host App / Notification Extension               │   │
//! │  │    set_profile_id ──► set_cart ──► push ──► track(clicked)     │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    beacon-sync (engine)                         │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ beacon-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌────────────┐ ┌────────────┐  │   │
//! │  │   │  session  │  │   flags   │  │ engagement │ │notification│  │   │
//! │  │   │  Session  │  │ChangeFlags│  │ Engagement │ │  Payload   │  │   │
//! │  │   │  24h TTL  │  │ Tracker   │  │   Event    │ │  probing   │  │   │
//! │  │   └───────────┘  └───────────┘  └────────────┘ └────────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 beacon-db (key-value persistence)               │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`clock`] - Time source abstraction (system and manual clocks)
//! - [`engagement`] - Engagement events and their callback grouping
//! - [`error`] - Domain error types
//! - [`flags`] - Change flags, state events and the change tracker
//! - [`notification`] - Raw notification payload probing
//! - [`session`] - Rolling 24h session identity
//! - [`types`] - Cart, wishlist and device value types
//! - [`validation`] - Identifier and callback URL validation
//!
//! ## Example Usage
//!
//! ```rust
//! use beacon_core::flags::{ChangeFlags, StateEvent};
//!
//! let flags = ChangeFlags::default()
//!     .apply(&StateEvent::CartCommitted { changed: true });
//! assert!(flags.cart_changed);
//!
//! let flags = flags.apply(&StateEvent::PushSucceeded {
//!     acknowledged: ChangeFlags::all(),
//! });
//! assert!(!flags.any());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod clock;
pub mod engagement;
pub mod error;
pub mod flags;
pub mod notification;
pub mod session;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use clock::{Clock, ManualClock, SystemClock};
pub use engagement::{EngagementEvent, EngagementType};
pub use error::{CoreError, CoreResult, ValidationError};
pub use flags::{ChangeFlags, ChangeTracker, Commit, PushSnapshot, StateEvent, TrackedState};
pub use notification::NotificationPayload;
pub use session::Session;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Lifetime of a session, measured from its creation (not sliding).
pub const SESSION_TTL_HOURS: i64 = 24;

/// Engagement events older than this are dropped without being sent.
pub const MAX_EVENT_AGE_DAYS: i64 = 7;

/// Maximum length accepted for device and profile identifiers.
pub const MAX_IDENTIFIER_LEN: usize = 256;
