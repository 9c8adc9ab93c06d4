//! # Change Tracking
//!
//! Decides whether a committed identity/cart/wishlist value is a real change
//! relative to what the backend last saw.
//!
//! ## Flag Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Change Flag Lifecycle                             │
//! │                                                                         │
//! │   setter(value)                                                         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │   compare with previous snapshot ──── no prior value ──► baseline       │
//! │       │                          └─── equal ──────────► Unchanged      │
//! │       │ differs                                                         │
//! │       ▼                                                                 │
//! │   StateEvent::*Committed { changed: true }                              │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │   flag = true ──────► push() ──── success ──► PushSucceeded: cleared   │
//! │                                └── failure ──► PushFailed: untouched   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Write Ordering
//! Every setter derives the flag from the OLD snapshot first and only then
//! returns a [`Commit`] carrying the NEW snapshot for the caller to persist.
//!
//! ## In-Flight Pushes
//! A push captures a [`PushSnapshot`] when its payload is built. Each entity
//! carries a generation counter that moves on every commit, so an
//! acknowledgement only lowers the flags of entities that were not committed
//! again while the request was on the wire, and only drops the merge ids the
//! request actually carried.

use serde::{Deserialize, Serialize};

use crate::types::{Cart, Wishlist};
use crate::validation::{validate_identifier, ValidationResult};

// =============================================================================
// Change Flags
// =============================================================================

/// Which tracked entities differ from their last-synced value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeFlags {
    pub device_id_changed: bool,
    pub profile_changed: bool,
    pub cart_changed: bool,
    pub wishlist_changed: bool,
}

/// Everything that can move the change flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEvent {
    /// A device id was committed; `changed` is false for the baseline value.
    DeviceIdCommitted { changed: bool },
    /// A profile id was committed or cleared.
    ProfileCommitted { changed: bool },
    /// A cart snapshot was committed.
    CartCommitted { changed: bool },
    /// A wishlist snapshot was committed.
    WishlistCommitted { changed: bool },
    /// The backend acknowledged a request; `acknowledged` marks the flags
    /// it carried that are still current.
    PushSucceeded { acknowledged: ChangeFlags },
    /// The request failed; the same diff must be retried.
    PushFailed,
}

impl ChangeFlags {
    /// Pure transition function.
    ///
    /// A `changed: false` commit never lowers a flag that is already raised:
    /// the backend still has not seen the earlier change.
    pub fn apply(self, event: &StateEvent) -> ChangeFlags {
        match *event {
            StateEvent::DeviceIdCommitted { changed } => ChangeFlags {
                device_id_changed: self.device_id_changed || changed,
                ..self
            },
            StateEvent::ProfileCommitted { changed } => ChangeFlags {
                profile_changed: self.profile_changed || changed,
                ..self
            },
            StateEvent::CartCommitted { changed } => ChangeFlags {
                cart_changed: self.cart_changed || changed,
                ..self
            },
            StateEvent::WishlistCommitted { changed } => ChangeFlags {
                wishlist_changed: self.wishlist_changed || changed,
                ..self
            },
            StateEvent::PushSucceeded { acknowledged } => ChangeFlags {
                device_id_changed: self.device_id_changed && !acknowledged.device_id_changed,
                profile_changed: self.profile_changed && !acknowledged.profile_changed,
                cart_changed: self.cart_changed && !acknowledged.cart_changed,
                wishlist_changed: self.wishlist_changed && !acknowledged.wishlist_changed,
            },
            StateEvent::PushFailed => self,
        }
    }

    /// Every flag raised.
    pub fn all() -> Self {
        ChangeFlags {
            device_id_changed: true,
            profile_changed: true,
            cart_changed: true,
            wishlist_changed: true,
        }
    }

    /// Returns true if any flag is raised.
    pub fn any(&self) -> bool {
        self.device_id_changed || self.profile_changed || self.cart_changed || self.wishlist_changed
    }
}

// =============================================================================
// Tracked State
// =============================================================================

/// Snapshot of every value the tracker compares against.
///
/// This is what gets hydrated from the store at startup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackedState {
    pub device_id: Option<String>,
    pub profile_id: Option<String>,
    pub cart: Option<Cart>,
    pub cart_initialized: bool,
    pub wishlist: Option<Wishlist>,
    pub wishlist_initialized: bool,
    pub merge_profile_ids: Vec<String>,
}

/// What the caller must persist after a tracker operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Commit {
    /// The value equals the snapshot; nothing to write.
    Unchanged,
    /// New device id.
    DeviceId(String),
    /// New (or cleared) profile id and the resulting merge list.
    Profile {
        profile_id: Option<String>,
        merge_profile_ids: Vec<String>,
    },
    /// New cart snapshot; the collection is now initialized.
    Cart(Cart),
    /// New wishlist snapshot; the collection is now initialized.
    Wishlist(Wishlist),
    /// A push was acknowledged; what is left of the merge list.
    Acknowledged { merge_profile_ids: Vec<String> },
}

/// Per-entity commit counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Generations {
    device_id: u64,
    profile: u64,
    cart: u64,
    wishlist: u64,
}

/// What an outgoing push carried, taken together with its payload.
#[derive(Debug, Clone, PartialEq)]
pub struct PushSnapshot {
    generations: Generations,
    merge_profile_ids: Vec<String>,
}

impl PushSnapshot {
    pub fn merge_profile_ids(&self) -> &[String] {
        &self.merge_profile_ids
    }
}

// =============================================================================
// Change Tracker
// =============================================================================

/// In-memory snapshots plus the flags derived from them.
#[derive(Debug, Clone, Default)]
pub struct ChangeTracker {
    state: TrackedState,
    flags: ChangeFlags,
    generations: Generations,
}

impl ChangeTracker {
    /// Creates a tracker from hydrated state. Flags always start lowered.
    pub fn hydrate(state: TrackedState) -> Self {
        ChangeTracker {
            state,
            flags: ChangeFlags::default(),
            generations: Generations::default(),
        }
    }

    pub fn flags(&self) -> ChangeFlags {
        self.flags
    }

    pub fn state(&self) -> &TrackedState {
        &self.state
    }

    pub fn merge_profile_ids(&self) -> &[String] {
        &self.state.merge_profile_ids
    }

    /// Commits a device id.
    pub fn set_device_id(&mut self, device_id: &str) -> ValidationResult<Commit> {
        let device_id = validate_identifier("deviceId", device_id)?;

        let changed = match self.state.device_id.as_deref() {
            Some(previous) if previous == device_id => return Ok(Commit::Unchanged),
            Some(_) => true,
            None => false,
        };

        self.flags = self.flags.apply(&StateEvent::DeviceIdCommitted { changed });
        self.generations.device_id += 1;
        self.state.device_id = Some(device_id.clone());
        Ok(Commit::DeviceId(device_id))
    }

    /// Commits a profile id. A replaced profile id is queued for merging.
    pub fn set_profile_id(&mut self, profile_id: &str) -> ValidationResult<Commit> {
        let profile_id = validate_identifier("profileId", profile_id)?;

        let previous = match self.state.profile_id.take() {
            Some(previous) if previous == profile_id => {
                self.state.profile_id = Some(previous);
                return Ok(Commit::Unchanged);
            }
            other => other,
        };

        let changed = previous.is_some();
        if let Some(previous) = previous {
            if !self.state.merge_profile_ids.contains(&previous) {
                self.state.merge_profile_ids.push(previous);
            }
        }

        self.flags = self.flags.apply(&StateEvent::ProfileCommitted { changed });
        self.generations.profile += 1;
        self.state.profile_id = Some(profile_id.clone());
        Ok(Commit::Profile {
            profile_id: Some(profile_id),
            merge_profile_ids: self.state.merge_profile_ids.clone(),
        })
    }

    /// Forgets the current profile (logout). Does not queue a merge.
    pub fn clear_profile_id(&mut self) -> Commit {
        if self.state.profile_id.take().is_none() {
            return Commit::Unchanged;
        }

        self.flags = self.flags.apply(&StateEvent::ProfileCommitted { changed: true });
        self.generations.profile += 1;
        Commit::Profile {
            profile_id: None,
            merge_profile_ids: self.state.merge_profile_ids.clone(),
        }
    }

    /// Commits a cart snapshot.
    ///
    /// The first commit on an uninitialized cart is a baseline and never
    /// raises `cart_changed`.
    pub fn set_cart(&mut self, cart: Cart) -> Commit {
        let changed = if !self.state.cart_initialized {
            false
        } else {
            match &self.state.cart {
                Some(previous) if *previous == cart => return Commit::Unchanged,
                Some(_) => true,
                None => false,
            }
        };

        self.flags = self.flags.apply(&StateEvent::CartCommitted { changed });
        self.generations.cart += 1;
        self.state.cart = Some(cart.clone());
        self.state.cart_initialized = true;
        Commit::Cart(cart)
    }

    /// Commits a wishlist snapshot. Same baseline rule as [`Self::set_cart`].
    pub fn set_wishlist(&mut self, wishlist: Wishlist) -> Commit {
        let changed = if !self.state.wishlist_initialized {
            false
        } else {
            match &self.state.wishlist {
                Some(previous) if *previous == wishlist => return Commit::Unchanged,
                Some(_) => true,
                None => false,
            }
        };

        self.flags = self.flags.apply(&StateEvent::WishlistCommitted { changed });
        self.generations.wishlist += 1;
        self.state.wishlist = Some(wishlist.clone());
        self.state.wishlist_initialized = true;
        Commit::Wishlist(wishlist)
    }

    /// Captures what a push built from the current state carries.
    pub fn begin_push(&self) -> PushSnapshot {
        PushSnapshot {
            generations: self.generations,
            merge_profile_ids: self.state.merge_profile_ids.clone(),
        }
    }

    /// Applies the acknowledgement of the push described by `sent`.
    ///
    /// Entities committed again since `sent` was taken keep their flag, and
    /// merge ids queued since then stay queued.
    pub fn acknowledge(&mut self, sent: &PushSnapshot) -> Commit {
        let now = self.generations;
        let then = sent.generations;
        let acknowledged = ChangeFlags {
            device_id_changed: now.device_id == then.device_id,
            profile_changed: now.profile == then.profile,
            cart_changed: now.cart == then.cart,
            wishlist_changed: now.wishlist == then.wishlist,
        };

        self.flags = self.flags.apply(&StateEvent::PushSucceeded { acknowledged });
        self.state
            .merge_profile_ids
            .retain(|id| !sent.merge_profile_ids.contains(id));

        Commit::Acknowledged {
            merge_profile_ids: self.state.merge_profile_ids.clone(),
        }
    }

    /// A failed push leaves flags and merge ids for the next attempt.
    pub fn record_push_failed(&mut self) {
        self.flags = self.flags.apply(&StateEvent::PushFailed);
    }
}
