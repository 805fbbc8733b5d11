//! VIGIL Session Ownership
//!
//! Enforces the single-active-session rule: a logical user identity is live
//! in at most one execution context (tab, window) per storage origin. The
//! context that claimed last owns the session; every other context detects
//! the takeover and hands off through its conflict hook.

mod bus;
mod coordinator;
mod record;

pub use bus::{Announcement, OwnershipBus};
pub use coordinator::{
    ConflictHook, SessionCoordinator, DEFAULT_POLL_INTERVAL, SESSION_SLOT_KEY,
};
pub use record::SessionRecord;
