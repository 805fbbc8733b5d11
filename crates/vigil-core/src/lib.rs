//! VIGIL Core
//!
//! Composition layer for hosts embedding the single-active-session
//! protocol: configuration, the per-context container and the guard that
//! binds session ownership to the host's authentication lifecycle. The
//! host supplies an is-authenticated signal and a logout-and-notify
//! routine, and gets back the guarantee that one user
//! identity is live in at most one context per storage origin.

mod config;
mod context;
mod error;
mod guard;

pub use config::Config;
pub use context::Context;
pub use error::CoreError;
pub use guard::SessionGuard;

// Re-export the coordination surface
pub use vigil_session::{
    Announcement, ConflictHook, OwnershipBus, SessionCoordinator, SessionRecord,
    DEFAULT_POLL_INTERVAL, SESSION_SLOT_KEY,
};
pub use vigil_storage::{MemoryStore, SharedStore, SqliteStore, StorageError};

pub type Result<T> = std::result::Result<T, CoreError>;

/// Initialize logging
pub fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt().with_env_filter(filter).with_target(true).init();
}
