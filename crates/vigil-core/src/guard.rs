//! Session guard
//!
//! Binds the coordinator's lifecycle to the host's authentication
//! lifecycle: claim on login, release on explicit logout, and translate a
//! detected takeover into the host's logout-and-notify routine. The
//! superseded hook must never release the shared record itself; the
//! coordinator already refuses to evict the new owner.

use std::sync::Arc;
use tokio::sync::watch;

use vigil_session::{ConflictHook, SessionCoordinator};

pub struct SessionGuard {
    coordinator: SessionCoordinator,
    on_superseded: ConflictHook,
}

impl SessionGuard {
    /// `on_superseded` is the host's "session active elsewhere"
    /// flow: show the notice, then log out locally.
    pub fn new(coordinator: SessionCoordinator, on_superseded: ConflictHook) -> Self {
        Self {
            coordinator,
            on_superseded,
        }
    }

    /// The host observed a successful authentication. Safe to call again
    /// on repeated signals (e.g. a data refresh): the claim is re-issued
    /// without stacking monitors.
    pub fn handle_login(&self) {
        self.coordinator.claim(Arc::clone(&self.on_superseded));
    }

    /// The user explicitly logged out of this context. Call before
    /// clearing local application state, so the next login anywhere is not
    /// blocked by a stale record.
    pub fn handle_logout(&self) {
        self.coordinator.release();
    }

    pub fn coordinator(&self) -> &SessionCoordinator {
        &self.coordinator
    }

    /// Drive the guard from an observable is-authenticated signal.
    /// Returns once the host drops the sender side.
    pub async fn run(&self, mut authenticated: watch::Receiver<bool>) {
        if *authenticated.borrow() {
            self.handle_login();
        }

        while authenticated.changed().await.is_ok() {
            if *authenticated.borrow_and_update() {
                self.handle_login();
            } else {
                self.handle_logout();
            }
        }

        tracing::debug!("Authentication signal closed, guard stopped");
    }
}

impl Clone for SessionGuard {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
            on_superseded: Arc::clone(&self.on_superseded),
        }
    }
}
