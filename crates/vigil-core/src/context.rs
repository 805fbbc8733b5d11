//! Per-context container
//!
//! One `Context` per execution context (tab, window, embedded client). It
//! owns the wiring a host needs: configuration, the shared store handle,
//! and the guard around the session coordinator.

use std::sync::Arc;

use vigil_session::{ConflictHook, OwnershipBus, SessionCoordinator};
use vigil_storage::{SharedStore, SqliteStore};

use crate::config::Config;
use crate::guard::SessionGuard;
use crate::Result;

pub struct Context {
    config: Config,
    store: Arc<dyn SharedStore>,
    guard: SessionGuard,
}

impl Context {
    /// Open the durable shared store at the configured path and wire the
    /// guard around it.
    pub fn new(
        config: Config,
        bus: Option<OwnershipBus>,
        on_superseded: ConflictHook,
    ) -> Result<Self> {
        // Ensure data directory exists
        if let Some(parent) = config.database_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let store: Arc<dyn SharedStore> = Arc::new(SqliteStore::open(&config.database_path)?);

        tracing::info!(path = %config.database_path.display(), "Opened shared ownership store");

        Ok(Self::with_store(config, store, bus, on_superseded))
    }

    /// Wire the guard around an injected store. Contexts sharing one store
    /// handle (and optionally one bus) behave like tabs on one origin.
    pub fn with_store(
        config: Config,
        store: Arc<dyn SharedStore>,
        bus: Option<OwnershipBus>,
        on_superseded: ConflictHook,
    ) -> Self {
        let coordinator = SessionCoordinator::with_poll_interval(
            Arc::clone(&store),
            bus,
            config.poll_interval,
        );
        let guard = SessionGuard::new(coordinator, on_superseded);

        Self {
            config,
            store,
            guard,
        }
    }

    pub fn handle_login(&self) {
        self.guard.handle_login();
    }

    pub fn handle_logout(&self) {
        self.guard.handle_logout();
    }

    pub fn guard(&self) -> &SessionGuard {
        &self.guard
    }

    pub fn coordinator(&self) -> &SessionCoordinator {
        self.guard.coordinator()
    }

    pub fn store(&self) -> &Arc<dyn SharedStore> {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
