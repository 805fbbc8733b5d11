//! In-memory store backend
//!
//! Clones share the underlying map, so a handful of `MemoryStore` clones
//! model several contexts on one storage origin. Used by tests and by hosts
//! that do not want ownership records to survive a process restart.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::store::SharedStore;
use crate::Result;

#[derive(Default)]
pub struct MemoryStore {
    slots: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SharedStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.slots.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.slots.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.slots.lock().remove(key);
        Ok(())
    }
}

impl Clone for MemoryStore {
    fn clone(&self) -> Self {
        Self {
            slots: Arc::clone(&self.slots),
        }
    }
}
