//! VIGIL Storage Layer
//!
//! The shared ownership store: a single-key get/set/delete area visible to
//! every execution context on the same storage origin. The store is always
//! injected, never a hidden singleton, so tests can swap the sqlite backend
//! for an in-memory map.

mod error;
mod memory;
mod migrations;
mod sqlite;
mod store;

pub use error::StorageError;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::SharedStore;

pub type Result<T> = std::result::Result<T, StorageError>;
