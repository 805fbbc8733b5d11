//! Shared store trait
//!
//! Every context of the same origin sees the same slots. Reads and writes
//! are atomic single-key operations; there is no compare-and-swap, because
//! the ownership protocol only ever writes unconditionally (last writer
//! wins) and reads for comparison.

use crate::Result;

pub trait SharedStore: Send + Sync {
    /// Read the value stored under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write `value` under `key`, overwriting any prior value.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete the value stored under `key`. Deleting a missing key is a no-op.
    fn remove(&self, key: &str) -> Result<()>;
}
