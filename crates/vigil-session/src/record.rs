//! Session ownership record
//!
//! The only persisted entity of the protocol. Exactly one record occupies
//! the well-known slot at any instant; the context whose local id matches
//! it is the owner, everyone else is stale.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Opaque token identifying the current legitimate owner
    pub session_id: String,
    /// When ownership was claimed
    pub claimed_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Mint a record with a fresh locally-generated id.
    pub fn generate() -> Self {
        let now = Utc::now();

        Self {
            session_id: format!("{}-{}", now.timestamp_millis(), Uuid::new_v4().simple()),
            claimed_at: now,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}
