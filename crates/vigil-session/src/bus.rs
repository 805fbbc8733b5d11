//! Ownership announcement bus
//!
//! Best-effort fan-out of "ownership changed" announcements to the other
//! contexts of the same origin. Delivery is lossy and unordered: a
//! suspended context misses announcements entirely, and a subscriber that
//! falls behind skips ahead. The periodic ownership check is the
//! correctness backstop; the bus only shortens detection latency, and a
//! coordinator built without one still converges.

use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone)]
pub struct Announcement {
    /// The id the announcing context just claimed
    pub session_id: String,
}

pub struct OwnershipBus {
    tx: broadcast::Sender<Announcement>,
}

impl OwnershipBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Announce a fresh claim. Having no listeners is not an error.
    pub fn announce(&self, session_id: &str) {
        let _ = self.tx.send(Announcement {
            session_id: session_id.to_string(),
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Announcement> {
        self.tx.subscribe()
    }
}

impl Default for OwnershipBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for OwnershipBus {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivers_to_existing_subscriber() {
        let bus = OwnershipBus::new();
        let mut rx = bus.subscribe();

        bus.announce("abc");

        let announcement = rx.try_recv().unwrap();
        assert_eq!(announcement.session_id, "abc");
    }

    #[test]
    fn test_late_subscriber_misses_announcement() {
        let bus = OwnershipBus::new();
        bus.announce("abc");

        // Fire-and-forget: only receivers alive at send time see it
        let mut rx = bus.subscribe();
        assert!(rx.try_recv().is_err());
    }
}
