//! Append-only event log shared across one invocation.
//!
//! The log and the cost counter are the only shared-write structures in the
//! engine; concurrent branches append here without any cross-agent locking.
//! Sequence numbers are assigned under the append lock, so they are totally
//! ordered within the invocation (and therefore within any single branch).

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use super::{Branch, Event};

/// Append-only, per-invocation sequence of immutable events.
pub struct EventLog {
    events: RwLock<Vec<Event>>,
    next_sequence: AtomicU64,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            events: RwLock::new(Vec::new()),
            next_sequence: AtomicU64::new(1),
        }
    }

    /// Rebuild a log from previously persisted events (resume path).
    /// The next sequence number continues after the highest seen.
    pub fn from_events(events: Vec<Event>) -> Self {
        let max = events.iter().map(|e| e.sequence).max().unwrap_or(0);
        Self {
            events: RwLock::new(events),
            next_sequence: AtomicU64::new(max + 1),
        }
    }

    /// Append an event, assigning its sequence number. Returns the stamped
    /// event; the stored copy is never mutated afterwards.
    pub fn append(&self, mut event: Event) -> Event {
        let mut events = self.events.write();
        event.sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        events.push(event.clone());
        event
    }

    /// Events visible to a consumer on `branch`: those whose branch is a
    /// prefix of (or equal to) it. Ancestors' and own events are visible;
    /// peer and cousin subtrees are not.
    pub fn visible(&self, branch: &Branch) -> Vec<Event> {
        self.events
            .read()
            .iter()
            .filter(|e| e.branch.is_prefix_of(branch))
            .cloned()
            .collect()
    }

    /// Full snapshot, in append order.
    pub fn all(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}
