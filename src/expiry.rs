//! Frame-Indexed Deadline Ring
//!
//! Bounded queue of values that retire at an absolute frame number.
//! Consumers that hold per-emission state (refresh overlays, in-flight
//! panel waveforms) park it here and collect it once the session's frame
//! counter passes the deadline, instead of arming one timer per emission.
//! Because deadlines derive from the monotonic frame counter they are
//! pushed in non-decreasing order, so only the front entry ever needs
//! checking.

use std::collections::VecDeque;

/// Bounded queue of values retiring at absolute frame deadlines
#[derive(Debug)]
pub struct DeadlineRing<T> {
    capacity: usize,
    entries: VecDeque<(u64, T)>,
}

impl<T> DeadlineRing<T> {
    /// Create a ring holding at most `capacity` entries
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "deadline ring needs capacity");
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Entries currently parked
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is parked
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of parked entries
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Park a value until `expires_at`
    ///
    /// When the ring is full the oldest entry is evicted and returned so
    /// the caller can retire it early; a full ring means the consumer is
    /// far behind, not that state may be dropped silently.
    pub fn push(&mut self, expires_at: u64, value: T) -> Option<T> {
        debug_assert!(
            self.entries.back().map_or(true, |(d, _)| *d <= expires_at),
            "deadlines must be non-decreasing"
        );
        let evicted = if self.entries.len() == self.capacity {
            self.entries.pop_front().map(|(_, v)| v)
        } else {
            None
        };
        self.entries.push_back((expires_at, value));
        evicted
    }

    /// Take the oldest entry if its deadline has passed
    ///
    /// Call in a loop with the current frame number to collect everything
    /// due this tick.
    pub fn pop_expired(&mut self, frame: u64) -> Option<T> {
        match self.entries.front() {
            Some((deadline, _)) if *deadline <= frame => {
                self.entries.pop_front().map(|(_, v)| v)
            }
            _ => None,
        }
    }

    /// Deadline of the oldest parked entry
    pub fn next_deadline(&self) -> Option<u64> {
        self.entries.front().map(|(d, _)| *d)
    }
}

// =============================================================================
// Tests
// =============================================================================
