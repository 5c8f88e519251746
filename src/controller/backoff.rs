//! Fibonacci backoff for requeue pacing.
//!
//! Readiness polls and transient retries requeue on a Fibonacci sequence
//! rather than exponential backoff; it grows slowly enough to keep install
//! progress visible. Sequence in seconds with the defaults:
//! 15, 15, 30, 45, 75, 120 (capped).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    prev_secs: u64,
    current_secs: u64,
    max_secs: u64,
}

impl FibonacciBackoff {
    #[must_use]
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        Self {
            prev_secs: 0,
            current_secs: min_secs,
            max_secs,
        }
    }

    /// Default pacing for "package not ready yet" polls.
    #[must_use]
    pub fn readiness() -> Self {
        Self::new(15, 120)
    }

    /// Next backoff duration, advancing the sequence.
    pub fn next_backoff(&mut self) -> Duration {
        let result = Duration::from_secs(self.current_secs);
        let next = self.prev_secs + self.current_secs;
        self.prev_secs = self.current_secs;
        self.current_secs = next.min(self.max_secs);
        result
    }
}

/// Per-object requeue pacing that survives across reconcile passes.
///
/// Each key advances its own Fibonacci sequence on every `next_delay` call;
/// `reset` restarts it once the object converges. Entries are small and the
/// object population is bounded, so the table is never pruned.
#[derive(Debug, Clone, Default)]
pub struct BackoffTable {
    entries: Arc<Mutex<HashMap<String, FibonacciBackoff>>>,
}

impl BackoffTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Next requeue delay for `key`, advancing its sequence.
    pub fn next_delay(&self, key: &str) -> Duration {
        self.entries
            .lock()
            .expect("backoff table poisoned")
            .entry(key.to_string())
            .or_insert_with(FibonacciBackoff::readiness)
            .next_backoff()
    }

    /// Forget the sequence for `key` so the next delay starts over.
    pub fn reset(&self, key: &str) {
        self.entries
            .lock()
            .expect("backoff table poisoned")
            .remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn follows_fibonacci_sequence_up_to_cap() {
        let mut backoff = FibonacciBackoff::new(1, 10);
        let observed: Vec<u64> = (0..8).map(|_| backoff.next_backoff().as_secs()).collect();
        assert_eq!(observed, vec![1, 1, 2, 3, 5, 8, 10, 10]);
    }

    #[test]
    fn readiness_defaults_start_at_fifteen_seconds() {
        let mut backoff = FibonacciBackoff::readiness();
        assert_eq!(backoff.next_backoff(), Duration::from_secs(15));
    }

    #[test]
    fn table_advances_per_key_and_resets() {
        let table = BackoffTable::new();
        assert_eq!(table.next_delay("ns/a"), Duration::from_secs(15));
        assert_eq!(table.next_delay("ns/a"), Duration::from_secs(15));
        assert_eq!(table.next_delay("ns/a"), Duration::from_secs(30));
        // Other keys pace independently.
        assert_eq!(table.next_delay("ns/b"), Duration::from_secs(15));
        table.reset("ns/a");
        assert_eq!(table.next_delay("ns/a"), Duration::from_secs(15));
    }
}
