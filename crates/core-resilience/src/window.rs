//! Outcome Window: count-bounded ring of the most recent call outcomes
//!
//! The window keeps the last `capacity` outcomes; appending beyond capacity
//! evicts the oldest one. Failures (including timeouts) are counted
//! incrementally so the failure ratio is O(1).
//!
//! # Example
//!
//! ```
//! use tripwire_core_resilience::outcome::{Outcome, RecordedOutcome};
//! use tripwire_core_resilience::window::OutcomeWindow;
//! use tokio::time::Instant;
//!
//! let mut window = OutcomeWindow::new(4);
//! let now = Instant::now();
//! window.record(RecordedOutcome::new(Outcome::Success, now));
//! window.record(RecordedOutcome::new(Outcome::Timeout, now));
//!
//! assert_eq!(window.failure_ratio(3), None); // not enough data yet
//! assert_eq!(window.failure_ratio(2), Some(0.5));
//! ```

use crate::outcome::RecordedOutcome;
use std::collections::VecDeque;

/// Bounded record of recent outcomes
#[derive(Debug, Clone)]
pub struct OutcomeWindow {
    entries: VecDeque<RecordedOutcome>,
    capacity: usize,
    failures: usize,
}

impl OutcomeWindow {
    /// Create a window holding at most `capacity` outcomes (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            failures: 0,
        }
    }

    /// Append an outcome, evicting the oldest one when full
    pub fn record(&mut self, entry: RecordedOutcome) {
        if self.entries.len() >= self.capacity {
            if let Some(evicted) = self.entries.pop_front() {
                if evicted.outcome.is_failure() {
                    self.failures -= 1;
                }
            }
        }

        if entry.outcome.is_failure() {
            self.failures += 1;
        }
        self.entries.push_back(entry);
    }

    /// Fraction (0.0 - 1.0) of recorded outcomes that were failures or timeouts.
    ///
    /// Returns `None` while fewer than `minimum_calls` outcomes are recorded.
    pub fn failure_ratio(&self, minimum_calls: usize) -> Option<f64> {
        let total = self.entries.len();
        if total == 0 || total < minimum_calls {
            return None;
        }
        Some(self.failures as f64 / total as f64)
    }

    /// Same as [`failure_ratio`](Self::failure_ratio) but as a percentage
    /// (0.0 - 100.0), computed from integer counts so whole-number rates
    /// compare exactly against a threshold.
    pub fn failure_rate(&self, minimum_calls: usize) -> Option<f64> {
        let total = self.entries.len();
        if total == 0 || total < minimum_calls {
            return None;
        }
        Some((self.failures as f64 * 100.0) / total as f64)
    }

    /// Clear all recorded outcomes
    pub fn reset(&mut self) {
        self.entries.clear();
        self.failures = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of failures and timeouts currently in the window
    pub fn failure_count(&self) -> usize {
        self.failures
    }

    pub fn success_count(&self) -> usize {
        self.entries.len() - self.failures
    }

    /// Recorded outcomes, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &RecordedOutcome> {
        self.entries.iter()
    }
}
