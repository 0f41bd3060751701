//! Call outcomes fed into the circuit breaker

use std::fmt;
use tokio::time::Instant;

/// How a single permitted call attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// Operation completed with a value
    Success,
    /// Operation completed with an error
    Failure,
    /// Operation did not complete before its deadline
    Timeout,
}

impl Outcome {
    /// Failures and timeouts both count against the failure ratio
    pub fn is_failure(self) -> bool {
        !matches!(self, Outcome::Success)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::Failure => write!(f, "failure"),
            Outcome::Timeout => write!(f, "timeout"),
        }
    }
}

/// An outcome stamped with the instant it was recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedOutcome {
    pub outcome: Outcome,
    pub recorded_at: Instant,
}

impl RecordedOutcome {
    pub fn new(outcome: Outcome, recorded_at: Instant) -> Self {
        Self {
            outcome,
            recorded_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_classification() {
        assert!(!Outcome::Success.is_failure());
        assert!(Outcome::Failure.is_failure());
        assert!(Outcome::Timeout.is_failure());
    }

    #[test]
    fn test_display() {
        assert_eq!(Outcome::Timeout.to_string(), "timeout");
    }
}
