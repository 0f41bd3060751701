//! Error types for the resilience crate

use std::time::Duration;
use thiserror::Error;

/// Rejection handed out by an open (or saturated half-open) circuit breaker.
///
/// This is an expected, frequent result under load, so the breaker returns it
/// as a value from [`permit`](crate::CircuitBreaker::permit) instead of failing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Circuit breaker '{breaker}' is open, rejecting calls")]
pub struct OpenCircuitError {
    /// Name of the breaker that rejected the call
    pub breaker: String,
    /// Time left until the breaker starts probing again, if known.
    /// `None` while half-open probes are still pending.
    pub retry_after: Option<Duration>,
}

/// Errors that can occur in resilience operations
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ResilienceError {
    /// Breaker or time limiter configuration is unusable
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Circuit breaker is open, rejecting requests
    #[error(transparent)]
    CircuitOpen(#[from] OpenCircuitError),

    /// Timeout occurred
    #[error("Operation timeout after {0:?}")]
    Timeout(Duration),

    /// The fallback itself could not produce a value
    #[error("Fallback failed: {0}")]
    FallbackDefect(String),
}

impl ResilienceError {
    /// Check if this error is the terminal fallback failure
    pub fn is_fallback_defect(&self) -> bool {
        matches!(self, ResilienceError::FallbackDefect(_))
    }
}
