/*!
 * Error types for Tripwire
 */

use std::io;
use thiserror::Error;
use tripwire_core_resilience::ResilienceError;

pub type Result<T> = std::result::Result<T, TripwireError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FATAL: i32 = 2;

#[derive(Debug, Error)]
pub enum TripwireError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Breaker setup or fallback failure from the resilience core
    #[error(transparent)]
    Resilience(#[from] ResilienceError),

    /// Caller supplied missing or malformed input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP server failure
    #[error("Server error: {0}")]
    Server(String),
}

impl TripwireError {
    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        EXIT_FATAL
    }

    /// Precondition violations are the caller's problem, not the downstream's
    pub fn is_client_error(&self) -> bool {
        matches!(self, TripwireError::InvalidInput(_))
    }
}

impl From<toml::de::Error> for TripwireError {
    fn from(err: toml::de::Error) -> Self {
        TripwireError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for TripwireError {
    fn from(err: toml::ser::Error) -> Self {
        TripwireError::Config(err.to_string())
    }
}
