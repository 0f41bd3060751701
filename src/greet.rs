/*!
 * Greeting service: a deliberately slow downstream to guard
 */

use rand::Rng;
use std::time::Duration;

use crate::config::GreetingConfig;
use crate::error::TripwireError;

/// How long a greeting takes to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayPolicy {
    /// Uniformly random whole seconds in `[0, max_secs)`
    Random { max_secs: u64 },

    /// Always the same delay
    Fixed(Duration),
}

impl DelayPolicy {
    fn next_delay(&self) -> Duration {
        match *self {
            DelayPolicy::Random { max_secs: 0 } => Duration::ZERO,
            DelayPolicy::Random { max_secs } => {
                Duration::from_secs(rand::rng().random_range(0..max_secs))
            }
            DelayPolicy::Fixed(delay) => delay,
        }
    }
}

/// Validate a caller-supplied name: present and not blank after trimming
pub fn require_name(name: Option<&str>) -> Result<&str, TripwireError> {
    match name.map(str::trim) {
        Some(trimmed) if !trimmed.is_empty() => Ok(trimmed),
        _ => Err(TripwireError::InvalidInput(
            "query parameter 'name' is required".to_string(),
        )),
    }
}

/// Produces greetings after a delay
#[derive(Debug, Clone)]
pub struct GreetingService {
    delay: DelayPolicy,
}

impl GreetingService {
    pub fn new(delay: DelayPolicy) -> Self {
        Self { delay }
    }

    /// Service with the random delay configured in `config`
    pub fn from_config(config: &GreetingConfig) -> Self {
        Self::new(DelayPolicy::Random {
            max_secs: config.max_delay_secs,
        })
    }

    pub fn delay_policy(&self) -> DelayPolicy {
        self.delay
    }

    /// Greet `name` after the policy's delay, reporting the delay in the reply.
    ///
    /// `name` is expected to have passed [`require_name`].
    pub async fn greet(&self, name: &str) -> String {
        let delay = self.delay.next_delay();
        let secs = delay.as_secs();
        tracing::info!("(in {}s)", secs);

        tokio::time::sleep(delay).await;
        format!("Hello {}! (in {})", name, secs)
    }
}
