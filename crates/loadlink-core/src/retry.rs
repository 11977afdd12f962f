//! Retry policy for the connection lifecycle.
//!
//! Every failure in the lifecycle is retried after the same fixed delay,
//! with no attempt limit. The policy is a plain value injected into the
//! [`ConnectionManager`](crate::ConnectionManager), so tests can shorten
//! the delay or drive it with paused tokio time.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use loadlink_core::RetryPolicy;
//!
//! let policy = RetryPolicy::fixed(Duration::from_secs(10));
//! assert_eq!(policy.delay(), Duration::from_secs(10));
//! ```

use std::time::Duration;

use crate::error::{Error, Result};

/// Default delay before the lifecycle restarts after a failure.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Fixed-delay, unbounded retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Create a policy that always waits `delay`.
    pub fn fixed(delay: Duration) -> Self {
        Self { delay }
    }

    /// Create a policy from whole seconds, as read from the command line.
    pub fn from_secs(secs: u64) -> Self {
        Self::fixed(Duration::from_secs(secs))
    }

    /// Delay before every retry.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Validate the policy and return an error if invalid.
    ///
    /// A zero delay would turn a persistent failure into a busy loop.
    pub fn validate(&self) -> Result<()> {
        if self.delay.is_zero() {
            return Err(Error::invalid_config("retry delay must be > 0"));
        }
        Ok(())
    }
}
