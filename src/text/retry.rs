//! Retry policy for queued text sends

use std::time::Duration;

/// How the delay grows between attempts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay before every retry
    #[default]
    Fixed,
    /// Delay doubles each attempt
    Exponential,
}

/// Retry policy for text sends
///
/// Covers the local connect and enqueue path only. The transport's own send
/// may be fire-and-forget, so silent delivery failures surface through
/// transport events instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the first
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    /// Growth strategy
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff: Backoff::Fixed,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Fixed delay between attempts
    #[must_use]
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay: delay,
            max_delay: delay.max(Self::default().max_delay),
            backoff: Backoff::Fixed,
        }
    }
}

/// Compute the delay before retry number `attempt` (zero-based)
///
/// Fixed backoff returns `base_delay` every time; exponential follows
/// `min(base_delay * 2^attempt, max_delay)`.
#[must_use]
pub fn delay_for_attempt(policy: &RetryPolicy, attempt: u32) -> Duration {
    let delay = match policy.backoff {
        Backoff::Fixed => policy.base_delay,
        Backoff::Exponential => policy
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt)),
    };
    delay.min(policy.max_delay)
}
