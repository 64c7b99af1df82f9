//! Bounded retry policy for discarded completion responses.

use std::time::Duration;

use rand::Rng;

use palaver_core::config::BackoffConfig;

/// Delay strategy between attempts.
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    None,
    Fixed(Duration),
    Exponential {
        initial: Duration,
        max: Duration,
        jitter: bool,
    },
}

impl From<&BackoffConfig> for Backoff {
    fn from(config: &BackoffConfig) -> Self {
        match config {
            BackoffConfig::None => Self::None,
            BackoffConfig::Fixed { delay_ms } => Self::Fixed(Duration::from_millis(*delay_ms)),
            BackoffConfig::Exponential {
                initial_ms,
                max_ms,
                jitter,
            } => Self::Exponential {
                initial: Duration::from_millis(*initial_ms),
                max: Duration::from_millis(*max_ms),
                jitter: *jitter,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, the first call included. Always at least 1.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            backoff: Backoff::None,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match &self.backoff {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed(delay) => *delay,
            Backoff::Exponential {
                initial,
                max,
                jitter,
            } => {
                let exp = attempt.saturating_sub(1).min(16);
                let base = initial.saturating_mul(1u32 << exp).min(*max);
                if *jitter && !base.is_zero() {
                    let millis = base.as_millis() as u64;
                    Duration::from_millis(rand::rng().random_range(millis / 2..=millis))
                } else {
                    base
                }
            }
        }
    }
}
