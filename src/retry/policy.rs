//! Backoff policy for calls to the database and the search index.
//!
//! Implements exponential backoff clamped to a border delay.

use std::time::Duration;

/// Exponential backoff policy.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub start: Duration,
    /// Multiplier applied to the delay after each retry.
    pub factor: f64,
    /// Maximum delay (cap for exponential growth).
    pub border: Duration,
}

impl BackoffPolicy {
    pub fn new(start: Duration, factor: f64, border: Duration) -> Self {
        Self {
            start,
            factor,
            border,
        }
    }

    /// Calculate the delay before retry number `attempt` (1-based).
    ///
    /// Uses exponential backoff: `start * factor^(attempt - 1)`, clamped to
    /// `border` once the computed value reaches it.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let nanos = self.start.as_nanos() as f64 * self.factor.powi(exponent);
        let border_nanos = self.border.as_nanos() as f64;

        if !nanos.is_finite() || nanos >= border_nanos {
            self.border
        } else {
            Duration::from_nanos(nanos as u64)
        }
    }

    /// The infinite schedule of delays, starting with the first retry.
    pub fn delays(&self) -> Delays {
        Delays {
            policy: self.clone(),
            attempt: 0,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            start: Duration::from_millis(100),
            factor: 2.0,
            border: Duration::from_secs(10),
        }
    }
}

/// Iterator over the delays prescribed by a [`BackoffPolicy`]. Never ends.
#[derive(Debug, Clone)]
pub struct Delays {
    policy: BackoffPolicy,
    attempt: u32,
}

impl Iterator for Delays {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        self.attempt = self.attempt.saturating_add(1);
        Some(self.policy.delay(self.attempt))
    }
}
