//! Whole-plan retry policy for transient store errors.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use atomicdoc_common::TransactionError;

/// Bounded exponential backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first. 1 disables retries.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_backoff: Duration,
    /// Upper bound on any single delay (before jitter).
    pub max_backoff: Duration,
    /// Growth factor between delays.
    pub multiplier: f64,
    /// Add up to 25% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Run each plan exactly once.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Fixed delay between attempts, no jitter.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff: delay,
            max_backoff: delay,
            multiplier: 1.0,
            jitter: false,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Delay after failed attempt number `attempt` (1-based).
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base = self.initial_backoff.as_secs_f64()
            * self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let capped = base.min(self.max_backoff.as_secs_f64());

        let delay = if self.jitter {
            capped * (1.0 + rand::thread_rng().gen_range(0.0..=0.25))
        } else {
            capped
        };

        Duration::from_secs_f64(delay)
    }

    /// Check whether another attempt is allowed after `attempt` failed with
    /// `error`.
    pub fn should_retry(&self, attempt: u32, error: &TransactionError) -> bool {
        attempt < self.max_attempts && error.is_retryable()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }
        if self.multiplier < 1.0 {
            return Err("multiplier cannot be below 1.0".to_string());
        }
        if self.initial_backoff > self.max_backoff {
            return Err("initial_backoff cannot exceed max_backoff".to_string());
        }
        Ok(())
    }
}
