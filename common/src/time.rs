//! Time utilities for AtomicDoc.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// Default budget for one plan execution (all attempts).
pub const DEFAULT_PLAN_TIMEOUT: Duration = Duration::from_secs(30);

/// A timestamp with timezone (always UTC).
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Caller-supplied deadline for an operation.
#[derive(Debug, Clone)]
pub struct Deadline {
    /// Monotonic instant after which the operation must stop.
    expires_at: Instant,
    /// When the deadline was set.
    started_at: Instant,
    /// Operation description.
    pub operation: String,
}

impl Deadline {
    /// Create a deadline `duration` from now.
    pub fn after(duration: Duration, operation: impl Into<String>) -> Self {
        let now = Instant::now();
        Self {
            expires_at: now + duration,
            started_at: now,
            operation: operation.into(),
        }
    }

    /// Create a deadline at a fixed instant.
    pub fn at(expires_at: Instant, operation: impl Into<String>) -> Self {
        Self {
            expires_at,
            started_at: Instant::now(),
            operation: operation.into(),
        }
    }

    /// The instant at which the deadline expires.
    pub fn instant(&self) -> Instant {
        self.expires_at
    }

    /// Check if the deadline has passed.
    pub fn is_exceeded(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Get remaining duration (zero once exceeded).
    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    /// Time elapsed since the deadline was set.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Check if `delay` can elapse before the deadline.
    pub fn allows(&self, delay: Duration) -> bool {
        delay < self.remaining()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_remaining() {
        let deadline = Deadline::after(Duration::from_secs(10), "test");
        assert!(!deadline.is_exceeded());
        assert!(deadline.remaining() > Duration::from_secs(9));
        assert!(deadline.allows(Duration::from_secs(1)));
        assert!(!deadline.allows(Duration::from_secs(11)));
    }

    #[test]
    fn test_deadline_exceeded() {
        let deadline = Deadline::at(Instant::now(), "test");
        assert!(deadline.is_exceeded());
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }
}
