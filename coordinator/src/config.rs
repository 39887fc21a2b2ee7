//! Coordinator configuration.

use std::time::Duration;

use atomicdoc_common::{TransactionOptions, DEFAULT_PLAN_TIMEOUT};

use crate::retry::RetryPolicy;

/// Main coordinator configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Budget for one `execute` call across all attempts.
    pub plan_timeout: Duration,
    /// Retry policy for transient store errors.
    pub retry: RetryPolicy,
    /// Options passed to every scope unless overridden per call.
    pub transaction_options: TransactionOptions,
    /// Maximum plans executing at once.
    pub max_concurrent_plans: usize,
    /// Log level for binaries.
    pub log_level: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            plan_timeout: DEFAULT_PLAN_TIMEOUT,
            retry: RetryPolicy::default(),
            transaction_options: TransactionOptions::default(),
            max_concurrent_plans: 1024,
            log_level: "info".to_string(),
        }
    }
}

impl CoordinatorConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(ms) = std::env::var("ATOMICDOC_PLAN_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse() {
                config.plan_timeout = Duration::from_millis(ms);
            }
        }

        if let Ok(attempts) = std::env::var("ATOMICDOC_MAX_ATTEMPTS") {
            if let Ok(attempts) = attempts.parse() {
                config.retry.max_attempts = attempts;
            }
        }

        if let Ok(ms) = std::env::var("ATOMICDOC_INITIAL_BACKOFF_MS") {
            if let Ok(ms) = ms.parse() {
                config.retry.initial_backoff = Duration::from_millis(ms);
            }
        }

        if let Ok(ms) = std::env::var("ATOMICDOC_MAX_BACKOFF_MS") {
            if let Ok(ms) = ms.parse() {
                config.retry.max_backoff = Duration::from_millis(ms);
            }
        }

        if let Ok(max) = std::env::var("ATOMICDOC_MAX_CONCURRENT_PLANS") {
            if let Ok(max) = max.parse() {
                config.max_concurrent_plans = max;
            }
        }

        if let Ok(flag) = std::env::var("ATOMICDOC_MAJORITY_WRITES") {
            if matches!(flag.as_str(), "1" | "true" | "yes") {
                config.transaction_options = TransactionOptions::primary_local_majority();
            }
        }

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.log_level = level;
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.plan_timeout.is_zero() {
            return Err("Plan timeout cannot be 0".to_string());
        }

        if self.max_concurrent_plans == 0 {
            return Err("max_concurrent_plans must be at least 1".to_string());
        }

        self.retry.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CoordinatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.plan_timeout, Duration::from_secs(30));
        assert_eq!(config.transaction_options, TransactionOptions::default());
    }

    #[test]
    fn test_invalid_config() {
        let mut config = CoordinatorConfig::default();
        config.max_concurrent_plans = 0;
        assert!(config.validate().is_err());

        let mut config = CoordinatorConfig::default();
        config.plan_timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = CoordinatorConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }
}
