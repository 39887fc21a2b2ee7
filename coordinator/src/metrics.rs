//! Metrics collection for coordinator monitoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Coordinator metrics.
#[derive(Debug)]
pub struct Metrics {
    /// Plans submitted.
    pub plans_total: AtomicU64,
    pub plans_committed: AtomicU64,
    /// Plans vetoed by a post-condition or conflict check.
    pub plans_aborted: AtomicU64,
    pub plans_failed: AtomicU64,
    /// Plans currently executing.
    pub plans_active: AtomicU64,
    /// Extra attempts caused by transient errors.
    pub retries: AtomicU64,
    /// Plans stopped by their deadline.
    pub timeouts: AtomicU64,
    /// Scopes opened across all attempts.
    pub scopes_opened: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            plans_total: AtomicU64::new(0),
            plans_committed: AtomicU64::new(0),
            plans_aborted: AtomicU64::new(0),
            plans_failed: AtomicU64::new(0),
            plans_active: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            scopes_opened: AtomicU64::new(0),
        }
    }

    pub fn plan_started(&self) {
        self.plans_total.fetch_add(1, Ordering::Relaxed);
        self.plans_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn plan_committed(&self) {
        self.plans_committed.fetch_add(1, Ordering::Relaxed);
        self.plans_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn plan_aborted(&self) {
        self.plans_aborted.fetch_add(1, Ordering::Relaxed);
        self.plans_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn plan_failed(&self) {
        self.plans_failed.fetch_add(1, Ordering::Relaxed);
        self.plans_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn scope_opened(&self) {
        self.scopes_opened.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            plans_total: self.plans_total.load(Ordering::Relaxed),
            plans_committed: self.plans_committed.load(Ordering::Relaxed),
            plans_aborted: self.plans_aborted.load(Ordering::Relaxed),
            plans_failed: self.plans_failed.load(Ordering::Relaxed),
            plans_active: self.plans_active.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            scopes_opened: self.scopes_opened.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        format!(
            r#"# HELP atomicdoc_plans_total Total number of plans executed
# TYPE atomicdoc_plans_total counter
atomicdoc_plans_total {}

# HELP atomicdoc_plans_committed Plans that committed
# TYPE atomicdoc_plans_committed counter
atomicdoc_plans_committed {}

# HELP atomicdoc_plans_aborted Plans aborted by a business check
# TYPE atomicdoc_plans_aborted counter
atomicdoc_plans_aborted {}

# HELP atomicdoc_plans_failed Plans that failed with an error
# TYPE atomicdoc_plans_failed counter
atomicdoc_plans_failed {}

# HELP atomicdoc_plans_active Plans currently executing
# TYPE atomicdoc_plans_active gauge
atomicdoc_plans_active {}

# HELP atomicdoc_retries Attempts repeated after a transient error
# TYPE atomicdoc_retries counter
atomicdoc_retries {}

# HELP atomicdoc_timeouts Plans stopped by their deadline
# TYPE atomicdoc_timeouts counter
atomicdoc_timeouts {}

# HELP atomicdoc_scopes_opened Transactional scopes opened
# TYPE atomicdoc_scopes_opened counter
atomicdoc_scopes_opened {}
"#,
            snapshot.plans_total,
            snapshot.plans_committed,
            snapshot.plans_aborted,
            snapshot.plans_failed,
            snapshot.plans_active,
            snapshot.retries,
            snapshot.timeouts,
            snapshot.scopes_opened,
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub plans_total: u64,
    pub plans_committed: u64,
    pub plans_aborted: u64,
    pub plans_failed: u64,
    pub plans_active: u64,
    pub retries: u64,
    pub timeouts: u64,
    pub scopes_opened: u64,
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<Metrics>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_increment() {
        let metrics = Metrics::new();

        metrics.plan_started();
        metrics.plan_started();
        metrics.plan_started();
        metrics.plan_committed();
        metrics.plan_aborted();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.plans_total, 3);
        assert_eq!(snapshot.plans_committed, 1);
        assert_eq!(snapshot.plans_aborted, 1);
        assert_eq!(snapshot.plans_active, 1);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = Metrics::new();
        metrics.plan_started();
        metrics.retry();

        let output = metrics.to_prometheus();
        assert!(output.contains("atomicdoc_plans_total 1"));
        assert!(output.contains("atomicdoc_retries 1"));
    }
}
