//! Simulation metrics.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;

use atomicdoc_coordinator::TransactionOutcome;

/// Counts of plan outcomes seen by the simulator.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationMetrics {
    pub total_plans: u64,
    pub committed: u64,
    pub aborted: u64,
    pub failed: u64,
    /// Attempts beyond the first, summed over all plans.
    pub extra_attempts: u64,
    /// Latency samples (ms).
    #[serde(skip)]
    latency_samples: VecDeque<u64>,
    #[serde(skip)]
    max_samples: usize,
}

impl SimulationMetrics {
    pub fn new() -> Self {
        Self {
            total_plans: 0,
            committed: 0,
            aborted: 0,
            failed: 0,
            extra_attempts: 0,
            latency_samples: VecDeque::with_capacity(10000),
            max_samples: 10000,
        }
    }

    /// Record one outcome and how long `execute` took.
    pub fn record(&mut self, outcome: &TransactionOutcome, latency: Duration) {
        self.total_plans += 1;
        match outcome {
            TransactionOutcome::Committed { .. } => self.committed += 1,
            TransactionOutcome::AbortedByPolicy { .. } => self.aborted += 1,
            TransactionOutcome::Failed { .. } => self.failed += 1,
        }
        self.extra_attempts += u64::from(outcome.attempts().saturating_sub(1));

        if self.latency_samples.len() >= self.max_samples {
            self.latency_samples.pop_front();
        }
        self.latency_samples.push_back(latency.as_millis() as u64);
    }

    pub fn average_latency_ms(&self) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let sum: u64 = self.latency_samples.iter().sum();
        sum / self.latency_samples.len() as u64
    }

    pub fn p99_latency_ms(&self) -> u64 {
        self.percentile_latency(99)
    }

    fn percentile_latency(&self, percentile: usize) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let mut sorted: Vec<_> = self.latency_samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (sorted.len() * percentile / 100).min(sorted.len() - 1);
        sorted[idx]
    }

    /// Share of plans that committed.
    pub fn commit_rate(&self) -> f64 {
        if self.total_plans == 0 {
            return 0.0;
        }

        self.committed as f64 / self.total_plans as f64
    }
}

impl Default for SimulationMetrics {
    fn default() -> Self {
        Self::new()
    }
}
