//! Core coordinator implementation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Semaphore;
use tokio::time::{timeout_at, Instant as TokioInstant};
use tracing::{debug, error, info, instrument, warn};

use atomicdoc_common::{
    Deadline, DocumentStore, PlanId, StoreError, TransactionError, TransactionOptions,
    TransactionalScope,
};

use crate::config::CoordinatorConfig;
use crate::metrics::{Metrics, SharedMetrics};
use crate::outcome::{OperationResult, StepResult, TransactionOutcome};
use crate::plan::{MutationPlan, MutationStep, StepOperation};
use crate::retry::RetryPolicy;
use crate::state::{AttemptState, ExecutionPhase};

/// Per-call overrides for [`TransactionalMutationCoordinator::execute_with`].
/// Unset fields fall back to the coordinator's configuration.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    pub deadline: Option<Deadline>,
    pub retry: Option<RetryPolicy>,
    pub transaction_options: Option<TransactionOptions>,
}

impl ExecuteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deadline `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Deadline::after(timeout, "plan execution"))
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_transaction_options(mut self, options: TransactionOptions) -> Self {
        self.transaction_options = Some(options);
        self
    }
}

/// Why an attempt stopped before committing.
enum Stop {
    Policy {
        step: String,
        step_index: usize,
        reason: String,
    },
    Error(TransactionError),
}

impl From<StoreError> for Stop {
    fn from(error: StoreError) -> Self {
        Stop::Error(error.into())
    }
}

/// Removes an execution from the in-flight table when it ends, including
/// when the caller drops the future.
struct InFlight<'a> {
    table: &'a DashMap<u64, (PlanId, ExecutionPhase)>,
    metrics: &'a Metrics,
    execution: u64,
    plan_id: PlanId,
    finished: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.table.remove(&self.execution);
        if !self.finished {
            warn!(plan_id = %self.plan_id, "Plan execution cancelled");
            self.metrics.plan_failed();
        }
    }
}

/// Executes mutation plans as single atomic units against a document store.
pub struct TransactionalMutationCoordinator<S: DocumentStore> {
    store: Arc<S>,
    config: CoordinatorConfig,
    metrics: SharedMetrics,
    /// Plan and current phase of every execution, keyed per call so the same
    /// plan may run more than once at a time.
    in_flight: Arc<DashMap<u64, (PlanId, ExecutionPhase)>>,
    next_execution: AtomicU64,
    permits: Arc<Semaphore>,
}

impl<S: DocumentStore> TransactionalMutationCoordinator<S> {
    pub fn new(store: Arc<S>, config: CoordinatorConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_plans));
        Self {
            store,
            config,
            metrics: Arc::new(Metrics::new()),
            in_flight: Arc::new(DashMap::new()),
            next_execution: AtomicU64::new(1),
            permits,
        }
    }

    /// Coordinator with default configuration.
    pub fn with_defaults(store: Arc<S>) -> Self {
        Self::new(store, CoordinatorConfig::default())
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn metrics(&self) -> SharedMetrics {
        self.metrics.clone()
    }

    /// Number of plans currently executing.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Phase of an executing plan.
    pub fn phase_of(&self, plan_id: PlanId) -> Option<ExecutionPhase> {
        self.in_flight
            .iter()
            .find(|entry| entry.value().0 == plan_id)
            .map(|entry| entry.value().1)
    }

    /// Check if new plans are accepted.
    pub fn is_accepting(&self) -> bool {
        !self.permits.is_closed()
    }

    /// Execute a plan with the configured defaults.
    pub async fn execute(&self, plan: &MutationPlan) -> TransactionOutcome {
        self.execute_with(plan, ExecuteOptions::default()).await
    }

    /// Execute a plan with per-call overrides.
    #[instrument(skip(self, plan, options), fields(plan_id = %plan.id, plan_name = %plan.name))]
    pub async fn execute_with(
        &self,
        plan: &MutationPlan,
        options: ExecuteOptions,
    ) -> TransactionOutcome {
        let deadline = options.deadline.unwrap_or_else(|| {
            Deadline::after(self.config.plan_timeout, "plan execution")
        });
        let retry = options.retry.unwrap_or_else(|| self.config.retry.clone());
        let transaction_options = options
            .transaction_options
            .unwrap_or_else(|| self.config.transaction_options.clone());

        info!(
            steps = plan.len(),
            backend = self.store.backend(),
            timeout_ms = deadline.remaining().as_millis() as u64,
            "Executing plan"
        );

        self.metrics.plan_started();
        let execution = self.next_execution.fetch_add(1, Ordering::Relaxed);
        self.in_flight.insert(execution, (plan.id, ExecutionPhase::Pending));
        let mut guard = InFlight {
            table: &self.in_flight,
            metrics: &self.metrics,
            execution,
            plan_id: plan.id,
            finished: false,
        };

        let outcome = self
            .run(execution, plan, &deadline, &retry, &transaction_options)
            .await;
        guard.finished = true;

        match &outcome {
            TransactionOutcome::Committed {
                attempts, elapsed, ..
            } => {
                self.metrics.plan_committed();
                info!(
                    attempts,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Plan committed"
                );
            }
            TransactionOutcome::AbortedByPolicy { step, reason, .. } => {
                self.metrics.plan_aborted();
                warn!(step = %step, reason = %reason, "Plan aborted by policy");
            }
            TransactionOutcome::Failed {
                error, attempts, ..
            } => {
                self.metrics.plan_failed();
                if error.is_timeout() {
                    self.metrics.timeout();
                }
                error!(
                    error_code = error.error_code(),
                    error = %error,
                    attempts,
                    "Plan failed"
                );
            }
        }

        outcome
    }

    /// Stop accepting plans and wait (up to `drain_timeout`) for executing
    /// ones to finish.
    #[instrument(skip(self))]
    pub async fn shutdown(&self, drain_timeout: Duration) {
        info!("Shutting down coordinator");
        self.permits.close();

        let drained = tokio::time::timeout(drain_timeout, async {
            loop {
                let pending = self.in_flight_count();
                if pending == 0 {
                    break;
                }
                debug!(pending, "Waiting for executing plans to finish");
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;

        if drained.is_err() {
            warn!(pending = self.in_flight_count(), "Shutdown drain timed out");
        }
        info!("Coordinator stopped");
    }

    // --- Private methods ---

    async fn run(
        &self,
        execution: u64,
        plan: &MutationPlan,
        deadline: &Deadline,
        retry: &RetryPolicy,
        options: &TransactionOptions,
    ) -> TransactionOutcome {
        let failed = |attempts: u32, error: TransactionError| TransactionOutcome::Failed {
            plan_id: plan.id,
            plan_name: plan.name.clone(),
            attempts,
            error,
        };
        let expires = TokioInstant::from_std(deadline.instant());

        match timeout_at(expires, self.check_preconditions(plan)).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => return failed(0, error),
            Err(_) => return failed(0, timeout_error(deadline, "precondition checks")),
        }

        let _permit = match timeout_at(expires, self.permits.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return failed(
                    0,
                    TransactionError::Precondition("coordinator is shutting down".to_string()),
                )
            }
            Err(_) => return failed(0, timeout_error(deadline, "waiting for an execution slot")),
        };

        let mut attempt = 0;
        loop {
            attempt += 1;

            match self.attempt(execution, plan, attempt, deadline, options).await {
                Ok(results) => {
                    return TransactionOutcome::Committed {
                        plan_id: plan.id,
                        plan_name: plan.name.clone(),
                        attempts: attempt,
                        elapsed: deadline.elapsed(),
                        results,
                    }
                }
                Err(Stop::Policy {
                    step,
                    step_index,
                    reason,
                }) => {
                    return TransactionOutcome::AbortedByPolicy {
                        plan_id: plan.id,
                        plan_name: plan.name.clone(),
                        attempts: attempt,
                        step,
                        step_index,
                        reason,
                    }
                }
                Err(Stop::Error(error)) => {
                    if retry.should_retry(attempt, &error) {
                        let delay = retry.backoff_after(attempt);
                        if deadline.allows(delay) {
                            warn!(
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                error = %error,
                                "Transient error, retrying plan"
                            );
                            self.metrics.retry();
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                        debug!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "Backoff would pass the deadline, giving up"
                        );
                    }

                    let error = match error {
                        TransactionError::TransientStore { source, .. } => {
                            TransactionError::TransientStore {
                                attempts: attempt,
                                source,
                            }
                        }
                        other => other,
                    };
                    return failed(attempt, error);
                }
            }
        }
    }

    async fn check_preconditions(&self, plan: &MutationPlan) -> Result<(), TransactionError> {
        if plan.is_empty() {
            return Err(TransactionError::Precondition(format!(
                "plan '{}' has no steps",
                plan.name
            )));
        }

        for collection in plan.collections() {
            if !self.store.collection_exists(collection).await? {
                return Err(TransactionError::Precondition(format!(
                    "collection '{}' does not exist",
                    collection
                )));
            }
        }

        Ok(())
    }

    /// One attempt with a fresh scope. The scope is resolved before return.
    async fn attempt(
        &self,
        execution: u64,
        plan: &MutationPlan,
        attempt: u32,
        deadline: &Deadline,
        options: &TransactionOptions,
    ) -> Result<Vec<StepResult>, Stop> {
        let mut state = AttemptState::new(plan.id, attempt);
        let expires = TokioInstant::from_std(deadline.instant());

        let mut scope = match timeout_at(expires, self.store.start_scope(options)).await {
            Ok(Ok(scope)) => scope,
            Ok(Err(error)) => {
                self.advance(execution, &mut state, ExecutionPhase::Failed);
                return Err(error.into());
            }
            Err(_) => {
                self.advance(execution, &mut state, ExecutionPhase::Failed);
                return Err(Stop::Error(timeout_error(deadline, "opening a scope")));
            }
        };
        self.metrics.scope_opened();
        debug!(scope_id = %scope.id(), attempt, "Scope opened");
        self.advance(execution, &mut state, ExecutionPhase::Running);

        let steps = self.run_steps(execution, &mut scope, plan, &mut state);
        let result = match timeout_at(expires, steps).await {
            Ok(result) => result,
            Err(_) => {
                let operation = match state.phase() {
                    ExecutionPhase::Committing => "commit",
                    _ => "step execution",
                };
                Err(Stop::Error(timeout_error(deadline, operation)))
            }
        };

        if result.is_err() {
            let phase = if matches!(result, Err(Stop::Policy { .. })) {
                ExecutionPhase::Aborted
            } else {
                ExecutionPhase::Failed
            };
            self.advance(execution, &mut state, phase);
            if let Err(e) = scope.abort().await {
                warn!(scope_id = %scope.id(), error = %e, "Failed to abort scope");
            }
        }

        match scope.release().await {
            Ok(resolution) => debug!(scope_id = %scope.id(), ?resolution, "Scope released"),
            Err(e) => warn!(scope_id = %scope.id(), error = %e, "Failed to release scope"),
        }

        result
    }

    async fn run_steps(
        &self,
        execution: u64,
        scope: &mut S::Scope,
        plan: &MutationPlan,
        state: &mut AttemptState,
    ) -> Result<Vec<StepResult>, Stop> {
        let mut results = Vec::with_capacity(plan.len());

        for (index, step) in plan.steps.iter().enumerate() {
            let result = match run_step(scope, step).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(step = %step.name, index, error = %e, "Step failed");
                    return Err(e.into());
                }
            };
            debug!(
                step = %step.name,
                index,
                operation = step.operation.kind(),
                result = %result.summary(),
                "Step executed"
            );

            if let Some(condition) = &step.post_condition {
                if let Err(reason) = condition.check(&result) {
                    return Err(Stop::Policy {
                        step: step.name.clone(),
                        step_index: index,
                        reason,
                    });
                }
            }

            if let Some(check) = &step.conflict_check {
                if scope.find_one(&check.collection, &check.filter).await?.is_some() {
                    return Err(Stop::Policy {
                        step: step.name.clone(),
                        step_index: index,
                        reason: check.description.clone(),
                    });
                }
            }

            results.push(StepResult {
                step: step.name.clone(),
                step_index: index,
                collection: step.collection.clone(),
                result,
            });
        }

        self.advance(execution, state, ExecutionPhase::Committing);
        scope.commit().await?;
        self.advance(execution, state, ExecutionPhase::Committed);

        Ok(results)
    }

    fn advance(&self, execution: u64, state: &mut AttemptState, next: ExecutionPhase) {
        match state.transition_to(next) {
            Ok(()) => {
                if let Some(mut entry) = self.in_flight.get_mut(&execution) {
                    entry.1 = next;
                }
            }
            Err(e) => warn!(plan_id = %state.plan_id, error = %e, "Ignoring phase transition"),
        }
    }
}

async fn run_step<T: TransactionalScope>(
    scope: &mut T,
    step: &MutationStep,
) -> Result<OperationResult, StoreError> {
    let collection = step.collection.as_str();
    let result: OperationResult = match &step.operation {
        StepOperation::Insert { document } => {
            scope.insert_one(collection, document.clone()).await?.into()
        }
        StepOperation::UpdateOne {
            filter,
            update,
            upsert,
        } => scope
            .update_one(collection, filter, update, *upsert)
            .await?
            .into(),
        StepOperation::DeleteOne { filter } => scope.delete_one(collection, filter).await?.into(),
        StepOperation::FindOne { filter } => {
            OperationResult::Found(scope.find_one(collection, filter).await?)
        }
    };
    Ok(result)
}

fn timeout_error(deadline: &Deadline, during: &str) -> TransactionError {
    TransactionError::Timeout {
        operation: format!("{} ({})", deadline.operation, during),
        elapsed_ms: deadline.elapsed().as_millis() as u64,
    }
}
