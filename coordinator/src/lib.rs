//! AtomicDoc Coordinator
//!
//! The coordinator runs a caller-supplied [`MutationPlan`] against a document
//! store as one atomic unit: every step executes inside a single
//! transactional scope, post-conditions and conflict checks can veto the plan
//! mid-way, and the scope is always resolved before an outcome is returned.

pub mod coordinator;
pub mod config;
pub mod outcome;
pub mod plan;
pub mod retry;
pub mod state;
pub mod metrics;

pub use coordinator::{ExecuteOptions, TransactionalMutationCoordinator};
pub use config::CoordinatorConfig;
pub use outcome::{OperationResult, StepResult, TransactionOutcome};
pub use plan::{
    ConflictCheck, MutationPlan, MutationPlanBuilder, MutationStep, PostCondition, StepOperation,
};
pub use retry::RetryPolicy;
pub use state::ExecutionPhase;
