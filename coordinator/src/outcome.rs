//! Step results and transaction outcomes.

use std::fmt;
use std::time::Duration;

use bson::{Bson, Document};
use serde::{Deserialize, Serialize};

use atomicdoc_common::{DeleteOutcome, InsertOutcome, PlanId, TransactionError, UpdateOutcome};

/// What one step's operation returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationResult {
    Inserted {
        inserted_id: Bson,
    },
    Updated {
        matched_count: u64,
        modified_count: u64,
        upserted_id: Option<Bson>,
    },
    Deleted {
        deleted_count: u64,
    },
    /// Result of a lookup.
    Found(Option<Document>),
}

impl OperationResult {
    /// One-line description, e.g. `matched 1, modified 0`.
    pub fn summary(&self) -> String {
        match self {
            OperationResult::Inserted { inserted_id } => format!("inserted {}", inserted_id),
            OperationResult::Updated {
                matched_count,
                modified_count,
                upserted_id: Some(id),
            } => format!(
                "matched {}, modified {}, upserted {}",
                matched_count, modified_count, id
            ),
            OperationResult::Updated {
                matched_count,
                modified_count,
                upserted_id: None,
            } => format!("matched {}, modified {}", matched_count, modified_count),
            OperationResult::Deleted { deleted_count } => format!("deleted {}", deleted_count),
            OperationResult::Found(Some(_)) => "a matching document".to_string(),
            OperationResult::Found(None) => "no matching document".to_string(),
        }
    }
}

impl From<InsertOutcome> for OperationResult {
    fn from(outcome: InsertOutcome) -> Self {
        OperationResult::Inserted {
            inserted_id: outcome.inserted_id,
        }
    }
}

impl From<UpdateOutcome> for OperationResult {
    fn from(outcome: UpdateOutcome) -> Self {
        OperationResult::Updated {
            matched_count: outcome.matched_count,
            modified_count: outcome.modified_count,
            upserted_id: outcome.upserted_id,
        }
    }
}

impl From<DeleteOutcome> for OperationResult {
    fn from(outcome: DeleteOutcome) -> Self {
        OperationResult::Deleted {
            deleted_count: outcome.deleted_count,
        }
    }
}

/// Result of one step of a committed plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step: String,
    pub step_index: usize,
    pub collection: String,
    pub result: OperationResult,
}

/// How a plan execution ended.
#[derive(Debug, Clone)]
pub enum TransactionOutcome {
    /// Every step ran, every check passed, and the commit succeeded.
    Committed {
        plan_id: PlanId,
        plan_name: String,
        attempts: u32,
        elapsed: Duration,
        results: Vec<StepResult>,
    },
    /// A post-condition or conflict check vetoed the plan. Nothing was
    /// written.
    AbortedByPolicy {
        plan_id: PlanId,
        plan_name: String,
        attempts: u32,
        step: String,
        step_index: usize,
        reason: String,
    },
    /// A store error, timeout or precondition stopped the plan. Nothing was
    /// written.
    Failed {
        plan_id: PlanId,
        plan_name: String,
        attempts: u32,
        error: TransactionError,
    },
}

impl TransactionOutcome {
    pub fn plan_id(&self) -> PlanId {
        match self {
            TransactionOutcome::Committed { plan_id, .. }
            | TransactionOutcome::AbortedByPolicy { plan_id, .. }
            | TransactionOutcome::Failed { plan_id, .. } => *plan_id,
        }
    }

    pub fn plan_name(&self) -> &str {
        match self {
            TransactionOutcome::Committed { plan_name, .. }
            | TransactionOutcome::AbortedByPolicy { plan_name, .. }
            | TransactionOutcome::Failed { plan_name, .. } => plan_name,
        }
    }

    /// Attempts made, including the final one. Zero when the plan failed a
    /// precondition.
    pub fn attempts(&self) -> u32 {
        match self {
            TransactionOutcome::Committed { attempts, .. }
            | TransactionOutcome::AbortedByPolicy { attempts, .. }
            | TransactionOutcome::Failed { attempts, .. } => *attempts,
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, TransactionOutcome::Committed { .. })
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, TransactionOutcome::AbortedByPolicy { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TransactionOutcome::Failed { .. })
    }

    /// Per-step results of a committed plan.
    pub fn results(&self) -> Option<&[StepResult]> {
        match self {
            TransactionOutcome::Committed { results, .. } => Some(results),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&TransactionError> {
        match self {
            TransactionOutcome::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Status label for logs and metrics.
    pub fn status(&self) -> &'static str {
        match self {
            TransactionOutcome::Committed { .. } => "COMMITTED",
            TransactionOutcome::AbortedByPolicy { .. } => "ABORTED_BY_POLICY",
            TransactionOutcome::Failed { .. } => "FAILED",
        }
    }

    /// One-line human-readable explanation.
    pub fn explanation(&self) -> String {
        match self {
            TransactionOutcome::Committed {
                plan_name,
                attempts,
                results,
                ..
            } => format!(
                "'{}' committed {} step(s) in {} attempt(s)",
                plan_name,
                results.len(),
                attempts
            ),
            TransactionOutcome::AbortedByPolicy {
                plan_name,
                step,
                step_index,
                reason,
                ..
            } => format!(
                "'{}' aborted at step {} ('{}'): {}",
                plan_name,
                step_index + 1,
                step,
                reason
            ),
            TransactionOutcome::Failed {
                plan_name, error, ..
            } => format!("'{}' failed [{}]: {}", plan_name, error.error_code(), error),
        }
    }

    /// Convert into a `Result` for callers that treat aborts as errors.
    pub fn into_result(self) -> Result<Vec<StepResult>, TransactionError> {
        match self {
            TransactionOutcome::Committed { results, .. } => Ok(results),
            TransactionOutcome::AbortedByPolicy {
                step,
                step_index,
                reason,
                ..
            } => Err(TransactionError::PolicyAbort {
                step,
                step_index,
                reason,
            }),
            TransactionOutcome::Failed { error, .. } => Err(error),
        }
    }
}

impl fmt::Display for TransactionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.explanation())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atomicdoc_common::StoreError;

    #[test]
    fn test_explanations_are_single_line() {
        let plan_id = PlanId::new();
        let outcomes = vec![
            TransactionOutcome::Committed {
                plan_id,
                plan_name: "transfer".into(),
                attempts: 1,
                elapsed: Duration::from_millis(3),
                results: vec![],
            },
            TransactionOutcome::AbortedByPolicy {
                plan_id,
                plan_name: "transfer".into(),
                attempts: 1,
                step: "debit account1".into(),
                step_index: 0,
                reason: "expected modified_count == 1, got matched 0, modified 0".into(),
            },
            TransactionOutcome::Failed {
                plan_id,
                plan_name: "transfer".into(),
                attempts: 3,
                error: TransactionError::TransientStore {
                    attempts: 3,
                    source: StoreError::Network("reset".into()),
                },
            },
        ];

        for outcome in &outcomes {
            let line = outcome.to_string();
            assert!(!line.contains('\n'));
            assert!(line.starts_with("'transfer'"));
            assert_eq!(outcome.plan_id(), plan_id);
        }
        assert!(outcomes[1].explanation().contains("step 1 ('debit account1')"));
        assert!(outcomes[2].explanation().contains("TRANSIENT_STORE_ERROR"));
    }

    #[test]
    fn test_into_result() {
        let aborted = TransactionOutcome::AbortedByPolicy {
            plan_id: PlanId::new(),
            plan_name: "purchase".into(),
            attempts: 1,
            step: "decrement stock".into(),
            step_index: 0,
            reason: "out of stock".into(),
        };
        assert!(aborted.is_aborted());
        assert_eq!(aborted.status(), "ABORTED_BY_POLICY");

        let error = aborted.into_result().unwrap_err();
        assert_eq!(error.error_code(), "POLICY_ABORT");
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_operation_result_summary() {
        let result: OperationResult = UpdateOutcome {
            matched_count: 1,
            modified_count: 0,
            upserted_id: None,
        }
        .into();
        assert_eq!(result.summary(), "matched 1, modified 0");
        assert_eq!(
            OperationResult::from(DeleteOutcome { deleted_count: 1 }).summary(),
            "deleted 1"
        );
        assert_eq!(OperationResult::Found(None).summary(), "no matching document");
    }
}
