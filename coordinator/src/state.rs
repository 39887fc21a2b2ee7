//! Execution phase state machine.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::debug;

use atomicdoc_common::PlanId;

/// Phase of one plan attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionPhase {
    /// Waiting for a permit or a scope.
    Pending,
    /// Executing steps inside the scope.
    Running,
    /// Commit issued.
    Committing,
    /// Writes are durable.
    Committed,
    /// Scope aborted by a check or before a retry.
    Aborted,
    /// Scope aborted because of an error.
    Failed,
}

impl ExecutionPhase {
    /// Check if no further transition is possible.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            ExecutionPhase::Committed | ExecutionPhase::Aborted | ExecutionPhase::Failed
        )
    }

    /// Get valid next phases.
    pub fn valid_transitions(&self) -> &[ExecutionPhase] {
        match self {
            ExecutionPhase::Pending => &[ExecutionPhase::Running, ExecutionPhase::Failed],
            ExecutionPhase::Running => &[
                ExecutionPhase::Committing,
                ExecutionPhase::Aborted,
                ExecutionPhase::Failed,
            ],
            ExecutionPhase::Committing => &[ExecutionPhase::Committed, ExecutionPhase::Failed],
            ExecutionPhase::Committed | ExecutionPhase::Aborted | ExecutionPhase::Failed => &[],
        }
    }

    pub fn can_transition_to(&self, next: ExecutionPhase) -> bool {
        self.valid_transitions().contains(&next)
    }
}

/// Error when attempting an invalid phase transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: ExecutionPhase,
    pub to: ExecutionPhase,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid phase transition from {:?} to {:?}", self.from, self.to)
    }
}

impl std::error::Error for InvalidTransition {}

/// Tracks one attempt of a plan through its phases.
#[derive(Debug, Clone)]
pub struct AttemptState {
    pub plan_id: PlanId,
    pub attempt: u32,
    phase: ExecutionPhase,
    started_at: Instant,
}

impl AttemptState {
    pub fn new(plan_id: PlanId, attempt: u32) -> Self {
        Self {
            plan_id,
            attempt,
            phase: ExecutionPhase::Pending,
            started_at: Instant::now(),
        }
    }

    pub fn phase(&self) -> ExecutionPhase {
        self.phase
    }

    /// Move to `next` if the transition is valid.
    pub fn transition_to(&mut self, next: ExecutionPhase) -> Result<(), InvalidTransition> {
        if !self.phase.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        debug!(
            plan_id = %self.plan_id,
            attempt = self.attempt,
            from = ?self.phase,
            to = ?next,
            elapsed_ms = self.started_at.elapsed().as_millis() as u64,
            "Phase transition"
        );
        self.phase = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut state = AttemptState::new(PlanId::new(), 1);
        assert_eq!(state.phase(), ExecutionPhase::Pending);

        state.transition_to(ExecutionPhase::Running).unwrap();
        state.transition_to(ExecutionPhase::Committing).unwrap();
        state.transition_to(ExecutionPhase::Committed).unwrap();
        assert!(state.phase().is_final());
    }

    #[test]
    fn test_invalid_transitions() {
        let mut state = AttemptState::new(PlanId::new(), 1);
        let error = state.transition_to(ExecutionPhase::Committed).unwrap_err();
        assert_eq!(error.from, ExecutionPhase::Pending);

        state.transition_to(ExecutionPhase::Running).unwrap();
        state.transition_to(ExecutionPhase::Aborted).unwrap();
        // Final phases are final.
        assert!(state.transition_to(ExecutionPhase::Running).is_err());
        assert!(state.transition_to(ExecutionPhase::Failed).is_err());
    }

    #[test]
    fn test_commit_can_fail() {
        assert!(ExecutionPhase::Committing.can_transition_to(ExecutionPhase::Failed));
        assert!(!ExecutionPhase::Committing.can_transition_to(ExecutionPhase::Aborted));
    }
}
