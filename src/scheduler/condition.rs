//! Condition evaluation (spec §4.5.3): the per-step truth table deciding
//! whether a followup is ready to schedule, still waiting, or explicitly
//! failed.

use crate::domain::{ConditionSpec, ConditionType, JobStatus};

/// The result of evaluating a step's condition against the status of the
/// step it checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionOutcome {
    /// Schedule now.
    Met,
    /// Re-evaluate on the next pass; do not schedule yet.
    Waiting,
    /// Explicit negative result (`skip_if_not_met`): materialize a skipped
    /// job row for this step and move on.
    Failed,
}

/// Evaluates `condition` given the status of the step it checks, or `None`
/// if that step has not been scheduled at all yet.
pub fn evaluate_condition(condition: &ConditionSpec, checked_step_status: Option<JobStatus>) -> ConditionOutcome {
    if condition.condition_type == ConditionType::Always {
        return ConditionOutcome::Met;
    }

    let Some(status) = checked_step_status else {
        return ConditionOutcome::Waiting;
    };

    match condition.condition_type {
        ConditionType::Always => ConditionOutcome::Met,
        ConditionType::IfOpened => match status {
            JobStatus::Opened | JobStatus::UniqueOpened | JobStatus::Clicked => ConditionOutcome::Met,
            JobStatus::Sent | JobStatus::Delivered => ConditionOutcome::Waiting,
            s if s.is_failure() && condition.skip_if_not_met => ConditionOutcome::Failed,
            _ => ConditionOutcome::Waiting,
        },
        ConditionType::IfClicked => match status {
            JobStatus::Clicked => ConditionOutcome::Met,
            JobStatus::Sent | JobStatus::Delivered | JobStatus::Opened | JobStatus::UniqueOpened => {
                ConditionOutcome::Waiting
            }
            s if s.is_failure() && condition.skip_if_not_met => ConditionOutcome::Failed,
            _ => ConditionOutcome::Waiting,
        },
        ConditionType::IfNotOpened => match status {
            JobStatus::Opened | JobStatus::UniqueOpened | JobStatus::Clicked => ConditionOutcome::Failed,
            JobStatus::Sent | JobStatus::Delivered => ConditionOutcome::Met,
            _ => ConditionOutcome::Waiting,
        },
        ConditionType::IfNotClicked => match status {
            JobStatus::Clicked => ConditionOutcome::Failed,
            JobStatus::Sent | JobStatus::Delivered | JobStatus::Opened | JobStatus::UniqueOpened => {
                ConditionOutcome::Met
            }
            _ => ConditionOutcome::Waiting,
        },
    }
}
