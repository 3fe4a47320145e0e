//! Mail-type priority and action-permission rules (spec §4.1).

use crate::domain::MailCategory;

/// Scheduling priority for a mail category. Higher wins ties in the Queue
/// Watcher's pause/resume logic and the Status Resolver's job-selection step.
pub fn priority(category: MailCategory) -> i32 {
    match category {
        MailCategory::Conditional => 100,
        MailCategory::Manual => 90,
        MailCategory::Initial => 80,
        MailCategory::Followup => 70,
    }
}

/// The mutating actions the queue watcher and admin surface may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Skip,
    Cancel,
    Pause,
    Resume,
    Retry,
    Reschedule,
}

/// Whether `action` is permitted for a job of `category` currently in
/// `status`. Returns `Err(reason)` rather than a bool so callers can surface
/// the reason directly (e.g. `EngineError::ActionNotAllowed`).
pub fn validate_action(
    action: Action,
    category: MailCategory,
    status: crate::domain::JobStatus,
) -> Result<(), &'static str> {
    use crate::domain::JobStatus;

    match action {
        Action::Skip => {
            if category != MailCategory::Followup {
                return Err("only followups can be skipped");
            }
            if status.is_terminal() {
                return Err("job already in a terminal state");
            }
            Ok(())
        }
        Action::Cancel => {
            if category == MailCategory::Followup {
                return Err("followups cannot be cancelled, only skipped");
            }
            if status.is_terminal() {
                return Err("job already in a terminal state");
            }
            Ok(())
        }
        Action::Pause => {
            if category != MailCategory::Followup {
                return Err("only followups can be paused");
            }
            if !status.is_active() {
                return Err("only an active job can be paused");
            }
            Ok(())
        }
        Action::Resume => {
            if status != JobStatus::Paused {
                return Err("only a paused job can be resumed");
            }
            Ok(())
        }
        Action::Retry => {
            if !status.can_retry() {
                return Err("job status is not retriable");
            }
            Ok(())
        }
        Action::Reschedule => {
            if status.is_terminal() {
                return Err("job already in a terminal state");
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobStatus;

    #[test]
    fn priority_order_matches_spec() {
        assert!(priority(MailCategory::Conditional) > priority(MailCategory::Manual));
        assert!(priority(MailCategory::Manual) > priority(MailCategory::Initial));
        assert!(priority(MailCategory::Initial) > priority(MailCategory::Followup));
    }

    #[test]
    fn followups_can_be_skipped_not_cancelled() {
        assert!(validate_action(Action::Skip, MailCategory::Followup, JobStatus::Pending).is_ok());
        assert!(validate_action(Action::Cancel, MailCategory::Followup, JobStatus::Pending).is_err());
    }

    #[test]
    fn initial_can_be_cancelled_not_skipped() {
        assert!(validate_action(Action::Cancel, MailCategory::Initial, JobStatus::Pending).is_ok());
        assert!(validate_action(Action::Skip, MailCategory::Initial, JobStatus::Pending).is_err());
    }

    #[test]
    fn only_followup_can_be_paused() {
        assert!(validate_action(Action::Pause, MailCategory::Followup, JobStatus::Pending).is_ok());
        assert!(validate_action(Action::Pause, MailCategory::Manual, JobStatus::Pending).is_err());
    }
}
