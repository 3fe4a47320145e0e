//! The Rulebook (spec §4.1): the only place encoding mail-type priorities,
//! action permissions, status groupings, event categorization, and retry
//! policy. Everything else in the engine queries through here rather than
//! re-deriving these rules inline.

pub mod actions;
pub mod event;
pub mod mail_type;
pub mod retry;
pub mod status;

pub use actions::{
    execute_cancel_job, execute_pause_followups, execute_resume_followups, execute_skip_job,
    pause_lower_priority_jobs, resume_paused_jobs_after,
};
pub use event::get_event_category;
pub use mail_type::{priority, validate_action, Action};
pub use retry::{calculate_retry_delay, should_mark_as_dead};
pub use status::{
    active_statuses, awaiting_delivery_statuses, completed_history_statuses, failure_statuses,
    in_progress_statuses, retriable_statuses, successfully_sent_statuses,
};
