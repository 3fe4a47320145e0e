//! Status-group getters: the only allowed way for the rest of the engine to
//! enumerate job statuses by meaning rather than spelling them out inline.

use crate::domain::JobStatus;

pub fn active_statuses() -> &'static [JobStatus] {
    JobStatus::ACTIVE
}

pub fn awaiting_delivery_statuses() -> Vec<JobStatus> {
    let mut statuses: Vec<JobStatus> = JobStatus::ACTIVE.to_vec();
    statuses.push(JobStatus::Paused);
    statuses
}

pub fn in_progress_statuses() -> Vec<JobStatus> {
    JobStatus::ACTIVE
        .iter()
        .copied()
        .filter(|s| *s != JobStatus::Pending)
        .collect()
}

pub fn retriable_statuses() -> Vec<JobStatus> {
    all_statuses().into_iter().filter(JobStatus::can_retry).collect()
}

pub fn failure_statuses() -> Vec<JobStatus> {
    all_statuses().into_iter().filter(JobStatus::is_failure).collect()
}

pub fn successfully_sent_statuses() -> Vec<JobStatus> {
    all_statuses()
        .into_iter()
        .filter(JobStatus::is_successfully_sent)
        .collect()
}

/// Statuses that belong in a lead's completed-event history: anything not
/// still awaiting delivery.
pub fn completed_history_statuses() -> Vec<JobStatus> {
    all_statuses()
        .into_iter()
        .filter(|s| !s.is_active() && *s != JobStatus::Paused)
        .collect()
}

fn all_statuses() -> Vec<JobStatus> {
    vec![
        JobStatus::Pending,
        JobStatus::Queued,
        JobStatus::Scheduled,
        JobStatus::Rescheduled,
        JobStatus::Deferred,
        JobStatus::Paused,
        JobStatus::Sent,
        JobStatus::Delivered,
        JobStatus::Opened,
        JobStatus::UniqueOpened,
        JobStatus::Clicked,
        JobStatus::SoftBounce,
        JobStatus::HardBounce,
        JobStatus::Blocked,
        JobStatus::Spam,
        JobStatus::Invalid,
        JobStatus::Error,
        JobStatus::Failed,
        JobStatus::Cancelled,
        JobStatus::Skipped,
        JobStatus::Unsubscribed,
        JobStatus::Complaint,
        JobStatus::Dead,
    ]
}
