//! Status Resolver (spec §4.8): the pure function producing a lead's
//! canonical status after any job mutation. The only module permitted to
//! call `Lead::set_status` — every mutating operation elsewhere ends by
//! calling `sync_lead_status_after_job_change`.

use std::sync::Arc;

use crate::domain::{Job, JobStatus, Lead, LeadId, LeadStatus, MailKind, MailState, Settings, TerminalState};
use crate::error::EngineResult;
use crate::store::PersistentStore;

/// Maps a terminal/failure job status to the `MailState` it displays as.
/// Returns `None` for statuses that carry no lead-visible display state
/// (`cancelled`, `skipped`): those leads fall through to `sequence_complete`
/// or `idle` instead.
fn display_state_for(status: JobStatus) -> Option<MailState> {
    match status {
        JobStatus::Sent
        | JobStatus::Delivered
        | JobStatus::Opened
        | JobStatus::UniqueOpened
        | JobStatus::Clicked => Some(MailState::Sent),
        JobStatus::SoftBounce => Some(MailState::SoftBounce),
        JobStatus::HardBounce => Some(MailState::HardBounce),
        JobStatus::Blocked => Some(MailState::Blocked),
        JobStatus::Spam => Some(MailState::Spam),
        JobStatus::Invalid => Some(MailState::Invalid),
        JobStatus::Error => Some(MailState::Error),
        JobStatus::Failed => Some(MailState::Failed),
        _ => None,
    }
}

fn mail_kind_status(kind: &MailKind, state: MailState) -> LeadStatus {
    match kind {
        MailKind::Conditional { trigger_event, .. } => LeadStatus::Conditional {
            event: *trigger_event,
            state,
        },
        other => LeadStatus::Mail {
            mail_kind: other.display_name(),
            state,
        },
    }
}

fn is_rescheduled(job: &Job) -> bool {
    job.status == JobStatus::Rescheduled || job.metadata.original_job_id.is_some()
}

/// True once every enabled, non-skipped followup step has a job in a
/// completed (sent or dead-lettered) state.
fn sequence_is_complete(jobs: &[Job], settings: &Settings, skipped: &std::collections::HashSet<String>) -> bool {
    settings.active_sequence(skipped).all(|step| {
        jobs.iter().any(|job| {
            matches!(&job.kind, MailKind::Followup(name) if name == &step.name)
                && (job.status.is_successfully_sent() || job.status.is_failure() || job.status == JobStatus::Dead)
        })
    })
}

/// Pure resolution: given a lead, its jobs, the current settings, and "now",
/// compute the canonical `LeadStatus`. Never downgrades a forced status.
pub fn resolve_lead_status(
    lead: &Lead,
    jobs: &[Job],
    settings: &Settings,
    now: chrono::DateTime<chrono::Utc>,
) -> LeadStatus {
    if lead.converted {
        return LeadStatus::Converted;
    }

    match lead.terminal_state {
        Some(TerminalState::Dead) => return LeadStatus::Dead,
        Some(TerminalState::Unsubscribed) | Some(TerminalState::Complaint) => {
            return LeadStatus::Unsubscribed;
        }
        None => {}
    }

    if let Some(until) = lead.frozen_until {
        if until > now {
            return LeadStatus::Frozen;
        }
    }

    let mut active_jobs: Vec<&Job> = jobs.iter().filter(|j| j.status.is_active()).collect();
    active_jobs.sort_by_key(|j| j.scheduled_for);
    if let Some(job) = active_jobs.into_iter().next() {
        let state = if is_rescheduled(job) {
            MailState::Rescheduled
        } else {
            MailState::Scheduled
        };
        return mail_kind_status(&job.kind, state);
    }

    let mut displayable: Vec<&Job> = jobs
        .iter()
        .filter(|j| display_state_for(j.status).is_some())
        .collect();
    displayable.sort_by_key(|j| j.sent_at.or(j.failed_at).unwrap_or(j.updated_at));
    if let Some(job) = displayable.into_iter().next_back() {
        let state = display_state_for(job.status).expect("filtered for Some above");
        if job.status.is_successfully_sent() && sequence_is_complete(jobs, settings, &lead.skipped_followups) {
            return LeadStatus::SequenceComplete;
        }
        return mail_kind_status(&job.kind, state);
    }

    LeadStatus::Idle
}

/// Loads `lead_id`'s current lead and jobs, resolves the status, writes it,
/// and persists the lead. Callers call this at the tail of every mutating
/// operation (scheduler, queue watcher, conditional evaluator, dispatcher).
pub async fn sync_lead_status_after_job_change(
    store: &Arc<dyn PersistentStore>,
    lead_id: LeadId,
    clock_now: chrono::DateTime<chrono::Utc>,
) -> EngineResult<LeadStatus> {
    let mut lead = store
        .get_lead(lead_id)
        .await?
        .ok_or_else(|| crate::error::EngineError::LeadNotFound(lead_id.to_string()))?;
    let jobs = store.jobs_for_lead(lead_id).await?;
    let settings = store.get_settings().await?;

    let status = resolve_lead_status(&lead, &jobs, &settings, clock_now);
    lead.set_status(status.clone());
    store.save_lead(&lead).await?;
    Ok(status)
}
