//! Per-category event handlers. Each handler mutates only the triggering
//! job and the lead's engagement counters/terminal state directly — the
//! lead's canonical `status` is always synced afterward through
//! `status_resolver`, never written inline.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::conditional_evaluator::ConditionalEvaluator;
use crate::domain::{
    EngagementEvent, Job, JobStatus, Lead, LeadId, MailCategory, Notification, NotificationReason,
    NormalizedEvent, NormalizedEventType, TerminalState,
};
use crate::error::EngineResult;
use crate::kv::{EngineKeys, KvStore};
use crate::queue::{DurableQueue, QueueName};
use crate::queue_watcher::QueueWatcher;
use crate::rulebook;
use crate::scheduler::Scheduler;
use crate::store::PersistentStore;

fn queue_name_for(kind: &crate::domain::MailKind) -> QueueName {
    match kind {
        crate::domain::MailKind::Followup(_) => QueueName::Followup,
        _ => QueueName::EmailSend,
    }
}

fn apply_event_to_job(job: &mut Job, event: &NormalizedEvent, now: DateTime<Utc>) {
    job.status = event.event_type.as_job_status();
    job.updated_at = now;
    if job.status.is_successfully_sent() {
        job.sent_at.get_or_insert(now);
    }
    if job.status.is_failure() {
        job.failed_at = Some(now);
        job.last_error = event.event_data.reason.clone();
    }
}

/// Success path (spec §4.9): the job advances, engagement counters bump,
/// paused siblings may resume, conditional rules may fire, and the next
/// step in the sequence is (re)considered.
///
/// `delivered` additionally auto-resumes a lead's followups once the
/// conditional/manual job that paused them has itself been delivered, and is
/// idempotency-guarded against repeat deliveries within
/// `recent_followup_window_secs` of the last one processed for this lead.
#[allow(clippy::too_many_arguments)]
pub async fn handle_success(
    store: &Arc<dyn PersistentStore>,
    scheduler: &Arc<Scheduler>,
    queue_watcher: &Arc<QueueWatcher>,
    conditional_evaluator: &Arc<ConditionalEvaluator>,
    kv: &Arc<dyn KvStore>,
    keys: &EngineKeys,
    clock: &Arc<dyn Clock>,
    recent_followup_window_secs: u64,
    mut job: Job,
    lead: &mut Lead,
    event: &NormalizedEvent,
) -> EngineResult<()> {
    let now = clock.now();
    apply_event_to_job(&mut job, event, now);

    match event.event_type {
        NormalizedEventType::Opened | NormalizedEventType::UniqueOpened => lead.emails_opened += 1,
        NormalizedEventType::Clicked => lead.emails_clicked += 1,
        NormalizedEventType::Sent => lead.emails_sent += 1,
        _ => {}
    }
    lead.updated_at = now;
    store.save_lead(lead).await?;
    store.save_job(&job).await?;

    if job.status.is_terminal() || job.status.is_successfully_sent() {
        queue_watcher.resume_paused_jobs(lead.id, &job.kind.display_name()).await?;
    }

    let is_delivered = event.event_type == NormalizedEventType::Delivered;

    if is_delivered && lead.followups_paused && matches!(job.kind.category(), MailCategory::Conditional | MailCategory::Manual) {
        rulebook::execute_resume_followups(store, lead.id).await?;
        lead.followups_paused = false;
    }

    if let Some(engagement_event) = event.event_type.as_engagement_event() {
        if matches!(engagement_event, EngagementEvent::Opened | EngagementEvent::Clicked | EngagementEvent::Delivered) {
            conditional_evaluator
                .evaluate_triggers(lead.id, engagement_event, &job.kind.display_name(), job.id)
                .await?;
        }
    }

    if is_delivered {
        let key = keys.recent_followup(&lead.id.to_string());
        if kv.get(&key).await?.is_some() {
            debug!(lead_id = %lead.id, "scheduleNextEmail suppressed: a followup was already created within the idempotency window");
            return Ok(());
        }
        kv.set_ex(&key, "1", recent_followup_window_secs).await?;
    }

    scheduler.schedule_next_email(lead.id).await?;
    Ok(())
}

/// Auto-reschedule path (spec §4.9): soft bounce / deferred. Reschedules
/// with backoff unless the mail type's retry budget is exhausted, in which
/// case the lead is dead-lettered.
pub async fn handle_auto_reschedule(
    store: &Arc<dyn PersistentStore>,
    scheduler: &Arc<Scheduler>,
    queue: &Arc<dyn DurableQueue>,
    clock: &Arc<dyn Clock>,
    mut job: Job,
    lead: &mut Lead,
    event: &NormalizedEvent,
) -> EngineResult<()> {
    let now = clock.now();
    apply_event_to_job(&mut job, event, now);
    lead.emails_bounced += 1;
    lead.updated_at = now;

    let settings = store.get_settings().await?;
    if rulebook::should_mark_as_dead(&job, event.event_type, &settings) {
        store.save_job(&job).await?;
        mark_lead_dead(store, queue, lead, &job, "retry budget exhausted").await?;
        return Ok(());
    }

    lead.total_retries += 1;
    store.save_lead(lead).await?;
    store.save_job(&job).await?;

    match scheduler.reschedule_email_job(job.id).await {
        Ok(_) => {}
        Err(e) if matches!(e, crate::error::EngineError::NoSlotAvailable) => {
            warn!(lead_id = %lead.id, job_id = %job.id, "no slot available for reschedule");
            let notification = Notification::new(
                lead.id,
                Some(job.id),
                NotificationReason::ReschedulingFailedNoSlot,
                format!("{} could not be rescheduled: no slot available", job.kind.display_name()),
            );
            store.insert_notification(&notification).await?;
        }
        Err(e) => return Err(e),
    }

    Ok(())
}

/// Failure path (spec §4.9): hard bounce / blocked / invalid / error.
/// Dead-letters the lead once the mail type's retries are exhausted;
/// otherwise records the failure and leaves the lead's other jobs intact.
pub async fn handle_failed(
    store: &Arc<dyn PersistentStore>,
    queue: &Arc<dyn DurableQueue>,
    clock: &Arc<dyn Clock>,
    mut job: Job,
    lead: &mut Lead,
    event: &NormalizedEvent,
) -> EngineResult<()> {
    let now = clock.now();
    apply_event_to_job(&mut job, event, now);
    lead.emails_bounced += 1;
    lead.updated_at = now;

    let settings = store.get_settings().await?;
    store.save_job(&job).await?;

    if rulebook::should_mark_as_dead(&job, event.event_type, &settings) {
        mark_lead_dead(store, queue, lead, &job, "hard failure").await?;
        return Ok(());
    }

    let other_active: Vec<Job> = store
        .jobs_for_lead(lead.id)
        .await?
        .into_iter()
        .filter(|j| j.id != job.id && j.status.is_active())
        .collect();
    for mut sibling in other_active {
        sibling.status = JobStatus::Paused;
        sibling.updated_at = now;
        sibling.last_error = Some(format!("Paused due to {} on {}", event.event_type, job.kind.display_name()));
        store.save_job(&sibling).await?;
        if let Some(queue_job_id) = &sibling.metadata.queue_job_id {
            queue.remove(queue_name_for(&sibling.kind), queue_job_id).await?;
        }
    }

    lead.is_in_failure = true;
    store.save_lead(lead).await?;

    let notification = Notification::new(
        lead.id,
        Some(job.id),
        NotificationReason::JobFailedNeedsManualRetry,
        format!("{} failed: {}", job.kind.display_name(), job.last_error.clone().unwrap_or_default()),
    );
    store.insert_notification(&notification).await?;

    Ok(())
}

/// Compliance path (spec §4.9): unsubscribed / complaint. Terminates the
/// lead permanently — this state has no `resurrect` path.
pub async fn handle_spam(
    store: &Arc<dyn PersistentStore>,
    queue: &Arc<dyn DurableQueue>,
    clock: &Arc<dyn Clock>,
    mut job: Job,
    lead: &mut Lead,
    event: &NormalizedEvent,
) -> EngineResult<()> {
    let now = clock.now();
    apply_event_to_job(&mut job, event, now);
    store.save_job(&job).await?;

    let (state, reason_kind) = match event.event_type {
        NormalizedEventType::Unsubscribed => (TerminalState::Unsubscribed, NotificationReason::LeadUnsubscribed),
        NormalizedEventType::Complaint => (TerminalState::Complaint, NotificationReason::LeadComplaint),
        _ => unreachable!("handle_spam called with a non-spam event"),
    };

    lead.mark_terminal(state, event.event_type.to_string());
    cancel_active_jobs(store, queue, lead.id, now).await?;
    store.save_lead(lead).await?;

    let notification = Notification::new(
        lead.id,
        Some(job.id),
        reason_kind,
        format!("lead marked {state} via {}", job.kind.display_name()),
    );
    store.insert_notification(&notification).await?;

    info!(lead_id = %lead.id, state = %state, "lead terminated");
    Ok(())
}

async fn mark_lead_dead(
    store: &Arc<dyn PersistentStore>,
    queue: &Arc<dyn DurableQueue>,
    lead: &mut Lead,
    job: &Job,
    reason: &str,
) -> EngineResult<()> {
    let now = lead.updated_at;
    lead.mark_terminal(TerminalState::Dead, reason);
    store.save_lead(lead).await?;
    cancel_active_jobs(store, queue, lead.id, now).await?;

    let notification = Notification::new(
        lead.id,
        Some(job.id),
        NotificationReason::LeadDead,
        format!("lead marked dead after {}: {reason}", job.kind.display_name()),
    );
    store.insert_notification(&notification).await
}

async fn cancel_active_jobs(
    store: &Arc<dyn PersistentStore>,
    queue: &Arc<dyn DurableQueue>,
    lead_id: LeadId,
    now: DateTime<Utc>,
) -> EngineResult<()> {
    let jobs = store.jobs_for_lead(lead_id).await?;
    for mut sibling in jobs.into_iter().filter(|j| j.status.is_active()) {
        sibling.status = JobStatus::Cancelled;
        sibling.updated_at = now;
        store.save_job(&sibling).await?;
        if let Some(queue_job_id) = &sibling.metadata.queue_job_id {
            queue.remove(queue_name_for(&sibling.kind), queue_job_id).await?;
        }
    }
    Ok(())
}
