//! The Scheduler (spec §4.5, §4.10): decides *when* the next email for a
//! lead goes out, and owns every operation that creates or reshapes a job's
//! `scheduled_for`.

pub mod condition;
pub mod fcfs;

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{info, warn};

use crate::business_hours;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::domain::{
    CheckStep, ConditionSpec, Job, JobId, JobMetadata, JobStatus, Lead, LeadId, MailCategory,
    MailKind, Settings,
};
use crate::error::{EngineError, EngineResult};
use crate::journey_guard::JourneyGuard;
use crate::kv::EngineKeys;
use crate::lock::DistributedLock;
use crate::queue::{DurableQueue, QueueEntry, QueueName};
use crate::queue_watcher::QueueWatcher;
use crate::rate_limit::RateLimiter;
use crate::rulebook;
use crate::status_resolver;
use crate::store::PersistentStore;

use condition::{evaluate_condition, ConditionOutcome};

fn queue_name_for(kind: &MailKind) -> QueueName {
    match kind {
        MailKind::Followup(_) => QueueName::Followup,
        _ => QueueName::EmailSend,
    }
}

/// Owns the FCFS slot search and every job-scheduling write path.
pub struct Scheduler {
    store: Arc<dyn PersistentStore>,
    rate_limiter: Arc<RateLimiter>,
    journey_guard: Arc<JourneyGuard>,
    lead_lock: DistributedLock,
    queue: Arc<dyn DurableQueue>,
    queue_watcher: Arc<QueueWatcher>,
    clock: Arc<dyn Clock>,
    keys: EngineKeys,
    config: Arc<EngineConfig>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn PersistentStore>,
        rate_limiter: Arc<RateLimiter>,
        journey_guard: Arc<JourneyGuard>,
        lead_lock: DistributedLock,
        queue: Arc<dyn DurableQueue>,
        queue_watcher: Arc<QueueWatcher>,
        clock: Arc<dyn Clock>,
        keys: EngineKeys,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            store,
            rate_limiter,
            journey_guard,
            lead_lock,
            queue,
            queue_watcher,
            clock,
            keys,
            config,
        }
    }

    /// Entry point: acquires the per-lead lock and walks the sequence. A
    /// lock already held by another scheduling attempt is a guard failure,
    /// not an error — the caller silently returns (spec §5).
    pub async fn schedule_next_email(&self, lead_id: LeadId) -> EngineResult<Option<Job>> {
        let lock_key = self.keys.lead_lock(&lead_id.to_string());
        let guard = match self.lead_lock.acquire(&lock_key, self.config.scheduler.lock_ttl_secs).await {
            Ok(guard) => guard,
            Err(EngineError::LockHeld(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let result = self.schedule_next_email_locked(lead_id).await;
        self.lead_lock.release(guard).await?;
        result
    }

    async fn schedule_next_email_locked(&self, lead_id: LeadId) -> EngineResult<Option<Job>> {
        let mut lead = self
            .store
            .get_lead(lead_id)
            .await?
            .ok_or_else(|| EngineError::LeadNotFound(lead_id.to_string()))?;

        if lead.timezone.is_empty() {
            lead.timezone = "UTC".to_string();
            self.store.save_lead(&lead).await?;
        }

        if lead.is_terminal() {
            return Ok(None);
        }
        if lead.is_in_failure {
            return Ok(None);
        }

        let jobs = self.store.jobs_for_lead(lead_id).await?;

        if jobs.iter().any(|j| j.kind.category() == MailCategory::Manual && j.status.is_active()) {
            return Ok(None);
        }

        // Virtual step 0: Initial has priority over every followup and is
        // created unconditionally the first time this lead is scheduled.
        let has_initial = jobs.iter().any(|j| matches!(j.kind, MailKind::Initial));
        if !has_initial {
            let settings = self.store.get_settings().await?;
            let now = self.clock.now();
            let job = self
                .schedule_email_job(lead_id, MailKind::Initial, now, &settings, false, rulebook::priority(MailCategory::Initial), None, Some(ConditionSpec::always()))
                .await?;
            return Ok(Some(job));
        }

        if lead.followups_paused {
            return Ok(None);
        }

        if jobs.iter().any(|j| j.kind.category() == MailCategory::Followup && j.status.is_active()) {
            return Ok(None);
        }

        let settings = self.store.get_settings().await?;
        let sequence: Vec<_> = settings.active_sequence(&lead.skipped_followups).cloned().collect();

        let mut step_to_schedule = None;
        let mut previous_status: Option<JobStatus> = None;

        for (idx, step) in sequence.iter().enumerate() {
            let already_exists = jobs.iter().any(|j| matches!(&j.kind, MailKind::Followup(name) if name == &step.name));
            if already_exists {
                let status = jobs
                    .iter()
                    .find(|j| matches!(&j.kind, MailKind::Followup(name) if name == &step.name))
                    .map(|j| j.status);
                previous_status = status;
                continue;
            }

            let checked_status = match &step.condition.check_step {
                None => None,
                Some(CheckStep::Previous) => previous_status,
                Some(CheckStep::Named(name)) => jobs
                    .iter()
                    .find(|j| matches!(&j.kind, MailKind::Followup(n) if n == name))
                    .map(|j| j.status),
            };

            match evaluate_condition(&step.condition, checked_status) {
                ConditionOutcome::Met => {
                    step_to_schedule = Some((idx, step.clone()));
                    break;
                }
                ConditionOutcome::Waiting => break,
                ConditionOutcome::Failed => {
                    let mut skipped = Job::new(lead_id, MailKind::Followup(step.name.clone()), self.clock.now());
                    skipped.status = JobStatus::Skipped;
                    skipped.template_id = Some(step.template_id.clone());
                    skipped.condition = Some(step.condition.clone());
                    self.store.save_job(&skipped).await?;
                    previous_status = Some(JobStatus::Skipped);
                    continue;
                }
            }
        }

        let Some((_idx, step)) = step_to_schedule else {
            status_resolver::sync_lead_status_after_job_change(&self.store, lead_id, self.clock.now()).await?;
            return Ok(None);
        };

        let base_time = jobs
            .iter()
            .filter(|j| j.status.is_successfully_sent())
            .filter_map(|j| j.sent_at)
            .max()
            .unwrap_or_else(|| self.clock.now());

        let mut min_time = base_time + ChronoDuration::days(step.delay_days);
        let now = self.clock.now();
        if min_time < now {
            min_time = now;
        }

        let tz = business_hours::resolve_timezone(&lead.timezone);
        min_time = business_hours::set_local_hour(min_time, tz, settings.business_hours.start_hour);

        let job = self
            .schedule_email_job(
                lead_id,
                MailKind::Followup(step.name.clone()),
                min_time,
                &settings,
                false,
                rulebook::priority(MailCategory::Followup),
                Some(step.template_id.clone()),
                Some(step.condition.clone()),
            )
            .await?;

        Ok(Some(job))
    }

    /// Creates and durably enqueues a job for `kind` at the earliest FCFS
    /// slot at or after `min_time`. Always arbitrates priority through the
    /// Queue Watcher first and asserts the Unique-Journey Guard before
    /// committing (spec §4.5.4).
    #[allow(clippy::too_many_arguments)]
    pub async fn schedule_email_job(
        &self,
        lead_id: LeadId,
        kind: MailKind,
        min_time: DateTime<Utc>,
        settings: &Settings,
        skip_duplicate_check: bool,
        priority: i32,
        template_id: Option<String>,
        condition: Option<ConditionSpec>,
    ) -> EngineResult<Job> {
        let lead = self
            .store
            .get_lead(lead_id)
            .await?
            .ok_or_else(|| EngineError::LeadNotFound(lead_id.to_string()))?;

        let guard = self
            .journey_guard
            .acquire(lead_id, &kind, self.config.scheduler.lock_ttl_secs)
            .await?;

        let result = self
            .schedule_email_job_guarded(&lead, kind, min_time, settings, skip_duplicate_check, priority, template_id, condition)
            .await;

        self.journey_guard.release(guard).await?;
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn schedule_email_job_guarded(
        &self,
        lead: &Lead,
        kind: MailKind,
        min_time: DateTime<Utc>,
        settings: &Settings,
        skip_duplicate_check: bool,
        priority: i32,
        template_id: Option<String>,
        condition: Option<ConditionSpec>,
    ) -> EngineResult<Job> {
        self.queue_watcher
            .request_schedule_permission(lead.id, kind.category(), &kind.display_name())
            .await?;

        self.journey_guard.check_no_duplicate(lead.id, &kind, skip_duplicate_check).await?;

        let tz = business_hours::resolve_timezone(&lead.timezone);
        let now = self.clock.now();
        let slot = fcfs::find_slot(
            &self.rate_limiter,
            min_time,
            now,
            tz,
            &settings.business_hours,
            &settings.rate_limit,
            &settings.paused_dates,
            self.config.business_hours.fcfs_max_attempts,
        )
        .await?;

        self.rate_limiter.reserve_slot(slot, &settings.rate_limit).await?;

        // The duplicate check above and this reservation are not atomic with
        // respect to a concurrent scheduling attempt for a *different* mail
        // kind on the same lead (those hold a different journey-guard lock
        // fragment). Re-check now that the slot is ours; if we lost the
        // race, release the slot we just reserved instead of leaving it
        // transiently over-counted.
        if let Err(e) = self.journey_guard.check_no_duplicate(lead.id, &kind, skip_duplicate_check).await {
            self.rate_limiter.release_slot(slot, &settings.rate_limit).await?;
            return Err(e);
        }

        let mut job = Job::new(lead.id, kind.clone(), slot);
        job.template_id = template_id;
        job.condition = condition;
        job.metadata.timezone = Some(lead.timezone.clone());
        self.store.save_job(&job).await?;

        self.reconcile_schedule_projection(lead.id, &job).await?;

        let entry = QueueEntry {
            job_id: job.id.to_string(),
            priority,
            enqueued_at_ms: now.timestamp_millis(),
        };
        job.metadata.queue_job_id = Some(job.id.to_string());
        self.store.save_job(&job).await?;
        self.queue.add(queue_name_for(&job.kind), entry).await?;

        status_resolver::sync_lead_status_after_job_change(&self.store, lead.id, now).await?;

        info!(lead_id = %lead.id, job_id = %job.id, mail_type = %job.kind, scheduled_for = %slot, "scheduled email job");
        Ok(job)
    }

    async fn reconcile_schedule_projection(&self, lead_id: LeadId, job: &Job) -> EngineResult<()> {
        let mut schedule = self
            .store
            .get_email_schedule(lead_id)
            .await?
            .unwrap_or_else(|| crate::domain::EmailSchedule::empty(lead_id));

        match &job.kind {
            MailKind::Initial => {
                schedule.initial_scheduled_for = Some(job.scheduled_for);
                schedule.initial_status = Some(job.status);
                schedule.reconcile_next();
            }
            MailKind::Followup(_) => {
                schedule.upsert_followup(crate::domain::FollowupEntry {
                    name: job.kind.display_name(),
                    scheduled_for: Some(job.scheduled_for),
                    status: job.status,
                    order: 0,
                    is_conditional: false,
                    job_id: Some(job.id),
                });
            }
            MailKind::Conditional { .. } => {
                schedule.upsert_followup(crate::domain::FollowupEntry {
                    name: job.kind.display_name(),
                    scheduled_for: Some(job.scheduled_for),
                    status: job.status,
                    order: u32::MAX,
                    is_conditional: true,
                    job_id: Some(job.id),
                });
            }
            MailKind::Manual => {}
        }

        self.store.save_email_schedule(&schedule).await
    }

    /// Reschedules a failed job per its backoff delay (spec §4.5.5): the old
    /// job is marked `Rescheduled` and links to its successor; the new job
    /// skips the duplicate check since the old job is no longer active.
    pub async fn reschedule_email_job(&self, job_id: JobId) -> EngineResult<Job> {
        let mut old_job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| EngineError::JobNotFound(job_id.to_string()))?;

        let settings = self.store.get_settings().await?;
        let delay = rulebook::calculate_retry_delay(old_job.retry_count, &self.config.retry);
        let min_time = self.clock.now() + delay;

        let priority = rulebook::priority(old_job.kind.category());
        let new_job = self
            .schedule_email_job(
                old_job.lead_id,
                old_job.kind.clone(),
                min_time,
                &settings,
                true,
                priority,
                old_job.template_id.clone(),
                old_job.condition.clone(),
            )
            .await?;

        old_job.status = JobStatus::Rescheduled;
        old_job.metadata.rescheduled_to = Some(new_job.id);
        old_job.updated_at = self.clock.now();
        self.store.save_job(&old_job).await?;

        let mut successor = new_job;
        successor.retry_count = old_job.retry_count + 1;
        successor.metadata.original_job_id = Some(old_job.id);
        self.store.save_job(&successor).await?;

        Ok(successor)
    }

    /// Moves a job scheduled on a date that became paused to the next
    /// working day (spec §4.5.6). Cancels the old job first so the
    /// duplicate guard does not block its own replacement; restores the old
    /// job's status if the replacement scheduling fails.
    pub async fn move_job_to_next_working_day(&self, job_id: JobId) -> EngineResult<Job> {
        let mut old_job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| EngineError::JobNotFound(job_id.to_string()))?;
        let original_status = old_job.status;

        let lead = self
            .store
            .get_lead(old_job.lead_id)
            .await?
            .ok_or_else(|| EngineError::LeadNotFound(old_job.lead_id.to_string()))?;
        let settings = self.store.get_settings().await?;
        let tz = business_hours::resolve_timezone(&lead.timezone);

        old_job.status = JobStatus::Cancelled;
        old_job.updated_at = self.clock.now();
        self.store.save_job(&old_job).await?;
        if let Some(queue_job_id) = &old_job.metadata.queue_job_id {
            self.queue.remove(queue_name_for(&old_job.kind), queue_job_id).await?;
        }

        let next_day = business_hours::next_working_day(old_job.scheduled_for, tz, &settings.business_hours, &settings.paused_dates);

        let next_day = match next_day {
            Ok(t) => t,
            Err(e) => {
                old_job.status = original_status;
                self.store.save_job(&old_job).await?;
                return Err(e);
            }
        };

        let priority = rulebook::priority(old_job.kind.category());
        let scheduled = self
            .schedule_email_job(
                old_job.lead_id,
                old_job.kind.clone(),
                next_day,
                &settings,
                true,
                priority,
                old_job.template_id.clone(),
                old_job.condition.clone(),
            )
            .await;

        match scheduled {
            Ok(job) => Ok(job),
            Err(e) => {
                old_job.status = original_status;
                self.store.save_job(&old_job).await?;
                Err(e)
            }
        }
    }

    /// Schedules a one-off manual email (spec §4.10), optionally bypassing
    /// the FCFS search's business-hours constraint for an explicit
    /// admin-requested send time.
    pub async fn schedule_manual_slot(
        &self,
        lead_id: LeadId,
        template_id: String,
        requested_time: DateTime<Utc>,
        bypass_business_hours: bool,
    ) -> EngineResult<Job> {
        let lead = self
            .store
            .get_lead(lead_id)
            .await?
            .ok_or_else(|| EngineError::LeadNotFound(lead_id.to_string()))?;

        if lead.is_terminal() {
            return Err(EngineError::LeadTerminal(lead_id.to_string(), "lead has a terminal state"));
        }

        let settings = self.store.get_settings().await?;
        let priority = rulebook::priority(MailCategory::Manual);

        if bypass_business_hours {
            self.queue_watcher
                .request_schedule_permission(lead_id, MailCategory::Manual, "Manual")
                .await?;
            self.journey_guard.check_no_duplicate(lead_id, &MailKind::Manual, true).await?;

            self.rate_limiter.reserve_slot(requested_time, &settings.rate_limit).await?;

            let mut job = Job::new(lead_id, MailKind::Manual, requested_time);
            job.template_id = Some(template_id);
            job.metadata.manual_override_hours = true;
            job.metadata.timezone = Some(lead.timezone.clone());
            self.store.save_job(&job).await?;

            let entry = QueueEntry {
                job_id: job.id.to_string(),
                priority,
                enqueued_at_ms: self.clock.now().timestamp_millis(),
            };
            job.metadata.queue_job_id = Some(job.id.to_string());
            self.store.save_job(&job).await?;
            self.queue.add(QueueName::EmailSend, entry).await?;

            status_resolver::sync_lead_status_after_job_change(&self.store, lead_id, self.clock.now()).await?;
            return Ok(job);
        }

        self.schedule_email_job(lead_id, MailKind::Manual, requested_time, &settings, true, priority, Some(template_id), None)
            .await
    }

    /// Freezes a lead until `until`; does not touch any job.
    pub async fn freeze_lead(&self, lead_id: LeadId, until: DateTime<Utc>) -> EngineResult<()> {
        let mut lead = self
            .store
            .get_lead(lead_id)
            .await?
            .ok_or_else(|| EngineError::LeadNotFound(lead_id.to_string()))?;
        lead.frozen_until = Some(until);
        lead.updated_at = self.clock.now();
        self.store.save_lead(&lead).await?;
        status_resolver::sync_lead_status_after_job_change(&self.store, lead_id, self.clock.now()).await?;
        Ok(())
    }

    /// Clears a lead's freeze, resuming scheduling if no active job exists.
    pub async fn unfreeze_lead(&self, lead_id: LeadId) -> EngineResult<()> {
        let mut lead = self
            .store
            .get_lead(lead_id)
            .await?
            .ok_or_else(|| EngineError::LeadNotFound(lead_id.to_string()))?;
        lead.frozen_until = None;
        lead.updated_at = self.clock.now();
        self.store.save_lead(&lead).await?;

        let jobs = self.store.jobs_for_lead(lead_id).await?;
        if !jobs.iter().any(|j| j.status.is_active()) {
            self.schedule_next_email(lead_id).await?;
        } else {
            status_resolver::sync_lead_status_after_job_change(&self.store, lead_id, self.clock.now()).await?;
        }
        Ok(())
    }

    /// Marks a lead converted, cancelling every active job.
    pub async fn convert_lead(&self, lead_id: LeadId) -> EngineResult<()> {
        let mut lead = self
            .store
            .get_lead(lead_id)
            .await?
            .ok_or_else(|| EngineError::LeadNotFound(lead_id.to_string()))?;
        lead.converted = true;
        lead.updated_at = self.clock.now();
        self.store.save_lead(&lead).await?;

        let jobs = self.store.jobs_for_lead(lead_id).await?;
        for mut job in jobs.into_iter().filter(|j| j.status.is_active()) {
            job.status = JobStatus::Cancelled;
            job.last_error = Some("lead converted".to_string());
            job.updated_at = self.clock.now();
            self.store.save_job(&job).await?;
            if let Some(queue_job_id) = &job.metadata.queue_job_id {
                self.queue.remove(queue_name_for(&job.kind), queue_job_id).await?;
            }
        }

        status_resolver::sync_lead_status_after_job_change(&self.store, lead_id, self.clock.now()).await?;
        Ok(())
    }

    /// Reverses a `dead` terminal state, the only path back to scheduling.
    pub async fn resurrect_lead(&self, lead_id: LeadId) -> EngineResult<()> {
        let mut lead = self
            .store
            .get_lead(lead_id)
            .await?
            .ok_or_else(|| EngineError::LeadNotFound(lead_id.to_string()))?;

        if lead.terminal_state != Some(crate::domain::TerminalState::Dead) {
            return Err(EngineError::Invariant("resurrect is only valid from the dead terminal state".to_string()));
        }

        lead.resurrect();
        self.store.save_lead(&lead).await?;
        warn!(lead_id = %lead_id, "lead resurrected from dead state");

        self.schedule_next_email(lead_id).await?;
        Ok(())
    }

    /// Explicit user/admin cancel (spec §4.1's `cancel` action). Rejects
    /// followups, which may only be `skip`ped; for cancelling every active
    /// job on a lead regardless of category, see `convert_lead`/`handle_spam`.
    pub async fn cancel_job(&self, job_id: JobId, reason: impl Into<String>) -> EngineResult<Job> {
        let job = rulebook::execute_cancel_job(&self.store, job_id, reason).await?;
        if let Some(queue_job_id) = &job.metadata.queue_job_id {
            self.queue.remove(queue_name_for(&job.kind), queue_job_id).await?;
        }
        status_resolver::sync_lead_status_after_job_change(&self.store, job.lead_id, self.clock.now()).await?;
        Ok(job)
    }

    /// Explicit user/admin skip (spec §4.1's `skip` action). Rejects
    /// non-followup kinds, which may only be `cancel`led.
    pub async fn skip_job(&self, job_id: JobId, reason: impl Into<String>) -> EngineResult<Job> {
        let job = rulebook::execute_skip_job(&self.store, job_id, reason).await?;
        if let Some(queue_job_id) = &job.metadata.queue_job_id {
            self.queue.remove(queue_name_for(&job.kind), queue_job_id).await?;
        }
        status_resolver::sync_lead_status_after_job_change(&self.store, job.lead_id, self.clock.now()).await?;
        Ok(job)
    }
}
