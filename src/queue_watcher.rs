//! Queue Watcher (spec §4.6): the priority-arbitration layer between mail
//! kinds for a single lead. Pauses — never cancels — lower-priority active
//! jobs when a higher-priority one is about to be scheduled, and governs
//! when a paused job is allowed back.

use std::collections::HashSet;
use std::sync::Arc;

use crate::clock::Clock;
use crate::domain::{Job, JobId, JobStatus, LeadId, MailCategory, MailKind};
use crate::error::{EngineError, EngineResult};
use crate::queue::{DurableQueue, QueueName};
use crate::rulebook;
use crate::store::PersistentStore;

fn queue_name_for(kind: &MailKind) -> QueueName {
    match kind {
        MailKind::Followup(_) => QueueName::Followup,
        _ => QueueName::EmailSend,
    }
}

/// Arbitrates priority between a lead's concurrently-pending mail kinds.
pub struct QueueWatcher {
    store: Arc<dyn PersistentStore>,
    queue: Arc<dyn DurableQueue>,
    clock: Arc<dyn Clock>,
}

impl QueueWatcher {
    pub fn new(store: Arc<dyn PersistentStore>, queue: Arc<dyn DurableQueue>, clock: Arc<dyn Clock>) -> Self {
        Self { store, queue, clock }
    }

    /// Pauses every active job of strictly lower priority than
    /// `scheduling_category`, removing their durable-queue entries. Returns
    /// the jobs paused.
    pub async fn request_schedule_permission(
        &self,
        lead_id: LeadId,
        scheduling_category: MailCategory,
        scheduling_display_name: &str,
    ) -> EngineResult<Vec<Job>> {
        let paused = rulebook::pause_lower_priority_jobs(&self.store, lead_id, scheduling_category, scheduling_display_name).await?;

        for job in &paused {
            if let Some(queue_job_id) = &job.metadata.queue_job_id {
                self.queue.remove(queue_name_for(&job.kind), queue_job_id).await?;
            }
        }

        Ok(paused)
    }

    /// Resumes jobs paused because of `completed_display_name`'s scheduling,
    /// but only those no longer blocked by a still-active higher-priority
    /// job. The matching, scheduled-for bump, and status flip are the
    /// rulebook's (spec §4.1); this only computes which jobs are still
    /// blocked.
    pub async fn resume_paused_jobs(&self, lead_id: LeadId, completed_display_name: &str) -> EngineResult<Vec<Job>> {
        let jobs = self.store.jobs_for_lead(lead_id).await?;
        let active_max_priority = jobs
            .iter()
            .filter(|j| j.status.is_active())
            .map(|j| rulebook::priority(j.kind.category()))
            .max();

        let blocked: HashSet<JobId> = match active_max_priority {
            Some(blocking_priority) => jobs
                .iter()
                .filter(|j| j.status == JobStatus::Paused && blocking_priority > rulebook::priority(j.kind.category()))
                .map(|j| j.id)
                .collect(),
            None => HashSet::new(),
        };

        rulebook::resume_paused_jobs_after(&self.store, lead_id, completed_display_name, self.clock.now(), &blocked).await
    }

    /// User-initiated resume. Fails with `ResumeBlocked` if any active job
    /// outranks this one; otherwise resumes without incrementing
    /// `retry_count` — the defining difference from a retry.
    pub async fn manual_resume_job(&self, job_id: JobId) -> EngineResult<Job> {
        let mut job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| EngineError::JobNotFound(job_id.to_string()))?;

        if job.status != JobStatus::Paused {
            return Err(EngineError::ActionNotAllowed {
                action: "resume".to_string(),
                reason: "only a paused job can be resumed".to_string(),
            });
        }

        let siblings = self.store.jobs_for_lead(job.lead_id).await?;
        if let Some(blocker) = siblings
            .iter()
            .find(|j| j.status.is_active() && rulebook::priority(j.kind.category()) > rulebook::priority(job.kind.category()))
        {
            return Err(EngineError::ResumeBlocked {
                job_id: blocker.id.to_string(),
                mail_type: blocker.kind.display_name(),
            });
        }

        job.status = JobStatus::Pending;
        job.metadata.paused_reason = None;
        job.metadata.paused_by_job_type = None;
        job.updated_at = self.clock.now();
        self.store.save_job(&job).await?;
        Ok(job)
    }
}
