//! Composite action executors: the rulebook's own mutations, so that
//! cancel/skip/pause/resume semantics live in exactly one place (spec §4.1).

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::domain::{Job, JobId, JobStatus, LeadId, MailCategory, PauseReason};
use crate::error::{EngineError, EngineResult};
use crate::store::PersistentStore;

use super::mail_type::{priority, validate_action, Action};

async fn load_job(store: &Arc<dyn PersistentStore>, job_id: JobId) -> EngineResult<Job> {
    store
        .get_job(job_id)
        .await?
        .ok_or_else(|| EngineError::JobNotFound(job_id.to_string()))
}

/// Cancels `job_id`. Only non-followup mail kinds may be cancelled.
pub async fn execute_cancel_job(
    store: &Arc<dyn PersistentStore>,
    job_id: JobId,
    reason: impl Into<String>,
) -> EngineResult<Job> {
    let mut job = load_job(store, job_id).await?;
    validate_action(Action::Cancel, job.kind.category(), job.status).map_err(|r| {
        EngineError::ActionNotAllowed {
            action: "cancel".to_string(),
            reason: r.to_string(),
        }
    })?;
    job.status = JobStatus::Cancelled;
    job.last_error = Some(reason.into());
    job.updated_at = chrono::Utc::now();
    store.save_job(&job).await?;
    Ok(job)
}

/// Skips `job_id`. Only followups may be skipped.
pub async fn execute_skip_job(
    store: &Arc<dyn PersistentStore>,
    job_id: JobId,
    reason: impl Into<String>,
) -> EngineResult<Job> {
    let mut job = load_job(store, job_id).await?;
    validate_action(Action::Skip, job.kind.category(), job.status).map_err(|r| {
        EngineError::ActionNotAllowed {
            action: "skip".to_string(),
            reason: r.to_string(),
        }
    })?;
    job.status = JobStatus::Skipped;
    job.last_error = Some(reason.into());
    job.updated_at = chrono::Utc::now();
    store.save_job(&job).await?;
    Ok(job)
}

/// Sets `lead.followups_paused = true`.
pub async fn execute_pause_followups(store: &Arc<dyn PersistentStore>, lead_id: LeadId) -> EngineResult<()> {
    let mut lead = store
        .get_lead(lead_id)
        .await?
        .ok_or_else(|| EngineError::LeadNotFound(lead_id.to_string()))?;
    lead.followups_paused = true;
    lead.updated_at = chrono::Utc::now();
    store.save_lead(&lead).await?;
    Ok(())
}

/// Clears `lead.followups_paused` and resumes every followup paused by
/// `ConditionalPriority` (the auto-resume half of spec §4.9's `delivered`
/// handler). Returns the jobs resumed.
pub async fn execute_resume_followups(store: &Arc<dyn PersistentStore>, lead_id: LeadId) -> EngineResult<Vec<Job>> {
    let mut lead = store
        .get_lead(lead_id)
        .await?
        .ok_or_else(|| EngineError::LeadNotFound(lead_id.to_string()))?;
    lead.followups_paused = false;
    lead.updated_at = chrono::Utc::now();
    store.save_lead(&lead).await?;

    let jobs = store.jobs_for_lead(lead_id).await?;
    let mut resumed = Vec::new();
    for mut job in jobs {
        if job.status != JobStatus::Paused {
            continue;
        }
        if job.metadata.paused_reason != Some(PauseReason::ConditionalPriority) {
            continue;
        }
        job.status = JobStatus::Pending;
        job.metadata.paused_reason = None;
        job.updated_at = chrono::Utc::now();
        store.save_job(&job).await?;
        resumed.push(job);
    }
    Ok(resumed)
}

/// Pauses every active job for `lead_id` whose mail category has a lower
/// priority than `scheduling_category`, recording why. Returns the paused
/// jobs, so the caller (Queue Watcher) can report what it touched.
pub async fn pause_lower_priority_jobs(
    store: &Arc<dyn PersistentStore>,
    lead_id: LeadId,
    scheduling_category: MailCategory,
    scheduling_display_name: &str,
) -> EngineResult<Vec<Job>> {
    let jobs = store.jobs_for_lead(lead_id).await?;
    let scheduling_priority = priority(scheduling_category);
    let mut paused = Vec::new();

    for mut job in jobs {
        if !job.status.is_active() {
            continue;
        }
        if priority(job.kind.category()) >= scheduling_priority {
            continue;
        }
        job.status = JobStatus::Paused;
        job.metadata.paused_reason = Some(PauseReason::HigherPriorityScheduled {
            by: scheduling_display_name.to_string(),
        });
        job.metadata.paused_by_job_type = Some(scheduling_display_name.to_string());
        job.updated_at = chrono::Utc::now();
        store.save_job(&job).await?;
        paused.push(job);
    }

    Ok(paused)
}

/// Resumes jobs paused because of `completed_display_name`'s scheduling, now
/// that it has reached a terminal/sent status. Only resumes jobs that were
/// paused by a matching `paused_by_job_type`, excluding any id in `blocked`
/// (still shadowed by a different still-active higher-priority job). A job
/// whose `scheduled_for` drifted into the past while paused is bumped 30
/// minutes out as a placeholder rather than re-run through the FCFS finder.
/// Returns the resumed jobs.
pub async fn resume_paused_jobs_after(
    store: &Arc<dyn PersistentStore>,
    lead_id: LeadId,
    completed_display_name: &str,
    now: DateTime<Utc>,
    blocked: &HashSet<JobId>,
) -> EngineResult<Vec<Job>> {
    let jobs = store.jobs_for_lead(lead_id).await?;
    let mut resumed = Vec::new();

    for mut job in jobs {
        if job.status != JobStatus::Paused {
            continue;
        }
        if job.metadata.paused_by_job_type.as_deref() != Some(completed_display_name) {
            continue;
        }
        if blocked.contains(&job.id) {
            continue;
        }
        if job.scheduled_for < now {
            job.scheduled_for = now + chrono::Duration::minutes(30);
        }
        job.status = JobStatus::Pending;
        job.metadata.paused_reason = None;
        job.metadata.paused_by_job_type = None;
        job.updated_at = now;
        store.save_job(&job).await?;
        resumed.push(job);
    }

    Ok(resumed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct FakeStore {
        jobs: Mutex<std::collections::HashMap<JobId, Job>>,
        leads: Mutex<std::collections::HashMap<LeadId, Lead>>,
    }

    #[async_trait]
    impl PersistentStore for FakeStore {
        async fn get_lead(&self, id: LeadId) -> EngineResult<Option<Lead>> {
            Ok(self.leads.lock().await.get(&id).cloned())
        }
        async fn save_lead(&self, lead: &Lead) -> EngineResult<()> {
            self.leads.lock().await.insert(lead.id, lead.clone());
            Ok(())
        }
        async fn get_job(&self, id: JobId) -> EngineResult<Option<Job>> {
            Ok(self.jobs.lock().await.get(&id).cloned())
        }
        async fn save_job(&self, job: &Job) -> EngineResult<()> {
            self.jobs.lock().await.insert(job.id, job.clone());
            Ok(())
        }
        async fn jobs_for_lead(&self, lead_id: LeadId) -> EngineResult<Vec<Job>> {
            Ok(self
                .jobs
                .lock()
                .await
                .values()
                .filter(|j| j.lead_id == lead_id)
                .cloned()
                .collect())
        }
        async fn count_in_progress_in_window(
            &self,
            _window_start: DateTime<Utc>,
            _window_end: DateTime<Utc>,
        ) -> EngineResult<i64> {
            Ok(0)
        }
        async fn claim_due_job(&self, _job_id: JobId) -> EngineResult<bool> {
            Ok(true)
        }
        async fn due_jobs(&self, _before: DateTime<Utc>, _limit: u32) -> EngineResult<Vec<Job>> {
            Ok(Vec::new())
        }
        async fn jobs_scheduled_on_paused_dates(
            &self,
            _paused_dates: &std::collections::BTreeSet<chrono::NaiveDate>,
        ) -> EngineResult<Vec<Job>> {
            Ok(Vec::new())
        }
        async fn get_settings(&self) -> EngineResult<Settings> {
            Ok(Settings::default())
        }
        async fn save_settings(&self, _settings: &Settings) -> EngineResult<()> {
            Ok(())
        }
        async fn get_conditional_rules(&self) -> EngineResult<Vec<ConditionalEmailRule>> {
            Ok(Vec::new())
        }
        async fn get_email_schedule(&self, _lead_id: LeadId) -> EngineResult<Option<EmailSchedule>> {
            Ok(None)
        }
        async fn save_email_schedule(&self, _schedule: &EmailSchedule) -> EngineResult<()> {
            Ok(())
        }
        async fn append_event_history(&self, _entry: &EventHistoryEntry) -> EngineResult<()> {
            Ok(())
        }
        async fn insert_event_store_record(&self, _record: &EventStoreRecord) -> EngineResult<bool> {
            Ok(true)
        }
        async fn insert_notification(&self, _notification: &Notification) -> EngineResult<()> {
            Ok(())
        }
    }

    fn store() -> Arc<dyn PersistentStore> {
        Arc::new(FakeStore::default())
    }

    #[tokio::test]
    async fn pause_then_resume_lower_priority_jobs() {
        let store = store();
        let lead_id = LeadId::new();
        let followup = Job::new(lead_id, MailKind::Followup("First Followup".to_string()), Utc::now());
        store.save_job(&followup).await.unwrap();

        let paused = pause_lower_priority_jobs(&store, lead_id, MailCategory::Manual, "Manual")
            .await
            .unwrap();
        assert_eq!(paused.len(), 1);
        assert_eq!(paused[0].status, JobStatus::Paused);

        let resumed = resume_paused_jobs_after(&store, lead_id, "Manual", Utc::now(), &HashSet::new())
            .await
            .unwrap();
        assert_eq!(resumed.len(), 1);
        assert_eq!(resumed[0].status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn resume_followups_clears_flag_and_resumes_conditional_paused_jobs() {
        let store = store();
        let lead_id = LeadId::new();
        let mut lead = Lead::new("a@example.com", "A", Some("UTC".to_string()));
        lead.id = lead_id;
        lead.followups_paused = true;
        store.save_lead(&lead).await.unwrap();

        let mut followup = Job::new(lead_id, MailKind::Followup("First Followup".to_string()), Utc::now());
        followup.status = JobStatus::Paused;
        followup.metadata.paused_reason = Some(PauseReason::ConditionalPriority);
        store.save_job(&followup).await.unwrap();

        let resumed = execute_resume_followups(&store, lead_id).await.unwrap();
        assert_eq!(resumed.len(), 1);
        assert_eq!(resumed[0].status, JobStatus::Pending);

        let lead = store.get_lead(lead_id).await.unwrap().unwrap();
        assert!(!lead.followups_paused);
    }

    #[tokio::test]
    async fn higher_or_equal_priority_jobs_are_not_paused() {
        let store = store();
        let lead_id = LeadId::new();
        let initial = Job::new(lead_id, MailKind::Initial, Utc::now());
        store.save_job(&initial).await.unwrap();

        let paused = pause_lower_priority_jobs(&store, lead_id, MailCategory::Followup, "Followup")
            .await
            .unwrap();
        assert!(paused.is_empty());
    }

    #[tokio::test]
    async fn cancel_rejected_for_followup() {
        let store = store();
        let lead_id = LeadId::new();
        let followup = Job::new(lead_id, MailKind::Followup("First Followup".to_string()), Utc::now());
        store.save_job(&followup).await.unwrap();

        let result = execute_cancel_job(&store, followup.id, "test").await;
        assert!(matches!(result, Err(EngineError::ActionNotAllowed { .. })));
    }
}
