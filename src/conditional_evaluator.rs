//! Conditional Evaluator (spec §4.7): fires `ConditionalEmailRule`s off a
//! matched engagement event on a specific step, scheduling a side-sequence
//! email independent of the lead's main followup walk.

use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use tracing::info;

use crate::business_hours;
use crate::clock::Clock;
use crate::domain::{
    ConditionalEmailRule, EmailSchedule, EngagementEvent, FollowupEntry, Job, JobId, JobStatus,
    LeadId, MailKind, PauseReason,
};
use crate::error::EngineResult;
use crate::error::EngineError;
use crate::queue::{DurableQueue, QueueEntry, QueueName};
use crate::rate_limit::RateLimiter;
use crate::rulebook;
use crate::scheduler::fcfs::find_slot;
use crate::store::PersistentStore;

/// Evaluates and fires conditional-email rules.
pub struct ConditionalEvaluator {
    store: Arc<dyn PersistentStore>,
    queue: Arc<dyn DurableQueue>,
    rate_limiter: Arc<RateLimiter>,
    clock: Arc<dyn Clock>,
    fcfs_max_attempts: u32,
}

impl ConditionalEvaluator {
    pub fn new(
        store: Arc<dyn PersistentStore>,
        queue: Arc<dyn DurableQueue>,
        rate_limiter: Arc<RateLimiter>,
        clock: Arc<dyn Clock>,
        fcfs_max_attempts: u32,
    ) -> Self {
        Self {
            store,
            queue,
            rate_limiter,
            clock,
            fcfs_max_attempts,
        }
    }

    /// Fires every enabled rule matching `(event_type, source_step)` for
    /// `lead_id` that has not already fired (spec §4.7 steps 1-6). Returns
    /// the jobs created.
    pub async fn evaluate_triggers(
        &self,
        lead_id: LeadId,
        event_type: EngagementEvent,
        source_step: &str,
        source_job_id: JobId,
    ) -> EngineResult<Vec<Job>> {
        let rules = self.store.get_conditional_rules().await?;
        let matching: Vec<_> = rules
            .into_iter()
            .filter(|r| r.enabled && r.trigger_event == event_type && r.trigger_step == source_step)
            .collect();

        if matching.is_empty() {
            return Ok(Vec::new());
        }

        let existing_jobs = self.store.jobs_for_lead(lead_id).await?;
        let mut created = Vec::new();

        for rule in matching {
            let already_fired = existing_jobs.iter().any(|j| {
                matches!(&j.kind, MailKind::Conditional { rule_id, .. } if *rule_id == rule.id)
                    && !j.status.is_terminal()
            });
            if already_fired {
                continue;
            }

            let job = self.fire_rule(lead_id, &rule, source_job_id).await?;
            created.push(job);
        }

        Ok(created)
    }

    async fn fire_rule(
        &self,
        lead_id: LeadId,
        rule: &ConditionalEmailRule,
        _source_job_id: JobId,
    ) -> EngineResult<Job> {
        let lead = self
            .store
            .get_lead(lead_id)
            .await?
            .ok_or_else(|| EngineError::LeadNotFound(lead_id.to_string()))?;
        let settings = self.store.get_settings().await?;

        let now = self.clock.now();
        let min_time = now + ChronoDuration::hours(rule.delay_hours);
        let tz = business_hours::resolve_timezone(&lead.timezone);

        let slot = find_slot(
            &self.rate_limiter,
            min_time,
            now,
            tz,
            &settings.business_hours,
            &settings.rate_limit,
            &settings.paused_dates,
            self.fcfs_max_attempts,
        )
        .await?;

        if rule.cancel_pending && settings.conditional_cancel_pending_followups {
            self.pause_pending_followups(lead_id).await?;
        }

        self.rate_limiter.reserve_slot(slot, &settings.rate_limit).await?;

        let mut job = Job::new(
            lead_id,
            MailKind::Conditional {
                rule_id: rule.id,
                trigger_event: rule.trigger_event,
            },
            slot,
        );
        job.template_id = Some(rule.template_id.clone());
        job.metadata.trigger_event = Some(rule.trigger_event);
        job.metadata.timezone = Some(lead.timezone.clone());
        self.store.save_job(&job).await?;

        let entry = QueueEntry {
            job_id: job.id.to_string(),
            priority: rule.priority,
            enqueued_at_ms: now.timestamp_millis(),
        };
        job.metadata.queue_job_id = Some(job.id.to_string());
        self.store.save_job(&job).await?;
        self.queue.add(QueueName::EmailSend, entry).await?;

        self.reconcile_schedule_projection(lead_id, &job).await?;
        crate::status_resolver::sync_lead_status_after_job_change(&self.store, lead_id, now).await?;

        info!(lead_id = %lead_id, rule = %rule.name, job_id = %job.id, scheduled_for = %slot, "conditional rule fired");
        Ok(job)
    }

    async fn pause_pending_followups(&self, lead_id: LeadId) -> EngineResult<()> {
        let jobs = self.store.jobs_for_lead(lead_id).await?;
        for mut job in jobs.into_iter().filter(|j| j.kind.category() == crate::domain::MailCategory::Followup && j.status.is_active()) {
            job.status = JobStatus::Paused;
            job.metadata.paused_reason = Some(PauseReason::ConditionalPriority);
            job.metadata.paused_by_job_type = None;
            job.updated_at = self.clock.now();
            self.store.save_job(&job).await?;
            if let Some(queue_job_id) = &job.metadata.queue_job_id {
                self.queue.remove(QueueName::Followup, queue_job_id).await?;
            }
        }

        rulebook::execute_pause_followups(&self.store, lead_id).await
    }

    async fn reconcile_schedule_projection(&self, lead_id: LeadId, job: &Job) -> EngineResult<()> {
        let mut schedule = self
            .store
            .get_email_schedule(lead_id)
            .await?
            .unwrap_or_else(|| EmailSchedule::empty(lead_id));

        schedule.upsert_followup(FollowupEntry {
            name: job.kind.display_name(),
            scheduled_for: Some(job.scheduled_for),
            status: job.status,
            order: u32::MAX,
            is_conditional: true,
            job_id: Some(job.id),
        });

        self.store.save_email_schedule(&schedule).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::domain::*;
    use crate::kv::{EngineKeys, KvStore};
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct FakeKv {
        store: Mutex<std::collections::HashMap<String, String>>,
    }

    #[async_trait]
    impl KvStore for FakeKv {
        async fn get(&self, key: &str) -> EngineResult<Option<String>> {
            Ok(self.store.lock().await.get(key).cloned())
        }
        async fn set(&self, key: &str, value: &str) -> EngineResult<()> {
            self.store.lock().await.insert(key.to_string(), value.to_string());
            Ok(())
        }
        async fn set_ex(&self, key: &str, value: &str, _ttl_secs: u64) -> EngineResult<()> {
            self.set(key, value).await
        }
        async fn incr(&self, key: &str) -> EngineResult<i64> {
            let mut store = self.store.lock().await;
            let entry = store.entry(key.to_string()).or_insert_with(|| "0".to_string());
            let next: i64 = entry.parse::<i64>().unwrap_or(0) + 1;
            *entry = next.to_string();
            Ok(next)
        }
        async fn expire(&self, _key: &str, _ttl_secs: u64) -> EngineResult<()> {
            Ok(())
        }
        async fn set_nx_ex(&self, key: &str, value: &str, _ttl_secs: u64) -> EngineResult<bool> {
            let mut store = self.store.lock().await;
            if store.contains_key(key) {
                Ok(false)
            } else {
                store.insert(key.to_string(), value.to_string());
                Ok(true)
            }
        }
        async fn del_if_owner(&self, _key: &str, _owner_token: &str) -> EngineResult<bool> {
            Ok(true)
        }
    }

    #[derive(Default)]
    struct FakeStore {
        jobs: Mutex<std::collections::HashMap<JobId, Job>>,
        leads: Mutex<std::collections::HashMap<LeadId, Lead>>,
        rules: Mutex<Vec<ConditionalEmailRule>>,
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
            Ok(self.jobs.lock().await.values().filter(|j| j.lead_id == lead_id).cloned().collect())
        }
        async fn count_in_progress_in_window(&self, _window_start: DateTime<Utc>, _window_end: DateTime<Utc>) -> EngineResult<i64> {
            Ok(0)
        }
        async fn claim_due_job(&self, _job_id: JobId) -> EngineResult<bool> {
            Ok(true)
        }
        async fn due_jobs(&self, _before: DateTime<Utc>, _limit: u32) -> EngineResult<Vec<Job>> {
            Ok(Vec::new())
        }
        async fn jobs_scheduled_on_paused_dates(&self, _paused_dates: &std::collections::BTreeSet<chrono::NaiveDate>) -> EngineResult<Vec<Job>> {
            Ok(Vec::new())
        }
        async fn get_settings(&self) -> EngineResult<Settings> {
            Ok(Settings::default())
        }
        async fn save_settings(&self, _settings: &Settings) -> EngineResult<()> {
            Ok(())
        }
        async fn get_conditional_rules(&self) -> EngineResult<Vec<ConditionalEmailRule>> {
            Ok(self.rules.lock().await.clone())
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

    #[derive(Default)]
    struct FakeQueue {
        removed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DurableQueue for FakeQueue {
        async fn add(&self, _queue: QueueName, _entry: QueueEntry) -> EngineResult<()> {
            Ok(())
        }
        async fn remove(&self, _queue: QueueName, job_id: &str) -> EngineResult<()> {
            self.removed.lock().await.push(job_id.to_string());
            Ok(())
        }
        async fn get_job(&self, _queue: QueueName, _job_id: &str) -> EngineResult<Option<QueueEntry>> {
            Ok(None)
        }
        async fn pop_batch(&self, _queue: QueueName, _limit: usize) -> EngineResult<Vec<QueueEntry>> {
            Ok(Vec::new())
        }
    }

    fn rule(trigger_step: &str, cancel_pending: bool) -> ConditionalEmailRule {
        ConditionalEmailRule {
            id: ConditionalRuleId::new(),
            name: "re-engage on open".to_string(),
            trigger_event: EngagementEvent::Opened,
            trigger_step: trigger_step.to_string(),
            delay_hours: 2,
            template_id: "tmpl-re-engage".to_string(),
            cancel_pending,
            priority: 100,
            enabled: true,
        }
    }

    fn monday_ten_am() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 7, 10, 0, 0).unwrap()
    }

    fn evaluator(store: Arc<FakeStore>, queue: Arc<FakeQueue>, now: DateTime<Utc>) -> ConditionalEvaluator {
        let kv: Arc<dyn KvStore> = Arc::new(FakeKv::default());
        let clock: Arc<dyn Clock> = Arc::new(FixedClock(now));
        let rate_limiter = Arc::new(RateLimiter::new(kv, store.clone(), EngineKeys::default(), clock.clone()));
        ConditionalEvaluator::new(store, queue, rate_limiter, clock, 200)
    }

    #[tokio::test]
    async fn fires_matching_rule_and_schedules_job() {
        let store = Arc::new(FakeStore::default());
        let queue = Arc::new(FakeQueue::default());
        let now = monday_ten_am();
        let lead = Lead::new("a@example.com", "A", Some("UTC".to_string()));
        let lead_id = lead.id;
        store.save_lead(&lead).await.unwrap();
        *store.rules.lock().await = vec![rule("Initial Email", false)];

        let e = evaluator(store, queue, now);
        let created = e.evaluate_triggers(lead_id, EngagementEvent::Opened, "Initial Email", JobId::new()).await.unwrap();
        assert_eq!(created.len(), 1);
        assert!(matches!(created[0].kind, MailKind::Conditional { .. }));
    }

    #[tokio::test]
    async fn does_not_refire_while_a_prior_job_for_the_rule_is_still_open() {
        let store = Arc::new(FakeStore::default());
        let queue = Arc::new(FakeQueue::default());
        let now = monday_ten_am();
        let lead = Lead::new("a@example.com", "A", Some("UTC".to_string()));
        let lead_id = lead.id;
        store.save_lead(&lead).await.unwrap();
        let r = rule("Initial Email", false);
        *store.rules.lock().await = vec![r.clone()];

        let mut prior = Job::new(
            lead_id,
            MailKind::Conditional { rule_id: r.id, trigger_event: EngagementEvent::Opened },
            now,
        );
        prior.status = JobStatus::Pending;
        store.save_job(&prior).await.unwrap();

        let e = evaluator(store, queue, now);
        let created = e.evaluate_triggers(lead_id, EngagementEvent::Opened, "Initial Email", JobId::new()).await.unwrap();
        assert!(created.is_empty());
    }

    #[tokio::test]
    async fn cancel_pending_pauses_active_followups_when_rulebook_allows() {
        let store = Arc::new(FakeStore::default());
        let queue = Arc::new(FakeQueue::default());
        let now = monday_ten_am();
        let lead = Lead::new("a@example.com", "A", Some("UTC".to_string()));
        let lead_id = lead.id;
        store.save_lead(&lead).await.unwrap();
        *store.rules.lock().await = vec![rule("Initial Email", true)];

        let mut followup = Job::new(lead_id, MailKind::Followup("First Followup".to_string()), now);
        followup.metadata.queue_job_id = Some("qjob-1".to_string());
        store.save_job(&followup).await.unwrap();

        let e = evaluator(store.clone(), queue.clone(), now);
        e.evaluate_triggers(lead_id, EngagementEvent::Opened, "Initial Email", JobId::new()).await.unwrap();

        let followup = store.get_job(followup.id).await.unwrap().unwrap();
        assert_eq!(followup.status, JobStatus::Paused);
        let lead = store.get_lead(lead_id).await.unwrap().unwrap();
        assert!(lead.followups_paused);
        assert_eq!(queue.removed.lock().await.as_slice(), ["qjob-1"]);
    }
}
