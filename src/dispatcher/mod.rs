//! The Event Dispatcher (spec §4.9): the single entry point for inbound
//! provider events. Deduplicates, records history, and routes to the
//! category handler that owns the resulting state change.

mod handlers;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::conditional_evaluator::ConditionalEvaluator;
use crate::domain::{EventCategory, EventHistoryEntry, EventStoreRecord, NormalizedEvent, NormalizedEventType};
use crate::error::{EngineError, EngineResult};
use crate::kv::{EngineKeys, KvStore};
use crate::queue::DurableQueue;
use crate::queue_watcher::QueueWatcher;
use crate::rulebook;
use crate::scheduler::Scheduler;
use crate::store::PersistentStore;

/// Routes normalized provider events to their category handler, after
/// idempotency checks at two layers: an in-process cache for high-volume
/// repeats within a short window, and the durable event store's unique
/// `(event_type, aggregate_id)` constraint as the final word.
pub struct Dispatcher {
    store: Arc<dyn PersistentStore>,
    scheduler: Arc<Scheduler>,
    queue_watcher: Arc<QueueWatcher>,
    conditional_evaluator: Arc<ConditionalEvaluator>,
    queue: Arc<dyn DurableQueue>,
    kv: Arc<dyn KvStore>,
    keys: EngineKeys,
    clock: Arc<dyn Clock>,
    dedup_cache: Mutex<HashMap<(NormalizedEventType, String), DateTime<Utc>>>,
    dedup_cache_ttl_secs: i64,
    recent_followup_window_secs: u64,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn PersistentStore>,
        scheduler: Arc<Scheduler>,
        queue_watcher: Arc<QueueWatcher>,
        conditional_evaluator: Arc<ConditionalEvaluator>,
        queue: Arc<dyn DurableQueue>,
        kv: Arc<dyn KvStore>,
        keys: EngineKeys,
        clock: Arc<dyn Clock>,
        dedup_cache_ttl_secs: i64,
        recent_followup_window_secs: u64,
    ) -> Self {
        Self {
            store,
            scheduler,
            queue_watcher,
            conditional_evaluator,
            queue,
            kv,
            keys,
            clock,
            dedup_cache: Mutex::new(HashMap::new()),
            dedup_cache_ttl_secs,
            recent_followup_window_secs,
        }
    }

    /// Processes one normalized event end to end. Idempotent: a repeat
    /// delivery of the same `(event_type, email_job_id)` is a silent no-op.
    pub async fn dispatch(&self, event: NormalizedEvent) -> EngineResult<()> {
        let (event_type, aggregate_id) = EventStoreRecord::key_for(&event);

        if self.seen_recently(&event_type, &aggregate_id).await {
            debug!(event_type = %event_type, aggregate_id = %aggregate_id, "suppressed by in-process dedup cache");
            return Ok(());
        }

        let record = EventStoreRecord {
            event_type,
            aggregate_id: aggregate_id.clone(),
            idempotency_key: format!("{event_type}:{aggregate_id}"),
            recorded_at: self.clock.now(),
        };
        if !self.store.insert_event_store_record(&record).await? {
            debug!(event_type = %event_type, aggregate_id = %aggregate_id, "suppressed by event-store uniqueness");
            self.remember(event_type, aggregate_id).await;
            return Ok(());
        }
        self.remember(event_type, aggregate_id).await;

        let job = self
            .store
            .get_job(event.email_job_id)
            .await?
            .ok_or_else(|| EngineError::JobNotFound(event.email_job_id.to_string()))?;
        let mut lead = self
            .store
            .get_lead(event.lead_id)
            .await?
            .ok_or_else(|| EngineError::LeadNotFound(event.lead_id.to_string()))?;

        let history = EventHistoryEntry {
            lead_id: event.lead_id,
            event: event.event_type,
            timestamp: event.occurred_at,
            email_type: job.kind.display_name(),
            email_job_id: job.id,
            details: event.event_data.reason.clone(),
        };
        self.store.append_event_history(&history).await?;

        match rulebook::get_event_category(event.event_type) {
            EventCategory::Success => {
                handlers::handle_success(
                    &self.store,
                    &self.scheduler,
                    &self.queue_watcher,
                    &self.conditional_evaluator,
                    &self.kv,
                    &self.keys,
                    &self.clock,
                    self.recent_followup_window_secs,
                    job,
                    &mut lead,
                    &event,
                )
                .await?;
            }
            EventCategory::AutoReschedule => {
                handlers::handle_auto_reschedule(&self.store, &self.scheduler, &self.queue, &self.clock, job, &mut lead, &event).await?;
            }
            EventCategory::Failed => {
                handlers::handle_failed(&self.store, &self.queue, &self.clock, job, &mut lead, &event).await?;
            }
            EventCategory::Spam => {
                handlers::handle_spam(&self.store, &self.queue, &self.clock, job, &mut lead, &event).await?;
            }
            EventCategory::Unknown => {
                warn!(event_type = %event.event_type, "no handler for event category, recorded history only");
            }
        }

        crate::status_resolver::sync_lead_status_after_job_change(&self.store, event.lead_id, self.clock.now()).await?;
        Ok(())
    }

    async fn seen_recently(&self, event_type: &NormalizedEventType, aggregate_id: &str) -> bool {
        let now = self.clock.now();
        let mut cache = self.dedup_cache.lock().await;
        cache.retain(|_, seen_at| (now - *seen_at).num_seconds() < self.dedup_cache_ttl_secs);
        cache.contains_key(&(*event_type, aggregate_id.to_string()))
    }

    async fn remember(&self, event_type: NormalizedEventType, aggregate_id: String) {
        let now = self.clock.now();
        self.dedup_cache.lock().await.insert((event_type, aggregate_id), now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::domain::*;
    use crate::journey_guard::JourneyGuard;
    use crate::kv::{EngineKeys, KvStore};
    use crate::lock::DistributedLock;
    use crate::queue::QueueEntry;
    use crate::rate_limit::RateLimiter;
    use async_trait::async_trait;
    use chrono::TimeZone;

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
        async fn del_if_owner(&self, key: &str, owner_token: &str) -> EngineResult<bool> {
            let mut store = self.store.lock().await;
            if store.get(key).map(String::as_str) == Some(owner_token) {
                store.remove(key);
                Ok(true)
            } else {
                Ok(false)
            }
        }
    }

    #[derive(Default)]
    struct FakeStore {
        jobs: Mutex<std::collections::HashMap<JobId, Job>>,
        leads: Mutex<std::collections::HashMap<LeadId, Lead>>,
        schedules: Mutex<std::collections::HashMap<LeadId, EmailSchedule>>,
        notifications: Mutex<Vec<Notification>>,
        event_store: Mutex<std::collections::HashSet<(NormalizedEventType, String)>>,
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
            Ok(Vec::new())
        }
        async fn get_email_schedule(&self, lead_id: LeadId) -> EngineResult<Option<EmailSchedule>> {
            Ok(self.schedules.lock().await.get(&lead_id).cloned())
        }
        async fn save_email_schedule(&self, schedule: &EmailSchedule) -> EngineResult<()> {
            self.schedules.lock().await.insert(schedule.lead_id, schedule.clone());
            Ok(())
        }
        async fn append_event_history(&self, _entry: &EventHistoryEntry) -> EngineResult<()> {
            Ok(())
        }
        async fn insert_event_store_record(&self, record: &EventStoreRecord) -> EngineResult<bool> {
            Ok(self.event_store.lock().await.insert((record.event_type, record.aggregate_id.clone())))
        }
        async fn insert_notification(&self, notification: &Notification) -> EngineResult<()> {
            self.notifications.lock().await.push(notification.clone());
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

    fn monday_ten_am() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 7, 10, 0, 0).unwrap()
    }

    fn dispatcher(store: Arc<FakeStore>, queue: Arc<FakeQueue>, now: DateTime<Utc>) -> Dispatcher {
        dispatcher_with_kv(store, queue, now).0
    }

    fn dispatcher_with_kv<S: PersistentStore + 'static>(
        store: Arc<S>,
        queue: Arc<FakeQueue>,
        now: DateTime<Utc>,
    ) -> (Dispatcher, Arc<dyn KvStore>) {
        let kv: Arc<dyn KvStore> = Arc::new(FakeKv::default());
        let clock: Arc<dyn Clock> = Arc::new(FixedClock(now));
        let keys = EngineKeys::default();
        let rate_limiter = Arc::new(RateLimiter::new(kv.clone(), store.clone(), keys.clone(), clock.clone()));
        let journey_guard = Arc::new(JourneyGuard::new(DistributedLock::new(kv.clone()), store.clone(), keys.clone()));
        let queue_watcher = Arc::new(QueueWatcher::new(store.clone(), queue.clone(), clock.clone()));
        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            rate_limiter.clone(),
            journey_guard,
            DistributedLock::new(kv.clone()),
            queue.clone(),
            queue_watcher.clone(),
            clock.clone(),
            keys.clone(),
            Arc::new(EngineConfig::default()),
        ));
        let conditional_evaluator = Arc::new(ConditionalEvaluator::new(store.clone(), queue.clone(), rate_limiter, clock.clone(), 200));
        let dispatcher = Dispatcher::new(
            store,
            scheduler,
            queue_watcher,
            conditional_evaluator,
            queue,
            kv.clone(),
            keys,
            clock,
            60,
            120,
        );
        (dispatcher, kv)
    }

    async fn lead_with_initial_job(store: &FakeStore, now: DateTime<Utc>) -> (LeadId, JobId) {
        let lead = Lead::new("a@example.com", "A", Some("UTC".to_string()));
        let lead_id = lead.id;
        store.save_lead(&lead).await.unwrap();
        let mut job = Job::new(lead_id, MailKind::Initial, now);
        job.status = JobStatus::Scheduled;
        let job_id = job.id;
        store.save_job(&job).await.unwrap();
        (lead_id, job_id)
    }

    fn normalized(event_type: NormalizedEventType, lead_id: LeadId, job_id: JobId, now: DateTime<Utc>) -> NormalizedEvent {
        NormalizedEvent {
            event_type,
            lead_id,
            email_job_id: job_id,
            event_data: NormalizedEventData::default(),
            occurred_at: now,
        }
    }

    #[tokio::test]
    async fn delivered_event_updates_job_and_advances_sequence() {
        let store = Arc::new(FakeStore::default());
        let queue = Arc::new(FakeQueue::default());
        let now = monday_ten_am();
        let (lead_id, job_id) = lead_with_initial_job(&store, now).await;

        let d = dispatcher(store.clone(), queue, now);
        d.dispatch(normalized(NormalizedEventType::Delivered, lead_id, job_id, now)).await.unwrap();

        let job = store.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Delivered);
    }

    #[tokio::test]
    async fn duplicate_delivery_is_a_no_op() {
        let store = Arc::new(FakeStore::default());
        let queue = Arc::new(FakeQueue::default());
        let now = monday_ten_am();
        let (lead_id, job_id) = lead_with_initial_job(&store, now).await;

        let d = dispatcher(store.clone(), queue, now);
        d.dispatch(normalized(NormalizedEventType::Delivered, lead_id, job_id, now)).await.unwrap();
        d.dispatch(normalized(NormalizedEventType::Delivered, lead_id, job_id, now)).await.unwrap();

        assert_eq!(store.event_store.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn hard_bounce_beyond_retry_budget_marks_lead_dead() {
        let store = Arc::new(FakeStore::default());
        let queue = Arc::new(FakeQueue::default());
        let now = monday_ten_am();
        let (lead_id, job_id) = lead_with_initial_job(&store, now).await;
        {
            let mut job = store.get_job(job_id).await.unwrap().unwrap();
            job.retry_count = 3;
            store.save_job(&job).await.unwrap();
        }

        let d = dispatcher(store.clone(), queue, now);
        d.dispatch(normalized(NormalizedEventType::HardBounce, lead_id, job_id, now)).await.unwrap();

        let lead = store.get_lead(lead_id).await.unwrap().unwrap();
        assert_eq!(lead.terminal_state, Some(TerminalState::Dead));
        assert_eq!(store.notifications.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn dead_path_cancels_other_active_jobs() {
        let store = Arc::new(FakeStore::default());
        let queue = Arc::new(FakeQueue::default());
        let now = monday_ten_am();
        let (lead_id, job_id) = lead_with_initial_job(&store, now).await;
        let mut followup = Job::new(lead_id, MailKind::Followup("First Followup".to_string()), now);
        followup.status = JobStatus::Pending;
        store.save_job(&followup).await.unwrap();
        {
            let mut job = store.get_job(job_id).await.unwrap().unwrap();
            job.retry_count = 3;
            store.save_job(&job).await.unwrap();
        }

        let d = dispatcher(store.clone(), queue, now);
        d.dispatch(normalized(NormalizedEventType::HardBounce, lead_id, job_id, now)).await.unwrap();

        let followup = store.get_job(followup.id).await.unwrap().unwrap();
        assert_eq!(followup.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn hard_bounce_within_retry_budget_pauses_other_active_jobs() {
        let store = Arc::new(FakeStore::default());
        let queue = Arc::new(FakeQueue::default());
        let now = monday_ten_am();
        let (lead_id, job_id) = lead_with_initial_job(&store, now).await;
        let mut followup = Job::new(lead_id, MailKind::Followup("First Followup".to_string()), now);
        followup.status = JobStatus::Pending;
        store.save_job(&followup).await.unwrap();

        let d = dispatcher(store.clone(), queue, now);
        d.dispatch(normalized(NormalizedEventType::HardBounce, lead_id, job_id, now)).await.unwrap();

        let lead = store.get_lead(lead_id).await.unwrap().unwrap();
        assert!(lead.terminal_state.is_none());
        assert!(lead.is_in_failure);
        let followup = store.get_job(followup.id).await.unwrap().unwrap();
        assert_eq!(followup.status, JobStatus::Paused);
        assert!(followup.last_error.as_deref().unwrap_or_default().contains("hard_bounce"));
    }

    #[tokio::test]
    async fn unsubscribe_cancels_active_jobs_and_terminates_lead() {
        let store = Arc::new(FakeStore::default());
        let queue = Arc::new(FakeQueue::default());
        let now = monday_ten_am();
        let (lead_id, job_id) = lead_with_initial_job(&store, now).await;
        let mut followup = Job::new(lead_id, MailKind::Followup("First Followup".to_string()), now);
        followup.status = JobStatus::Pending;
        store.save_job(&followup).await.unwrap();

        let d = dispatcher(store.clone(), queue, now);
        d.dispatch(normalized(NormalizedEventType::Unsubscribed, lead_id, job_id, now)).await.unwrap();

        let lead = store.get_lead(lead_id).await.unwrap().unwrap();
        assert_eq!(lead.terminal_state, Some(TerminalState::Unsubscribed));
        let followup = store.get_job(followup.id).await.unwrap().unwrap();
        assert_eq!(followup.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn delivered_on_conditional_job_auto_resumes_paused_followups() {
        let store = Arc::new(FakeStore::default());
        let queue = Arc::new(FakeQueue::default());
        let now = monday_ten_am();

        let mut lead = Lead::new("a@example.com", "A", Some("UTC".to_string()));
        lead.followups_paused = true;
        let lead_id = lead.id;
        store.save_lead(&lead).await.unwrap();

        let mut job = Job::new(
            lead_id,
            MailKind::Conditional { rule_id: ConditionalRuleId::new(), trigger_event: EngagementEvent::Opened },
            now,
        );
        job.status = JobStatus::Scheduled;
        let job_id = job.id;
        store.save_job(&job).await.unwrap();

        let mut followup = Job::new(lead_id, MailKind::Followup("First Followup".to_string()), now);
        followup.status = JobStatus::Paused;
        followup.metadata.paused_reason = Some(PauseReason::ConditionalPriority);
        store.save_job(&followup).await.unwrap();

        let d = dispatcher(store.clone(), queue, now);
        d.dispatch(normalized(NormalizedEventType::Delivered, lead_id, job_id, now)).await.unwrap();

        let lead = store.get_lead(lead_id).await.unwrap().unwrap();
        assert!(!lead.followups_paused);
        let followup = store.get_job(followup.id).await.unwrap().unwrap();
        assert_eq!(followup.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn delivered_on_followup_job_does_not_auto_resume() {
        let store = Arc::new(FakeStore::default());
        let queue = Arc::new(FakeQueue::default());
        let now = monday_ten_am();

        let mut lead = Lead::new("a@example.com", "A", Some("UTC".to_string()));
        lead.followups_paused = true;
        let lead_id = lead.id;
        store.save_lead(&lead).await.unwrap();

        let mut job = Job::new(lead_id, MailKind::Followup("First Followup".to_string()), now);
        job.status = JobStatus::Scheduled;
        let job_id = job.id;
        store.save_job(&job).await.unwrap();

        let d = dispatcher(store.clone(), queue, now);
        d.dispatch(normalized(NormalizedEventType::Delivered, lead_id, job_id, now)).await.unwrap();

        let lead = store.get_lead(lead_id).await.unwrap().unwrap();
        assert!(lead.followups_paused);
    }

    /// Wraps `FakeStore`, counting `get_lead` calls — `schedule_next_email`
    /// calls `get_lead` as its first store access, so this distinguishes "the
    /// scheduler ran" from "it was suppressed" without asserting on its
    /// internal scheduling decision.
    #[derive(Default)]
    struct CountingStore {
        inner: FakeStore,
        get_lead_calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl PersistentStore for CountingStore {
        async fn get_lead(&self, id: LeadId) -> EngineResult<Option<Lead>> {
            self.get_lead_calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.inner.get_lead(id).await
        }
        async fn save_lead(&self, lead: &Lead) -> EngineResult<()> {
            self.inner.save_lead(lead).await
        }
        async fn get_job(&self, id: JobId) -> EngineResult<Option<Job>> {
            self.inner.get_job(id).await
        }
        async fn save_job(&self, job: &Job) -> EngineResult<()> {
            self.inner.save_job(job).await
        }
        async fn jobs_for_lead(&self, lead_id: LeadId) -> EngineResult<Vec<Job>> {
            self.inner.jobs_for_lead(lead_id).await
        }
        async fn count_in_progress_in_window(&self, window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> EngineResult<i64> {
            self.inner.count_in_progress_in_window(window_start, window_end).await
        }
        async fn claim_due_job(&self, job_id: JobId) -> EngineResult<bool> {
            self.inner.claim_due_job(job_id).await
        }
        async fn due_jobs(&self, before: DateTime<Utc>, limit: u32) -> EngineResult<Vec<Job>> {
            self.inner.due_jobs(before, limit).await
        }
        async fn jobs_scheduled_on_paused_dates(&self, paused_dates: &std::collections::BTreeSet<chrono::NaiveDate>) -> EngineResult<Vec<Job>> {
            self.inner.jobs_scheduled_on_paused_dates(paused_dates).await
        }
        async fn get_settings(&self) -> EngineResult<Settings> {
            self.inner.get_settings().await
        }
        async fn save_settings(&self, settings: &Settings) -> EngineResult<()> {
            self.inner.save_settings(settings).await
        }
        async fn get_conditional_rules(&self) -> EngineResult<Vec<ConditionalEmailRule>> {
            self.inner.get_conditional_rules().await
        }
        async fn get_email_schedule(&self, lead_id: LeadId) -> EngineResult<Option<EmailSchedule>> {
            self.inner.get_email_schedule(lead_id).await
        }
        async fn save_email_schedule(&self, schedule: &EmailSchedule) -> EngineResult<()> {
            self.inner.save_email_schedule(schedule).await
        }
        async fn append_event_history(&self, entry: &EventHistoryEntry) -> EngineResult<()> {
            self.inner.append_event_history(entry).await
        }
        async fn insert_event_store_record(&self, record: &EventStoreRecord) -> EngineResult<bool> {
            self.inner.insert_event_store_record(record).await
        }
        async fn insert_notification(&self, notification: &Notification) -> EngineResult<()> {
            self.inner.insert_notification(notification).await
        }
    }

    #[tokio::test]
    async fn second_delivered_within_idempotency_window_suppresses_schedule_next_email() {
        let store = Arc::new(CountingStore::default());
        let queue = Arc::new(FakeQueue::default());
        let now = monday_ten_am();
        let (lead_id, job1) = lead_with_initial_job(&store.inner, now).await;

        let mut job2 = Job::new(lead_id, MailKind::Manual, now);
        job2.status = JobStatus::Scheduled;
        let job2_id = job2.id;
        store.inner.save_job(&job2).await.unwrap();

        let (d, _kv) = dispatcher_with_kv(store.clone(), queue, now);

        let calls_before_first = store.get_lead_calls.load(std::sync::atomic::Ordering::SeqCst);
        d.dispatch(normalized(NormalizedEventType::Delivered, lead_id, job1, now)).await.unwrap();
        let calls_after_first = store.get_lead_calls.load(std::sync::atomic::Ordering::SeqCst);

        d.dispatch(normalized(NormalizedEventType::Delivered, lead_id, job2_id, now)).await.unwrap();
        let calls_after_second = store.get_lead_calls.load(std::sync::atomic::Ordering::SeqCst);

        let first_dispatch_calls = calls_after_first - calls_before_first;
        let second_dispatch_calls = calls_after_second - calls_after_first;

        // The first delivered event reaches the scheduler (one extra
        // `get_lead` beyond the dispatcher's own lookup and the status
        // resync); the second, within the idempotency window, does not.
        assert_eq!(second_dispatch_calls, first_dispatch_calls - 1);
    }
}
