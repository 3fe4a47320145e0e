//! The persistent store abstraction: the relational, JSON-column backed
//! source of truth (spec §6). Redis is the fast path everywhere else in this
//! engine; this is the ground truth after reconciliation.

pub mod pg;

pub use pg::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    ConditionalEmailRule, EmailSchedule, EventHistoryEntry, EventStoreRecord, Job, JobId, Lead,
    LeadId, Notification, Settings,
};
use crate::error::EngineResult;

/// Narrow persistence contract the engine depends on. Required tables per
/// spec §6: `leads`, `email_jobs`, `email_schedules`, `event_history`,
/// `event_store`, `notifications`, `conditional_emails`, `settings`.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn get_lead(&self, id: LeadId) -> EngineResult<Option<Lead>>;
    async fn save_lead(&self, lead: &Lead) -> EngineResult<()>;

    async fn get_job(&self, id: JobId) -> EngineResult<Option<Job>>;
    async fn save_job(&self, job: &Job) -> EngineResult<()>;
    /// All jobs for a lead, for the scheduler's batch-load step.
    async fn jobs_for_lead(&self, lead_id: LeadId) -> EngineResult<Vec<Job>>;

    /// Count of jobs with `scheduled_for` in `[window_start, window_end)` and
    /// an in-progress status, for the rate limiter's DB recount.
    async fn count_in_progress_in_window(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> EngineResult<i64>;

    /// Conditional update `status='pending' AND id=job_id -> 'queued'`;
    /// returns true if this caller won the claim.
    async fn claim_due_job(&self, job_id: JobId) -> EngineResult<bool>;

    /// Jobs due at or before `before`, still in an active status, capped at
    /// `limit` rows, for the periodic claim sweep.
    async fn due_jobs(&self, before: DateTime<Utc>, limit: u32) -> EngineResult<Vec<Job>>;

    /// Jobs with `scheduled_for` on `date` (lead-local) still pending, for
    /// the paused-date relocation sweep.
    async fn jobs_scheduled_on_paused_dates(
        &self,
        paused_dates: &std::collections::BTreeSet<chrono::NaiveDate>,
    ) -> EngineResult<Vec<Job>>;

    async fn get_settings(&self) -> EngineResult<Settings>;
    async fn save_settings(&self, settings: &Settings) -> EngineResult<()>;

    async fn get_conditional_rules(&self) -> EngineResult<Vec<ConditionalEmailRule>>;

    async fn get_email_schedule(&self, lead_id: LeadId) -> EngineResult<Option<EmailSchedule>>;
    async fn save_email_schedule(&self, schedule: &EmailSchedule) -> EngineResult<()>;

    async fn append_event_history(&self, entry: &EventHistoryEntry) -> EngineResult<()>;

    /// Inserts an event-store record; returns `false` if the
    /// `(event_type, aggregate_id)` unique constraint rejected it as a
    /// duplicate (idempotent webhook delivery).
    async fn insert_event_store_record(&self, record: &EventStoreRecord) -> EngineResult<bool>;

    async fn insert_notification(&self, notification: &Notification) -> EngineResult<()>;
}
