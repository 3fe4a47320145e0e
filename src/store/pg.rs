//! Postgres-backed `PersistentStore`. Rows hold indexed lookup columns plus
//! a JSONB payload for the nested shape (`metadata`, `followups`,
//! `condition`) the way the relational-store-with-JSON-columns contract in
//! spec §6 describes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::domain::{
    ConditionalEmailRule, EmailSchedule, EventHistoryEntry, EventStoreRecord, Job, JobId,
    JobStatus, Lead, LeadId, Notification, Settings,
};
use crate::error::{EngineError, EngineResult};

use super::PersistentStore;

/// Postgres-backed implementation of `PersistentStore`.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(config: &DatabaseConfig) -> EngineResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    fn decode<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> EngineResult<T> {
        serde_json::from_value(value).map_err(EngineError::from)
    }
}

#[async_trait]
impl PersistentStore for PgStore {
    async fn get_lead(&self, id: LeadId) -> EngineResult<Option<Lead>> {
        let row = sqlx::query("SELECT data FROM leads WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::decode(r.try_get::<serde_json::Value, _>("data")?))
            .transpose()
    }

    async fn save_lead(&self, lead: &Lead) -> EngineResult<()> {
        let data = serde_json::to_value(lead)?;
        sqlx::query(
            r#"
            INSERT INTO leads (id, email, terminal_state, data, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                email = EXCLUDED.email,
                terminal_state = EXCLUDED.terminal_state,
                data = EXCLUDED.data,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(lead.id.as_uuid())
        .bind(&lead.email)
        .bind(lead.terminal_state.map(|t| t.to_string()))
        .bind(&data)
        .bind(lead.created_at)
        .bind(lead.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_job(&self, id: JobId) -> EngineResult<Option<Job>> {
        let row = sqlx::query("SELECT data FROM email_jobs WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::decode(r.try_get::<serde_json::Value, _>("data")?))
            .transpose()
    }

    async fn save_job(&self, job: &Job) -> EngineResult<()> {
        let data = serde_json::to_value(job)?;
        sqlx::query(
            r#"
            INSERT INTO email_jobs
                (id, lead_id, status, scheduled_for, idempotency_key, data, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                scheduled_for = EXCLUDED.scheduled_for,
                data = EXCLUDED.data,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.lead_id.as_uuid())
        .bind(job.status.to_string())
        .bind(job.scheduled_for)
        .bind(&job.idempotency_key)
        .bind(&data)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn jobs_for_lead(&self, lead_id: LeadId) -> EngineResult<Vec<Job>> {
        let rows = sqlx::query("SELECT data FROM email_jobs WHERE lead_id = $1")
            .bind(lead_id.as_uuid())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|r| Self::decode(r.try_get::<serde_json::Value, _>("data")?))
            .collect()
    }

    async fn count_in_progress_in_window(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> EngineResult<i64> {
        let in_progress: Vec<String> = JobStatus::ACTIVE.iter().map(|s| s.to_string()).collect();
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS count FROM email_jobs
            WHERE scheduled_for >= $1 AND scheduled_for < $2 AND status = ANY($3)
            "#,
        )
        .bind(window_start)
        .bind(window_end)
        .bind(&in_progress)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<i64, _>("count")?)
    }

    async fn claim_due_job(&self, job_id: JobId) -> EngineResult<bool> {
        let result = sqlx::query(
            "UPDATE email_jobs SET status = 'queued', updated_at = NOW() WHERE id = $1 AND status = 'pending'",
        )
        .bind(job_id.as_uuid())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn due_jobs(&self, before: DateTime<Utc>, limit: u32) -> EngineResult<Vec<Job>> {
        let rows = sqlx::query(
            r#"
            SELECT data FROM email_jobs
            WHERE status = 'pending' AND scheduled_for <= $1
            ORDER BY scheduled_for ASC
            LIMIT $2
            "#,
        )
        .bind(before)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|r| Self::decode(r.try_get::<serde_json::Value, _>("data")?))
            .collect()
    }

    async fn jobs_scheduled_on_paused_dates(
        &self,
        paused_dates: &std::collections::BTreeSet<chrono::NaiveDate>,
    ) -> EngineResult<Vec<Job>> {
        if paused_dates.is_empty() {
            return Ok(Vec::new());
        }
        let dates: Vec<chrono::NaiveDate> = paused_dates.iter().copied().collect();
        let rows = sqlx::query(
            r#"
            SELECT data FROM email_jobs
            WHERE status = 'pending' AND scheduled_for::date = ANY($1)
            "#,
        )
        .bind(&dates)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|r| Self::decode(r.try_get::<serde_json::Value, _>("data")?))
            .collect()
    }

    async fn get_settings(&self) -> EngineResult<Settings> {
        let row = sqlx::query("SELECT data FROM settings WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(r) => Self::decode(r.try_get::<serde_json::Value, _>("data")?),
            None => Ok(Settings::default()),
        }
    }

    async fn save_settings(&self, settings: &Settings) -> EngineResult<()> {
        let data = serde_json::to_value(settings)?;
        sqlx::query(
            r#"
            INSERT INTO settings (id, data) VALUES (1, $1)
            ON CONFLICT (id) DO UPDATE SET data = EXCLUDED.data
            "#,
        )
        .bind(&data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_conditional_rules(&self) -> EngineResult<Vec<ConditionalEmailRule>> {
        let rows = sqlx::query("SELECT data FROM conditional_emails WHERE enabled = true")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|r| Self::decode(r.try_get::<serde_json::Value, _>("data")?))
            .collect()
    }

    async fn get_email_schedule(&self, lead_id: LeadId) -> EngineResult<Option<EmailSchedule>> {
        let row = sqlx::query("SELECT data FROM email_schedules WHERE lead_id = $1")
            .bind(lead_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::decode(r.try_get::<serde_json::Value, _>("data")?))
            .transpose()
    }

    async fn save_email_schedule(&self, schedule: &EmailSchedule) -> EngineResult<()> {
        let data = serde_json::to_value(schedule)?;
        sqlx::query(
            r#"
            INSERT INTO email_schedules (lead_id, data) VALUES ($1, $2)
            ON CONFLICT (lead_id) DO UPDATE SET data = EXCLUDED.data
            "#,
        )
        .bind(schedule.lead_id.as_uuid())
        .bind(&data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_event_history(&self, entry: &EventHistoryEntry) -> EngineResult<()> {
        let data = serde_json::to_value(entry)?;
        sqlx::query(
            "INSERT INTO event_history (lead_id, occurred_at, data) VALUES ($1, $2, $3)",
        )
        .bind(entry.lead_id.as_uuid())
        .bind(entry.timestamp)
        .bind(&data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_event_store_record(&self, record: &EventStoreRecord) -> EngineResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO event_store (event_type, aggregate_id, idempotency_key, recorded_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (event_type, aggregate_id) DO NOTHING
            "#,
        )
        .bind(record.event_type.to_string())
        .bind(&record.aggregate_id)
        .bind(&record.idempotency_key)
        .bind(record.recorded_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_notification(&self, notification: &Notification) -> EngineResult<()> {
        let data = serde_json::to_value(notification)?;
        sqlx::query("INSERT INTO notifications (id, lead_id, data, created_at) VALUES ($1, $2, $3, $4)")
            .bind(notification.id.as_uuid())
            .bind(notification.lead_id.as_uuid())
            .bind(&data)
            .bind(notification.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
