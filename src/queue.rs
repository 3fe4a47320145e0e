//! The durable queue abstraction: priority-ordered work handoff to the send
//! workers, modeled as three logical queues (`email-send-queue`,
//! `followup-queue`, `analytics-queue`) distinguished by key prefix rather
//! than separate Redis instances.

use async_trait::async_trait;
use deadpool_redis::Pool;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;

/// Which logical queue a job belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueName {
    EmailSend,
    Followup,
    Analytics,
}

impl QueueName {
    fn key(self, prefix: &str) -> String {
        let suffix = match self {
            QueueName::EmailSend => "email-send-queue",
            QueueName::Followup => "followup-queue",
            QueueName::Analytics => "analytics-queue",
        };
        format!("{prefix}:{suffix}")
    }
}

/// A unit of work handed to the durable queue. `job_id` doubles as the
/// idempotency key so the queue enforces a second line of de-duplication
/// after the persistent store's conditional-update claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub job_id: String,
    pub priority: i32,
    pub enqueued_at_ms: i64,
}

/// Priority-ordered durable handoff. Implementations must guarantee that
/// `get_job` after `add` sees the entry, and `remove` is idempotent.
#[async_trait]
pub trait DurableQueue: Send + Sync {
    async fn add(&self, queue: QueueName, entry: QueueEntry) -> EngineResult<()>;
    async fn remove(&self, queue: QueueName, job_id: &str) -> EngineResult<()>;
    async fn get_job(&self, queue: QueueName, job_id: &str) -> EngineResult<Option<QueueEntry>>;
    /// Pops up to `limit` highest-priority, earliest-enqueued entries.
    async fn pop_batch(&self, queue: QueueName, limit: usize) -> EngineResult<Vec<QueueEntry>>;
}

/// Redis sorted-set backed `DurableQueue`. Score encodes priority-then-FIFO
/// ordering in a single `ZSET` member score: `score = -priority * 1e12 +
/// enqueued_at_ms`, so `ZRANGEBYSCORE` with ascending order yields highest
/// priority first, earliest-enqueued breaking ties.
pub struct RedisDurableQueue {
    pool: Pool,
    prefix: String,
}

impl RedisDurableQueue {
    pub fn new(pool: Pool, prefix: impl Into<String>) -> Self {
        Self { pool, prefix: prefix.into() }
    }

    fn score(priority: i32, enqueued_at_ms: i64) -> f64 {
        -(f64::from(priority)) * 1e12 + enqueued_at_ms as f64
    }

    fn job_key(&self, queue: QueueName, job_id: &str) -> String {
        format!("{}:job:{job_id}", queue.key(&self.prefix))
    }
}

#[async_trait]
impl DurableQueue for RedisDurableQueue {
    async fn add(&self, queue: QueueName, entry: QueueEntry) -> EngineResult<()> {
        let mut conn = self.pool.get().await?;
        let zset_key = queue.key(&self.prefix);
        let score = Self::score(entry.priority, entry.enqueued_at_ms);
        let payload = serde_json::to_string(&entry)?;

        let _: () = conn.zadd(&zset_key, &entry.job_id, score).await?;
        let _: () = conn.set(self.job_key(queue, &entry.job_id), payload).await?;
        Ok(())
    }

    async fn remove(&self, queue: QueueName, job_id: &str) -> EngineResult<()> {
        let mut conn = self.pool.get().await?;
        let zset_key = queue.key(&self.prefix);
        let _: () = conn.zrem(&zset_key, job_id).await?;
        let _: () = conn.del(self.job_key(queue, job_id)).await?;
        Ok(())
    }

    async fn get_job(&self, queue: QueueName, job_id: &str) -> EngineResult<Option<QueueEntry>> {
        let mut conn = self.pool.get().await?;
        let raw: Option<String> = conn.get(self.job_key(queue, job_id)).await?;
        Ok(raw.map(|s| serde_json::from_str(&s)).transpose()?)
    }

    async fn pop_batch(&self, queue: QueueName, limit: usize) -> EngineResult<Vec<QueueEntry>> {
        let mut conn = self.pool.get().await?;
        let zset_key = queue.key(&self.prefix);
        let job_ids: Vec<String> = conn.zpopmin(&zset_key, limit as isize).await.map(|pairs: Vec<(String, f64)>| {
            pairs.into_iter().map(|(id, _score)| id).collect()
        })?;

        let mut entries = Vec::with_capacity(job_ids.len());
        for job_id in job_ids {
            let job_key = self.job_key(queue, &job_id);
            let raw: Option<String> = conn.get(&job_key).await?;
            if let Some(raw) = raw {
                entries.push(serde_json::from_str(&raw)?);
                let _: () = conn.del(&job_key).await?;
            }
        }
        Ok(entries)
    }
}
