//! The distributed key/value store abstraction: `INCR`, `GET`, `SET`,
//! `EXPIRE`, `SET NX PX` for locks. One narrow trait, one Redis adapter.

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;

use crate::config::RedisConfig;
use crate::error::{EngineError, EngineResult};

/// Key builder for every key this engine owns in the K/V store.
#[derive(Debug, Clone)]
pub struct EngineKeys {
    prefix: String,
}

impl EngineKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    /// `ratelimit:global:{windowStartMs}`.
    pub fn rate_limit_window(&self, window_start_ms: i64) -> String {
        format!("{}:ratelimit:global:{window_start_ms}", self.prefix)
    }

    /// `lock:{name}`.
    pub fn lock(&self, name: &str) -> String {
        format!("{}:lock:{name}", self.prefix)
    }

    /// `scheduler:lead:{leadId}`.
    pub fn lead_lock(&self, lead_id: &str) -> String {
        self.lock(&format!("scheduler:lead:{lead_id}"))
    }

    /// Unique-journey lock for (lead, mail-kind-name).
    pub fn journey_lock(&self, lead_id: &str, mail_kind_name: &str) -> String {
        self.lock(&format!("journey:{lead_id}:{mail_kind_name}"))
    }

    /// In-process-survivable dedup marker for a recently-seen webhook event.
    pub fn event_dedup(&self, event_type: &str, aggregate_id: &str) -> String {
        format!("{}:dedup:{event_type}:{aggregate_id}", self.prefix)
    }

    /// Marker used to suppress `scheduleNextEmail` when a followup was
    /// already created within the idempotency window after `delivered`.
    pub fn recent_followup(&self, lead_id: &str) -> String {
        format!("{}:recent_followup:{lead_id}", self.prefix)
    }
}

impl Default for EngineKeys {
    fn default() -> Self {
        Self::new("mailrun")
    }
}

/// The distributed K/V store contract used for counters and locks.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> EngineResult<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> EngineResult<()>;
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> EngineResult<()>;
    /// `INCR key`, returning the post-increment value.
    async fn incr(&self, key: &str) -> EngineResult<i64>;
    async fn expire(&self, key: &str, ttl_secs: u64) -> EngineResult<()>;
    /// `SET key value NX EX ttl_secs`; returns true if the key was set (lock acquired).
    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> EngineResult<bool>;
    /// Deletes `key` only if its current value equals `owner_token` (Lua
    /// compare-and-delete, same script the teacher's scheduler leadership
    /// release uses).
    async fn del_if_owner(&self, key: &str, owner_token: &str) -> EngineResult<bool>;
}

const DEL_IF_OWNER_SCRIPT: &str = r#"
    if redis.call("get", KEYS[1]) == ARGV[1] then
        return redis.call("del", KEYS[1])
    else
        return 0
    end
"#;

/// Redis-backed `KvStore`.
pub struct RedisKvStore {
    pool: Pool,
}

impl RedisKvStore {
    pub async fn connect(config: &RedisConfig) -> EngineResult<Self> {
        let cfg = Config::from_url(&config.url);
        let pool = cfg
            .builder()
            .map_err(|e| EngineError::Configuration(format!("invalid redis config: {e}")))?
            .max_size(config.pool_size)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| EngineError::Configuration(format!("failed to build redis pool: {e}")))?;

        let mut conn = pool.get().await?;
        redis::cmd("PING").query_async::<String>(&mut *conn).await?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn get(&self, key: &str) -> EngineResult<Option<String>> {
        let mut conn = self.pool.get().await?;
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: &str) -> EngineResult<()> {
        let mut conn = self.pool.get().await?;
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> EngineResult<()> {
        let mut conn = self.pool.get().await?;
        let _: () = conn.set_ex(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn incr(&self, key: &str) -> EngineResult<i64> {
        let mut conn = self.pool.get().await?;
        Ok(conn.incr(key, 1).await?)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> EngineResult<()> {
        let mut conn = self.pool.get().await?;
        let _: () = conn.expire(key, ttl_secs as i64).await?;
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> EngineResult<bool> {
        let mut conn = self.pool.get().await?;
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut *conn)
            .await?;
        Ok(result.is_some())
    }

    async fn del_if_owner(&self, key: &str, owner_token: &str) -> EngineResult<bool> {
        let mut conn = self.pool.get().await?;
        let deleted: i32 = redis::Script::new(DEL_IF_OWNER_SCRIPT)
            .key(key)
            .arg(owner_token)
            .invoke_async(&mut *conn)
            .await?;
        Ok(deleted == 1)
    }
}
