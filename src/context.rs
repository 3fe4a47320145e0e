//! Process-wide dependency graph for the scheduling and event engine.
//!
//! The teacher crate wires its services through a Shaku `Interface` module
//! (`di.rs`); this crate has no dependency on Shaku or `arcana-core`, so
//! `EngineContext` assembles the same collaborator graph as a plain struct
//! of `Arc<dyn Trait>` fields, built once at process start.

use std::sync::Arc;

use deadpool_redis::{Config, Runtime};

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::conditional_evaluator::ConditionalEvaluator;
use crate::dispatcher::Dispatcher;
use crate::error::EngineResult;
use crate::journey_guard::JourneyGuard;
use crate::kv::{EngineKeys, KvStore, RedisKvStore};
use crate::lock::DistributedLock;
use crate::metrics::register_metrics;
use crate::queue::{DurableQueue, RedisDurableQueue};
use crate::queue_watcher::QueueWatcher;
use crate::rate_limit::RateLimiter;
use crate::scheduler::Scheduler;
use crate::store::{PersistentStore, PgStore};

/// Every collaborator the engine needs, assembled once and shared via `Arc`.
///
/// Construct with [`EngineContext::connect`] in production, or assemble the
/// individual services directly (as the test modules throughout this crate
/// do) when wiring in fakes.
pub struct EngineContext {
    pub config: Arc<EngineConfig>,
    pub clock: Arc<dyn Clock>,
    pub kv: Arc<dyn KvStore>,
    pub store: Arc<dyn PersistentStore>,
    pub queue: Arc<dyn DurableQueue>,
    pub keys: EngineKeys,
    pub rate_limiter: Arc<RateLimiter>,
    pub journey_guard: Arc<JourneyGuard>,
    pub queue_watcher: Arc<QueueWatcher>,
    pub scheduler: Arc<Scheduler>,
    pub conditional_evaluator: Arc<ConditionalEvaluator>,
    pub dispatcher: Arc<Dispatcher>,
}

impl EngineContext {
    /// Connects to Redis and Postgres per `config` and assembles the full
    /// dependency graph. Registers metric descriptions as a side effect, the
    /// same point in process startup the teacher crate calls its own
    /// `register_metrics` equivalent.
    pub async fn connect(config: EngineConfig) -> EngineResult<Self> {
        register_metrics();

        let config = Arc::new(config);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let kv: Arc<dyn KvStore> = Arc::new(RedisKvStore::connect(&config.redis).await?);
        let store: Arc<dyn PersistentStore> = Arc::new(PgStore::connect(&config.database).await?);

        let queue_pool_cfg = Config::from_url(&config.redis.url);
        let queue_pool = queue_pool_cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| crate::error::EngineError::Configuration(format!("failed to build redis pool: {e}")))?;
        let queue: Arc<dyn DurableQueue> =
            Arc::new(RedisDurableQueue::new(queue_pool, config.redis.key_prefix.clone()));

        Ok(Self::assemble(config, clock, kv, store, queue))
    }

    /// Builds an `EngineContext` from already-constructed dependencies.
    /// Internal to this module: `connect` is the production entry point.
    fn assemble(
        config: Arc<EngineConfig>,
        clock: Arc<dyn Clock>,
        kv: Arc<dyn KvStore>,
        store: Arc<dyn PersistentStore>,
        queue: Arc<dyn DurableQueue>,
    ) -> Self {
        let keys = EngineKeys::new(&config.redis.key_prefix);

        let rate_limiter = Arc::new(RateLimiter::new(
            kv.clone(),
            store.clone(),
            keys.clone(),
            clock.clone(),
        ));

        let journey_guard = Arc::new(JourneyGuard::new(
            DistributedLock::new(kv.clone()),
            store.clone(),
            keys.clone(),
        ));

        let queue_watcher = Arc::new(QueueWatcher::new(store.clone(), queue.clone(), clock.clone()));

        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            rate_limiter.clone(),
            journey_guard.clone(),
            DistributedLock::new(kv.clone()),
            queue.clone(),
            queue_watcher.clone(),
            clock.clone(),
            keys.clone(),
            config.clone(),
        ));

        let conditional_evaluator = Arc::new(ConditionalEvaluator::new(
            store.clone(),
            queue.clone(),
            rate_limiter.clone(),
            clock.clone(),
            config.business_hours.fcfs_max_attempts,
        ));

        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            scheduler.clone(),
            queue_watcher.clone(),
            conditional_evaluator.clone(),
            queue.clone(),
            kv.clone(),
            keys.clone(),
            clock.clone(),
            config.scheduler.dedup_cache_ttl_secs as i64,
            config.scheduler.recent_followup_window_secs,
        ));

        Self {
            config,
            clock,
            kv,
            store,
            queue,
            keys,
            rate_limiter,
            journey_guard,
            queue_watcher,
            scheduler,
            conditional_evaluator,
            dispatcher,
        }
    }
}
