//! Rate-Limit Service (spec §4.3): authoritative counter of "emails reserved
//! per window." Redis is the fast path; the persistent store is the source
//! of truth after reconciliation.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::domain::settings::RateLimitSettings;
use crate::error::{EngineError, EngineResult};
use crate::kv::{EngineKeys, KvStore};
use crate::store::PersistentStore;
use chrono::{DateTime, Duration as ChronoDuration, Utc};

/// The outcome of a successful slot reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservedSlot {
    pub reserved_time: DateTime<Utc>,
}

/// Capacity snapshot for a window, always recomputed from the persistent
/// store (used for display and for the FCFS search).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotCapacity {
    pub used: i64,
    pub total: i64,
    pub available: i64,
    pub window_start: DateTime<Utc>,
}

/// Authoritative per-window send-rate counter.
pub struct RateLimiter {
    kv: Arc<dyn KvStore>,
    store: Arc<dyn PersistentStore>,
    keys: EngineKeys,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(
        kv: Arc<dyn KvStore>,
        store: Arc<dyn PersistentStore>,
        keys: EngineKeys,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { kv, store, keys, clock }
    }

    fn window_bounds(&self, t: DateTime<Utc>, settings: &RateLimitSettings) -> (DateTime<Utc>, DateTime<Utc>) {
        let window_ms = i64::from(settings.window_minutes) * 60_000;
        let t_ms = t.timestamp_millis();
        let window_start_ms = (t_ms.div_euclid(window_ms)) * window_ms;
        let window_start = DateTime::<Utc>::from_timestamp_millis(window_start_ms).unwrap_or(t);
        let window_end = window_start + ChronoDuration::milliseconds(window_ms);
        (window_start, window_end)
    }

    /// Always recomputes capacity from the persistent store.
    pub async fn get_slot_capacity(
        &self,
        t: DateTime<Utc>,
        settings: &RateLimitSettings,
    ) -> EngineResult<SlotCapacity> {
        let (window_start, window_end) = self.window_bounds(t, settings);
        let used = self
            .store
            .count_in_progress_in_window(window_start, window_end)
            .await?;
        let total = i64::from(settings.emails_per_window);
        Ok(SlotCapacity {
            used,
            total,
            available: (total - used).max(0),
            window_start,
        })
    }

    /// Atomically reserves a slot at `target_time`. On success, `target_time`
    /// is returned unchanged; the FCFS finder is responsible for choosing a
    /// time that already has capacity.
    pub async fn reserve_slot(
        &self,
        target_time: DateTime<Utc>,
        settings: &RateLimitSettings,
    ) -> EngineResult<ReservedSlot> {
        let (window_start, window_end) = self.window_bounds(target_time, settings);
        let used = self
            .store
            .count_in_progress_in_window(window_start, window_end)
            .await?;
        let total = i64::from(settings.emails_per_window);

        if used >= total {
            let key = self.keys.rate_limit_window(window_start.timestamp_millis());
            let window_ms = i64::from(settings.window_minutes) * 60;
            self.kv.set_ex(&key, &used.to_string(), (window_ms * 2) as u64).await?;
            return Err(EngineError::RateLimitFull(window_end.to_rfc3339()));
        }

        let key = self.keys.rate_limit_window(window_start.timestamp_millis());
        let ttl = u64::try_from(i64::from(settings.window_minutes) * 60 * 2).unwrap_or(1800);
        let post_incr = self.kv.incr(&key).await?;
        self.kv.expire(&key, ttl).await?;

        if post_incr > total {
            warn!(window_start = %window_start, post_incr, total, "rate limit window over-reserved");
            return Err(EngineError::RateLimitFull(window_end.to_rfc3339()));
        }

        debug!(window_start = %window_start, post_incr, total, "reserved rate-limit slot");
        Ok(ReservedSlot { reserved_time: target_time })
    }

    /// Decrements the Redis counter for `target_time`'s window. Called from
    /// `scheduler::schedule_email_job_guarded` when a slot was reserved but
    /// the post-reservation duplicate re-check then loses the race; never
    /// from generic error handling (transient over-count elsewhere self-heals
    /// on the next window access).
    pub async fn release_slot(&self, target_time: DateTime<Utc>, settings: &RateLimitSettings) -> EngineResult<()> {
        let (window_start, _) = self.window_bounds(target_time, settings);
        let key = self.keys.rate_limit_window(window_start.timestamp_millis());
        if let Some(current) = self.kv.get(&key).await? {
            if let Ok(n) = current.parse::<i64>() {
                if n > 0 {
                    self.kv.set(&key, &(n - 1).to_string()).await?;
                }
            }
        }
        Ok(())
    }
}
