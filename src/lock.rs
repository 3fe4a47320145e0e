//! Distributed Lock Service: acquire/release named locks with TTL against
//! the shared K/V store. Used to serialize per-lead scheduling.

use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::kv::KvStore;

/// A held lock. Dropping this without calling `release` leaves the lock to
/// expire on its own TTL (the crashed-holder case the spec calls for); the
/// engine always calls `release` explicitly on the happy path.
pub struct LockGuard {
    key: String,
    token: String,
}

/// Acquire/release named locks with a TTL, backed by `SET NX EX` + a
/// Lua-guarded compare-and-delete release, mirroring the scheduler
/// leadership lock pattern used elsewhere in this codebase's lineage.
pub struct DistributedLock {
    kv: Arc<dyn KvStore>,
}

impl DistributedLock {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Attempts to acquire `key` for `ttl_secs`. Returns
    /// `EngineError::LockHeld` if another holder already owns it; callers
    /// must treat that as a guard failure and silently return (spec §5).
    pub async fn acquire(&self, key: &str, ttl_secs: u64) -> EngineResult<LockGuard> {
        let token = Uuid::new_v4().to_string();
        let acquired = self.kv.set_nx_ex(key, &token, ttl_secs).await?;
        if !acquired {
            debug!(lock_key = %key, "lock held by another holder");
            return Err(EngineError::LockHeld(key.to_string()));
        }
        Ok(LockGuard {
            key: key.to_string(),
            token,
        })
    }

    /// Releases `guard`, but only if this process still owns it (the
    /// compare-and-delete prevents releasing a lock some other holder
    /// acquired after our TTL expired).
    pub async fn release(&self, guard: LockGuard) -> EngineResult<()> {
        let released = self.kv.del_if_owner(&guard.key, &guard.token).await?;
        if !released {
            warn!(lock_key = %guard.key, "lock was not owned at release time, TTL likely expired");
        }
        Ok(())
    }
}
