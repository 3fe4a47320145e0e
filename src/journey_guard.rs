//! Unique-Journey Guard (spec §4.4): serializes scheduling attempts per
//! `(leadId, type)` and, once the lock is held, asserts invariant I1 (at most
//! one active job per lead) and rejects same-type duplicates.

use std::sync::Arc;

use crate::domain::{Job, JobStatus, LeadId, MailKind};
use crate::error::{EngineError, EngineResult};
use crate::kv::EngineKeys;
use crate::lock::{DistributedLock, LockGuard};
use crate::store::PersistentStore;

/// A lock-key fragment identifying a mail kind for journey-guard purposes.
/// Distinct followups and distinct conditional rules get distinct locks;
/// `Initial` and `Manual` each get one.
fn lock_fragment(kind: &MailKind) -> String {
    match kind {
        MailKind::Initial => "initial".to_string(),
        MailKind::Followup(name) => format!("followup:{name}"),
        MailKind::Manual => "manual".to_string(),
        MailKind::Conditional { rule_id, .. } => format!("conditional:{rule_id}"),
    }
}

/// Guards scheduling attempts against concurrent duplication.
pub struct JourneyGuard {
    lock: DistributedLock,
    store: Arc<dyn PersistentStore>,
    keys: EngineKeys,
}

impl JourneyGuard {
    pub fn new(lock: DistributedLock, store: Arc<dyn PersistentStore>, keys: EngineKeys) -> Self {
        Self { lock, store, keys }
    }

    /// Acquires the per-`(lead, type)` lock. Callers must hold this guard for
    /// the full duration of the scheduling attempt and release it afterward.
    pub async fn acquire(&self, lead_id: LeadId, kind: &MailKind, ttl_secs: u64) -> EngineResult<LockGuard> {
        let key = self.keys.journey_lock(&lead_id.to_string(), &lock_fragment(kind));
        self.lock.acquire(&key, ttl_secs).await
    }

    pub async fn release(&self, guard: LockGuard) -> EngineResult<()> {
        self.lock.release(guard).await
    }

    /// Asserts no duplicate exists for `(lead_id, kind)`, and that invariant
    /// I1 holds (no other active job of any type), unless
    /// `skip_duplicate_check` is set for an explicit retry.
    ///
    /// Must be called while holding the lock from `acquire`.
    pub async fn check_no_duplicate(
        &self,
        lead_id: LeadId,
        kind: &MailKind,
        skip_duplicate_check: bool,
    ) -> EngineResult<()> {
        if skip_duplicate_check {
            return Ok(());
        }

        let jobs = self.store.jobs_for_lead(lead_id).await?;

        if let Some(existing) = jobs.iter().find(|j| j.status.is_active() && &j.kind == kind) {
            return Err(EngineError::DuplicateActiveJob {
                lead_id: lead_id.to_string(),
                mail_type: existing.kind.display_name(),
            });
        }

        if let Some(active) = jobs.iter().find(|j| j.status.is_active()) {
            return Err(EngineError::DuplicateActiveJob {
                lead_id: lead_id.to_string(),
                mail_type: active.kind.display_name(),
            });
        }

        Ok(())
    }

    /// Convenience: jobs for a lead with an active status, for callers that
    /// already hold the lock and want the list rather than just a yes/no.
    pub async fn active_jobs(&self, lead_id: LeadId) -> EngineResult<Vec<Job>> {
        let jobs = self.store.jobs_for_lead(lead_id).await?;
        Ok(jobs.into_iter().filter(|j| j.status.is_active()).collect())
    }
}
