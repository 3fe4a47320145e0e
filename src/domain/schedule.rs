//! `EmailSchedule`: the per-lead UI projection. Derived state, reconciled on
//! every job change — never a source of truth.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{JobId, LeadId};
use super::job::JobStatus;

/// One entry in the followup list shown to the UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowupEntry {
    pub name: String,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub order: u32,
    pub is_conditional: bool,
    pub job_id: Option<JobId>,
}

/// The per-lead schedule projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailSchedule {
    pub lead_id: LeadId,
    pub initial_scheduled_for: Option<DateTime<Utc>>,
    pub initial_status: Option<JobStatus>,
    pub next_scheduled_email: Option<DateTime<Utc>>,
    pub followups: Vec<FollowupEntry>,
}

impl EmailSchedule {
    /// An empty projection for a lead with no jobs yet.
    pub fn empty(lead_id: LeadId) -> Self {
        Self {
            lead_id,
            initial_scheduled_for: None,
            initial_status: None,
            next_scheduled_email: None,
            followups: Vec::new(),
        }
    }

    /// Recomputes `next_scheduled_email` from the current followup list and
    /// the initial email, choosing the earliest still-pending slot.
    pub fn reconcile_next(&mut self) {
        let mut candidates: Vec<DateTime<Utc>> = self
            .followups
            .iter()
            .filter(|f| f.status.is_active())
            .filter_map(|f| f.scheduled_for)
            .collect();
        if matches!(
            self.initial_status,
            Some(status) if status.is_active()
        ) {
            if let Some(t) = self.initial_scheduled_for {
                candidates.push(t);
            }
        }
        self.next_scheduled_email = candidates.into_iter().min();
    }

    /// Upserts a followup entry by name, replacing any prior entry of the
    /// same name (e.g. after a reschedule supersedes it).
    pub fn upsert_followup(&mut self, entry: FollowupEntry) {
        if let Some(existing) = self.followups.iter_mut().find(|f| f.name == entry.name) {
            *existing = entry;
        } else {
            self.followups.push(entry);
        }
        self.followups.sort_by_key(|f| f.order);
        self.reconcile_next();
    }
}
