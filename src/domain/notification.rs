//! Admin notifications: the only user-visible surfacing of engine failures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{JobId, LeadId, NotificationId};

/// The reason a notification was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationReason {
    LeadDead,
    LeadComplaint,
    LeadUnsubscribed,
    JobFailedNeedsManualRetry,
    ReschedulingFailedNoSlot,
}

/// A single admin-facing notification row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub lead_id: LeadId,
    pub job_id: Option<JobId>,
    pub reason: NotificationReason,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub acknowledged: bool,
}

impl Notification {
    pub fn new(
        lead_id: LeadId,
        job_id: Option<JobId>,
        reason: NotificationReason,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: NotificationId::new(),
            lead_id,
            job_id,
            reason,
            message: message.into(),
            created_at: Utc::now(),
            acknowledged: false,
        }
    }
}
