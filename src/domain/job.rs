//! The `Job` entity: a single planned or sent email instance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::event::EngagementEvent;
use super::ids::{ConditionalRuleId, JobId, LeadId};

/// The mail kind a job represents. Replaces the source system's stringly
/// typed `type` field (including the `conditional:<name>` embedding) with a
/// sum type; display strings are derived from it, never parsed back out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MailKind {
    /// The first email in a lead's sequence.
    Initial,
    /// A named followup step.
    Followup(String),
    /// A manually scheduled one-off email.
    Manual,
    /// An email triggered by an engagement event on another job.
    Conditional {
        rule_id: ConditionalRuleId,
        trigger_event: EngagementEvent,
    },
}

impl MailKind {
    /// The coarse category this mail kind belongs to.
    pub fn category(&self) -> MailCategory {
        match self {
            MailKind::Initial => MailCategory::Initial,
            MailKind::Followup(_) => MailCategory::Followup,
            MailKind::Manual => MailCategory::Manual,
            MailKind::Conditional { .. } => MailCategory::Conditional,
        }
    }

    /// A human-readable display name, e.g. `"First Followup"` or `"Initial Email"`.
    pub fn display_name(&self) -> String {
        match self {
            MailKind::Initial => "Initial Email".to_string(),
            MailKind::Followup(name) => name.clone(),
            MailKind::Manual => "Manual".to_string(),
            MailKind::Conditional { trigger_event, .. } => {
                format!("condition {trigger_event}")
            }
        }
    }

    /// Returns true if this is a conditional mail kind triggered by `event`.
    pub fn is_conditional_for(&self, event: EngagementEvent) -> bool {
        matches!(self, MailKind::Conditional { trigger_event, .. } if *trigger_event == event)
    }
}

impl fmt::Display for MailKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// The coarse category a `MailKind` belongs to. Drives priority and
/// action-permission lookups in the rulebook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MailCategory {
    Initial,
    Followup,
    Manual,
    Conditional,
}

impl fmt::Display for MailCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MailCategory::Initial => "initial",
            MailCategory::Followup => "followup",
            MailCategory::Manual => "manual",
            MailCategory::Conditional => "conditional",
        };
        write!(f, "{s}")
    }
}

/// The exhaustive job status alphabet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    // Active: awaiting delivery.
    Pending,
    Queued,
    Scheduled,
    Rescheduled,
    Deferred,

    // Inactive pending: recoverable without a retry increment.
    Paused,

    // Sent path.
    Sent,
    Delivered,
    Opened,
    UniqueOpened,
    Clicked,

    // Hard failure.
    SoftBounce,
    HardBounce,
    Blocked,
    Spam,
    Invalid,
    Error,
    Failed,

    // User/system action.
    Cancelled,
    Skipped,

    // Lead-lifecycle events recorded against the triggering job.
    Unsubscribed,
    Complaint,
    Dead,
}

impl JobStatus {
    /// Any job status signaling "awaits delivery".
    pub const ACTIVE: &'static [JobStatus] = &[
        JobStatus::Pending,
        JobStatus::Queued,
        JobStatus::Scheduled,
        JobStatus::Rescheduled,
        JobStatus::Deferred,
    ];

    /// Returns true if this status counts toward invariant I1 (at most one
    /// active job per lead) and toward rate-limit window occupancy.
    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }

    /// Returns true if no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Cancelled
                | JobStatus::Skipped
                | JobStatus::Unsubscribed
                | JobStatus::Complaint
                | JobStatus::Dead
                | JobStatus::Failed
        )
    }

    /// Returns true if this is a hard or soft failure status.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            JobStatus::SoftBounce
                | JobStatus::HardBounce
                | JobStatus::Blocked
                | JobStatus::Spam
                | JobStatus::Invalid
                | JobStatus::Error
                | JobStatus::Failed
        )
    }

    /// Returns true if this status may be retried (soft failures only).
    pub fn can_retry(&self) -> bool {
        matches!(self, JobStatus::SoftBounce | JobStatus::Deferred)
    }

    /// Returns true if a successfully-delivered/engaged state.
    pub fn is_successfully_sent(&self) -> bool {
        matches!(
            self,
            JobStatus::Sent
                | JobStatus::Delivered
                | JobStatus::Opened
                | JobStatus::UniqueOpened
                | JobStatus::Clicked
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::Scheduled => "scheduled",
            JobStatus::Rescheduled => "rescheduled",
            JobStatus::Deferred => "deferred",
            JobStatus::Paused => "paused",
            JobStatus::Sent => "sent",
            JobStatus::Delivered => "delivered",
            JobStatus::Opened => "opened",
            JobStatus::UniqueOpened => "unique_opened",
            JobStatus::Clicked => "clicked",
            JobStatus::SoftBounce => "soft_bounce",
            JobStatus::HardBounce => "hard_bounce",
            JobStatus::Blocked => "blocked",
            JobStatus::Spam => "spam",
            JobStatus::Invalid => "invalid",
            JobStatus::Error => "error",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Skipped => "skipped",
            JobStatus::Unsubscribed => "unsubscribed",
            JobStatus::Complaint => "complaint",
            JobStatus::Dead => "dead",
        };
        write!(f, "{s}")
    }
}

/// Why a paused job was paused, or why it was cancelled. Kept distinct from
/// a bare `String` so handlers can match on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PauseReason {
    /// Paused because a higher-priority mail kind was scheduled.
    HigherPriorityScheduled { by: String },
    /// Paused because a conditional-email rule fired and configured
    /// `cancelPendingFollowupsIfConfigured`.
    ConditionalPriority,
}

impl fmt::Display for PauseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PauseReason::HigherPriorityScheduled { by } => {
                write!(f, "Higher priority {by} scheduled")
            }
            PauseReason::ConditionalPriority => write!(f, "priority_paused"),
        }
    }
}

/// Strongly-typed extension data carried by a job, replacing the source
/// system's free-form metadata bag.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobMetadata {
    /// The id this job was pushed to the durable queue under, if enqueued.
    pub queue_job_id: Option<String>,
    /// IANA timezone the job's `scheduled_for` was computed in.
    pub timezone: Option<String>,
    /// The engagement event that triggered this job, for conditional mail.
    pub trigger_event: Option<EngagementEvent>,
    /// True if this job bypasses business-hours constraints (flagged manual send).
    pub manual_override_hours: bool,
    /// If this job was superseded by a reschedule, the successor's id.
    pub rescheduled_to: Option<JobId>,
    /// If this job is the successor of a reschedule, the predecessor's id.
    pub original_job_id: Option<JobId>,
    /// Why this job is currently paused.
    pub paused_reason: Option<PauseReason>,
    /// The mail kind display name that caused this job to be paused.
    pub paused_by_job_type: Option<String>,
}

/// A single planned or sent email instance for a lead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub lead_id: LeadId,
    pub kind: MailKind,
    pub status: JobStatus,
    pub scheduled_for: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub template_id: Option<String>,
    pub condition: Option<super::settings::ConditionSpec>,
    pub idempotency_key: String,
    pub metadata: JobMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Creates a new pending job for `lead_id`, generating a fresh id and
    /// idempotency key.
    pub fn new(lead_id: LeadId, kind: MailKind, scheduled_for: DateTime<Utc>) -> Self {
        let id = JobId::new();
        let now = Utc::now();
        Self {
            idempotency_key: format!("{lead_id}:{id}"),
            id,
            lead_id,
            kind,
            status: JobStatus::Pending,
            scheduled_for,
            sent_at: None,
            failed_at: None,
            retry_count: 0,
            last_error: None,
            template_id: None,
            condition: None,
            metadata: JobMetadata::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The status-display string per spec §4.1: conditional jobs render as
    /// `"condition {event}:{status}"`, everything else as `"{name}:{status}"`.
    pub fn display_status(&self) -> String {
        match &self.kind {
            MailKind::Conditional { trigger_event, .. } => {
                format!("condition {trigger_event}:{}", self.status)
            }
            other => format!("{}:{}", other.display_name(), self.status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_statuses_match_spec_list() {
        assert!(JobStatus::Pending.is_active());
        assert!(JobStatus::Rescheduled.is_active());
        assert!(!JobStatus::Paused.is_active());
        assert!(!JobStatus::Sent.is_active());
    }

    #[test]
    fn display_status_for_conditional() {
        let job = Job::new(
            LeadId::new(),
            MailKind::Conditional {
                rule_id: ConditionalRuleId::new(),
                trigger_event: EngagementEvent::Opened,
            },
            Utc::now(),
        );
        assert_eq!(job.display_status(), "condition opened:pending");
    }

    #[test]
    fn display_status_for_followup() {
        let job = Job::new(
            LeadId::new(),
            MailKind::Followup("First Followup".to_string()),
            Utc::now(),
        );
        assert_eq!(job.display_status(), "First Followup:pending");
    }

    #[test]
    fn mail_kind_display_never_reparsed() {
        let kind = MailKind::Followup("Second Followup".to_string());
        assert_eq!(kind.category(), MailCategory::Followup);
    }
}
