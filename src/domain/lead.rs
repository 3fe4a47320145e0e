//! The `Lead` entity and its status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use super::ids::LeadId;

/// A lead's terminal state. Once set, no job may be created or resumed for
/// this lead except through `resurrect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    Dead,
    Unsubscribed,
    Complaint,
}

impl fmt::Display for TerminalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TerminalState::Dead => "dead",
            TerminalState::Unsubscribed => "unsubscribed",
            TerminalState::Complaint => "complaint",
        };
        write!(f, "{s}")
    }
}

/// The delivery state portion of a mail-kind lead status, e.g. the
/// `scheduled` in `"First Followup:scheduled"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MailState {
    Scheduled,
    Rescheduled,
    Sent,
    Blocked,
    Failed,
    HardBounce,
    SoftBounce,
    Spam,
    Invalid,
    Error,
}

impl fmt::Display for MailState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MailState::Scheduled => "scheduled",
            MailState::Rescheduled => "rescheduled",
            MailState::Sent => "sent",
            MailState::Blocked => "blocked",
            MailState::Failed => "failed",
            MailState::HardBounce => "hard_bounce",
            MailState::SoftBounce => "soft_bounce",
            MailState::Spam => "spam",
            MailState::Invalid => "invalid",
            MailState::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// The canonical lead status, as allowed at the boundary (spec §6). This
/// type makes the "forbidden lead statuses" (engagement / transitional
/// statuses) unrepresentable: there is no variant for `opened`, `clicked`,
/// `paused`, `cancelled`, or `skipped`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeadStatus {
    /// `"{mailKindDisplayName}:{state}"`.
    Mail { mail_kind: String, state: MailState },
    /// `"condition {event}:{state}"`.
    Conditional {
        event: super::event::EngagementEvent,
        state: MailState,
    },
    Frozen,
    Converted,
    Idle,
    SequenceComplete,
    Unsubscribed,
    Dead,
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeadStatus::Mail { mail_kind, state } => write!(f, "{mail_kind}:{state}"),
            LeadStatus::Conditional { event, state } => write!(f, "condition {event}:{state}"),
            LeadStatus::Frozen => write!(f, "frozen"),
            LeadStatus::Converted => write!(f, "converted"),
            LeadStatus::Idle => write!(f, "idle"),
            LeadStatus::SequenceComplete => write!(f, "sequence_complete"),
            LeadStatus::Unsubscribed => write!(f, "unsubscribed"),
            LeadStatus::Dead => write!(f, "dead"),
        }
    }
}

impl Default for LeadStatus {
    fn default() -> Self {
        LeadStatus::Idle
    }
}

/// Identity and sequence state of a recipient.
///
/// `status` is private: per the engine's stricter resolution of the source
/// system's "forbidden lead statuses" leakage, the only code that may write
/// it is `crate::status_resolver`. Every other collaborator reads it through
/// `Lead::status()` and mutates the lead's *jobs*, then calls
/// `status_resolver::sync_lead_status_after_job_change`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub id: LeadId,
    pub email: String,
    pub name: String,
    pub country: Option<String>,
    pub city: Option<String>,
    pub timezone: String,
    status: LeadStatus,
    pub score: i64,
    pub tags: HashSet<String>,
    pub frozen_until: Option<DateTime<Utc>>,
    /// Set by the admin `convertLead` operation; forces lead status to
    /// `converted` (priority level 100) regardless of job state.
    pub converted: bool,
    pub followups_paused: bool,
    pub skipped_followups: HashSet<String>,
    pub terminal_state: Option<TerminalState>,
    pub terminal_state_at: Option<DateTime<Utc>>,
    pub terminal_reason: Option<String>,
    pub is_in_failure: bool,
    pub total_retries: u32,
    pub emails_sent: u32,
    pub emails_opened: u32,
    pub emails_clicked: u32,
    pub emails_bounced: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    /// Creates a new lead, defaulting `timezone` to UTC when neither country
    /// nor a pre-resolved timezone is known.
    pub fn new(email: impl Into<String>, name: impl Into<String>, timezone: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: LeadId::new(),
            email: email.into(),
            name: name.into(),
            country: None,
            city: None,
            timezone: timezone.unwrap_or_else(|| "UTC".to_string()),
            status: LeadStatus::Idle,
            score: 0,
            tags: HashSet::new(),
            frozen_until: None,
            converted: false,
            followups_paused: false,
            skipped_followups: HashSet::new(),
            terminal_state: None,
            terminal_state_at: None,
            terminal_reason: None,
            is_in_failure: false,
            total_retries: 0,
            emails_sent: 0,
            emails_opened: 0,
            emails_clicked: 0,
            emails_bounced: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// The lead's current canonical status.
    pub fn status(&self) -> &LeadStatus {
        &self.status
    }

    /// Writes the lead's canonical status. Only `status_resolver` should call
    /// this; it is `pub(crate)` rather than module-private purely because
    /// Rust has no "visible to exactly one sibling module" visibility and a
    /// full wrapper-capability-token indirection would be overkill for a
    /// single-crate invariant documented here and enforced by code review.
    pub(crate) fn set_status(&mut self, status: LeadStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// True once a terminal state forbids further scheduling.
    pub fn is_terminal(&self) -> bool {
        self.terminal_state.is_some()
    }

    /// Marks the lead terminal, recording the reason and timestamp.
    pub fn mark_terminal(&mut self, state: TerminalState, reason: impl Into<String>) {
        self.terminal_state = Some(state);
        self.terminal_state_at = Some(Utc::now());
        self.terminal_reason = Some(reason.into());
        self.updated_at = Utc::now();
    }

    /// Reverses a `dead` terminal state: the only path back to scheduling.
    /// Per spec this is only valid from `dead`; callers must check that
    /// themselves (`EngineError::Invariant` if misused).
    pub fn resurrect(&mut self) {
        self.terminal_state = None;
        self.terminal_state_at = None;
        self.terminal_reason = None;
        self.total_retries = 0;
        self.is_in_failure = false;
        self.set_status(LeadStatus::Idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_lead_defaults_to_utc() {
        let lead = Lead::new("a@example.com", "A", None);
        assert_eq!(lead.timezone, "UTC");
        assert_eq!(*lead.status(), LeadStatus::Idle);
    }

    #[test]
    fn mail_status_display_matches_spec_format() {
        let status = LeadStatus::Mail {
            mail_kind: "First Followup".to_string(),
            state: MailState::Scheduled,
        };
        assert_eq!(status.to_string(), "First Followup:scheduled");
    }

    #[test]
    fn conditional_status_display_matches_spec_format() {
        let status = LeadStatus::Conditional {
            event: super::super::event::EngagementEvent::Opened,
            state: MailState::Scheduled,
        };
        assert_eq!(status.to_string(), "condition opened:scheduled");
    }

    #[test]
    fn resurrect_clears_terminal_state() {
        let mut lead = Lead::new("a@example.com", "A", None);
        lead.mark_terminal(TerminalState::Dead, "max retries");
        lead.total_retries = 4;
        lead.resurrect();
        assert!(!lead.is_terminal());
        assert_eq!(lead.total_retries, 0);
        assert_eq!(*lead.status(), LeadStatus::Idle);
    }
}
