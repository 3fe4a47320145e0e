//! `ConditionalEmail` rule definitions.

use serde::{Deserialize, Serialize};

use super::event::EngagementEvent;
use super::ids::ConditionalRuleId;

/// A rule that, given an engagement event on a specified step, schedules a
/// side-sequence email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionalEmailRule {
    pub id: ConditionalRuleId,
    pub name: String,
    pub trigger_event: EngagementEvent,
    /// The step (mail-kind display name) this rule watches.
    pub trigger_step: String,
    pub delay_hours: i64,
    pub template_id: String,
    /// If true and the rulebook's
    /// `conditional_email_actions.cancel_pending_followups_if_configured` is
    /// also set, pending followups are paused (never cancelled) when this
    /// rule fires.
    pub cancel_pending: bool,
    pub priority: i32,
    pub enabled: bool,
}
