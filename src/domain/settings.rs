//! The `Settings` singleton and the step/condition definitions it carries.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// The kind of condition guarding a followup step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionType {
    /// No condition; always schedule once reached.
    Always,
    IfOpened,
    IfClicked,
    IfNotOpened,
    IfNotClicked,
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConditionType::Always => "always",
            ConditionType::IfOpened => "if_opened",
            ConditionType::IfClicked => "if_clicked",
            ConditionType::IfNotOpened => "if_not_opened",
            ConditionType::IfNotClicked => "if_not_clicked",
        };
        write!(f, "{s}")
    }
}

/// Which prior step a condition checks. `Previous` resolves to the step
/// immediately before this one in the sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckStep {
    Previous,
    Named(String),
}

/// The condition guarding a followup step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionSpec {
    pub condition_type: ConditionType,
    pub check_step: Option<CheckStep>,
    pub skip_if_not_met: bool,
}

impl ConditionSpec {
    /// An unconditional step.
    pub fn always() -> Self {
        Self {
            condition_type: ConditionType::Always,
            check_step: None,
            skip_if_not_met: false,
        }
    }
}

/// A single followup step definition in the lead's sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowupDef {
    /// The followup's unique display name within the sequence, e.g.
    /// `"First Followup"`.
    pub name: String,
    /// Position in the ordered sequence.
    pub order: u32,
    /// Whether this step is currently enabled.
    pub enabled: bool,
    /// Delay in days from the base time (see `scheduleNextEmail` step 12).
    pub delay_days: i64,
    pub template_id: String,
    pub condition: ConditionSpec,
}

/// Per-mail-type retry overrides and global defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub soft_bounce_delay_hours: i64,
    /// Per-mail-type-name overrides for `max_attempts`.
    pub per_type_max_attempts: HashMap<String, u32>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            soft_bounce_delay_hours: 2,
            per_type_max_attempts: HashMap::new(),
        }
    }
}

/// Business-hours and rate-limit policy, overridable per tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessHoursSettings {
    pub start_hour: u32,
    pub end_hour: u32,
    pub weekend_days: BTreeSet<u32>,
}

impl Default for BusinessHoursSettings {
    fn default() -> Self {
        Self {
            start_hour: 9,
            end_hour: 18,
            weekend_days: [0, 6].into_iter().collect(),
        }
    }
}

/// Rate-limit policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitSettings {
    pub emails_per_window: u32,
    pub window_minutes: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            emails_per_window: 50,
            window_minutes: 15,
        }
    }
}

/// The `Settings` singleton: business hours, rate limit, retry policy,
/// paused dates, and the ordered followup sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub business_hours: BusinessHoursSettings,
    pub rate_limit: RateLimitSettings,
    pub retry: RetrySettings,
    pub paused_dates: BTreeSet<NaiveDate>,
    pub followups: Vec<FollowupDef>,
    /// The rulebook-level toggle gating `ConditionalEmailRule.cancel_pending`
    /// (spec §4.7 step 4: "if `rule.cancelPending` AND rulebook's
    /// `conditionalEmailActions.cancelPendingFollowupsIfConfigured`").
    pub conditional_cancel_pending_followups: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            business_hours: BusinessHoursSettings::default(),
            rate_limit: RateLimitSettings::default(),
            retry: RetrySettings::default(),
            paused_dates: BTreeSet::new(),
            followups: Vec::new(),
            conditional_cancel_pending_followups: true,
        }
    }
}

impl Settings {
    /// The enabled followups in sequence order, skipping any the lead has
    /// globally skipped.
    pub fn active_sequence<'a>(
        &'a self,
        skipped: &'a std::collections::HashSet<String>,
    ) -> impl Iterator<Item = &'a FollowupDef> {
        let mut defs: Vec<&FollowupDef> = self
            .followups
            .iter()
            .filter(|f| f.enabled && !skipped.contains(&f.name))
            .collect();
        defs.sort_by_key(|f| f.order);
        defs.into_iter()
    }

    /// Resolves the max retry attempts for a mail type name, falling back
    /// from per-type override to the global default.
    pub fn max_retries_for(&self, mail_type_name: &str) -> u32 {
        self.retry
            .per_type_max_attempts
            .get(mail_type_name)
            .copied()
            .unwrap_or(self.retry.max_attempts)
    }
}
