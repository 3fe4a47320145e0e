//! Core domain entities: `Lead`, `Job`, `EmailSchedule`, event history/store,
//! `ConditionalEmail` rules, and `Settings`.

pub mod conditional;
pub mod event;
pub mod ids;
pub mod job;
pub mod lead;
pub mod notification;
pub mod schedule;
pub mod settings;

pub use conditional::ConditionalEmailRule;
pub use event::{
    EngagementEvent, EventCategory, EventHistoryEntry, EventStoreRecord, NormalizedEvent,
    NormalizedEventData, NormalizedEventType,
};
pub use ids::{ConditionalRuleId, JobId, LeadId, NotificationId};
pub use job::{Job, JobMetadata, JobStatus, MailCategory, MailKind, PauseReason};
pub use lead::{Lead, LeadStatus, MailState, TerminalState};
pub use notification::{Notification, NotificationReason};
pub use schedule::{EmailSchedule, FollowupEntry};
pub use settings::{
    BusinessHoursSettings, CheckStep, ConditionSpec, ConditionType, FollowupDef,
    RateLimitSettings, RetrySettings, Settings,
};
