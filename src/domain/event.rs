//! Provider event normalization, event history, and the event store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{JobId, LeadId};

/// The engagement events a `ConditionalEmail` rule can trigger on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementEvent {
    Opened,
    Clicked,
    Delivered,
    Bounced,
}

impl fmt::Display for EngagementEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngagementEvent::Opened => "opened",
            EngagementEvent::Clicked => "clicked",
            EngagementEvent::Delivered => "delivered",
            EngagementEvent::Bounced => "bounced",
        };
        write!(f, "{s}")
    }
}

/// The full set of normalized provider events the dispatcher consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizedEventType {
    Sent,
    Delivered,
    Opened,
    UniqueOpened,
    Clicked,
    SoftBounce,
    HardBounce,
    Deferred,
    Blocked,
    Spam,
    Unsubscribed,
    Complaint,
    Invalid,
    Error,
}

impl fmt::Display for NormalizedEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NormalizedEventType::Sent => "sent",
            NormalizedEventType::Delivered => "delivered",
            NormalizedEventType::Opened => "opened",
            NormalizedEventType::UniqueOpened => "unique_opened",
            NormalizedEventType::Clicked => "clicked",
            NormalizedEventType::SoftBounce => "soft_bounce",
            NormalizedEventType::HardBounce => "hard_bounce",
            NormalizedEventType::Deferred => "deferred",
            NormalizedEventType::Blocked => "blocked",
            NormalizedEventType::Spam => "spam",
            NormalizedEventType::Unsubscribed => "unsubscribed",
            NormalizedEventType::Complaint => "complaint",
            NormalizedEventType::Invalid => "invalid",
            NormalizedEventType::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// The category a normalized event falls into; drives dispatcher routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCategory {
    /// Delivery succeeded or the recipient engaged; schedule the next step.
    Success,
    /// Transient failure; reschedule with backoff unless retries are exhausted.
    AutoReschedule,
    /// Compliance failure; terminate the lead.
    Spam,
    /// Hard failure; pause siblings and notify.
    Failed,
    /// No special handling (e.g. bookkeeping-only events).
    Unknown,
}

impl NormalizedEventType {
    /// The event category this normalized event belongs to.
    pub fn category(&self) -> EventCategory {
        match self {
            NormalizedEventType::Sent
            | NormalizedEventType::Delivered
            | NormalizedEventType::Opened
            | NormalizedEventType::UniqueOpened
            | NormalizedEventType::Clicked => EventCategory::Success,
            NormalizedEventType::SoftBounce | NormalizedEventType::Deferred => {
                EventCategory::AutoReschedule
            }
            NormalizedEventType::Unsubscribed | NormalizedEventType::Complaint => {
                EventCategory::Spam
            }
            NormalizedEventType::HardBounce
            | NormalizedEventType::Blocked
            | NormalizedEventType::Invalid
            | NormalizedEventType::Error => EventCategory::Failed,
        }
    }

    /// The corresponding `JobStatus` this event records on the target job,
    /// where a direct mapping exists.
    pub fn as_job_status(&self) -> super::job::JobStatus {
        use super::job::JobStatus;
        match self {
            NormalizedEventType::Sent => JobStatus::Sent,
            NormalizedEventType::Delivered => JobStatus::Delivered,
            NormalizedEventType::Opened => JobStatus::Opened,
            NormalizedEventType::UniqueOpened => JobStatus::UniqueOpened,
            NormalizedEventType::Clicked => JobStatus::Clicked,
            NormalizedEventType::SoftBounce => JobStatus::SoftBounce,
            NormalizedEventType::HardBounce => JobStatus::HardBounce,
            NormalizedEventType::Deferred => JobStatus::Deferred,
            NormalizedEventType::Blocked => JobStatus::Blocked,
            NormalizedEventType::Spam => JobStatus::Spam,
            NormalizedEventType::Unsubscribed => JobStatus::Unsubscribed,
            NormalizedEventType::Complaint => JobStatus::Complaint,
            NormalizedEventType::Invalid => JobStatus::Invalid,
            NormalizedEventType::Error => JobStatus::Error,
        }
    }

    /// The engagement-trigger equivalent of this event, if any, for matching
    /// against `ConditionalEmail.trigger_event`.
    pub fn as_engagement_event(&self) -> Option<EngagementEvent> {
        match self {
            NormalizedEventType::Opened | NormalizedEventType::UniqueOpened => {
                Some(EngagementEvent::Opened)
            }
            NormalizedEventType::Clicked => Some(EngagementEvent::Clicked),
            NormalizedEventType::Delivered => Some(EngagementEvent::Delivered),
            NormalizedEventType::SoftBounce | NormalizedEventType::HardBounce => {
                Some(EngagementEvent::Bounced)
            }
            _ => None,
        }
    }
}

/// Extra data carried alongside a normalized event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NormalizedEventData {
    pub reason: Option<String>,
    pub message_id: Option<String>,
    pub provider_event_name: Option<String>,
}

/// An inbound provider webhook event, normalized to the engine's vocabulary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub event_type: NormalizedEventType,
    pub lead_id: LeadId,
    pub email_job_id: JobId,
    pub event_data: NormalizedEventData,
    pub occurred_at: DateTime<Utc>,
}

/// An append-only entry in a lead's event history (for UI display).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventHistoryEntry {
    pub lead_id: LeadId,
    pub event: NormalizedEventType,
    pub timestamp: DateTime<Utc>,
    pub email_type: String,
    pub email_job_id: JobId,
    pub details: Option<String>,
}

/// A deduplicated record in the append-only event store, keyed by
/// `(event_type, aggregate_id)` with an idempotency key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventStoreRecord {
    pub event_type: NormalizedEventType,
    pub aggregate_id: String,
    pub idempotency_key: String,
    pub recorded_at: DateTime<Utc>,
}

impl EventStoreRecord {
    /// Builds the composite dedup key for a normalized event, keyed off the
    /// job id (the aggregate most webhook deliveries repeat against).
    pub fn key_for(event: &NormalizedEvent) -> (NormalizedEventType, String) {
        (event.event_type, event.email_job_id.to_string())
    }
}

/// Maps an email provider's own event name to the engine's normalized
/// vocabulary, per the pass-through/rename table at the webhook boundary.
pub fn normalize_provider_event_name(provider_name: &str) -> Option<NormalizedEventType> {
    match provider_name {
        "hardBounces" => Some(NormalizedEventType::HardBounce),
        "invalidemail" => Some(NormalizedEventType::Invalid),
        "deferred" => Some(NormalizedEventType::Deferred),
        "opened" => Some(NormalizedEventType::Opened),
        "unique_opened" => Some(NormalizedEventType::UniqueOpened),
        "clicked" => Some(NormalizedEventType::Clicked),
        "delivered" => Some(NormalizedEventType::Delivered),
        "sent" => Some(NormalizedEventType::Sent),
        "blocked" => Some(NormalizedEventType::Blocked),
        "spam" => Some(NormalizedEventType::Spam),
        "unsubscribed" => Some(NormalizedEventType::Unsubscribed),
        "complaint" => Some(NormalizedEventType::Complaint),
        "error" => Some(NormalizedEventType::Error),
        "softBounce" | "soft_bounce" => Some(NormalizedEventType::SoftBounce),
        _ => None,
    }
}
