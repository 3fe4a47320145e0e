//! Inbound webhook normalization: maps a provider's raw event payload into a
//! `NormalizedEvent` the dispatcher consumes. The name-to-`NormalizedEventType`
//! table itself lives in `domain::event` since it is pure domain vocabulary;
//! this module is the thin boundary adapter around it.

use chrono::{DateTime, Utc};

use crate::domain::{normalize_provider_event_name, JobId, LeadId, NormalizedEvent, NormalizedEventData};
use crate::error::{EngineError, EngineResult};

/// The raw shape a provider webhook delivers, prior to normalization.
#[derive(Debug, Clone)]
pub struct RawProviderEvent {
    pub provider_event_name: String,
    pub lead_id: LeadId,
    pub email_job_id: JobId,
    pub reason: Option<String>,
    pub message_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Normalizes a raw provider event, rejecting unrecognized event names rather
/// than silently dropping them.
pub fn normalize_provider_event(raw: RawProviderEvent) -> EngineResult<NormalizedEvent> {
    let event_type = normalize_provider_event_name(&raw.provider_event_name).ok_or_else(|| {
        EngineError::Validation(format!("unrecognized provider event: {}", raw.provider_event_name))
    })?;

    Ok(NormalizedEvent {
        event_type,
        lead_id: raw.lead_id,
        email_job_id: raw.email_job_id,
        event_data: NormalizedEventData {
            reason: raw.reason,
            message_id: raw.message_id,
            provider_event_name: Some(raw.provider_event_name),
        },
        occurred_at: raw.occurred_at,
    })
}
