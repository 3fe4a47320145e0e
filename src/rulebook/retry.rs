//! Retry policy: backoff schedule and dead-lettering threshold (spec §4.1).

use chrono::Duration as ChronoDuration;

use crate::config::RetryConfig;
use crate::domain::{Job, NormalizedEventType, Settings};

/// Exponential backoff, `initial * multiplier^retry_count`, capped at
/// `max_delay_hours`.
pub fn calculate_retry_delay(retry_count: u32, config: &RetryConfig) -> ChronoDuration {
    let initial_hours = config.soft_bounce_delay_hours as f64;
    let delay_hours = initial_hours * config.multiplier.powi(retry_count as i32);
    let capped_hours = delay_hours.min(config.max_delay_hours as f64);
    ChronoDuration::minutes((capped_hours * 60.0).round() as i64)
}

/// The normalized events that, on exhausted retries, dead-letter the job and
/// its lead.
fn is_dead_letter_event(event: NormalizedEventType) -> bool {
    matches!(
        event,
        NormalizedEventType::HardBounce
            | NormalizedEventType::Blocked
            | NormalizedEventType::Invalid
            | NormalizedEventType::Error
            | NormalizedEventType::Complaint
            | NormalizedEventType::Unsubscribed
    )
}

/// True if the next retry attempt on `job` would exceed its mail type's
/// configured max retries, for one of the dead-lettering event types.
pub fn should_mark_as_dead(job: &Job, event: NormalizedEventType, settings: &Settings) -> bool {
    if !is_dead_letter_event(event) {
        return false;
    }
    let max_retries = settings.max_retries_for(&job.kind.display_name());
    job.retry_count + 1 > max_retries
}
