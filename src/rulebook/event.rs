//! Event categorization: a thin, named wrapper over
//! `NormalizedEventType::category`, kept here so the dispatcher never reaches
//! past the rulebook for this decision (spec §4.1).

use crate::domain::{EventCategory, NormalizedEventType};

pub fn get_event_category(event: NormalizedEventType) -> EventCategory {
    event.category()
}
