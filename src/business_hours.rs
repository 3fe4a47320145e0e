//! Working-day and business-hours calculations (spec §4.2). Every check goes
//! through a lead's IANA timezone; callers pass UTC instants in and get UTC
//! instants back.

use chrono::{DateTime, Duration, TimeZone, Utc};
use chrono_tz::Tz;

use crate::domain::settings::BusinessHoursSettings;
use crate::error::{EngineError, EngineResult};

/// Parses a lead's IANA timezone string, defaulting to UTC on an unknown
/// zone rather than failing the whole scheduling attempt.
pub fn resolve_timezone(tz_name: &str) -> Tz {
    tz_name.parse().unwrap_or(Tz::UTC)
}

/// True if `moment`, interpreted in `tz`, falls on a non-weekend day not
/// listed in `paused_dates`.
pub fn is_working_day(
    moment: DateTime<Utc>,
    tz: Tz,
    settings: &BusinessHoursSettings,
    paused_dates: &std::collections::BTreeSet<chrono::NaiveDate>,
) -> bool {
    let local = moment.with_timezone(&tz);
    let weekday = local.format("%w").to_string().parse::<u32>().unwrap_or(0);
    if settings.weekend_days.contains(&weekday) {
        return false;
    }
    !paused_dates.contains(&local.date_naive())
}

/// True if `moment`, interpreted in `tz`, falls within `[start_hour, end_hour)`.
pub fn is_within_business_hours(moment: DateTime<Utc>, tz: Tz, settings: &BusinessHoursSettings) -> bool {
    use chrono::Timelike;
    let hour = moment.with_timezone(&tz).hour();
    hour >= settings.start_hour && hour < settings.end_hour
}

/// Advances `from_moment` day by day (capped at 365 iterations) until a
/// working day is found, then sets the local hour to `start_hour`.
pub fn next_working_day(
    from_moment: DateTime<Utc>,
    tz: Tz,
    settings: &BusinessHoursSettings,
    paused_dates: &std::collections::BTreeSet<chrono::NaiveDate>,
) -> EngineResult<DateTime<Utc>> {
    let mut candidate = from_moment;
    for _ in 0..365 {
        candidate += Duration::days(1);
        if is_working_day(candidate, tz, settings, paused_dates) {
            return Ok(set_local_hour(candidate, tz, settings.start_hour));
        }
    }
    Err(EngineError::NoSlotAvailable)
}

/// Returns `moment` with the local hour (in `tz`) set to `hour`, minute and
/// second zeroed, converted back to UTC.
pub fn set_local_hour(moment: DateTime<Utc>, tz: Tz, hour: u32) -> DateTime<Utc> {
    let local = moment.with_timezone(&tz);
    let adjusted = local
        .date_naive()
        .and_hms_opt(hour, 0, 0)
        .expect("hour is always in 0..24");
    tz.from_local_datetime(&adjusted)
        .single()
        .unwrap_or_else(|| tz.from_utc_datetime(&adjusted))
        .with_timezone(&Utc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone as _;

    fn settings() -> BusinessHoursSettings {
        BusinessHoursSettings::default()
    }

    #[test]
    fn saturday_is_not_a_working_day() {
        let saturday = Utc.with_ymd_and_hms(2025, 7, 5, 10, 0, 0).unwrap();
        assert!(!is_working_day(saturday, Tz::UTC, &settings(), &Default::default()));
    }

    #[test]
    fn monday_is_a_working_day() {
        let monday = Utc.with_ymd_and_hms(2025, 7, 7, 10, 0, 0).unwrap();
        assert!(is_working_day(monday, Tz::UTC, &settings(), &Default::default()));
    }

    #[test]
    fn paused_date_is_not_a_working_day() {
        let monday = Utc.with_ymd_and_hms(2025, 7, 7, 10, 0, 0).unwrap();
        let mut paused = std::collections::BTreeSet::new();
        paused.insert(monday.date_naive());
        assert!(!is_working_day(monday, Tz::UTC, &settings(), &paused));
    }

    #[test]
    fn business_hours_boundaries_are_half_open() {
        let nine_am = Utc.with_ymd_and_hms(2025, 7, 7, 9, 0, 0).unwrap();
        let six_pm = Utc.with_ymd_and_hms(2025, 7, 7, 18, 0, 0).unwrap();
        assert!(is_within_business_hours(nine_am, Tz::UTC, &settings()));
        assert!(!is_within_business_hours(six_pm, Tz::UTC, &settings()));
    }

    #[test]
    fn next_working_day_skips_weekend() {
        let friday_evening = Utc.with_ymd_and_hms(2025, 7, 4, 20, 0, 0).unwrap();
        let next = next_working_day(friday_evening, Tz::UTC, &settings(), &Default::default()).unwrap();
        assert_eq!(next.with_timezone(&Tz::UTC).format("%A").to_string(), "Monday");
        assert_eq!(next.with_timezone(&Tz::UTC).format("%H:%M").to_string(), "09:00");
    }
}
