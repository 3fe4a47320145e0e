//! The first-come-first-served slot finder (spec §4.5.1): the earliest
//! working-hours instant at or after a minimum time that still has
//! rate-limit capacity.

use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use chrono_tz::Tz;
use std::collections::BTreeSet;

use crate::business_hours;
use crate::domain::{BusinessHoursSettings, RateLimitSettings};
use crate::error::{EngineError, EngineResult};
use crate::rate_limit::RateLimiter;

/// Finds the earliest instant at or after `min_time` (and never before
/// `now`) that falls on a working day, within business hours, and has
/// rate-limit capacity. Caps the search at `max_attempts` windows.
pub async fn find_slot(
    rate_limiter: &RateLimiter,
    min_time: DateTime<Utc>,
    now: DateTime<Utc>,
    tz: Tz,
    business_hours: &BusinessHoursSettings,
    rate_limit: &RateLimitSettings,
    paused_dates: &BTreeSet<chrono::NaiveDate>,
    max_attempts: u32,
) -> EngineResult<DateTime<Utc>> {
    let mut candidate = round_up_to_window(min_time.max(now), rate_limit.window_minutes);

    for _ in 0..max_attempts {
        if !crate::business_hours::is_working_day(candidate, tz, business_hours, paused_dates) {
            candidate = crate::business_hours::next_working_day(candidate, tz, business_hours, paused_dates)?;
            continue;
        }

        if !business_hours::is_within_business_hours(candidate, tz, business_hours) {
            let local_hour = candidate.with_timezone(&tz).hour();
            if local_hour < business_hours.start_hour {
                candidate = business_hours::set_local_hour(candidate, tz, business_hours.start_hour);
            } else {
                candidate = crate::business_hours::next_working_day(candidate, tz, business_hours, paused_dates)?;
            }
            continue;
        }

        let capacity = rate_limiter.get_slot_capacity(candidate, rate_limit).await?;
        if capacity.available > 0 {
            return Ok(candidate);
        }

        candidate += ChronoDuration::minutes(i64::from(rate_limit.window_minutes));
    }

    Err(EngineError::NoSlotAvailable)
}

/// Rounds `t` up to the next `window_minutes` boundary since the epoch.
fn round_up_to_window(t: DateTime<Utc>, window_minutes: u32) -> DateTime<Utc> {
    let window_ms = i64::from(window_minutes) * 60_000;
    let t_ms = t.timestamp_millis();
    let rounded_ms = (t_ms + window_ms - 1).div_euclid(window_ms) * window_ms;
    DateTime::<Utc>::from_timestamp_millis(rounded_ms).unwrap_or(t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::domain::*;
    use crate::kv::{EngineKeys, KvStore};
    use crate::store::PersistentStore;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct FakeKv {
        store: Mutex<std::collections::HashMap<String, String>>,
    }

    #[async_trait]
    impl KvStore for FakeKv {
        async fn get(&self, key: &str) -> EngineResult<Option<String>> {
            Ok(self.store.lock().await.get(key).cloned())
        }
        async fn set(&self, key: &str, value: &str) -> EngineResult<()> {
            self.store.lock().await.insert(key.to_string(), value.to_string());
            Ok(())
        }
        async fn set_ex(&self, key: &str, value: &str, _ttl_secs: u64) -> EngineResult<()> {
            self.set(key, value).await
        }
        async fn incr(&self, key: &str) -> EngineResult<i64> {
            let mut store = self.store.lock().await;
            let entry = store.entry(key.to_string()).or_insert_with(|| "0".to_string());
            let next: i64 = entry.parse::<i64>().unwrap_or(0) + 1;
            *entry = next.to_string();
            Ok(next)
        }
        async fn expire(&self, _key: &str, _ttl_secs: u64) -> EngineResult<()> {
            Ok(())
        }
        async fn set_nx_ex(&self, key: &str, value: &str, _ttl_secs: u64) -> EngineResult<bool> {
            let mut store = self.store.lock().await;
            if store.contains_key(key) {
                Ok(false)
            } else {
                store.insert(key.to_string(), value.to_string());
                Ok(true)
            }
        }
        async fn del_if_owner(&self, _key: &str, _owner_token: &str) -> EngineResult<bool> {
            Ok(true)
        }
    }

    struct FakeStore {
        in_progress: AtomicI64,
    }

    #[async_trait]
    impl PersistentStore for FakeStore {
        async fn get_lead(&self, _id: LeadId) -> EngineResult<Option<Lead>> {
            Ok(None)
        }
        async fn save_lead(&self, _lead: &Lead) -> EngineResult<()> {
            Ok(())
        }
        async fn get_job(&self, _id: JobId) -> EngineResult<Option<Job>> {
            Ok(None)
        }
        async fn save_job(&self, _job: &Job) -> EngineResult<()> {
            Ok(())
        }
        async fn jobs_for_lead(&self, _lead_id: LeadId) -> EngineResult<Vec<Job>> {
            Ok(Vec::new())
        }
        async fn count_in_progress_in_window(
            &self,
            _window_start: DateTime<Utc>,
            _window_end: DateTime<Utc>,
        ) -> EngineResult<i64> {
            Ok(self.in_progress.load(Ordering::SeqCst))
        }
        async fn claim_due_job(&self, _job_id: JobId) -> EngineResult<bool> {
            Ok(true)
        }
        async fn due_jobs(&self, _before: DateTime<Utc>, _limit: u32) -> EngineResult<Vec<Job>> {
            Ok(Vec::new())
        }
        async fn jobs_scheduled_on_paused_dates(&self, _paused_dates: &BTreeSet<chrono::NaiveDate>) -> EngineResult<Vec<Job>> {
            Ok(Vec::new())
        }
        async fn get_settings(&self) -> EngineResult<Settings> {
            Ok(Settings::default())
        }
        async fn save_settings(&self, _settings: &Settings) -> EngineResult<()> {
            Ok(())
        }
        async fn get_conditional_rules(&self) -> EngineResult<Vec<ConditionalEmailRule>> {
            Ok(Vec::new())
        }
        async fn get_email_schedule(&self, _lead_id: LeadId) -> EngineResult<Option<EmailSchedule>> {
            Ok(None)
        }
        async fn save_email_schedule(&self, _schedule: &EmailSchedule) -> EngineResult<()> {
            Ok(())
        }
        async fn append_event_history(&self, _entry: &EventHistoryEntry) -> EngineResult<()> {
            Ok(())
        }
        async fn insert_event_store_record(&self, _record: &EventStoreRecord) -> EngineResult<bool> {
            Ok(true)
        }
        async fn insert_notification(&self, _notification: &Notification) -> EngineResult<()> {
            Ok(())
        }
    }

    fn limiter(in_progress: i64) -> RateLimiter {
        RateLimiter::new(
            Arc::new(FakeKv::default()),
            Arc::new(FakeStore { in_progress: AtomicI64::new(in_progress) }),
            EngineKeys::default(),
            Arc::new(SystemClock),
        )
    }

    #[tokio::test]
    async fn finds_slot_within_business_hours_when_capacity_available() {
        let rl = limiter(0);
        let monday_ten_am = Utc.with_ymd_and_hms(2025, 7, 7, 10, 0, 0).unwrap();
        let slot = find_slot(
            &rl,
            monday_ten_am,
            monday_ten_am,
            Tz::UTC,
            &BusinessHoursSettings::default(),
            &RateLimitSettings::default(),
            &BTreeSet::new(),
            200,
        )
        .await
        .unwrap();
        assert_eq!(slot, monday_ten_am);
    }

    #[tokio::test]
    async fn skips_to_next_working_day_when_outside_hours() {
        let rl = limiter(0);
        let saturday_morning = Utc.with_ymd_and_hms(2025, 7, 5, 8, 0, 0).unwrap();
        let slot = find_slot(
            &rl,
            saturday_morning,
            saturday_morning,
            Tz::UTC,
            &BusinessHoursSettings::default(),
            &RateLimitSettings::default(),
            &BTreeSet::new(),
            200,
        )
        .await
        .unwrap();
        assert_eq!(slot.format("%A").to_string(), "Monday");
        assert_eq!(slot.format("%H:%M").to_string(), "09:00");
    }

    #[tokio::test]
    async fn fails_closed_when_every_window_is_full() {
        let rl = limiter(999);
        let monday_ten_am = Utc.with_ymd_and_hms(2025, 7, 7, 10, 0, 0).unwrap();
        let result = find_slot(
            &rl,
            monday_ten_am,
            monday_ten_am,
            Tz::UTC,
            &BusinessHoursSettings::default(),
            &RateLimitSettings { emails_per_window: 1, window_minutes: 15 },
            &BTreeSet::new(),
            5,
        )
        .await;
        assert!(matches!(result, Err(EngineError::NoSlotAvailable)));
    }
}
