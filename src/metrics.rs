//! Prometheus metrics for the scheduling and event engine.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

/// Metric names for the engine.
pub mod names {
    /// Total jobs scheduled, by mail kind.
    pub const JOBS_SCHEDULED_TOTAL: &str = "mailrun_jobs_scheduled_total";
    /// Total jobs rescheduled after a soft failure.
    pub const JOBS_RESCHEDULED_TOTAL: &str = "mailrun_jobs_rescheduled_total";
    /// Total jobs cancelled.
    pub const JOBS_CANCELLED_TOTAL: &str = "mailrun_jobs_cancelled_total";
    /// Total jobs skipped by a failed sequence condition.
    pub const JOBS_SKIPPED_TOTAL: &str = "mailrun_jobs_skipped_total";
    /// Total jobs paused by the queue watcher.
    pub const JOBS_PAUSED_TOTAL: &str = "mailrun_jobs_paused_total";
    /// Total jobs resumed by the queue watcher.
    pub const JOBS_RESUMED_TOTAL: &str = "mailrun_jobs_resumed_total";

    /// Total conditional-email rules fired.
    pub const CONDITIONAL_RULES_FIRED_TOTAL: &str = "mailrun_conditional_rules_fired_total";

    /// Total leads marked dead.
    pub const LEADS_DEAD_TOTAL: &str = "mailrun_leads_dead_total";
    /// Total leads marked unsubscribed or complaint.
    pub const LEADS_TERMINATED_TOTAL: &str = "mailrun_leads_terminated_total";
    /// Total leads resurrected from the dead state.
    pub const LEADS_RESURRECTED_TOTAL: &str = "mailrun_leads_resurrected_total";

    /// Total provider events dispatched, by category.
    pub const EVENTS_DISPATCHED_TOTAL: &str = "mailrun_events_dispatched_total";
    /// Total provider events suppressed as duplicates.
    pub const EVENTS_DEDUPED_TOTAL: &str = "mailrun_events_deduped_total";

    /// Total admin notifications raised.
    pub const NOTIFICATIONS_RAISED_TOTAL: &str = "mailrun_notifications_raised_total";

    /// Total rate-limit slots reserved.
    pub const RATE_LIMIT_RESERVED_TOTAL: &str = "mailrun_rate_limit_reserved_total";
    /// Total rate-limit slots released back (compensating for a transient over-count).
    pub const RATE_LIMIT_RELEASED_TOTAL: &str = "mailrun_rate_limit_released_total";
    /// Current rate-limit window occupancy.
    pub const RATE_LIMIT_WINDOW_USED: &str = "mailrun_rate_limit_window_used";

    /// FCFS slot-finder attempts consumed per search.
    pub const FCFS_SEARCH_ATTEMPTS: &str = "mailrun_fcfs_search_attempts";

    /// Distributed lock acquisitions that found the lock already held.
    pub const LOCK_CONTENDED_TOTAL: &str = "mailrun_lock_contended_total";

    /// Scheduling operation duration in seconds.
    pub const SCHEDULE_DURATION_SECONDS: &str = "mailrun_schedule_duration_seconds";
}

/// Registers descriptions for every metric this engine emits. Call once at
/// process start, before the metrics exporter starts serving scrapes.
pub fn register_metrics() {
    describe_counter!(names::JOBS_SCHEDULED_TOTAL, "Total number of jobs scheduled");
    describe_counter!(names::JOBS_RESCHEDULED_TOTAL, "Total number of jobs rescheduled after a soft failure");
    describe_counter!(names::JOBS_CANCELLED_TOTAL, "Total number of jobs cancelled");
    describe_counter!(names::JOBS_SKIPPED_TOTAL, "Total number of jobs skipped by a failed sequence condition");
    describe_counter!(names::JOBS_PAUSED_TOTAL, "Total number of jobs paused by the queue watcher");
    describe_counter!(names::JOBS_RESUMED_TOTAL, "Total number of jobs resumed by the queue watcher");

    describe_counter!(names::CONDITIONAL_RULES_FIRED_TOTAL, "Total number of conditional-email rules fired");

    describe_counter!(names::LEADS_DEAD_TOTAL, "Total number of leads marked dead");
    describe_counter!(names::LEADS_TERMINATED_TOTAL, "Total number of leads marked unsubscribed or complaint");
    describe_counter!(names::LEADS_RESURRECTED_TOTAL, "Total number of leads resurrected from the dead state");

    describe_counter!(names::EVENTS_DISPATCHED_TOTAL, "Total number of provider events dispatched");
    describe_counter!(names::EVENTS_DEDUPED_TOTAL, "Total number of provider events suppressed as duplicates");

    describe_counter!(names::NOTIFICATIONS_RAISED_TOTAL, "Total number of admin notifications raised");

    describe_counter!(names::RATE_LIMIT_RESERVED_TOTAL, "Total number of rate-limit slots reserved");
    describe_counter!(names::RATE_LIMIT_RELEASED_TOTAL, "Total number of rate-limit slots released back");
    describe_gauge!(names::RATE_LIMIT_WINDOW_USED, "Current rate-limit window occupancy");

    describe_histogram!(names::FCFS_SEARCH_ATTEMPTS, "FCFS slot-finder attempts consumed per search");

    describe_counter!(names::LOCK_CONTENDED_TOTAL, "Distributed lock acquisitions that found the lock already held");

    describe_histogram!(names::SCHEDULE_DURATION_SECONDS, "Scheduling operation duration in seconds");
}

/// Scheduling metrics recorder.
#[derive(Clone, Copy, Default)]
pub struct SchedulingMetrics;

impl SchedulingMetrics {
    pub fn job_scheduled(mail_kind: &str) {
        counter!(names::JOBS_SCHEDULED_TOTAL, "mail_kind" => mail_kind.to_string()).increment(1);
    }

    pub fn job_rescheduled(mail_kind: &str) {
        counter!(names::JOBS_RESCHEDULED_TOTAL, "mail_kind" => mail_kind.to_string()).increment(1);
    }

    pub fn job_cancelled(mail_kind: &str, reason: &str) {
        counter!(
            names::JOBS_CANCELLED_TOTAL,
            "mail_kind" => mail_kind.to_string(),
            "reason" => reason.to_string()
        )
        .increment(1);
    }

    pub fn job_skipped(mail_kind: &str) {
        counter!(names::JOBS_SKIPPED_TOTAL, "mail_kind" => mail_kind.to_string()).increment(1);
    }

    pub fn job_paused(mail_kind: &str) {
        counter!(names::JOBS_PAUSED_TOTAL, "mail_kind" => mail_kind.to_string()).increment(1);
    }

    pub fn job_resumed(mail_kind: &str) {
        counter!(names::JOBS_RESUMED_TOTAL, "mail_kind" => mail_kind.to_string()).increment(1);
    }

    pub fn schedule_duration(mail_kind: &str, duration: Duration) {
        histogram!(names::SCHEDULE_DURATION_SECONDS, "mail_kind" => mail_kind.to_string()).record(duration.as_secs_f64());
    }

    pub fn fcfs_attempts(attempts: u32) {
        histogram!(names::FCFS_SEARCH_ATTEMPTS).record(f64::from(attempts));
    }
}

/// Conditional-rule metrics recorder.
#[derive(Clone, Copy, Default)]
pub struct ConditionalMetrics;

impl ConditionalMetrics {
    pub fn rule_fired(rule_name: &str) {
        counter!(names::CONDITIONAL_RULES_FIRED_TOTAL, "rule" => rule_name.to_string()).increment(1);
    }
}

/// Lead-lifecycle metrics recorder.
#[derive(Clone, Copy, Default)]
pub struct LeadMetrics;

impl LeadMetrics {
    pub fn marked_dead(reason: &str) {
        counter!(names::LEADS_DEAD_TOTAL, "reason" => reason.to_string()).increment(1);
    }

    pub fn terminated(state: &str) {
        counter!(names::LEADS_TERMINATED_TOTAL, "state" => state.to_string()).increment(1);
    }

    pub fn resurrected() {
        counter!(names::LEADS_RESURRECTED_TOTAL).increment(1);
    }
}

/// Dispatcher metrics recorder.
#[derive(Clone, Copy, Default)]
pub struct DispatcherMetrics;

impl DispatcherMetrics {
    pub fn event_dispatched(event_type: &str, category: &str) {
        counter!(
            names::EVENTS_DISPATCHED_TOTAL,
            "event_type" => event_type.to_string(),
            "category" => category.to_string()
        )
        .increment(1);
    }

    pub fn event_deduped(event_type: &str) {
        counter!(names::EVENTS_DEDUPED_TOTAL, "event_type" => event_type.to_string()).increment(1);
    }

    pub fn notification_raised(reason: &str) {
        counter!(names::NOTIFICATIONS_RAISED_TOTAL, "reason" => reason.to_string()).increment(1);
    }
}

/// Rate-limit metrics recorder.
#[derive(Clone, Copy, Default)]
pub struct RateLimitMetrics;

impl RateLimitMetrics {
    pub fn slot_reserved() {
        counter!(names::RATE_LIMIT_RESERVED_TOTAL).increment(1);
    }

    pub fn slot_released() {
        counter!(names::RATE_LIMIT_RELEASED_TOTAL).increment(1);
    }

    pub fn window_occupancy(used: u32) {
        gauge!(names::RATE_LIMIT_WINDOW_USED).set(f64::from(used));
    }
}

/// Distributed-lock metrics recorder.
#[derive(Clone, Copy, Default)]
pub struct LockMetrics;

impl LockMetrics {
    pub fn contended(key: &str) {
        counter!(names::LOCK_CONTENDED_TOTAL, "key" => key.to_string()).increment(1);
    }
}
