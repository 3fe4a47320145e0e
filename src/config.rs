//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration for the scheduling and event engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Redis connection configuration (locks, rate-limit counters, durable queue).
    #[serde(default)]
    pub redis: RedisConfig,

    /// Database connection configuration (source of truth).
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Business-hours / working-day defaults, overridable per Settings row.
    #[serde(default)]
    pub business_hours: BusinessHoursConfig,

    /// Rate-limit defaults.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Retry policy defaults.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Scheduler / cron-sweep configuration.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            redis: RedisConfig::default(),
            database: DatabaseConfig::default(),
            business_hours: BusinessHoursConfig::default(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Loads configuration from environment variables (with a `MAILRUN_` prefix)
    /// layered over built-in defaults, following the same `config` crate
    /// layering the rest of the ecosystem uses.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(config::Config::try_from(&EngineConfig::default())?)
            .add_source(config::Environment::with_prefix("MAILRUN").separator("__"))
            .build()?;

        cfg.try_deserialize()
    }
}

/// Redis connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis URL.
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Key prefix for all engine-owned keys.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            pool_size: default_pool_size(),
            connect_timeout_secs: default_connect_timeout(),
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_pool_size() -> usize {
    10
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_key_prefix() -> String {
    "mailrun".to_string()
}

/// Database connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Postgres connection URL.
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Connection pool size.
    #[serde(default = "default_db_pool_size")]
    pub pool_size: u32,

    /// Connection timeout in seconds.
    #[serde(default = "default_db_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            pool_size: default_db_pool_size(),
            connect_timeout_secs: default_db_connect_timeout(),
        }
    }
}

fn default_database_url() -> String {
    "postgres://localhost/mailrun".to_string()
}

fn default_db_pool_size() -> u32 {
    10
}

fn default_db_connect_timeout() -> u64 {
    5
}

/// Business-hours defaults; overridable per-tenant via the `Settings` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessHoursConfig {
    /// Start hour (inclusive), in the lead's local timezone.
    #[serde(default = "default_start_hour")]
    pub start_hour: u32,

    /// End hour (exclusive), in the lead's local timezone.
    #[serde(default = "default_end_hour")]
    pub end_hour: u32,

    /// Days of week treated as non-working (0 = Sunday .. 6 = Saturday).
    #[serde(default = "default_weekend_days")]
    pub weekend_days: Vec<u32>,

    /// FCFS slot-finder loop cap (~3 days at 15-minute windows).
    #[serde(default = "default_fcfs_max_attempts")]
    pub fcfs_max_attempts: u32,
}

impl Default for BusinessHoursConfig {
    fn default() -> Self {
        Self {
            start_hour: default_start_hour(),
            end_hour: default_end_hour(),
            weekend_days: default_weekend_days(),
            fcfs_max_attempts: default_fcfs_max_attempts(),
        }
    }
}

fn default_start_hour() -> u32 {
    9
}

fn default_end_hour() -> u32 {
    18
}

fn default_weekend_days() -> Vec<u32> {
    vec![0, 6]
}

fn default_fcfs_max_attempts() -> u32 {
    200
}

/// Rate-limit defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum emails reserved per window.
    #[serde(default = "default_emails_per_window")]
    pub emails_per_window: u32,

    /// Window size in minutes.
    #[serde(default = "default_window_minutes")]
    pub window_minutes: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            emails_per_window: default_emails_per_window(),
            window_minutes: default_window_minutes(),
        }
    }
}

fn default_emails_per_window() -> u32 {
    50
}

fn default_window_minutes() -> u32 {
    15
}

impl RateLimitConfig {
    /// Window size as a `Duration`.
    pub fn window(&self) -> Duration {
        Duration::from_secs(u64::from(self.window_minutes) * 60)
    }
}

/// Retry policy defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Global maximum retry attempts, used when a mail type has no override.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before retrying a soft-bounced/deferred send, in hours.
    #[serde(default = "default_soft_bounce_delay_hours")]
    pub soft_bounce_delay_hours: i64,

    /// Exponential backoff multiplier applied per retry attempt.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Cap on the computed retry delay, in hours.
    #[serde(default = "default_max_delay_hours")]
    pub max_delay_hours: i64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            soft_bounce_delay_hours: default_soft_bounce_delay_hours(),
            multiplier: default_multiplier(),
            max_delay_hours: default_max_delay_hours(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_soft_bounce_delay_hours() -> i64 {
    2
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay_hours() -> i64 {
    48
}

/// Scheduler / cron-sweep configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Per-lead lock TTL in seconds.
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_secs: u64,

    /// How often the paused-date relocation sweep runs.
    #[serde(default = "default_paused_date_sweep_cron")]
    pub paused_date_sweep_cron: String,

    /// Maximum due jobs claimed by the periodic sweep per invocation.
    #[serde(default = "default_max_claims_per_tick")]
    pub max_claims_per_tick: u32,

    /// In-process dedup cache TTL for repeated webhook deliveries, in seconds.
    #[serde(default = "default_dedup_cache_ttl")]
    pub dedup_cache_ttl_secs: u64,

    /// Window after a `delivered` event during which `scheduleNextEmail` is
    /// suppressed if it already ran once for this lead, in seconds.
    #[serde(default = "default_recent_followup_window")]
    pub recent_followup_window_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lock_ttl_secs: default_lock_ttl(),
            paused_date_sweep_cron: default_paused_date_sweep_cron(),
            max_claims_per_tick: default_max_claims_per_tick(),
            dedup_cache_ttl_secs: default_dedup_cache_ttl(),
            recent_followup_window_secs: default_recent_followup_window(),
        }
    }
}

fn default_lock_ttl() -> u64 {
    30
}

fn default_paused_date_sweep_cron() -> String {
    "0 */15 * * * *".to_string()
}

fn default_max_claims_per_tick() -> u32 {
    500
}

fn default_dedup_cache_ttl() -> u64 {
    60
}

fn default_recent_followup_window() -> u64 {
    120
}

impl SchedulerConfig {
    /// Per-lead lock TTL as a `Duration`.
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.business_hours.start_hour, 9);
        assert_eq!(cfg.business_hours.end_hour, 18);
        assert_eq!(cfg.business_hours.weekend_days, vec![0, 6]);
        assert_eq!(cfg.rate_limit.window_minutes, 15);
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.scheduler.lock_ttl_secs, 30);
    }

    #[test]
    fn window_duration_conversion() {
        let cfg = RateLimitConfig::default();
        assert_eq!(cfg.window(), Duration::from_secs(15 * 60));
    }
}
