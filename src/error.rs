//! Engine error types.

use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors produced by the scheduling and event engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The lead does not exist.
    #[error("lead not found: {0}")]
    LeadNotFound(String),

    /// The job does not exist.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// The lead has a terminal state and cannot be scheduled against.
    #[error("lead {0} is terminal ({1})")]
    LeadTerminal(String, &'static str),

    /// A duplicate active job already exists for (lead, type).
    #[error("duplicate active job for lead {lead_id} type {mail_type}")]
    DuplicateActiveJob { lead_id: String, mail_type: String },

    /// A distributed lock could not be acquired; caller should silently return.
    #[error("lock held: {0}")]
    LockHeld(String),

    /// The rate-limit window is at capacity.
    #[error("rate limit window full, next window at {0}")]
    RateLimitFull(String),

    /// No FCFS slot could be found within the search horizon.
    #[error("no slot found within search horizon")]
    NoSlotAvailable,

    /// A state transition is not allowed by the rulebook.
    #[error("invalid transition: {from} -> {to} not allowed for {mail_type}")]
    InvalidTransition {
        mail_type: String,
        from: String,
        to: String,
    },

    /// A requested action is disallowed for this mail type/status pair.
    #[error("action {action} not allowed: {reason}")]
    ActionNotAllowed { action: String, reason: String },

    /// Field validation failure at the boundary.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A resume was blocked by a still-active higher priority job.
    #[error("resume blocked by higher priority job {job_id} ({mail_type})")]
    ResumeBlocked { job_id: String, mail_type: String },

    /// Retries exhausted; lead should transition to dead.
    #[error("max retries exceeded for job {job_id}: {retry_count} attempts")]
    MaxRetriesExceeded { job_id: String, retry_count: u32 },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Redis error.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Redis pool error.
    #[error("redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Invariant violation; programmer error, should never surface in normal operation.
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// Internal error, catch-all for adapter failures.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Returns true if the operation should be retried by the durable queue runtime.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Redis(_)
                | EngineError::Pool(_)
                | EngineError::Database(_)
                | EngineError::RateLimitFull(_)
        )
    }

    /// Returns true if this is a guard failure rather than a real error: the
    /// caller should short-circuit and return without mutating state or
    /// surfacing a user-visible failure.
    pub fn is_guard(&self) -> bool {
        matches!(
            self,
            EngineError::LeadTerminal(_, _)
                | EngineError::DuplicateActiveJob { .. }
                | EngineError::LockHeld(_)
                | EngineError::RateLimitFull(_)
        )
    }

    /// Returns true if the engine should write a user-visible notification.
    pub fn should_notify(&self) -> bool {
        matches!(
            self,
            EngineError::MaxRetriesExceeded { .. } | EngineError::NoSlotAvailable
        )
    }
}
