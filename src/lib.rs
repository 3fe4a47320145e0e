//! mailrun-engine — an outbound email scheduling and event-driven sequence
//! engine.
//!
//! Two halves, wired through a single persistent store and durable queue:
//!
//! - **Scheduling & Sequence Engine**: business-hours-aware, rate-limited,
//!   first-come-first-served placement of initial sends, followups, manual
//!   sends, and conditional-rule sends onto a durable queue, with a
//!   distributed journey guard enforcing one active send per lead.
//! - **Event/Rule Engine**: normalizes inbound provider webhooks, applies
//!   them against the in-flight job and lead, evaluates conditional-email
//!   triggers, and dead-letters leads whose retry budget is exhausted.
//!
//! [`rulebook`] is the single source of truth for mail-type priority, action
//! permissions, status groupings, event categorization, and retry policy;
//! every other module queries through it rather than re-deriving these rules
//! inline. [`context::EngineContext`] assembles the full collaborator graph
//! for a running process.

pub mod business_hours;
pub mod clock;
pub mod config;
pub mod conditional_evaluator;
pub mod context;
pub mod dispatcher;
pub mod domain;
pub mod error;
pub mod journey_guard;
pub mod kv;
pub mod lock;
pub mod metrics;
pub mod queue;
pub mod queue_watcher;
pub mod rate_limit;
pub mod rulebook;
pub mod scheduler;
pub mod status_resolver;
pub mod store;
pub mod webhook;

pub use clock::{Clock, SystemClock};
pub use config::EngineConfig;
pub use context::EngineContext;
pub use dispatcher::Dispatcher;
pub use error::{EngineError, EngineResult};
pub use queue::{DurableQueue, QueueName};
pub use scheduler::Scheduler;
pub use store::PersistentStore;

/// Commonly used types re-exported for callers who only need the domain
/// vocabulary and the top-level entry points.
pub mod prelude {
    pub use crate::clock::Clock;
    pub use crate::context::EngineContext;
    pub use crate::dispatcher::Dispatcher;
    pub use crate::domain::{
        ConditionalEmailRule, EngagementEvent, EventCategory, Job, JobId, JobStatus, Lead,
        LeadId, LeadStatus, MailKind, NormalizedEvent, NormalizedEventType, TerminalState,
    };
    pub use crate::error::{EngineError, EngineResult};
    pub use crate::scheduler::Scheduler;
    pub use crate::webhook::{normalize_provider_event, RawProviderEvent};
}
