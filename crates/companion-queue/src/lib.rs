//! # companion-queue
//!
//! The distributed scheduled-job queue behind the Companion Memory backend.
//!
//! Multiple stateless workers coordinate through a single shared item store
//! with conditional writes — no broker, no database locks:
//!
//! - **[`job`]** / **[`keys`]**: the persistent job record and its
//!   time-ordered sort-key encoding
//! - **[`store`]**: insert, due-range scan, CAS claim, lease renewal, and
//!   finalization
//! - **[`dedup`]**: logical-ID reservations making scheduling idempotent
//! - **[`retry`]**: exponential backoff with a dead-letter threshold
//! - **[`handler`]** / **[`handlers`]**: typed payload dispatch
//! - **[`worker`]**: the poll → claim → execute → finalize loop
//! - **[`planner`]**: cron-driven planners gated by the singleton lock
//! - **[`schedule`]**: the Scheduling API used by HTTP, CLI, planners, and
//!   handlers alike
//!
//! Execution is at-least-once; scheduling is at-most-once per logical ID
//! and bucket. Handlers must be idempotent.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod dedup;
pub mod error;
pub mod handler;
pub mod handlers;
pub mod job;
pub mod keys;
pub mod metrics;
pub mod planner;
pub mod ports;
pub mod retry;
pub mod runtime;
pub mod schedule;
pub mod store;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use config::QueueConfig;
pub use dedup::{DedupReservation, DeduplicationIndex, ReservationOutcome};
pub use error::{Error, Result};
pub use handler::{
    DispatchError, HandlerFailure, HandlerRegistry, HandlerResult, JobContext, JobHandler,
    ShutdownSignal,
};
pub use job::{JobRecord, JobStatus};
pub use planner::{CronPlanner, LeadershipTask, PlannerContext, PlannerTask};
pub use retry::RetryPolicy;
pub use schedule::{JobScheduler, ScheduleOptions, ScheduleOutcome};
pub use store::{ClaimOutcome, FinalizeOutcome, JobStore, LeaseOutcome};
pub use worker::{JobWorker, WorkerConfig};
