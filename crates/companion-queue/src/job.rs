//! Job record data model and lifecycle predicates.
//!
//! A job moves through the states below; `Completed`, `DeadLetter`, and
//! `Cancelled` are terminal and never leave.
//!
//! ```text
//! ┌─────────┐  CAS claim   ┌─────────────┐  handler ok   ┌───────────┐
//! │ PENDING │─────────────►│ IN_PROGRESS │──────────────►│ COMPLETED │
//! └─────────┘              └─────────────┘               └───────────┘
//!      ▲                          │
//!      │ deferred                 │ handler failed
//!      │ (fresh record,           ▼
//!      │  rotated sort key)  ┌────────┐   attempts ≥ max   ┌─────────────┐
//!      └─────────────────────│ FAILED │───────────────────►│ DEAD_LETTER │
//!                            └────────┘                    └─────────────┘
//! ```
//!
//! `Pending` may also move straight to `Cancelled` by admin action.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use companion_core::JobId;

/// Current status of a scheduled job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be claimed once due.
    Pending,
    /// Claimed by a worker holding a live lease.
    InProgress,
    /// Finished successfully.
    Completed,
    /// Failed; superseded by a rescheduled pending record.
    Failed,
    /// Exceeded the retry budget; retained for audit.
    DeadLetter,
    /// Cancelled by admin action.
    Cancelled,
}

impl JobStatus {
    /// Returns true if this status is terminal.
    ///
    /// `Failed` is not terminal for the *job* — a fresh pending record takes
    /// over — but the failed record itself is never re-dispatched.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::DeadLetter | Self::Cancelled)
    }

    /// Returns a lowercase label suitable for metrics and logs.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::DeadLetter => "dead_letter",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_label())
    }
}

/// A scheduled job record as persisted in the job table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    /// Unique, time-ordered identifier. Embedded in the sort key.
    pub job_id: JobId,
    /// Registered handler tag (e.g. `daily_summary`).
    pub job_type: String,
    /// Opaque payload, validated against the handler's declared type at
    /// dispatch time.
    pub payload: serde_json::Value,
    /// When the job becomes eligible to run (UTC).
    pub scheduled_for: DateTime<Utc>,
    /// Current status.
    pub status: JobStatus,
    /// Dispatch attempts so far. Monotonically non-decreasing.
    #[serde(default)]
    pub attempts: u32,
    /// Identity of the worker holding the lease, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_by: Option<String>,
    /// When the lease expires; a past value means the lease is stale.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_expires_at: Option<DateTime<Utc>>,
    /// Last failure message with backtrace. Forensics only — never drives
    /// control flow.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the job completed, if it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Creates a fresh pending job.
    #[must_use]
    pub fn new(
        job_type: impl Into<String>,
        payload: serde_json::Value,
        scheduled_for: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id: JobId::generate(),
            job_type: job_type.into(),
            payload,
            scheduled_for,
            status: JobStatus::Pending,
            attempts: 0,
            locked_by: None,
            lock_expires_at: None,
            last_error: None,
            created_at: now,
            completed_at: None,
        }
    }

    /// Returns true if the job is in a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Returns true if the lease (if any) has expired at `now`.
    #[must_use]
    pub fn lease_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.lock_expires_at.is_none_or(|expires| expires < now)
    }

    /// Returns true if a worker may claim this job at `now`.
    ///
    /// Claimable means no live lease and either `pending`, or `in_progress`
    /// whose holder's lease has lapsed (crash recovery: the record of a dead
    /// worker stays `in_progress` until someone re-claims it). Due-ness is
    /// the range scan's job, not this predicate's.
    #[must_use]
    pub fn is_claimable_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, JobStatus::Pending | JobStatus::InProgress)
            && self.lease_expired_at(now)
    }
}
