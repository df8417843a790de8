//! The Scheduling API: the single entry point for enqueueing jobs.
//!
//! Request handlers, the CLI, planners, and running handlers all call
//! [`JobScheduler::schedule`]. When a logical ID is supplied the dedup index
//! is reserved first, making scheduling idempotent per `(logical_id,
//! bucket)`; a `Deduplicated` outcome is not an error.

use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;

use companion_core::{Clock, JobId};

use crate::dedup::{DedupReservation, DeduplicationIndex, ReservationOutcome};
use crate::error::{Error, Result};
use crate::handler::HandlerRegistry;
use crate::job::{JobRecord, JobStatus};
use crate::keys;
use crate::store::JobStore;

/// Optional scheduling parameters.
#[derive(Debug, Clone, Default)]
pub struct ScheduleOptions {
    /// Stable scheduling-intent identifier for idempotent enqueue.
    pub logical_id: Option<String>,
    /// Dedup bucket; defaults to the UTC date of `when`.
    pub bucket: Option<NaiveDate>,
}

impl ScheduleOptions {
    /// Creates empty options (no deduplication).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables deduplication under the given logical ID.
    #[must_use]
    pub fn with_logical_id(mut self, logical_id: impl Into<String>) -> Self {
        self.logical_id = Some(logical_id.into());
        self
    }

    /// Overrides the dedup bucket (e.g. the user's local calendar date).
    #[must_use]
    pub const fn with_bucket(mut self, bucket: NaiveDate) -> Self {
        self.bucket = Some(bucket);
        self
    }
}

/// Result of a schedule call.
#[derive(Debug, Clone)]
pub enum ScheduleOutcome {
    /// A job record was inserted.
    Scheduled {
        /// The new job's ID.
        job_id: JobId,
    },
    /// The intent was already reserved in this bucket; nothing was inserted.
    Deduplicated {
        /// The existing reservation.
        existing: DedupReservation,
    },
}

impl ScheduleOutcome {
    /// Returns true if a new job record was inserted.
    #[must_use]
    pub const fn is_scheduled(&self) -> bool {
        matches!(self, Self::Scheduled { .. })
    }
}

/// Scheduling API over the job store and dedup index.
#[derive(Clone)]
pub struct JobScheduler {
    store: JobStore,
    dedup: DeduplicationIndex,
    registry: Arc<HandlerRegistry>,
    clock: Arc<dyn Clock>,
}

impl JobScheduler {
    /// Creates a scheduler.
    #[must_use]
    pub fn new(
        store: JobStore,
        dedup: DeduplicationIndex,
        registry: Arc<HandlerRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            dedup,
            registry,
            clock,
        }
    }

    /// Schedules a job of `job_type` to run at `when`.
    ///
    /// # Errors
    ///
    /// Returns an error — with nothing persisted — if the job type has no
    /// registered handler, the logical ID is malformed, or storage fails.
    pub async fn schedule(
        &self,
        job_type: &str,
        payload: serde_json::Value,
        when: DateTime<Utc>,
        options: ScheduleOptions,
    ) -> Result<ScheduleOutcome> {
        if !self.registry.contains(job_type) {
            return Err(Error::UnknownJobType {
                job_type: job_type.to_string(),
            });
        }

        let now = self.clock.now();
        let job = JobRecord::new(job_type, payload, when, now);

        let Some(logical_id) = options.logical_id else {
            self.store.insert(&job).await?;
            tracing::info!(job_id = %job.job_id, job_type, %when, "job scheduled");
            return Ok(ScheduleOutcome::Scheduled { job_id: job.job_id });
        };

        validate_logical_id(&logical_id)?;
        let bucket = options.bucket.unwrap_or_else(|| when.date_naive());

        let reservation = DedupReservation {
            logical_id: logical_id.clone(),
            bucket,
            job_partition: keys::JOB_PARTITION.to_string(),
            job_sort: keys::job_sort_key(when, job.job_id),
            reserved_at: now,
        };

        match self.dedup.try_reserve(&reservation).await? {
            ReservationOutcome::Reserved => {
                self.store.insert(&job).await?;
                tracing::info!(
                    job_id = %job.job_id,
                    job_type,
                    logical_id = %logical_id,
                    %bucket,
                    "job scheduled with dedup reservation"
                );
                Ok(ScheduleOutcome::Scheduled { job_id: job.job_id })
            }
            ReservationOutcome::AlreadyReserved(existing) => {
                self.heal_reservation(&existing, &job).await?;
                Ok(ScheduleOutcome::Deduplicated { existing })
            }
        }
    }

    /// Re-inserts the reserved job if a crash between reservation and insert
    /// left the entry pointing at nothing.
    async fn heal_reservation(&self, existing: &DedupReservation, job: &JobRecord) -> Result<()> {
        let Ok((scheduled_for, job_id)) = keys::parse_job_sort_key(&existing.job_sort) else {
            tracing::warn!(
                logical_id = %existing.logical_id,
                job_sort = %existing.job_sort,
                "reservation records an unparsable job sort key"
            );
            return Ok(());
        };

        if self.store.get(job_id, scheduled_for).await?.is_some() {
            return Ok(());
        }

        tracing::warn!(
            logical_id = %existing.logical_id,
            job_id = %job_id,
            "reservation points at a missing job record; re-inserting"
        );
        let healed = JobRecord {
            job_id,
            job_type: job.job_type.clone(),
            payload: job.payload.clone(),
            scheduled_for,
            status: JobStatus::Pending,
            attempts: 0,
            locked_by: None,
            lock_expires_at: None,
            last_error: None,
            created_at: self.clock.now(),
            completed_at: None,
        };
        self.store.insert(&healed).await
    }
}

fn validate_logical_id(logical_id: &str) -> Result<()> {
    if logical_id.is_empty() {
        return Err(Error::MalformedLogicalId {
            message: "logical ID must not be empty".into(),
        });
    }
    if logical_id.contains('/') {
        return Err(Error::MalformedLogicalId {
            message: format!("logical ID must not contain '/': {logical_id}"),
        });
    }
    if logical_id.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(Error::MalformedLogicalId {
            message: format!("logical ID must not contain whitespace: {logical_id}"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::testing::{scheduler_fixture, SchedulerFixture};

    fn when() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 14, 7, 0, 0).unwrap()
    }

    fn bucket() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, 14).unwrap()
    }

    #[tokio::test]
    async fn schedule_without_dedup_inserts_job() {
        let SchedulerFixture { scheduler, store, .. } = scheduler_fixture();

        let outcome = scheduler
            .schedule(
                "send_chat_message",
                serde_json::json!({"userId": "U1", "message": "hi"}),
                when(),
                ScheduleOptions::new(),
            )
            .await
            .expect("schedule");

        let ScheduleOutcome::Scheduled { job_id } = outcome else {
            panic!("expected Scheduled");
        };
        let job = store.get(job_id, when()).await.expect("get").expect("present");
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.job_type, "send_chat_message");
    }

    #[tokio::test]
    async fn duplicate_logical_id_is_deduplicated_with_one_record() {
        let SchedulerFixture { scheduler, store, .. } = scheduler_fixture();

        // The same logical ID and bucket scheduled twice.
        let options = || {
            ScheduleOptions::new()
                .with_logical_id("daily_summary:U1")
                .with_bucket(bucket())
        };

        let first = scheduler
            .schedule("daily_summary", serde_json::json!({"userId": "U1"}), when(), options())
            .await
            .expect("first");
        assert!(first.is_scheduled());

        let second = scheduler
            .schedule("daily_summary", serde_json::json!({"userId": "U1"}), when(), options())
            .await
            .expect("second");
        assert!(!second.is_scheduled());

        let due = store
            .query_due(when() + chrono::Duration::hours(1), 25)
            .await
            .expect("query");
        assert_eq!(due.len(), 1, "exactly one job record in the store");
    }

    #[tokio::test]
    async fn unknown_job_type_is_rejected_and_nothing_persists() {
        let SchedulerFixture { scheduler, store, .. } = scheduler_fixture();

        let err = scheduler
            .schedule(
                "mystery",
                serde_json::json!({}),
                when(),
                ScheduleOptions::new().with_logical_id("mystery:U1"),
            )
            .await
            .expect_err("must fail");
        assert!(matches!(err, Error::UnknownJobType { .. }));

        let due = store
            .query_due(when() + chrono::Duration::hours(1), 25)
            .await
            .expect("query");
        assert!(due.is_empty());
    }

    #[tokio::test]
    async fn malformed_logical_ids_are_rejected() {
        let SchedulerFixture { scheduler, .. } = scheduler_fixture();

        for bad in ["", "has space", "has/slash", "line\nbreak"] {
            let err = scheduler
                .schedule(
                    "send_chat_message",
                    serde_json::json!({"userId": "U1", "message": "x"}),
                    when(),
                    ScheduleOptions::new().with_logical_id(bad),
                )
                .await
                .expect_err("must fail");
            assert!(matches!(err, Error::MalformedLogicalId { .. }), "bad: {bad:?}");
        }
    }

    #[tokio::test]
    async fn bucket_defaults_to_utc_date_of_when() {
        let SchedulerFixture { scheduler, dedup, .. } = scheduler_fixture();

        scheduler
            .schedule(
                "daily_summary",
                serde_json::json!({"userId": "U1"}),
                when(),
                ScheduleOptions::new().with_logical_id("daily_summary:U1"),
            )
            .await
            .expect("schedule");

        let reservation = dedup
            .get_reservation("daily_summary:U1", bucket())
            .await
            .expect("get")
            .expect("present");
        assert_eq!(reservation.bucket, bucket());
    }

    #[tokio::test]
    async fn missing_reserved_job_is_healed_on_duplicate_schedule() {
        let SchedulerFixture { scheduler, store, dedup, .. } = scheduler_fixture();

        // Simulate a crash after the reservation write: the entry exists but
        // no job record was ever inserted.
        let job_id = JobId::generate();
        dedup
            .try_reserve(&DedupReservation {
                logical_id: "daily_summary:U1".into(),
                bucket: bucket(),
                job_partition: keys::JOB_PARTITION.into(),
                job_sort: keys::job_sort_key(when(), job_id),
                reserved_at: when(),
            })
            .await
            .expect("reserve");

        let outcome = scheduler
            .schedule(
                "daily_summary",
                serde_json::json!({"userId": "U1"}),
                when(),
                ScheduleOptions::new()
                    .with_logical_id("daily_summary:U1")
                    .with_bucket(bucket()),
            )
            .await
            .expect("schedule");
        assert!(!outcome.is_scheduled());

        // The reservation's target now exists with the reserved identity.
        let healed = store.get(job_id, when()).await.expect("get").expect("healed");
        assert_eq!(healed.status, JobStatus::Pending);
        assert_eq!(healed.job_type, "daily_summary");
    }
}
