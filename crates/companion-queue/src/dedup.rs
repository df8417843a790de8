//! Deduplication index for idempotent scheduling.
//!
//! A reservation is a small JSON blob written with a `DoesNotExist`
//! precondition at `dedup#<logical_id>/<bucket>`. Only one caller wins the
//! race; losers read the existing reservation back. Entries point at the job
//! record they reserved and are never deleted by the core, so re-running a
//! planner within the same bucket is a no-op.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, NaiveDate, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};

use companion_core::{StorageBackend, WritePrecondition, WriteResult};

use crate::error::{Error, Result};
use crate::keys;
use crate::metrics::{labels, names};

/// Reservation blob stored per `(logical_id, bucket)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DedupReservation {
    /// The scheduling intent this entry reserves.
    pub logical_id: String,
    /// Calendar-date bucket the reservation covers.
    pub bucket: NaiveDate,
    /// Partition key of the reserved job record.
    pub job_partition: String,
    /// Sort key of the reserved job record.
    pub job_sort: String,
    /// When the reservation was written.
    pub reserved_at: DateTime<Utc>,
}

/// Result of attempting a reservation.
#[derive(Debug, Clone)]
pub enum ReservationOutcome {
    /// This caller won; it must now insert the job record.
    Reserved,
    /// The intent was already reserved in this bucket.
    AlreadyReserved(DedupReservation),
}

/// Conditional-write reservation index keyed by logical ID and date.
#[derive(Clone)]
pub struct DeduplicationIndex {
    storage: Arc<dyn StorageBackend>,
}

impl DeduplicationIndex {
    /// Creates an index over the shared store.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// Attempts to reserve `(logical_id, bucket)` for the given job record.
    ///
    /// # Errors
    ///
    /// Returns an error for storage failures, or if a reservation exists but
    /// cannot be read back.
    pub async fn try_reserve(&self, reservation: &DedupReservation) -> Result<ReservationOutcome> {
        let key = keys::dedup_item_key(&reservation.logical_id, reservation.bucket);
        let body = serde_json::to_vec(reservation)
            .map_err(|e| Error::serialization(format!("serialize reservation: {e}")))?;

        let result = self
            .storage
            .put(&key, Bytes::from(body), WritePrecondition::DoesNotExist)
            .await?;

        match result {
            WriteResult::Success { .. } => {
                tracing::info!(
                    logical_id = %reservation.logical_id,
                    bucket = %reservation.bucket,
                    job_sort = %reservation.job_sort,
                    "scheduling intent reserved"
                );
                counter!(names::DEDUP_TOTAL, labels::OUTCOME => "reserved").increment(1);
                Ok(ReservationOutcome::Reserved)
            }
            WriteResult::PreconditionFailed { .. } => {
                let existing = self
                    .get_reservation(&reservation.logical_id, reservation.bucket)
                    .await?
                    .ok_or_else(|| {
                        // Precondition failed but the entry is unreadable:
                        // either a deletion race or storage inconsistency.
                        Error::Core(companion_core::Error::storage(format!(
                            "reservation race: entry exists but could not be read: {key}"
                        )))
                    })?;
                counter!(names::DEDUP_TOTAL, labels::OUTCOME => "deduplicated").increment(1);
                Ok(ReservationOutcome::AlreadyReserved(existing))
            }
        }
    }

    /// Reads an existing reservation, if any.
    ///
    /// # Errors
    ///
    /// Returns an error for storage failures or an undecodable entry.
    pub async fn get_reservation(
        &self,
        logical_id: &str,
        bucket: NaiveDate,
    ) -> Result<Option<DedupReservation>> {
        let key = keys::dedup_item_key(logical_id, bucket);
        let data = match self.storage.get(&key).await {
            Ok(data) => data,
            Err(companion_core::Error::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let reservation: DedupReservation = serde_json::from_slice(&data)
            .map_err(|e| Error::serialization(format!("deserialize reservation: {e}")))?;

        if reservation.logical_id != logical_id {
            return Err(Error::serialization(format!(
                "reservation at {key} records logical ID '{}'",
                reservation.logical_id
            )));
        }

        Ok(Some(reservation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use companion_core::MemoryBackend;

    fn make_reservation(logical_id: &str, bucket: NaiveDate) -> DedupReservation {
        DedupReservation {
            logical_id: logical_id.to_string(),
            bucket,
            job_partition: keys::JOB_PARTITION.to_string(),
            job_sort: format!("scheduled#2025-07-14T07:00:00.000000Z#{}", ulid::Ulid::new()),
            reserved_at: Utc::now(),
        }
    }

    fn bucket() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, 14).unwrap()
    }

    #[tokio::test]
    async fn first_reservation_wins() {
        let index = DeduplicationIndex::new(Arc::new(MemoryBackend::new()));
        let outcome = index
            .try_reserve(&make_reservation("daily_summary:U1", bucket()))
            .await
            .expect("reserve");
        assert!(matches!(outcome, ReservationOutcome::Reserved));
    }

    #[tokio::test]
    async fn duplicate_reservation_returns_existing() {
        let index = DeduplicationIndex::new(Arc::new(MemoryBackend::new()));
        let first = make_reservation("daily_summary:U1", bucket());
        index.try_reserve(&first).await.expect("reserve");

        let second = make_reservation("daily_summary:U1", bucket());
        let outcome = index.try_reserve(&second).await.expect("reserve");

        match outcome {
            ReservationOutcome::AlreadyReserved(existing) => {
                assert_eq!(existing.job_sort, first.job_sort);
                assert_eq!(existing.logical_id, "daily_summary:U1");
            }
            ReservationOutcome::Reserved => panic!("expected AlreadyReserved"),
        }
    }

    #[tokio::test]
    async fn different_bucket_is_a_fresh_intent() {
        let index = DeduplicationIndex::new(Arc::new(MemoryBackend::new()));
        index
            .try_reserve(&make_reservation("daily_summary:U1", bucket()))
            .await
            .expect("reserve");

        let next_day = bucket().succ_opt().unwrap();
        let outcome = index
            .try_reserve(&make_reservation("daily_summary:U1", next_day))
            .await
            .expect("reserve");
        assert!(matches!(outcome, ReservationOutcome::Reserved));
    }

    #[tokio::test]
    async fn different_logical_ids_do_not_collide() {
        let index = DeduplicationIndex::new(Arc::new(MemoryBackend::new()));
        index
            .try_reserve(&make_reservation("daily_summary:U1", bucket()))
            .await
            .expect("reserve");

        let outcome = index
            .try_reserve(&make_reservation("daily_summary:U2", bucket()))
            .await
            .expect("reserve");
        assert!(matches!(outcome, ReservationOutcome::Reserved));
    }

    #[tokio::test]
    async fn get_reservation_missing_is_none() {
        let index = DeduplicationIndex::new(Arc::new(MemoryBackend::new()));
        let result = index
            .get_reservation("work_sampling_prompt:U1:0", bucket())
            .await
            .expect("get");
        assert!(result.is_none());
    }
}
