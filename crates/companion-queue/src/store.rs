//! Job persistence over the conditional-write item store.
//!
//! Every mutation encodes its precondition as a version-bound write: the
//! record is read together with its version token, the condition is checked
//! in memory, and the update is written with `MatchesVersion`. A concurrent
//! writer invalidates the token, so the CAS reports a lost race — expected
//! and benign, never an error.
//!
//! ## Retry deferral
//!
//! `mark_failed_for_retry` rotates the sort key: the exhausted record is
//! CAS-updated to `failed` (the superseded marker) and a fresh `pending`
//! record for the same `job_id` is inserted at the new `scheduled_for`.
//! Polling filters on `pending`, so at most one live record per `job_id` is
//! ever observable.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use metrics::counter;

use companion_core::{JobId, StorageBackend, WritePrecondition, WriteResult};

use crate::error::{Error, Result};
use crate::job::{JobRecord, JobStatus};
use crate::keys;
use crate::metrics::{labels, names};

/// Bounded in-process retries for transient read failures.
const READ_RETRY_DELAYS_MS: [u64; 3] = [25, 50, 100];

/// Result of a claim attempt.
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    /// This worker now holds the lease; the updated record is returned.
    Claimed(JobRecord),
    /// Another worker got there first (or the record changed underneath us).
    LostRace,
}

impl ClaimOutcome {
    /// Returns true if the claim succeeded.
    #[must_use]
    pub const fn is_claimed(&self) -> bool {
        matches!(self, Self::Claimed(_))
    }
}

/// Result of a lease renewal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseOutcome {
    /// The lease was extended.
    Renewed,
    /// The lease is no longer ours; the handler must be abandoned.
    Lost,
}

/// Result of a finalization write (complete / retry / dead-letter / cancel).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// The transition was applied.
    Applied,
    /// The lease was lost; another worker owns the outcome.
    Lost,
}

/// Persistence layer for scheduled jobs.
#[derive(Clone)]
pub struct JobStore {
    storage: Arc<dyn StorageBackend>,
}

impl JobStore {
    /// Creates a store over the shared backend.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    fn record_key(job: &JobRecord) -> String {
        keys::job_item_key(&keys::job_sort_key(job.scheduled_for, job.job_id))
    }

    /// Inserts a fresh job record.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails or a record already exists at the
    /// key — the sort key embeds a fresh job ID, so a collision indicates a
    /// bug upstream.
    pub async fn insert(&self, job: &JobRecord) -> Result<()> {
        let key = Self::record_key(job);
        let body = encode_job(job)?;

        match self
            .storage
            .put(&key, body, WritePrecondition::DoesNotExist)
            .await?
        {
            WriteResult::Success { .. } => {
                counter!(names::JOBS_TOTAL, labels::STATUS => "pending").increment(1);
                Ok(())
            }
            WriteResult::PreconditionFailed { .. } => {
                Err(Error::Core(companion_core::Error::PreconditionFailed {
                    message: format!("job record already exists at {key}"),
                }))
            }
        }
    }

    /// Returns up to `limit` claimable jobs due at `now`, ascending by
    /// scheduled time.
    ///
    /// The filter (`pending` with no live lease) is applied in memory after
    /// the range scan; over-inclusion is harmless because the claim CAS
    /// resolves races.
    ///
    /// # Errors
    ///
    /// Returns an error if the scan or a record read fails persistently.
    pub async fn query_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<JobRecord>> {
        let upper_bound = keys::due_upper_bound(now);
        let metas = self.storage.list(&keys::job_scan_prefix()).await?;

        let mut due = Vec::new();
        for meta in metas {
            if meta.key.as_str() > upper_bound.as_str() {
                // Keys come back in ascending order; everything past the
                // bound is scheduled in the future.
                break;
            }
            if due.len() >= limit {
                break;
            }

            let Some((job, _)) = self.fetch(&meta.key).await? else {
                continue;
            };
            if job.is_claimable_at(now) {
                due.push(job);
            }
        }

        Ok(due)
    }

    /// Attempts to claim a due job for `worker_id`.
    ///
    /// On success the record is `in_progress` with a lease of `lease` from
    /// `now` and `attempts` incremented.
    ///
    /// # Errors
    ///
    /// Returns an error only for storage failures; racing is `LostRace`.
    pub async fn claim(
        &self,
        job: &JobRecord,
        worker_id: &str,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome> {
        let key = Self::record_key(job);
        let Some((current, version)) = self.fetch(&key).await? else {
            return Ok(Self::lost_race());
        };

        if !current.is_claimable_at(now) {
            return Ok(Self::lost_race());
        }

        let mut claimed = current;
        claimed.status = JobStatus::InProgress;
        claimed.locked_by = Some(worker_id.to_string());
        claimed.lock_expires_at = Some(now + lease);
        claimed.attempts += 1;

        match self
            .storage
            .put(&key, encode_job(&claimed)?, WritePrecondition::MatchesVersion(version))
            .await?
        {
            WriteResult::Success { .. } => {
                counter!(names::CLAIMS_TOTAL, labels::OUTCOME => "claimed").increment(1);
                Ok(ClaimOutcome::Claimed(claimed))
            }
            WriteResult::PreconditionFailed { .. } => Ok(Self::lost_race()),
        }
    }

    fn lost_race() -> ClaimOutcome {
        counter!(names::CLAIMS_TOTAL, labels::OUTCOME => "lost_race").increment(1);
        ClaimOutcome::LostRace
    }

    /// Extends the lease on a claimed job.
    ///
    /// # Errors
    ///
    /// Returns an error only for storage failures.
    pub async fn renew_lease(
        &self,
        job: &JobRecord,
        worker_id: &str,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<LeaseOutcome> {
        let key = Self::record_key(job);
        let Some((current, version)) = self.fetch(&key).await? else {
            return Ok(LeaseOutcome::Lost);
        };

        if current.status != JobStatus::InProgress
            || current.locked_by.as_deref() != Some(worker_id)
        {
            return Ok(LeaseOutcome::Lost);
        }

        let mut renewed = current;
        renewed.lock_expires_at = Some(now + lease);

        match self
            .storage
            .put(&key, encode_job(&renewed)?, WritePrecondition::MatchesVersion(version))
            .await?
        {
            WriteResult::Success { .. } => Ok(LeaseOutcome::Renewed),
            WriteResult::PreconditionFailed { .. } => Ok(LeaseOutcome::Lost),
        }
    }

    /// Marks a claimed job completed.
    ///
    /// # Errors
    ///
    /// Returns an error only for storage failures.
    pub async fn mark_completed(
        &self,
        job: &JobRecord,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<FinalizeOutcome> {
        self.finalize(job, worker_id, |record| {
            record.status = JobStatus::Completed;
            record.completed_at = Some(now);
            record.locked_by = None;
            record.lock_expires_at = None;
        })
        .await
    }

    /// Defers a failed job: the current record becomes the `failed`
    /// superseded marker and a fresh `pending` record is inserted at
    /// `next_run`.
    ///
    /// # Errors
    ///
    /// Returns an error for storage failures, including a collision on the
    /// rescheduled record's key.
    pub async fn mark_failed_for_retry(
        &self,
        job: &JobRecord,
        worker_id: &str,
        next_run: DateTime<Utc>,
        last_error: &str,
    ) -> Result<FinalizeOutcome> {
        let outcome = self
            .finalize(job, worker_id, |record| {
                record.status = JobStatus::Failed;
                record.last_error = Some(last_error.to_string());
                record.locked_by = None;
                record.lock_expires_at = None;
            })
            .await?;

        if outcome == FinalizeOutcome::Lost {
            return Ok(FinalizeOutcome::Lost);
        }

        let rescheduled = JobRecord {
            job_id: job.job_id,
            job_type: job.job_type.clone(),
            payload: job.payload.clone(),
            scheduled_for: next_run,
            status: JobStatus::Pending,
            attempts: job.attempts,
            locked_by: None,
            lock_expires_at: None,
            last_error: Some(last_error.to_string()),
            created_at: job.created_at,
            completed_at: None,
        };
        self.insert(&rescheduled).await?;
        Ok(FinalizeOutcome::Applied)
    }

    /// Moves a claimed job to the dead-letter state.
    ///
    /// # Errors
    ///
    /// Returns an error only for storage failures.
    pub async fn mark_dead_letter(
        &self,
        job: &JobRecord,
        worker_id: &str,
        last_error: &str,
    ) -> Result<FinalizeOutcome> {
        let outcome = self
            .finalize(job, worker_id, |record| {
                record.status = JobStatus::DeadLetter;
                record.last_error = Some(last_error.to_string());
                record.locked_by = None;
                record.lock_expires_at = None;
            })
            .await?;
        if outcome == FinalizeOutcome::Applied {
            counter!(names::JOBS_TOTAL, labels::STATUS => "dead_letter").increment(1);
        }
        Ok(outcome)
    }

    /// Cancels a pending job (admin action). Terminal.
    ///
    /// # Errors
    ///
    /// Returns an error only for storage failures.
    pub async fn cancel(&self, job: &JobRecord) -> Result<FinalizeOutcome> {
        let key = Self::record_key(job);
        let Some((current, version)) = self.fetch(&key).await? else {
            return Ok(FinalizeOutcome::Lost);
        };

        if current.status != JobStatus::Pending {
            return Ok(FinalizeOutcome::Lost);
        }

        let mut cancelled = current;
        cancelled.status = JobStatus::Cancelled;

        match self
            .storage
            .put(&key, encode_job(&cancelled)?, WritePrecondition::MatchesVersion(version))
            .await?
        {
            WriteResult::Success { .. } => {
                counter!(names::JOBS_TOTAL, labels::STATUS => "cancelled").increment(1);
                Ok(FinalizeOutcome::Applied)
            }
            WriteResult::PreconditionFailed { .. } => Ok(FinalizeOutcome::Lost),
        }
    }

    /// Reads a job record by its ID and scheduled time.
    ///
    /// # Errors
    ///
    /// Returns an error for storage failures or an undecodable record.
    pub async fn get(
        &self,
        job_id: JobId,
        scheduled_for: DateTime<Utc>,
    ) -> Result<Option<JobRecord>> {
        let key = keys::job_item_key(&keys::job_sort_key(scheduled_for, job_id));
        Ok(self.fetch(&key).await?.map(|(job, _)| job))
    }

    /// Deletes terminal and superseded records scheduled before `cutoff`.
    ///
    /// Live records (`pending`, `in_progress`) are never touched. Returns
    /// the number of records deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the scan fails; individual unreadable records
    /// are skipped.
    pub async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let metas = self.storage.list(&keys::job_scan_prefix()).await?;
        let mut deleted = 0;

        for meta in metas {
            let sort_key = meta.key.trim_start_matches(&format!("{}/", keys::JOB_PARTITION));
            let Ok((scheduled_for, _)) = keys::parse_job_sort_key(sort_key) else {
                continue;
            };
            if scheduled_for >= cutoff {
                break;
            }

            let Some((job, _)) = self.fetch(&meta.key).await? else {
                continue;
            };
            if matches!(job.status, JobStatus::Pending | JobStatus::InProgress) {
                continue;
            }

            self.storage.delete(&meta.key).await?;
            deleted += 1;
        }

        Ok(deleted)
    }

    /// CAS finalization under the worker's lease: condition is
    /// `in_progress` and `locked_by == worker_id`.
    async fn finalize(
        &self,
        job: &JobRecord,
        worker_id: &str,
        apply: impl FnOnce(&mut JobRecord),
    ) -> Result<FinalizeOutcome> {
        let key = Self::record_key(job);
        let Some((current, version)) = self.fetch(&key).await? else {
            return Ok(FinalizeOutcome::Lost);
        };

        if current.status != JobStatus::InProgress
            || current.locked_by.as_deref() != Some(worker_id)
        {
            return Ok(FinalizeOutcome::Lost);
        }

        let mut updated = current;
        apply(&mut updated);

        match self
            .storage
            .put(&key, encode_job(&updated)?, WritePrecondition::MatchesVersion(version))
            .await?
        {
            WriteResult::Success { .. } => {
                counter!(names::JOBS_TOTAL, labels::STATUS => updated.status.as_label())
                    .increment(1);
                Ok(FinalizeOutcome::Applied)
            }
            WriteResult::PreconditionFailed { .. } => Ok(FinalizeOutcome::Lost),
        }
    }

    /// Reads and decodes a record with bounded retries for transient
    /// failures. `None` means the record is gone (rescheduled or pruned).
    async fn fetch(&self, key: &str) -> Result<Option<(JobRecord, String)>> {
        let mut attempt = 0;
        loop {
            let meta = match self.storage.head(key).await {
                Ok(Some(meta)) => meta,
                Ok(None) => return Ok(None),
                Err(e) if attempt < READ_RETRY_DELAYS_MS.len() => {
                    tracing::debug!(key, attempt, "transient head failure: {e}; retrying");
                    tokio::time::sleep(StdDuration::from_millis(READ_RETRY_DELAYS_MS[attempt]))
                        .await;
                    attempt += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            match self.storage.get(key).await {
                Ok(data) => {
                    let job: JobRecord = serde_json::from_slice(&data)
                        .map_err(|e| Error::serialization(format!("decode job at {key}: {e}")))?;
                    return Ok(Some((job, meta.version)));
                }
                Err(companion_core::Error::NotFound(_)) => return Ok(None),
                Err(e) if attempt < READ_RETRY_DELAYS_MS.len() => {
                    tracing::debug!(key, attempt, "transient read failure: {e}; retrying");
                    tokio::time::sleep(StdDuration::from_millis(READ_RETRY_DELAYS_MS[attempt]))
                        .await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn encode_job(job: &JobRecord) -> Result<Bytes> {
    serde_json::to_vec(job)
        .map(Bytes::from)
        .map_err(|e| Error::serialization(format!("serialize job {}: {e}", job.job_id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use companion_core::MemoryBackend;

    fn store() -> JobStore {
        JobStore::new(Arc::new(MemoryBackend::new()))
    }

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 14, 0, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn job_at(store_now: DateTime<Utc>, scheduled: DateTime<Utc>) -> JobRecord {
        JobRecord::new(
            "send_chat_message",
            serde_json::json!({"userId": "U1", "message": "hi"}),
            scheduled,
            store_now,
        )
    }

    fn lease() -> Duration {
        Duration::seconds(60)
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_key() {
        let store = store();
        let job = job_at(t(0), t(100));
        store.insert(&job).await.expect("insert");
        let err = store.insert(&job).await.expect_err("duplicate must fail");
        assert!(err.to_string().contains("already exists"));
    }

    #[tokio::test]
    async fn query_due_returns_only_due_jobs_in_order() {
        let store = store();
        // A and B due at t=100, C at t=200.
        let a = job_at(t(0), t(100));
        let b = job_at(t(0), t(100));
        let c = job_at(t(0), t(200));
        for job in [&a, &b, &c] {
            store.insert(job).await.expect("insert");
        }

        let due = store.query_due(t(150), 25).await.expect("query");
        assert_eq!(due.len(), 2);
        let ids: Vec<_> = due.iter().map(|j| j.job_id).collect();
        assert!(ids.contains(&a.job_id));
        assert!(ids.contains(&b.job_id));
        assert_eq!(due[0].scheduled_for, t(100));

        let due_later = store.query_due(t(250), 25).await.expect("query");
        assert_eq!(due_later.len(), 3);
        assert_eq!(due_later[2].job_id, c.job_id);
    }

    #[tokio::test]
    async fn query_due_respects_limit() {
        let store = store();
        for i in 0..5 {
            store.insert(&job_at(t(0), t(i))).await.expect("insert");
        }
        let due = store.query_due(t(100), 3).await.expect("query");
        assert_eq!(due.len(), 3);
    }

    #[tokio::test]
    async fn claim_race_has_exactly_one_winner() {
        let store = store();
        let job = job_at(t(0), t(100));
        store.insert(&job).await.expect("insert");

        // Two workers race to claim the same snapshot.
        let first = store.claim(&job, "w1", lease(), t(100)).await.expect("claim");
        let second = store.claim(&job, "w2", lease(), t(100)).await.expect("claim");

        assert!(first.is_claimed());
        assert!(matches!(second, ClaimOutcome::LostRace));

        let ClaimOutcome::Claimed(claimed) = first else {
            unreachable!()
        };
        assert_eq!(claimed.status, JobStatus::InProgress);
        assert_eq!(claimed.locked_by.as_deref(), Some("w1"));
        assert_eq!(claimed.attempts, 1);
        assert_eq!(claimed.lock_expires_at, Some(t(160)));
    }

    #[tokio::test]
    async fn claimed_job_disappears_from_query_due() {
        let store = store();
        let job = job_at(t(0), t(100));
        store.insert(&job).await.expect("insert");
        store.claim(&job, "w1", lease(), t(100)).await.expect("claim");

        let due = store.query_due(t(110), 25).await.expect("query");
        assert!(due.is_empty());
    }

    #[tokio::test]
    async fn crashed_worker_job_is_reclaimable_only_after_lease_expiry() {
        let store = store();
        let job = job_at(t(0), t(100));
        store.insert(&job).await.expect("insert");

        // w1 claims and then dies mid-handler: the record stays in_progress
        // with w1's lease until it lapses.
        let ClaimOutcome::Claimed(claimed) =
            store.claim(&job, "w1", lease(), t(100)).await.expect("claim")
        else {
            panic!("claim failed")
        };

        // Before lease expiry the job is invisible and unclaimable.
        assert!(store.query_due(t(130), 25).await.expect("query").is_empty());
        assert!(matches!(
            store.claim(&claimed, "w2", lease(), t(130)).await.expect("claim"),
            ClaimOutcome::LostRace
        ));

        // After expiry it is due again and claimable by another worker.
        let due = store.query_due(t(161), 25).await.expect("query");
        assert_eq!(due.len(), 1);
        let outcome = store.claim(&due[0], "w2", lease(), t(161)).await.expect("claim");
        let ClaimOutcome::Claimed(reclaimed) = outcome else {
            panic!("reclaim failed")
        };
        assert_eq!(reclaimed.locked_by.as_deref(), Some("w2"));
        assert_eq!(reclaimed.attempts, 2);

        // The dead worker's completion write is rejected by the CAS.
        assert_eq!(
            store.mark_completed(&claimed, "w1", t(162)).await.expect("complete"),
            FinalizeOutcome::Lost
        );
    }

    #[tokio::test]
    async fn renew_extends_lease_for_owner_only() {
        let store = store();
        let job = job_at(t(0), t(100));
        store.insert(&job).await.expect("insert");

        let ClaimOutcome::Claimed(claimed) =
            store.claim(&job, "w1", lease(), t(100)).await.expect("claim")
        else {
            panic!("claim failed")
        };

        assert_eq!(
            store.renew_lease(&claimed, "w1", lease(), t(130)).await.expect("renew"),
            LeaseOutcome::Renewed
        );
        assert_eq!(
            store.renew_lease(&claimed, "w2", lease(), t(130)).await.expect("renew"),
            LeaseOutcome::Lost
        );

        let current = store
            .get(claimed.job_id, claimed.scheduled_for)
            .await
            .expect("get")
            .expect("present");
        assert_eq!(current.lock_expires_at, Some(t(190)));
    }

    #[tokio::test]
    async fn mark_completed_clears_lease() {
        let store = store();
        let job = job_at(t(0), t(100));
        store.insert(&job).await.expect("insert");

        let ClaimOutcome::Claimed(claimed) =
            store.claim(&job, "w1", lease(), t(100)).await.expect("claim")
        else {
            panic!("claim failed")
        };

        assert_eq!(
            store.mark_completed(&claimed, "w1", t(105)).await.expect("complete"),
            FinalizeOutcome::Applied
        );

        let current = store
            .get(claimed.job_id, claimed.scheduled_for)
            .await
            .expect("get")
            .expect("present");
        assert_eq!(current.status, JobStatus::Completed);
        assert_eq!(current.completed_at, Some(t(105)));
        assert!(current.locked_by.is_none());
        assert!(current.lock_expires_at.is_none());
    }

    #[tokio::test]
    async fn finalize_by_non_owner_is_lost() {
        let store = store();
        let job = job_at(t(0), t(100));
        store.insert(&job).await.expect("insert");

        let ClaimOutcome::Claimed(claimed) =
            store.claim(&job, "w1", lease(), t(100)).await.expect("claim")
        else {
            panic!("claim failed")
        };

        assert_eq!(
            store.mark_completed(&claimed, "w2", t(105)).await.expect("complete"),
            FinalizeOutcome::Lost
        );
        let current = store
            .get(claimed.job_id, claimed.scheduled_for)
            .await
            .expect("get")
            .expect("present");
        assert_eq!(current.status, JobStatus::InProgress);
    }

    #[tokio::test]
    async fn retry_rotates_sort_key_and_leaves_one_live_record() {
        let store = store();
        let job = job_at(t(0), t(100));
        store.insert(&job).await.expect("insert");

        let ClaimOutcome::Claimed(claimed) =
            store.claim(&job, "w1", lease(), t(100)).await.expect("claim")
        else {
            panic!("claim failed")
        };

        assert_eq!(
            store
                .mark_failed_for_retry(&claimed, "w1", t(160), "boom")
                .await
                .expect("retry"),
            FinalizeOutcome::Applied
        );

        // Old record is the superseded failed marker.
        let old = store
            .get(claimed.job_id, t(100))
            .await
            .expect("get")
            .expect("present");
        assert_eq!(old.status, JobStatus::Failed);
        assert!(old.locked_by.is_none());
        assert_eq!(old.last_error.as_deref(), Some("boom"));

        // New record is pending at the deferred time with attempts carried.
        let fresh = store
            .get(claimed.job_id, t(160))
            .await
            .expect("get")
            .expect("present");
        assert_eq!(fresh.status, JobStatus::Pending);
        assert_eq!(fresh.attempts, 1);
        assert_eq!(fresh.created_at, job.created_at);

        // Polling never sees two live records for the job: the failed marker
        // is filtered, the pending record only appears once due.
        assert!(store.query_due(t(120), 25).await.expect("query").is_empty());
        let due = store.query_due(t(161), 25).await.expect("query");
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].job_id, job.job_id);
        assert_eq!(due[0].scheduled_for, t(160));
    }

    #[tokio::test]
    async fn mark_dead_letter_is_terminal_and_keeps_error() {
        let store = store();
        let job = job_at(t(0), t(100));
        store.insert(&job).await.expect("insert");

        let ClaimOutcome::Claimed(claimed) =
            store.claim(&job, "w1", lease(), t(100)).await.expect("claim")
        else {
            panic!("claim failed")
        };

        store
            .mark_dead_letter(&claimed, "w1", "exhausted")
            .await
            .expect("dead letter");

        let current = store
            .get(claimed.job_id, claimed.scheduled_for)
            .await
            .expect("get")
            .expect("present");
        assert_eq!(current.status, JobStatus::DeadLetter);
        assert_eq!(current.last_error.as_deref(), Some("exhausted"));

        // Terminal records are never dispatched again.
        assert!(store.query_due(t(500), 25).await.expect("query").is_empty());
        assert!(matches!(
            store.claim(&current, "w2", lease(), t(500)).await.expect("claim"),
            ClaimOutcome::LostRace
        ));
    }

    #[tokio::test]
    async fn cancel_only_applies_to_pending() {
        let store = store();
        let job = job_at(t(0), t(100));
        store.insert(&job).await.expect("insert");

        assert_eq!(store.cancel(&job).await.expect("cancel"), FinalizeOutcome::Applied);
        assert!(store.query_due(t(200), 25).await.expect("query").is_empty());

        // Cancelling again (or cancelling a non-pending record) is Lost.
        assert_eq!(store.cancel(&job).await.expect("cancel"), FinalizeOutcome::Lost);
    }

    #[tokio::test]
    async fn delete_older_than_prunes_only_settled_records() {
        let store = store();

        let old_done = job_at(t(0), t(10));
        store.insert(&old_done).await.expect("insert");
        let ClaimOutcome::Claimed(claimed) =
            store.claim(&old_done, "w1", lease(), t(10)).await.expect("claim")
        else {
            panic!("claim failed")
        };
        store.mark_completed(&claimed, "w1", t(11)).await.expect("complete");

        let old_pending = job_at(t(0), t(20));
        store.insert(&old_pending).await.expect("insert");

        let recent_done = job_at(t(0), t(5000));
        store.insert(&recent_done).await.expect("insert");

        let deleted = store.delete_older_than(t(1000)).await.expect("cleanup");
        assert_eq!(deleted, 1);

        assert!(store.get(old_done.job_id, t(10)).await.expect("get").is_none());
        assert!(store.get(old_pending.job_id, t(20)).await.expect("get").is_some());
        assert!(store.get(recent_done.job_id, t(5000)).await.expect("get").is_some());
    }
}
