//! Storage key encoding for the job table and dedup index.
//!
//! Sort keys are fixed-width so lexicographic order equals chronological
//! order: `scheduled#<RFC3339 UTC, 6-digit microseconds>#<job_id>`. A range
//! scan bounded above by `scheduled#<now>#~` therefore returns exactly the
//! records with `scheduled_for <= now` (`~` sorts after every character a
//! ULID can contain).
//!
//! Changing this format is a breaking change to the persisted layout.

use chrono::{DateTime, NaiveDate, Utc};

use companion_core::JobId;

use crate::error::{Error, Result};

/// Partition of all job records.
pub const JOB_PARTITION: &str = "job";

/// Prefix shared by every job sort key.
const SORT_PREFIX: &str = "scheduled#";

/// Fixed-width timestamp layout used inside sort keys.
const SORT_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Encodes the sort-key timestamp at microsecond precision.
fn sort_timestamp(instant: DateTime<Utc>) -> String {
    instant.format(SORT_TIMESTAMP_FORMAT).to_string()
}

/// Builds the sort key for a job record.
#[must_use]
pub fn job_sort_key(scheduled_for: DateTime<Utc>, job_id: JobId) -> String {
    format!("{SORT_PREFIX}{}#{job_id}", sort_timestamp(scheduled_for))
}

/// Parses a job sort key back into its timestamp and job ID.
///
/// # Errors
///
/// Returns `Error::InvalidSortKey` if the key does not match the layout.
pub fn parse_job_sort_key(sort_key: &str) -> Result<(DateTime<Utc>, JobId)> {
    let invalid = || Error::InvalidSortKey {
        sort_key: sort_key.to_string(),
    };

    let rest = sort_key.strip_prefix(SORT_PREFIX).ok_or_else(invalid)?;
    let (timestamp, job_id) = rest.split_once('#').ok_or_else(invalid)?;

    let scheduled_for = DateTime::parse_from_rfc3339(timestamp)
        .map_err(|_| invalid())?
        .with_timezone(&Utc);
    let job_id: JobId = job_id.parse().map_err(|_| invalid())?;

    Ok((scheduled_for, job_id))
}

/// Storage key of a job record.
#[must_use]
pub fn job_item_key(sort_key: &str) -> String {
    format!("{JOB_PARTITION}/{sort_key}")
}

/// Prefix under which all job records live.
#[must_use]
pub fn job_scan_prefix() -> String {
    format!("{JOB_PARTITION}/{SORT_PREFIX}")
}

/// Upper bound (inclusive) for the due-job range scan at `now`.
#[must_use]
pub fn due_upper_bound(now: DateTime<Utc>) -> String {
    format!("{JOB_PARTITION}/{SORT_PREFIX}{}#~", sort_timestamp(now))
}

/// Storage key of a dedup reservation.
///
/// Partition `dedup#<logical_id>`, sort = the bucket date.
#[must_use]
pub fn dedup_item_key(logical_id: &str, bucket: NaiveDate) -> String {
    format!("dedup#{logical_id}/{bucket}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn sort_key_roundtrip() {
        let scheduled = Utc.with_ymd_and_hms(2025, 7, 14, 7, 0, 0).unwrap();
        let job_id = JobId::generate();

        let sk = job_sort_key(scheduled, job_id);
        let (parsed_ts, parsed_id) = parse_job_sort_key(&sk).expect("parse");
        assert_eq!(parsed_ts, scheduled);
        assert_eq!(parsed_id, job_id);
    }

    #[test]
    fn sort_keys_are_fixed_width() {
        let a = job_sort_key(
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            JobId::generate(),
        );
        let b = job_sort_key(
            Utc.with_ymd_and_hms(2025, 12, 31, 23, 59, 59).unwrap()
                + chrono::Duration::microseconds(999_999),
            JobId::generate(),
        );
        assert_eq!(a.len(), b.len());
    }

    #[test]
    fn sort_order_matches_schedule_order() {
        let earlier = job_sort_key(
            Utc.with_ymd_and_hms(2025, 7, 14, 7, 0, 0).unwrap(),
            JobId::generate(),
        );
        let later = job_sort_key(
            Utc.with_ymd_and_hms(2025, 7, 14, 7, 0, 1).unwrap(),
            JobId::generate(),
        );
        assert!(earlier < later);
    }

    #[test]
    fn microsecond_precision_is_preserved() {
        let scheduled = Utc.with_ymd_and_hms(2025, 7, 14, 7, 0, 0).unwrap()
            + chrono::Duration::microseconds(123_456);
        let sk = job_sort_key(scheduled, JobId::generate());
        assert!(sk.contains("07:00:00.123456Z"));

        let (parsed, _) = parse_job_sort_key(&sk).expect("parse");
        assert_eq!(parsed, scheduled);
    }

    #[test]
    fn due_upper_bound_includes_jobs_at_now() {
        let now = Utc.with_ymd_and_hms(2025, 7, 14, 12, 0, 0).unwrap();
        let at_now = job_item_key(&job_sort_key(now, JobId::generate()));
        let before = job_item_key(&job_sort_key(
            now - chrono::Duration::seconds(1),
            JobId::generate(),
        ));
        let after = job_item_key(&job_sort_key(
            now + chrono::Duration::microseconds(1),
            JobId::generate(),
        ));

        let bound = due_upper_bound(now);
        assert!(at_now <= bound, "jobs scheduled exactly at now are due");
        assert!(before <= bound);
        assert!(after > bound, "future jobs are excluded");
    }

    #[test]
    fn parse_rejects_malformed_keys() {
        for bad in [
            "scheduled#not-a-time#01ARZ3NDEKTSV4RRFFQ69G5FAV",
            "scheduled#2025-07-14T07:00:00.000000Z#not-a-ulid",
            "other#2025-07-14T07:00:00.000000Z#01ARZ3NDEKTSV4RRFFQ69G5FAV",
            "scheduled#missing-id",
        ] {
            assert!(parse_job_sort_key(bad).is_err(), "should reject: {bad}");
        }
    }

    #[test]
    fn dedup_key_layout() {
        let bucket = NaiveDate::from_ymd_opt(2025, 7, 14).unwrap();
        assert_eq!(
            dedup_item_key("daily_summary:U123", bucket),
            "dedup#daily_summary:U123/2025-07-14"
        );
    }
}
