//! Metric names and helpers for the queue.
//!
//! Exposed through the `metrics` facade; install a recorder (e.g. the
//! Prometheus exporter) in the binary to export them.

use std::time::Instant;

use metrics::histogram;

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: job status transitions, labeled by resulting status.
    pub const JOBS_TOTAL: &str = "companion_jobs_total";
    /// Counter: claim attempts, labeled by outcome (`claimed`/`lost_race`).
    pub const CLAIMS_TOTAL: &str = "companion_claims_total";
    /// Counter: dedup reservations, labeled by outcome.
    pub const DEDUP_TOTAL: &str = "companion_dedup_total";
    /// Counter: planner ticks, labeled by task.
    pub const PLANNER_TICKS_TOTAL: &str = "companion_planner_ticks_total";
    /// Histogram: handler execution duration in seconds.
    pub const JOB_DURATION_SECONDS: &str = "companion_job_duration_seconds";
    /// Histogram: poll cycle duration in seconds.
    pub const POLL_DURATION_SECONDS: &str = "companion_poll_duration_seconds";
    /// Gauge: 1 while this process holds the singleton lock, else 0.
    pub const LEADER_STATE: &str = "companion_leader_state";
}

/// Label keys used across metrics.
pub mod labels {
    /// Resulting job status.
    pub const STATUS: &str = "status";
    /// Job type tag.
    pub const JOB_TYPE: &str = "job_type";
    /// Claim / dedup outcome.
    pub const OUTCOME: &str = "outcome";
    /// Planner task name.
    pub const TASK: &str = "task";
}

/// Records a duration histogram when dropped.
pub struct Timed {
    name: &'static str,
    start: Instant,
}

impl Timed {
    /// Starts timing for the named histogram.
    #[must_use]
    pub fn start(name: &'static str) -> Self {
        Self {
            name,
            start: Instant::now(),
        }
    }
}

impl Drop for Timed {
    fn drop(&mut self) {
        histogram!(self.name).record(self.start.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timed_records_without_recorder_installed() {
        // Must not panic when no metrics recorder is installed.
        let guard = Timed::start(names::POLL_DURATION_SECONDS);
        drop(guard);
    }
}
