//! Worker: the poll → claim → execute → finalize loop.
//!
//! One poll loop per process. Claims are attempted sequentially in ascending
//! scheduled order; claimed jobs run concurrently, each on its own task under
//! a semaphore permit. While a handler runs, a background ticker renews the
//! lease at half its length — if renewal reports the lease lost, the handler
//! future is dropped and the job's outcome belongs to whichever worker
//! re-claimed it.
//!
//! The loop never crashes on handler errors: dispatch failures are finalized
//! through the retry policy, poll errors are logged and retried after a
//! short sleep.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use metrics::counter;
use tokio::sync::Semaphore;
use tracing::Instrument;
use ulid::Ulid;

use crate::handler::{DispatchError, HandlerRegistry, JobContext, ShutdownSignal};
use crate::job::JobRecord;
use crate::metrics::{labels, names, Timed};
use crate::ports::JobFailureContext;
use crate::retry::RetryPolicy;
use crate::store::{ClaimOutcome, FinalizeOutcome, JobStore, LeaseOutcome};

/// Worker tuning knobs.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Opaque worker identity recorded in `locked_by`.
    pub worker_id: String,
    /// Poll cadence.
    pub poll_interval: StdDuration,
    /// Max jobs fetched per poll.
    pub batch_limit: usize,
    /// Initial lease length; renewed at half this interval.
    pub lease: chrono::Duration,
    /// In-process handler concurrency.
    pub concurrency: usize,
    /// How long shutdown waits for in-flight handlers.
    pub graceful_timeout: StdDuration,
    /// Backoff and dead-letter policy.
    pub retry_policy: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", Ulid::new()),
            poll_interval: StdDuration::from_secs(30),
            batch_limit: 25,
            lease: chrono::Duration::seconds(60),
            concurrency: 8,
            graceful_timeout: StdDuration::from_secs(30),
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// Poll-loop worker processing scheduled jobs.
pub struct JobWorker {
    store: JobStore,
    registry: Arc<HandlerRegistry>,
    ctx: JobContext,
    config: WorkerConfig,
    permits: Arc<Semaphore>,
}

impl JobWorker {
    /// Creates a worker.
    #[must_use]
    pub fn new(
        store: JobStore,
        registry: Arc<HandlerRegistry>,
        ctx: JobContext,
        config: WorkerConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.concurrency));
        Self {
            store,
            registry,
            ctx,
            config,
            permits,
        }
    }

    /// Returns this worker's identity.
    #[must_use]
    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    /// Runs the poll loop until shutdown, then drains in-flight handlers.
    pub async fn run(self: Arc<Self>, mut shutdown: ShutdownSignal) {
        tracing::info!(
            worker_id = %self.config.worker_id,
            poll_interval_secs = self.config.poll_interval.as_secs(),
            concurrency = self.config.concurrency,
            "job worker started"
        );

        let mut tick = tokio::time::interval(self.config.poll_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = shutdown.shutdown_requested() => break,
                _ = tick.tick() => {
                    let _timer = Timed::start(names::POLL_DURATION_SECONDS);
                    if let Err(e) = self.clone().poll_once().await {
                        tracing::error!(worker_id = %self.config.worker_id, "poll failed: {e}");
                        tokio::time::sleep(StdDuration::from_secs(1)).await;
                    }
                }
            }
        }

        tracing::info!(worker_id = %self.config.worker_id, "job worker draining");
        self.drain().await;
    }

    /// Polls once: fetches due jobs and claims them in ascending scheduled
    /// order, spawning a handler task per successful claim.
    ///
    /// Returns the number of jobs claimed.
    ///
    /// # Errors
    ///
    /// Returns an error if the due query fails persistently. Claim races
    /// and handler failures are not errors.
    pub async fn poll_once(self: Arc<Self>) -> crate::error::Result<usize> {
        let now = self.ctx.clock.now();
        let due = self.store.query_due(now, self.config.batch_limit).await?;

        let mut claimed_count = 0;
        for job in due {
            let permit = self
                .permits
                .clone()
                .acquire_owned()
                .await
                .expect("worker semaphore closed");

            let now = self.ctx.clock.now();
            match self
                .store
                .claim(&job, &self.config.worker_id, self.config.lease, now)
                .await?
            {
                ClaimOutcome::Claimed(claimed) => {
                    claimed_count += 1;
                    let worker = self.clone();
                    tokio::spawn(async move {
                        worker.execute(claimed).await;
                        drop(permit);
                    });
                }
                ClaimOutcome::LostRace => {
                    drop(permit);
                }
            }
        }

        Ok(claimed_count)
    }

    /// Waits up to `graceful_timeout` for in-flight handlers to finish.
    pub async fn drain(&self) {
        let all = u32::try_from(self.config.concurrency).unwrap_or(u32::MAX);
        match tokio::time::timeout(
            self.config.graceful_timeout,
            self.permits.clone().acquire_many_owned(all),
        )
        .await
        {
            Ok(Ok(_)) => tracing::info!(worker_id = %self.config.worker_id, "drained cleanly"),
            _ => {
                // Leases expire on their own; another worker reclaims.
                tracing::warn!(
                    worker_id = %self.config.worker_id,
                    "graceful timeout elapsed with handlers in flight"
                );
            }
        }
    }

    /// Runs the handler under the lease, renewing it in the background.
    async fn execute(&self, job: JobRecord) {
        let span = companion_core::observability::job_span(
            "execute",
            &job.job_id.to_string(),
            &job.job_type,
        );

        let _timer = Timed::start(names::JOB_DURATION_SECONDS);
        let outcome = async {
            tokio::select! {
                result = self.registry.dispatch(&job, &self.ctx) => Some(result),
                () = self.renew_until_lost(&job) => None,
            }
        }
        .instrument(span)
        .await;

        match outcome {
            Some(result) => self.finalize(&job, result).await,
            None => {
                // The lease is gone: whoever re-claimed the job owns its
                // outcome. Our finalize writes would be rejected anyway.
                tracing::warn!(
                    job_id = %job.job_id,
                    worker_id = %self.config.worker_id,
                    "lease lost mid-handler; abandoning"
                );
            }
        }
    }

    /// Renews the lease at half its length; returns only when it is lost.
    async fn renew_until_lost(&self, job: &JobRecord) {
        let lease_std = self
            .config
            .lease
            .to_std()
            .unwrap_or(StdDuration::from_secs(60));
        let cadence = lease_std / 2;

        loop {
            tokio::time::sleep(cadence).await;
            let now = self.ctx.clock.now();
            match self
                .store
                .renew_lease(job, &self.config.worker_id, self.config.lease, now)
                .await
            {
                Ok(LeaseOutcome::Renewed) => {}
                Ok(LeaseOutcome::Lost) => return,
                Err(e) => {
                    // Transient store trouble: the lease may well still be
                    // ours, so keep the handler running and try again.
                    tracing::warn!(job_id = %job.job_id, "lease renewal errored: {e}");
                }
            }
        }
    }

    async fn finalize(
        &self,
        job: &JobRecord,
        result: std::result::Result<(), DispatchError>,
    ) {
        let worker_id = self.config.worker_id.clone();
        let now = self.ctx.clock.now();

        let write = match result {
            Ok(()) => {
                tracing::info!(job_id = %job.job_id, job_type = %job.job_type, "job completed");
                self.store.mark_completed(job, &worker_id, now).await
            }
            Err(error) => {
                let message = error.to_string();
                self.report_failure(job, &message);

                if error.is_permanent() {
                    tracing::warn!(
                        job_id = %job.job_id,
                        "permanent failure; dead-lettering: {message}"
                    );
                    self.store.mark_dead_letter(job, &worker_id, &message).await
                } else if self.config.retry_policy.should_retry(job.attempts) {
                    let next_run = self.config.retry_policy.next_run(now, job.attempts);
                    counter!(names::JOBS_TOTAL, labels::STATUS => "retried").increment(1);
                    tracing::info!(
                        job_id = %job.job_id,
                        attempts = job.attempts,
                        %next_run,
                        "job failed; deferring: {message}"
                    );
                    self.store
                        .mark_failed_for_retry(job, &worker_id, next_run, &message)
                        .await
                } else {
                    tracing::warn!(
                        job_id = %job.job_id,
                        attempts = job.attempts,
                        "retry budget exhausted; dead-lettering: {message}"
                    );
                    self.store.mark_dead_letter(job, &worker_id, &message).await
                }
            }
        };

        match write {
            Ok(FinalizeOutcome::Applied) => {}
            Ok(FinalizeOutcome::Lost) => {
                tracing::debug!(job_id = %job.job_id, "finalize lost to another worker");
            }
            Err(e) => {
                // Leave the job unfinalized; the lease will expire and
                // another worker will reclaim it.
                tracing::error!(job_id = %job.job_id, "finalize write failed: {e}");
            }
        }
    }

    fn report_failure(&self, job: &JobRecord, message: &str) {
        self.ctx.error_reporter.report(
            message,
            &JobFailureContext {
                job_id: job.job_id,
                job_type: job.job_type.clone(),
                attempts: job.attempts,
                payload: job.payload.clone(),
            },
        );
    }
}
