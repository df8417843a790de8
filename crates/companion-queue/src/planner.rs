//! Cron-driven planners and the leadership loop that gates them.
//!
//! The planner is a small next-fire-time wheel over `cron` schedules. Every
//! registered task fires only while this process holds the singleton lock;
//! ticks missed during a leadership gap are not backfilled — the next fire
//! time is recomputed from "now", and the dedup index makes the next
//! successful tick idempotent.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use metrics::{counter, gauge};
use sha2::{Digest, Sha256};
use std::str::FromStr;
use tracing::Instrument;
use ulid::Ulid;

use companion_core::{Clock, RefreshOutcome, SingletonLock};

use crate::error::{Error, Result};
use crate::handler::ShutdownSignal;
use crate::metrics::{labels, names};
use crate::ports::UserSettingsStore;
use crate::schedule::{JobScheduler, ScheduleOptions};
use crate::store::JobStore;

/// Shared dependencies handed to every planner task.
#[derive(Clone)]
pub struct PlannerContext {
    /// Scheduling API.
    pub scheduler: JobScheduler,
    /// Per-user settings (timezones).
    pub user_settings: Arc<dyn UserSettingsStore>,
    /// Job store (janitor only).
    pub store: JobStore,
    /// Users the daily planners cover.
    pub users: Vec<String>,
    /// Work-sampling slots per day.
    pub prompts_per_day: u32,
}

/// A recurring planner task.
#[async_trait]
pub trait PlannerTask: Send + Sync {
    /// Task name for logs and metrics.
    fn name(&self) -> &'static str;

    /// Cron expression (5- or 6-field) driving the task.
    fn cron_expression(&self) -> &'static str;

    /// Runs one tick.
    async fn run(&self, now: DateTime<Utc>, ctx: &PlannerContext) -> Result<()>;
}

/// Parses a cron expression, normalizing 5-field syntax to 6-field with
/// seconds.
fn parse_cron_expression(expression: &str) -> Result<Schedule> {
    let field_count = expression.split_whitespace().count();
    let normalized = match field_count {
        5 => format!("0 {expression}"),
        6 => expression.to_string(),
        _ => {
            return Err(Error::configuration(format!(
                "invalid cron expression (expected 5 or 6 fields): {expression}"
            )));
        }
    };
    Schedule::from_str(&normalized)
        .map_err(|e| Error::configuration(format!("invalid cron expression: {e}")))
}

struct PlannerEntry {
    task: Arc<dyn PlannerTask>,
    schedule: Schedule,
    next_fire: Option<DateTime<Utc>>,
}

/// Time-driven scheduler for recurring planner tasks.
pub struct CronPlanner {
    entries: Vec<PlannerEntry>,
    lock: Arc<SingletonLock>,
    ctx: PlannerContext,
    clock: Arc<dyn Clock>,
}

impl CronPlanner {
    /// Creates an empty planner.
    #[must_use]
    pub fn new(lock: Arc<SingletonLock>, ctx: PlannerContext, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Vec::new(),
            lock,
            ctx,
            clock,
        }
    }

    /// Registers a task under its cron expression.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the cron expression does not parse.
    pub fn register(&mut self, task: Arc<dyn PlannerTask>) -> Result<()> {
        let schedule = parse_cron_expression(task.cron_expression())?;
        self.entries.push(PlannerEntry {
            task,
            schedule,
            next_fire: None,
        });
        Ok(())
    }

    /// Fires every task whose next fire time has passed. Returns the number
    /// of tasks fired.
    ///
    /// A task with no computed fire time (first tick, or after a leadership
    /// gap) gets one from `now` without firing — missed ticks are dropped,
    /// not backfilled.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> usize {
        let is_leader = self.lock.is_leader();
        let mut fired = 0;

        for entry in &mut self.entries {
            let Some(next_fire) = entry.next_fire else {
                entry.next_fire = entry.schedule.after(&now).next();
                continue;
            };

            if now < next_fire {
                continue;
            }

            // Recompute from now either way so a long gap yields exactly one
            // upcoming fire, never a burst of stale ones.
            entry.next_fire = entry.schedule.after(&now).next();

            if !is_leader {
                continue;
            }

            let span = companion_core::observability::planner_span(
                entry.task.name(),
                self.lock.process_id(),
            );

            counter!(names::PLANNER_TICKS_TOTAL, labels::TASK => entry.task.name()).increment(1);
            match entry.task.run(now, &self.ctx).instrument(span).await {
                Ok(()) => fired += 1,
                Err(e) => {
                    tracing::error!(task = entry.task.name(), "planner tick failed: {e}");
                }
            }
        }

        fired
    }

    /// Runs the planner loop until shutdown.
    pub async fn run(mut self, mut shutdown: ShutdownSignal) {
        tracing::info!(tasks = self.entries.len(), "cron planner started");
        loop {
            tokio::select! {
                () = shutdown.shutdown_requested() => break,
                () = tokio::time::sleep(self.sleep_until_next_fire()) => {
                    let now = self.clock.now();
                    self.tick(now).await;
                }
            }
        }
        tracing::info!("cron planner stopped");
    }

    fn sleep_until_next_fire(&self) -> StdDuration {
        let now = self.clock.now();
        let earliest = self
            .entries
            .iter()
            .filter_map(|e| e.next_fire)
            .min()
            .unwrap_or(now);
        let until = (earliest - now).to_std().unwrap_or(StdDuration::ZERO);
        // Re-check leadership and shutdown at least every few seconds.
        until.clamp(StdDuration::from_millis(250), StdDuration::from_secs(5))
    }
}

/// Owns the singleton lock: acquires when free, refreshes while held.
pub struct LeadershipTask {
    lock: Arc<SingletonLock>,
    clock: Arc<dyn Clock>,
    ttl: StdDuration,
    refresh_interval: StdDuration,
}

impl LeadershipTask {
    /// Creates a leadership loop over the given lock.
    #[must_use]
    pub fn new(
        lock: Arc<SingletonLock>,
        clock: Arc<dyn Clock>,
        ttl: StdDuration,
        refresh_interval: StdDuration,
    ) -> Self {
        Self {
            lock,
            clock,
            ttl,
            refresh_interval,
        }
    }

    /// Performs one acquire-or-refresh step.
    ///
    /// # Errors
    ///
    /// Returns an error only for storage failures.
    pub async fn step(&self) -> Result<()> {
        let now = self.clock.now();
        if self.lock.is_leader() {
            if self.lock.refresh(self.ttl, now).await? == RefreshOutcome::Lost {
                tracing::warn!(process_id = %self.lock.process_id(), "leadership lost");
            }
        } else if self.lock.try_acquire(self.ttl, now).await? {
            tracing::info!(process_id = %self.lock.process_id(), "leadership acquired");
        }

        gauge!(names::LEADER_STATE).set(if self.lock.is_leader() { 1.0 } else { 0.0 });
        Ok(())
    }

    /// Runs the acquire/refresh loop until shutdown, then releases.
    pub async fn run(self, mut shutdown: ShutdownSignal) {
        loop {
            if let Err(e) = self.step().await {
                tracing::warn!("leadership step failed: {e}");
            }

            tokio::select! {
                () = shutdown.shutdown_requested() => break,
                () = tokio::time::sleep(self.refresh_interval) => {}
            }
        }

        if let Err(e) = self.lock.release(self.clock.now()).await {
            tracing::warn!("lock release failed: {e}");
        }
        gauge!(names::LEADER_STATE).set(0.0);
    }
}

/// Resolves a user's timezone from settings, defaulting to UTC.
async fn user_timezone(ctx: &PlannerContext, user_id: &str) -> Tz {
    let settings = match ctx.user_settings.get_user_settings(user_id).await {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!(user_id, "failed to load user settings: {e}");
            return Tz::UTC;
        }
    };

    settings
        .timezone
        .as_deref()
        .and_then(|name| {
            name.parse::<Tz>()
                .map_err(|_| tracing::warn!(user_id, timezone = name, "invalid timezone"))
                .ok()
        })
        .unwrap_or(Tz::UTC)
}

/// Every minute: log a heartbeat and enqueue its follow-up event job.
pub struct HeartbeatPlanner;

#[async_trait]
impl PlannerTask for HeartbeatPlanner {
    fn name(&self) -> &'static str {
        "heartbeat"
    }

    fn cron_expression(&self) -> &'static str {
        "0 * * * * *"
    }

    async fn run(&self, now: DateTime<Utc>, ctx: &PlannerContext) -> Result<()> {
        let heartbeat_id = Ulid::new();
        tracing::info!("Heartbeat (timed): UUID={heartbeat_id}");

        ctx.scheduler
            .schedule(
                "heartbeat_event",
                serde_json::json!({ "uuid": heartbeat_id.to_string() }),
                now + Duration::seconds(10),
                ScheduleOptions::new(),
            )
            .await?;
        Ok(())
    }
}

/// Midnight UTC: schedule each user's daily summary for their next 07:00.
pub struct DailySummaryPlanner;

/// Computes the next 07:00 in the user's zone, returned in UTC, plus the
/// local calendar date it falls on (the dedup bucket).
fn next_seven_am(tz: Tz, now: DateTime<Utc>) -> (DateTime<Utc>, NaiveDate) {
    let now_local = now.with_timezone(&tz);
    let mut date = now_local.date_naive();

    loop {
        if let Some(seven) = date
            .and_hms_opt(7, 0, 0)
            .and_then(|naive| tz.from_local_datetime(&naive).earliest())
        {
            if seven > now_local {
                return (seven.with_timezone(&Utc), date);
            }
        }
        // Already past 07:00 today (or 07:00 didn't exist due to a DST gap).
        date = date.succ_opt().unwrap_or(date);
    }
}

#[async_trait]
impl PlannerTask for DailySummaryPlanner {
    fn name(&self) -> &'static str {
        "daily_summary"
    }

    fn cron_expression(&self) -> &'static str {
        "0 0 0 * * *"
    }

    async fn run(&self, now: DateTime<Utc>, ctx: &PlannerContext) -> Result<()> {
        for user_id in &ctx.users {
            let tz = user_timezone(ctx, user_id).await;
            let (when, local_date) = next_seven_am(tz, now);

            let outcome = ctx
                .scheduler
                .schedule(
                    "daily_summary",
                    serde_json::json!({ "userId": user_id, "summaryRange": "yesterday" }),
                    when,
                    ScheduleOptions::new()
                        .with_logical_id(format!("daily_summary:{user_id}"))
                        .with_bucket(local_date),
                )
                .await?;
            tracing::debug!(
                user_id,
                %when,
                scheduled = outcome.is_scheduled(),
                "daily summary planned"
            );
        }
        Ok(())
    }
}

/// Midnight UTC: scatter work-sampling prompts across each user's workday.
pub struct WorkSamplingPlanner;

/// Workday window: 08:00 to 17:00 local.
const WORKDAY_START_HOUR: u32 = 8;
const WORKDAY_SECONDS: u32 = 9 * 3600;

/// Picks the deterministic instant for slot `index`, uniform within the slot.
///
/// The PRNG seed is `sha256("<user>-<local_date>-<index>")`, so every leader
/// computes the same instant and the dedup index sees identical intents.
fn sampling_instant(
    tz: Tz,
    local_date: NaiveDate,
    user_id: &str,
    index: u32,
    slots: u32,
) -> Option<DateTime<Utc>> {
    let slot_width = WORKDAY_SECONDS / slots.max(1);

    let mut hasher = Sha256::new();
    hasher.update(format!("{user_id}-{local_date}-{index}").as_bytes());
    let digest = hasher.finalize();
    let seed = u64::from_be_bytes(digest[..8].try_into().ok()?);

    let offset_in_slot = u32::try_from(seed % u64::from(slot_width)).ok()?;
    let seconds_from_start = index * slot_width + offset_in_slot;

    let naive = local_date.and_hms_opt(WORKDAY_START_HOUR, 0, 0)?
        + Duration::seconds(i64::from(seconds_from_start));
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
}

#[async_trait]
impl PlannerTask for WorkSamplingPlanner {
    fn name(&self) -> &'static str {
        "work_sampling"
    }

    fn cron_expression(&self) -> &'static str {
        "0 0 0 * * *"
    }

    async fn run(&self, now: DateTime<Utc>, ctx: &PlannerContext) -> Result<()> {
        for user_id in &ctx.users {
            let tz = user_timezone(ctx, user_id).await;
            let local_date = now.with_timezone(&tz).date_naive();

            for index in 0..ctx.prompts_per_day {
                let Some(when) =
                    sampling_instant(tz, local_date, user_id, index, ctx.prompts_per_day)
                else {
                    tracing::warn!(user_id, index, "could not place sampling slot");
                    continue;
                };

                ctx.scheduler
                    .schedule(
                        "work_sampling_prompt",
                        serde_json::json!({ "userId": user_id, "slotIndex": index }),
                        when,
                        ScheduleOptions::new()
                            .with_logical_id(format!("work_sampling_prompt:{user_id}:{index}"))
                            .with_bucket(local_date),
                    )
                    .await?;
            }
        }
        Ok(())
    }
}

/// Every six hours: enqueue a profile refresh per user.
pub struct UserSyncPlanner;

#[async_trait]
impl PlannerTask for UserSyncPlanner {
    fn name(&self) -> &'static str {
        "user_sync"
    }

    fn cron_expression(&self) -> &'static str {
        "0 0 */6 * * *"
    }

    async fn run(&self, now: DateTime<Utc>, ctx: &PlannerContext) -> Result<()> {
        for user_id in &ctx.users {
            ctx.scheduler
                .schedule(
                    "user_sync",
                    serde_json::json!({ "userId": user_id }),
                    now,
                    ScheduleOptions::new(),
                )
                .await?;
        }
        Ok(())
    }
}

/// 02:00 UTC: prune settled job records older than the retention window.
pub struct JanitorPlanner {
    retention: Duration,
}

impl JanitorPlanner {
    /// Creates a janitor with the given retention window.
    #[must_use]
    pub const fn new(retention: Duration) -> Self {
        Self { retention }
    }
}

impl Default for JanitorPlanner {
    fn default() -> Self {
        Self::new(Duration::days(7))
    }
}

#[async_trait]
impl PlannerTask for JanitorPlanner {
    fn name(&self) -> &'static str {
        "janitor"
    }

    fn cron_expression(&self) -> &'static str {
        "0 0 2 * * *"
    }

    async fn run(&self, now: DateTime<Utc>, ctx: &PlannerContext) -> Result<()> {
        let deleted = ctx.store.delete_older_than(now - self.retention).await?;
        tracing::info!(deleted, "janitor pruned settled job records");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use companion_core::{ManualClock, MemoryBackend};

    use crate::ports::{MemoryUserSettingsStore, UserSettings};
    use crate::testing::scheduler_fixture;

    fn t0() -> DateTime<Utc> {
        // Midnight UTC, a Monday.
        Utc.with_ymd_and_hms(2025, 7, 14, 0, 0, 0).unwrap()
    }

    async fn planner_context(users: Vec<String>) -> (PlannerContext, crate::testing::SchedulerFixture) {
        let fixture = scheduler_fixture();
        let user_settings = Arc::new(MemoryUserSettingsStore::new());
        for user in &users {
            user_settings
                .update_user_settings(
                    user,
                    UserSettings {
                        timezone: Some("America/New_York".into()),
                    },
                )
                .await
                .expect("seed settings");
        }
        let ctx = PlannerContext {
            scheduler: fixture.scheduler.clone(),
            user_settings,
            store: fixture.store.clone(),
            users,
            prompts_per_day: 3,
        };
        (ctx, fixture)
    }

    async fn leader_lock() -> Arc<SingletonLock> {
        let lock = Arc::new(SingletonLock::new(Arc::new(MemoryBackend::new())));
        assert!(
            lock.try_acquire(StdDuration::from_secs(90), Utc::now())
                .await
                .expect("acquire")
        );
        lock
    }

    #[test]
    fn five_field_cron_is_normalized() {
        assert!(parse_cron_expression("0 2 * * *").is_ok());
        assert!(parse_cron_expression("0 0 2 * * *").is_ok());
        assert!(parse_cron_expression("nonsense").is_err());
    }

    #[tokio::test]
    async fn heartbeat_enqueues_event_ten_seconds_out() {
        let (ctx, fixture) = planner_context(vec![]).await;

        HeartbeatPlanner.run(t0(), &ctx).await.expect("run");

        // The follow-up event exists, due ten seconds after the tick.
        let due = fixture
            .store
            .query_due(t0() + Duration::seconds(10), 25)
            .await
            .expect("query");
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].job_type, "heartbeat_event");
        assert_eq!(due[0].scheduled_for, t0() + Duration::seconds(10));
        assert!(due[0].payload.get("uuid").is_some());

        // Not due a second early.
        let early = fixture
            .store
            .query_due(t0() + Duration::seconds(9), 25)
            .await
            .expect("query");
        assert!(early.is_empty());
    }

    #[tokio::test]
    async fn daily_summary_targets_next_seven_am_local() {
        let (ctx, fixture) = planner_context(vec!["U1".into()]).await;

        DailySummaryPlanner.run(t0(), &ctx).await.expect("run");

        // Midnight UTC on 2025-07-14 is 20:00 EDT on the 13th, so the next
        // 07:00 in New York is 11:00 UTC on the 14th.
        let expected = Utc.with_ymd_and_hms(2025, 7, 14, 11, 0, 0).unwrap();
        let due = fixture
            .store
            .query_due(expected, 25)
            .await
            .expect("query");
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].job_type, "daily_summary");
        assert_eq!(due[0].scheduled_for, expected);

        // Running the planner again within the same bucket is a no-op.
        DailySummaryPlanner.run(t0(), &ctx).await.expect("run again");
        let due = fixture
            .store
            .query_due(expected + Duration::days(2), 25)
            .await
            .expect("query");
        assert_eq!(due.len(), 1);
    }

    #[test]
    fn next_seven_am_rolls_to_tomorrow_after_seven() {
        let tz: Tz = "UTC".parse().unwrap();
        let morning = Utc.with_ymd_and_hms(2025, 7, 14, 6, 0, 0).unwrap();
        let (when, bucket) = next_seven_am(tz, morning);
        assert_eq!(when, Utc.with_ymd_and_hms(2025, 7, 14, 7, 0, 0).unwrap());
        assert_eq!(bucket, NaiveDate::from_ymd_opt(2025, 7, 14).unwrap());

        let afternoon = Utc.with_ymd_and_hms(2025, 7, 14, 12, 0, 0).unwrap();
        let (when, bucket) = next_seven_am(tz, afternoon);
        assert_eq!(when, Utc.with_ymd_and_hms(2025, 7, 15, 7, 0, 0).unwrap());
        assert_eq!(bucket, NaiveDate::from_ymd_opt(2025, 7, 15).unwrap());
    }

    #[test]
    fn sampling_instants_are_deterministic_and_in_slot() {
        let tz: Tz = "America/New_York".parse().unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 7, 14).unwrap();

        for index in 0..3 {
            let a = sampling_instant(tz, date, "U1", index, 3).expect("instant");
            let b = sampling_instant(tz, date, "U1", index, 3).expect("instant");
            assert_eq!(a, b, "same seed must give the same instant");

            // The instant falls inside its three-hour slot of the 08:00-17:00
            // local workday.
            let local = a.with_timezone(&tz);
            let start = date.and_hms_opt(8, 0, 0).unwrap()
                + Duration::seconds(i64::from(index * 3 * 3600));
            let end = start + Duration::hours(3);
            assert!(local.naive_local() >= start && local.naive_local() < end);
        }

        // Different users land on different instants.
        let u1 = sampling_instant(tz, date, "U1", 0, 3).expect("instant");
        let u2 = sampling_instant(tz, date, "U2", 0, 3).expect("instant");
        assert_ne!(u1, u2);
    }

    #[tokio::test]
    async fn work_sampling_schedules_one_job_per_slot_idempotently() {
        let (ctx, fixture) = planner_context(vec!["U1".into()]).await;

        WorkSamplingPlanner.run(t0(), &ctx).await.expect("run");
        WorkSamplingPlanner.run(t0(), &ctx).await.expect("run again");

        let due = fixture
            .store
            .query_due(t0() + Duration::days(2), 25)
            .await
            .expect("query");
        assert_eq!(due.len(), 3, "one prompt per slot despite two planner runs");
        assert!(due.iter().all(|j| j.job_type == "work_sampling_prompt"));
    }

    #[tokio::test]
    async fn user_sync_enqueues_per_user() {
        let (ctx, fixture) = planner_context(vec!["U1".into(), "U2".into()]).await;

        UserSyncPlanner.run(t0(), &ctx).await.expect("run");

        let due = fixture.store.query_due(t0(), 25).await.expect("query");
        assert_eq!(due.len(), 2);
        assert!(due.iter().all(|j| j.job_type == "user_sync"));
    }

    #[tokio::test]
    async fn ticks_fire_only_while_leader() {
        let (ctx, fixture) = planner_context(vec![]).await;
        let storage = Arc::new(MemoryBackend::new());
        let lock = Arc::new(SingletonLock::new(storage));
        let clock = Arc::new(ManualClock::new(t0()));

        let mut planner = CronPlanner::new(lock.clone(), ctx, clock);
        planner
            .register(Arc::new(HeartbeatPlanner))
            .expect("register");

        // First tick seeds next_fire; second lands after a minute boundary
        // but we are not leader, so nothing fires.
        assert_eq!(planner.tick(t0()).await, 0);
        assert_eq!(planner.tick(t0() + Duration::seconds(61)).await, 0);
        assert!(
            fixture
                .store
                .query_due(t0() + Duration::days(1), 25)
                .await
                .expect("query")
                .is_empty()
        );

        // Once leadership arrives, the next boundary fires.
        assert!(
            lock.try_acquire(StdDuration::from_secs(90), t0())
                .await
                .expect("acquire")
        );
        assert_eq!(planner.tick(t0() + Duration::seconds(121)).await, 1);
        let due = fixture
            .store
            .query_due(t0() + Duration::days(1), 25)
            .await
            .expect("query");
        assert_eq!(due.len(), 1);
    }

    #[tokio::test]
    async fn missed_ticks_are_not_backfilled() {
        let (ctx, fixture) = planner_context(vec![]).await;
        let lock = leader_lock().await;
        let clock = Arc::new(ManualClock::new(t0()));

        let mut planner = CronPlanner::new(lock, ctx, clock);
        planner
            .register(Arc::new(HeartbeatPlanner))
            .expect("register");

        planner.tick(t0()).await; // seeds next_fire

        // An hour of missed minutes collapses into a single fire.
        assert_eq!(planner.tick(t0() + Duration::hours(1)).await, 1);
        let due = fixture
            .store
            .query_due(t0() + Duration::days(1), 25)
            .await
            .expect("query");
        assert_eq!(due.len(), 1);
    }

    #[tokio::test]
    async fn janitor_prunes_old_settled_records() {
        let (ctx, fixture) = planner_context(vec![]).await;

        let old = crate::job::JobRecord::new(
            "heartbeat_event",
            serde_json::json!({"uuid": "u"}),
            t0() - Duration::days(30),
            t0() - Duration::days(30),
        );
        fixture.store.insert(&old).await.expect("insert");
        let crate::store::ClaimOutcome::Claimed(claimed) = fixture
            .store
            .claim(&old, "w1", Duration::seconds(60), t0() - Duration::days(30))
            .await
            .expect("claim")
        else {
            panic!("claim failed")
        };
        fixture
            .store
            .mark_completed(&claimed, "w1", t0() - Duration::days(30))
            .await
            .expect("complete");

        JanitorPlanner::default().run(t0(), &ctx).await.expect("run");

        assert!(
            fixture
                .store
                .get(old.job_id, old.scheduled_for)
                .await
                .expect("get")
                .is_none()
        );
    }

    #[tokio::test]
    async fn leadership_task_acquires_then_reports_loss() {
        let storage = Arc::new(MemoryBackend::new());
        let lock = Arc::new(SingletonLock::new(storage.clone()));
        let clock = Arc::new(ManualClock::new(t0()));
        let task = LeadershipTask::new(
            lock.clone(),
            clock.clone(),
            StdDuration::from_secs(90),
            StdDuration::from_secs(30),
        );

        task.step().await.expect("step");
        assert!(lock.is_leader());

        // A rival takes over after the TTL lapses; our next step detects it.
        let rival = SingletonLock::new(storage);
        clock.advance(Duration::seconds(120));
        assert!(
            rival
                .try_acquire(StdDuration::from_secs(90), clock.now())
                .await
                .expect("rival acquire")
        );

        task.step().await.expect("step");
        // At most one process may believe it is leader.
        assert!(!lock.is_leader());
        assert!(rival.is_leader());
    }
}
