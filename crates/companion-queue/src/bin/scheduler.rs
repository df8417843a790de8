//! Scheduler process: singleton-lock leadership, cron planners, and an
//! embedded job worker.

use std::process::ExitCode;
use std::sync::Arc;

use companion_core::{SingletonLock, init_logging};
use companion_queue::config::log_format_from_env;
use companion_queue::handler::ShutdownSignal;
use companion_queue::planner::{
    CronPlanner, DailySummaryPlanner, HeartbeatPlanner, JanitorPlanner, LeadershipTask,
    UserSyncPlanner, WorkSamplingPlanner,
};
use companion_queue::runtime::Runtime;

#[tokio::main]
async fn main() -> ExitCode {
    init_logging(log_format_from_env());

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("scheduler failed to start: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> companion_queue::error::Result<()> {
    let (shutdown_tx, shutdown) = ShutdownSignal::new();
    let runtime = Runtime::from_env(shutdown.clone())?;

    let lock = Arc::new(SingletonLock::new(runtime.storage.clone()));
    tracing::info!(process_id = %lock.process_id(), "scheduler starting");

    let leadership = LeadershipTask::new(
        lock.clone(),
        runtime.clock.clone(),
        runtime.config.singleton_ttl,
        runtime.config.singleton_refresh,
    );

    let mut planner = CronPlanner::new(lock, runtime.planner_context(), runtime.clock.clone());
    if runtime.config.enable_heartbeat {
        planner.register(Arc::new(HeartbeatPlanner))?;
    }
    planner.register(Arc::new(DailySummaryPlanner))?;
    planner.register(Arc::new(WorkSamplingPlanner))?;
    planner.register(Arc::new(UserSyncPlanner))?;
    planner.register(Arc::new(JanitorPlanner::default()))?;

    let worker = runtime.worker();

    tokio::spawn(companion_queue::runtime::shutdown_on_signal(shutdown_tx));

    tokio::join!(
        leadership.run(shutdown.clone()),
        planner.run(shutdown.clone()),
        worker.run(shutdown),
    );

    tracing::info!("scheduler stopped cleanly");
    Ok(())
}
