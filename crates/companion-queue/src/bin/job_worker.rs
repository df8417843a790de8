//! Worker process: runs the poll loop only, no planners.

use std::process::ExitCode;

use companion_core::init_logging;
use companion_queue::config::log_format_from_env;
use companion_queue::handler::ShutdownSignal;
use companion_queue::runtime::Runtime;

#[tokio::main]
async fn main() -> ExitCode {
    init_logging(log_format_from_env());

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("job worker failed to start: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> companion_queue::error::Result<()> {
    let (shutdown_tx, shutdown) = ShutdownSignal::new();
    let runtime = Runtime::from_env(shutdown.clone())?;

    let worker = runtime.worker();
    tracing::info!(worker_id = %worker.worker_id(), "job worker starting");

    tokio::spawn(companion_queue::runtime::shutdown_on_signal(shutdown_tx));

    worker.run(shutdown).await;
    tracing::info!("job worker stopped cleanly");
    Ok(())
}
