//! Logging initialization and span helpers.
//!
//! Structured logging with consistent spans across the worker, planner, and
//! binaries. Initialization is idempotent so tests and embedded use can call
//! it freely.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at startup. Safe to call multiple times; subsequent calls are
/// no-ops. Log levels come from `RUST_LOG` (default `info`).
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates a span for a job-level operation.
#[must_use]
pub fn job_span(operation: &str, job_id: &str, job_type: &str) -> Span {
    tracing::info_span!(
        "job",
        op = operation,
        job_id = job_id,
        job_type = job_type,
    )
}

/// Creates a span for a planner tick.
#[must_use]
pub fn planner_span(task: &str, process_id: &str) -> Span {
    tracing::info_span!("planner", task = task, process_id = process_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_is_idempotent() {
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Pretty);
    }

    #[test]
    fn span_helpers_create_spans() {
        let span = job_span("claim", "01JOB", "daily_summary");
        let _guard = span.enter();
        tracing::info!("test message in span");

        let span = planner_span("heartbeat", "123-01PROC");
        let _guard2 = span.enter();
        tracing::info!("planner message");
    }
}
