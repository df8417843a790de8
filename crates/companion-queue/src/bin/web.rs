//! Web process: HTTP surface over the Scheduling API.

use std::process::ExitCode;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use companion_core::{LeaseInfo, SingletonLock, init_logging};
use companion_queue::config::log_format_from_env;
use companion_queue::error::Error;
use companion_queue::handler::ShutdownSignal;
use companion_queue::runtime::Runtime;
use companion_queue::schedule::{JobScheduler, ScheduleOptions, ScheduleOutcome};

#[derive(Clone)]
struct AppState {
    scheduler: JobScheduler,
    lock: Arc<SingletonLock>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleRequest {
    job_type: String,
    #[serde(default)]
    payload: serde_json::Value,
    /// Defaults to "now" when omitted.
    #[serde(default)]
    when: Option<DateTime<Utc>>,
    #[serde(default)]
    logical_id: Option<String>,
    #[serde(default)]
    bucket: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    job_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    lease: Option<LeaseInfo>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let status = match &error {
            Error::UnknownJobType { .. } | Error::MalformedLogicalId { .. } => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

async fn health_handler() -> StatusCode {
    StatusCode::OK
}

async fn status_handler(
    State(state): State<AppState>,
) -> Result<Json<StatusResponse>, ApiError> {
    let lease = state
        .lock
        .read_lease()
        .await
        .map_err(|e| ApiError::from(Error::from(e)))?;
    Ok(Json(StatusResponse { lease }))
}

async fn schedule_handler(
    State(state): State<AppState>,
    Json(request): Json<ScheduleRequest>,
) -> Result<(StatusCode, Json<ScheduleResponse>), ApiError> {
    let when = request.when.unwrap_or_else(Utc::now);

    let mut options = ScheduleOptions::new();
    if let Some(logical_id) = request.logical_id {
        options = options.with_logical_id(logical_id);
    }
    if let Some(bucket) = request.bucket {
        options = options.with_bucket(bucket);
    }

    let outcome = state
        .scheduler
        .schedule(&request.job_type, request.payload, when, options)
        .await?;

    let response = match outcome {
        ScheduleOutcome::Scheduled { job_id } => (
            StatusCode::CREATED,
            Json(ScheduleResponse {
                status: "scheduled",
                job_id: Some(job_id.to_string()),
            }),
        ),
        ScheduleOutcome::Deduplicated { .. } => (
            StatusCode::OK,
            Json(ScheduleResponse {
                status: "deduplicated",
                job_id: None,
            }),
        ),
    };
    Ok(response)
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging(log_format_from_env());

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("web server failed to start: {e}");
            ExitCode::FAILURE
        }
    }
}

fn resolve_port() -> companion_queue::error::Result<u16> {
    match std::env::var("PORT") {
        Ok(port) => port
            .parse::<u16>()
            .map_err(|_| Error::configuration(format!("invalid PORT: {port}"))),
        Err(_) => Ok(8080),
    }
}

async fn run() -> companion_queue::error::Result<()> {
    let (shutdown_tx, shutdown) = ShutdownSignal::new();
    let runtime = Runtime::from_env(shutdown.clone())?;
    let port = resolve_port()?;

    let state = AppState {
        scheduler: runtime.scheduler.clone(),
        lock: Arc::new(SingletonLock::new(runtime.storage.clone())),
    };

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/jobs", post(schedule_handler))
        .with_state(state);

    tokio::spawn(companion_queue::runtime::shutdown_on_signal(shutdown_tx));

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::configuration(format!("failed to bind {addr}: {e}")))?;
    tracing::info!(%addr, "web server listening");

    let mut shutdown = shutdown;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.shutdown_requested().await })
        .await
        .map_err(|e| Error::configuration(format!("server error: {e}")))?;

    tracing::info!("web server stopped cleanly");
    Ok(())
}
