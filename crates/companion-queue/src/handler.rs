//! Handler registry and typed payload dispatch.
//!
//! Each handler declares its payload type; the registry stores a type-erased
//! entry per `job_type`. Dispatch deserializes the raw payload into the
//! declared type — failure is a *permanent* error, since the payload can
//! never become valid — and then invokes the handler. Panics are caught at
//! this boundary and coerced to retryable failures so a poisoned job cannot
//! take the worker loop down.
//!
//! Registration happens during process init and the registry is shared
//! immutably (`Arc`) thereafter.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use tokio::sync::watch;

use companion_core::Clock;

use crate::job::JobRecord;
use crate::ports::{ChatClient, ErrorReporter, LlmClient, LogStore, UserSettingsStore};
use crate::schedule::JobScheduler;

/// Failure returned by a handler.
#[derive(Debug, Clone)]
pub enum HandlerFailure {
    /// Transient failure; the retry policy decides what happens next.
    Retryable {
        /// Human-readable description.
        message: String,
    },
    /// The job can never succeed; dead-letter immediately.
    Permanent {
        /// Human-readable description.
        message: String,
    },
}

impl HandlerFailure {
    /// Creates a retryable failure.
    #[must_use]
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable {
            message: message.into(),
        }
    }

    /// Creates a permanent failure.
    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
        }
    }
}

/// Result type handlers return from [`JobHandler::run`].
pub type HandlerResult = std::result::Result<(), HandlerFailure>;

/// Cooperative shutdown signal delivered to handlers through the context.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Creates a signal and the sender that trips it.
    #[must_use]
    pub fn new() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self { rx })
    }

    /// Creates a signal that never fires (tests, one-shot tools).
    #[must_use]
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        // Keep the channel open for the life of the signal.
        std::mem::forget(tx);
        Self { rx }
    }

    /// Returns true once shutdown has been requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Waits until shutdown is requested.
    pub async fn shutdown_requested(&mut self) {
        // A closed channel counts as shutdown.
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Dependencies available to every handler invocation.
///
/// Handlers may enqueue follow-up jobs through `scheduler` and must treat
/// `shutdown` as a cooperative cancellation signal for long work.
#[derive(Clone)]
pub struct JobContext {
    /// Wall-clock source.
    pub clock: Arc<dyn Clock>,
    /// Scheduling API for follow-up jobs.
    pub scheduler: JobScheduler,
    /// Outbound chat platform.
    pub chat: Arc<dyn ChatClient>,
    /// Activity-log store.
    pub log_store: Arc<dyn LogStore>,
    /// Per-user settings.
    pub user_settings: Arc<dyn UserSettingsStore>,
    /// Language-model client.
    pub llm: Arc<dyn LlmClient>,
    /// Failure tracker.
    pub error_reporter: Arc<dyn ErrorReporter>,
    /// Cooperative shutdown signal.
    pub shutdown: ShutdownSignal,
}

/// A typed job handler.
///
/// Implementations must be idempotent: the queue guarantees at-least-once
/// execution, and a crashed worker's job will run again elsewhere.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    /// The payload type this handler validates against.
    type Payload: DeserializeOwned + Send + 'static;

    /// The job type tag this handler serves.
    fn job_type(&self) -> &'static str;

    /// Executes the job with a validated payload.
    async fn run(&self, payload: Self::Payload, ctx: &JobContext) -> HandlerResult;
}

/// Error produced by a dispatch attempt.
#[derive(Debug, Clone)]
pub enum DispatchError {
    /// No handler registered for the job type. Retryable: during a rolling
    /// deploy an upgraded worker may know the type.
    UnknownJobType {
        /// The unregistered job type.
        job_type: String,
    },
    /// The payload did not match the handler's declared type. Permanent.
    Validation {
        /// The job type whose validation failed.
        job_type: String,
        /// Deserialization error detail.
        message: String,
    },
    /// The handler ran and failed.
    Failed {
        /// Whether the retry policy should be consulted.
        retryable: bool,
        /// Failure detail.
        message: String,
    },
}

impl DispatchError {
    /// Returns true if the failure can never succeed on retry.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        match self {
            Self::Validation { .. } => true,
            Self::UnknownJobType { .. } => false,
            Self::Failed { retryable, .. } => !*retryable,
        }
    }
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownJobType { job_type } => {
                write!(f, "no handler registered for job type: {job_type}")
            }
            Self::Validation { job_type, message } => {
                write!(f, "payload validation failed for {job_type}: {message}")
            }
            Self::Failed { message, .. } => f.write_str(message),
        }
    }
}

#[async_trait]
trait ErasedHandler: Send + Sync {
    async fn dispatch(
        &self,
        job_type: &str,
        payload: serde_json::Value,
        ctx: &JobContext,
    ) -> std::result::Result<(), DispatchError>;
}

struct Entry<H>(H);

#[async_trait]
impl<H: JobHandler> ErasedHandler for Entry<H> {
    async fn dispatch(
        &self,
        job_type: &str,
        payload: serde_json::Value,
        ctx: &JobContext,
    ) -> std::result::Result<(), DispatchError> {
        let typed: H::Payload =
            serde_json::from_value(payload).map_err(|e| DispatchError::Validation {
                job_type: job_type.to_string(),
                message: e.to_string(),
            })?;

        match std::panic::AssertUnwindSafe(self.0.run(typed, ctx))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(HandlerFailure::Retryable { message })) => Err(DispatchError::Failed {
                retryable: true,
                message,
            }),
            Ok(Err(HandlerFailure::Permanent { message })) => Err(DispatchError::Failed {
                retryable: false,
                message,
            }),
            Err(panic) => Err(DispatchError::Failed {
                retryable: true,
                message: format!("handler panicked: {}", panic_message(panic.as_ref())),
            }),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Type-indexed map from `job_type` to its handler.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, Arc<dyn ErasedHandler>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler under its declared job type.
    ///
    /// Last registration wins; call only during process init.
    pub fn register<H: JobHandler>(&mut self, handler: H) {
        self.handlers.insert(handler.job_type(), Arc::new(Entry(handler)));
    }

    /// Returns true if a handler is registered for the job type.
    #[must_use]
    pub fn contains(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    /// Returns the registered job types.
    #[must_use]
    pub fn job_types(&self) -> Vec<&'static str> {
        self.handlers.keys().copied().collect()
    }

    /// Validates and runs the job's payload through its handler.
    ///
    /// # Errors
    ///
    /// Returns a [`DispatchError`] describing validation failure, handler
    /// failure, or an unknown job type.
    pub async fn dispatch(
        &self,
        job: &JobRecord,
        ctx: &JobContext,
    ) -> std::result::Result<(), DispatchError> {
        let Some(entry) = self.handlers.get(job.job_type.as_str()) else {
            return Err(DispatchError::UnknownJobType {
                job_type: job.job_type.clone(),
            });
        };

        entry
            .dispatch(&job.job_type, job.payload.clone(), ctx)
            .await
    }
}
