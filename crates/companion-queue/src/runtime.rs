//! Process wiring shared by the binaries.
//!
//! Builds the store, registry, scheduler, and handler context from
//! configuration. The chat, log-store, and LLM collaborators are owned by
//! the deployment's service layer; the defaults wired here are the
//! in-process development implementations.

use std::sync::Arc;

use companion_core::{Clock, StorageBackend, SystemClock};

use crate::config::{QueueConfig, storage_from_env};
use crate::dedup::DeduplicationIndex;
use crate::handler::{HandlerRegistry, JobContext, ShutdownSignal};
use crate::handlers::register_builtin_handlers;
use crate::planner::PlannerContext;
use crate::ports::{
    LogErrorReporter, MemoryChatClient, MemoryLlmClient, MemoryLogStore, StorageUserSettingsStore,
    UserSettingsStore,
};
use crate::schedule::JobScheduler;
use crate::store::JobStore;
use crate::worker::JobWorker;

/// Fully wired queue runtime for a process.
pub struct Runtime {
    /// Resolved configuration.
    pub config: QueueConfig,
    /// The shared backend everything persists through.
    pub storage: Arc<dyn StorageBackend>,
    /// Wall clock.
    pub clock: Arc<dyn Clock>,
    /// Job persistence.
    pub store: JobStore,
    /// Dedup index.
    pub dedup: DeduplicationIndex,
    /// Handler registry (immutable after construction).
    pub registry: Arc<HandlerRegistry>,
    /// Scheduling API.
    pub scheduler: JobScheduler,
    /// User settings store shared by handlers and planners.
    pub user_settings: Arc<dyn UserSettingsStore>,
    /// Handler context.
    pub ctx: JobContext,
}

impl Runtime {
    /// Builds a runtime from the process environment.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the environment is unusable.
    pub fn from_env(shutdown: ShutdownSignal) -> crate::error::Result<Self> {
        let config = QueueConfig::from_env()?;
        let storage = storage_from_env()?;
        Ok(Self::new(config, storage, shutdown))
    }

    /// Builds a runtime over an explicit backend.
    #[must_use]
    pub fn new(
        config: QueueConfig,
        storage: Arc<dyn StorageBackend>,
        shutdown: ShutdownSignal,
    ) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = JobStore::new(storage.clone());
        let dedup = DeduplicationIndex::new(storage.clone());

        let mut registry = HandlerRegistry::new();
        register_builtin_handlers(&mut registry);
        let registry = Arc::new(registry);

        let scheduler = JobScheduler::new(
            store.clone(),
            dedup.clone(),
            registry.clone(),
            clock.clone(),
        );

        let user_settings: Arc<dyn UserSettingsStore> =
            Arc::new(StorageUserSettingsStore::new(storage.clone()));

        let ctx = JobContext {
            clock: clock.clone(),
            scheduler: scheduler.clone(),
            chat: Arc::new(MemoryChatClient::new()),
            log_store: Arc::new(MemoryLogStore::new()),
            user_settings: user_settings.clone(),
            llm: Arc::new(MemoryLlmClient::replying(
                "Summary generation is not configured in this build.",
            )),
            error_reporter: Arc::new(LogErrorReporter),
            shutdown,
        };

        Self {
            config,
            storage,
            clock,
            store,
            dedup,
            registry,
            scheduler,
            user_settings,
            ctx,
        }
    }

    /// Builds the worker for this process.
    #[must_use]
    pub fn worker(&self) -> Arc<JobWorker> {
        Arc::new(JobWorker::new(
            self.store.clone(),
            self.registry.clone(),
            self.ctx.clone(),
            self.config.worker_config(),
        ))
    }

    /// Builds the planner context for this process.
    #[must_use]
    pub fn planner_context(&self) -> PlannerContext {
        PlannerContext {
            scheduler: self.scheduler.clone(),
            user_settings: self.user_settings.clone(),
            store: self.store.clone(),
            users: self.config.daily_summary_users.clone(),
            prompts_per_day: self.config.work_sampling_prompts_per_day,
        }
    }
}

/// Trips the shutdown sender on SIGINT or SIGTERM.
pub async fn shutdown_on_signal(shutdown_tx: tokio::sync::watch::Sender<bool>) {
    wait_for_signal().await;
    tracing::info!("shutdown signal received; draining");
    let _ = shutdown_tx.send(true);
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            tracing::error!("failed to install SIGTERM handler: {e}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
