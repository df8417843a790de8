//! Shared fixtures for the crate's unit tests.

use std::sync::Arc;

use chrono::{TimeZone, Utc};

use companion_core::{ManualClock, MemoryBackend};

use crate::dedup::DeduplicationIndex;
use crate::handler::{HandlerRegistry, JobContext, ShutdownSignal};
use crate::handlers::register_builtin_handlers;
use crate::ports::{
    MemoryChatClient, MemoryErrorReporter, MemoryLlmClient, MemoryLogStore,
    MemoryUserSettingsStore,
};
use crate::schedule::JobScheduler;
use crate::store::JobStore;

/// Fakes backing a test [`JobContext`].
pub(crate) struct TestFakes {
    pub chat: Arc<MemoryChatClient>,
    pub log_store: Arc<MemoryLogStore>,
    pub user_settings: Arc<MemoryUserSettingsStore>,
    pub reporter: Arc<MemoryErrorReporter>,
    pub clock: Arc<ManualClock>,
    pub store: JobStore,
}

/// Scheduler wired over in-memory everything.
pub(crate) struct SchedulerFixture {
    pub scheduler: JobScheduler,
    pub store: JobStore,
    pub dedup: DeduplicationIndex,
}

fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 7, 14, 0, 0, 0).unwrap(),
    ))
}

fn builtin_registry() -> Arc<HandlerRegistry> {
    let mut registry = HandlerRegistry::new();
    register_builtin_handlers(&mut registry);
    Arc::new(registry)
}

pub(crate) fn scheduler_fixture() -> SchedulerFixture {
    let storage = Arc::new(MemoryBackend::new());
    let store = JobStore::new(storage.clone());
    let dedup = DeduplicationIndex::new(storage);
    let clock = manual_clock();
    let scheduler = JobScheduler::new(
        store.clone(),
        dedup.clone(),
        builtin_registry(),
        clock,
    );
    SchedulerFixture {
        scheduler,
        store,
        dedup,
    }
}

pub(crate) fn test_context() -> (JobContext, TestFakes) {
    let storage: Arc<MemoryBackend> = Arc::new(MemoryBackend::new());
    let store = JobStore::new(storage.clone());
    let dedup = DeduplicationIndex::new(storage);
    let clock = manual_clock();
    let scheduler = JobScheduler::new(
        store.clone(),
        dedup,
        builtin_registry(),
        clock.clone(),
    );

    let chat = Arc::new(MemoryChatClient::new());
    let log_store = Arc::new(MemoryLogStore::new());
    let user_settings = Arc::new(MemoryUserSettingsStore::new());
    let reporter = Arc::new(MemoryErrorReporter::new());

    let ctx = JobContext {
        clock: clock.clone(),
        scheduler,
        chat: chat.clone(),
        log_store: log_store.clone(),
        user_settings: user_settings.clone(),
        llm: Arc::new(MemoryLlmClient::replying("a tidy summary")),
        error_reporter: reporter.clone(),
        shutdown: ShutdownSignal::never(),
    };

    (
        ctx,
        TestFakes {
            chat,
            log_store,
            user_settings,
            reporter,
            clock,
            store,
        },
    )
}
