//! Environment-driven configuration for the queue binaries.
//!
//! Every knob has a default; parse failures are configuration errors and
//! abort startup with a non-zero exit.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use companion_core::{LogFormat, MemoryBackend, ObjectStoreBackend, StorageBackend};

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use crate::worker::WorkerConfig;

/// Queue configuration resolved from the environment.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Worker poll cadence (`POLL_INTERVAL_SECONDS`, default 30).
    pub poll_interval: StdDuration,
    /// Max jobs per poll (`BATCH_LIMIT`, default 25).
    pub batch_limit: usize,
    /// Initial lease length (`LEASE_SECONDS`, default 60).
    pub lease: chrono::Duration,
    /// Retry cap (`MAX_ATTEMPTS`, default 5).
    pub max_attempts: u32,
    /// Backoff base (`BASE_DELAY_SECONDS`, default 60).
    pub base_delay: chrono::Duration,
    /// In-process handler concurrency (`CONCURRENCY`, default 8).
    pub concurrency: usize,
    /// Singleton lock TTL (`SINGLETON_TTL_SECONDS`, default 90).
    pub singleton_ttl: StdDuration,
    /// Lock refresh cadence (`SINGLETON_REFRESH_SECONDS`, default 30).
    pub singleton_refresh: StdDuration,
    /// Shutdown drain budget (`GRACEFUL_TIMEOUT_SECONDS`, default 30).
    pub graceful_timeout: StdDuration,
    /// Whether the heartbeat planner is registered (`ENABLE_HEARTBEAT`).
    pub enable_heartbeat: bool,
    /// Users covered by the daily planners (`DAILY_SUMMARY_USERS`,
    /// comma-separated).
    pub daily_summary_users: Vec<String>,
    /// Work-sampling slots per day (`WORK_SAMPLING_PROMPTS_PER_DAY`,
    /// default 3).
    pub work_sampling_prompts_per_day: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval: StdDuration::from_secs(30),
            batch_limit: 25,
            lease: chrono::Duration::seconds(60),
            max_attempts: 5,
            base_delay: chrono::Duration::seconds(60),
            concurrency: 8,
            singleton_ttl: StdDuration::from_secs(90),
            singleton_refresh: StdDuration::from_secs(30),
            graceful_timeout: StdDuration::from_secs(30),
            enable_heartbeat: false,
            daily_summary_users: Vec::new(),
            work_sampling_prompts_per_day: 3,
        }
    }
}

impl QueueConfig {
    /// Resolves configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for any unparsable value.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            poll_interval: parse_secs(&lookup, "POLL_INTERVAL_SECONDS", defaults.poll_interval)?,
            batch_limit: parse_number(&lookup, "BATCH_LIMIT", defaults.batch_limit)?,
            lease: parse_chrono_secs(&lookup, "LEASE_SECONDS", defaults.lease)?,
            max_attempts: parse_number(&lookup, "MAX_ATTEMPTS", defaults.max_attempts)?,
            base_delay: parse_chrono_secs(&lookup, "BASE_DELAY_SECONDS", defaults.base_delay)?,
            concurrency: parse_number(&lookup, "CONCURRENCY", defaults.concurrency)?,
            singleton_ttl: parse_secs(&lookup, "SINGLETON_TTL_SECONDS", defaults.singleton_ttl)?,
            singleton_refresh: parse_secs(
                &lookup,
                "SINGLETON_REFRESH_SECONDS",
                defaults.singleton_refresh,
            )?,
            graceful_timeout: parse_secs(
                &lookup,
                "GRACEFUL_TIMEOUT_SECONDS",
                defaults.graceful_timeout,
            )?,
            enable_heartbeat: lookup("ENABLE_HEARTBEAT").is_some_and(|v| is_truthy(&v)),
            daily_summary_users: lookup("DAILY_SUMMARY_USERS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            work_sampling_prompts_per_day: parse_number(
                &lookup,
                "WORK_SAMPLING_PROMPTS_PER_DAY",
                defaults.work_sampling_prompts_per_day,
            )?,
        })
    }

    /// The retry policy implied by this configuration.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.base_delay, self.max_attempts)
    }

    /// Builds a worker configuration from these settings.
    #[must_use]
    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            poll_interval: self.poll_interval,
            batch_limit: self.batch_limit,
            lease: self.lease,
            concurrency: self.concurrency,
            graceful_timeout: self.graceful_timeout,
            retry_policy: self.retry_policy(),
            ..WorkerConfig::default()
        }
    }
}

fn parse_secs(
    lookup: impl Fn(&str) -> Option<String>,
    key: &str,
    default: StdDuration,
) -> Result<StdDuration> {
    match lookup(key) {
        Some(value) => value
            .parse::<u64>()
            .map(StdDuration::from_secs)
            .map_err(|_| Error::configuration(format!("invalid {key}: {value}"))),
        None => Ok(default),
    }
}

fn parse_chrono_secs(
    lookup: impl Fn(&str) -> Option<String>,
    key: &str,
    default: chrono::Duration,
) -> Result<chrono::Duration> {
    match lookup(key) {
        Some(value) => value
            .parse::<i64>()
            .map(chrono::Duration::seconds)
            .map_err(|_| Error::configuration(format!("invalid {key}: {value}"))),
        None => Ok(default),
    }
}

fn parse_number<T: std::str::FromStr>(
    lookup: impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T> {
    match lookup(key) {
        Some(value) => value
            .parse::<T>()
            .map_err(|_| Error::configuration(format!("invalid {key}: {value}"))),
        None => Ok(default),
    }
}

fn is_truthy(value: &str) -> bool {
    let trimmed = value.trim();
    !(trimmed.is_empty() || trimmed == "0" || trimmed.eq_ignore_ascii_case("false"))
}

/// Selects the log format from `COMPANION_LOG_FORMAT`.
#[must_use]
pub fn log_format_from_env() -> LogFormat {
    match std::env::var("COMPANION_LOG_FORMAT") {
        Ok(value) if value.eq_ignore_ascii_case("json") => LogFormat::Json,
        _ => LogFormat::Pretty,
    }
}

/// Builds the storage backend from the environment.
///
/// `COMPANION_STORAGE=memory` selects the in-memory backend for local runs;
/// otherwise `COMPANION_STORAGE_BUCKET` must hold a storage URL.
///
/// # Errors
///
/// Returns a configuration error if neither option is usable.
pub fn storage_from_env() -> Result<Arc<dyn StorageBackend>> {
    if std::env::var("COMPANION_STORAGE").is_ok_and(|v| v.eq_ignore_ascii_case("memory")) {
        tracing::warn!("using in-memory storage; state will not survive restarts");
        return Ok(Arc::new(MemoryBackend::new()));
    }

    let bucket = std::env::var("COMPANION_STORAGE_BUCKET")
        .map_err(|_| Error::configuration("missing COMPANION_STORAGE_BUCKET"))?;
    Ok(Arc::new(ObjectStoreBackend::from_url(&bucket)?))
}
