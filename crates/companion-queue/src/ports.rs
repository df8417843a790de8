//! Interfaces to external collaborators.
//!
//! The queue core never talks to the chat platform, the log store, or the
//! LLM directly — handlers reach them through these traits. Each trait has
//! an in-memory implementation used by tests and local development.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use companion_core::JobId;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A single activity-log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// User the entry belongs to.
    pub user_id: String,
    /// When the entry was recorded.
    pub timestamp: DateTime<Utc>,
    /// Free-form activity text.
    pub text: String,
}

/// Per-user settings the planners consult.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSettings {
    /// IANA timezone name (e.g. `America/New_York`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

/// Context attached to every reported job failure.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFailureContext {
    /// The failing job's ID.
    pub job_id: JobId,
    /// The failing job's type.
    pub job_type: String,
    /// Attempts so far, including the failing one.
    pub attempts: u32,
    /// The job payload.
    pub payload: serde_json::Value,
}

/// Outbound chat-platform client.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Sends a direct message to a user.
    async fn send_message(&self, user_id: &str, text: &str) -> Result<()>;

    /// Fetches the user's timezone from their chat profile, if set.
    async fn fetch_user_timezone(&self, user_id: &str) -> Result<Option<String>>;
}

/// Read access to the activity-log store.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Fetches a user's log entries at or after `since`.
    async fn fetch_logs_since(&self, user_id: &str, since: DateTime<Utc>) -> Result<Vec<LogEntry>>;
}

/// Per-user settings storage.
#[async_trait]
pub trait UserSettingsStore: Send + Sync {
    /// Returns the user's settings (defaults if never written).
    async fn get_user_settings(&self, user_id: &str) -> Result<UserSettings>;

    /// Replaces the user's settings.
    async fn update_user_settings(&self, user_id: &str, settings: UserSettings) -> Result<()>;
}

/// Language-model client used by summary handlers.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Produces a completion for the given prompt.
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Structured failure surface to an external tracker.
pub trait ErrorReporter: Send + Sync {
    /// Reports a job failure with its full context.
    fn report(&self, message: &str, context: &JobFailureContext);
}

/// In-memory chat client recording every sent message.
#[derive(Debug, Default)]
pub struct MemoryChatClient {
    sent: Mutex<Vec<(String, String)>>,
    timezones: Mutex<HashMap<String, String>>,
}

impl MemoryChatClient {
    /// Creates an empty client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the timezone returned for a user's profile.
    pub fn set_profile_timezone(&self, user_id: &str, timezone: &str) {
        self.timezones
            .lock()
            .expect("chat lock poisoned")
            .insert(user_id.to_string(), timezone.to_string());
    }

    /// Returns all `(user_id, text)` pairs sent so far.
    #[must_use]
    pub fn sent_messages(&self) -> Vec<(String, String)> {
        self.sent.lock().expect("chat lock poisoned").clone()
    }
}

#[async_trait]
impl ChatClient for MemoryChatClient {
    async fn send_message(&self, user_id: &str, text: &str) -> Result<()> {
        self.sent
            .lock()
            .expect("chat lock poisoned")
            .push((user_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn fetch_user_timezone(&self, user_id: &str) -> Result<Option<String>> {
        Ok(self
            .timezones
            .lock()
            .expect("chat lock poisoned")
            .get(user_id)
            .cloned())
    }
}

/// In-memory log store.
#[derive(Debug, Default)]
pub struct MemoryLogStore {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryLogStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry.
    pub fn append(&self, entry: LogEntry) {
        self.entries.lock().expect("log lock poisoned").push(entry);
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn fetch_logs_since(&self, user_id: &str, since: DateTime<Utc>) -> Result<Vec<LogEntry>> {
        Ok(self
            .entries
            .lock()
            .expect("log lock poisoned")
            .iter()
            .filter(|e| e.user_id == user_id && e.timestamp >= since)
            .cloned()
            .collect())
    }
}

/// User settings persisted in the shared item store.
///
/// One item per user at `user#<user_id>/settings`. Writes are unconditional:
/// last writer wins, which is fine for single-attribute profile data.
pub struct StorageUserSettingsStore {
    storage: std::sync::Arc<dyn companion_core::StorageBackend>,
}

impl StorageUserSettingsStore {
    /// Creates a store over the shared backend.
    #[must_use]
    pub fn new(storage: std::sync::Arc<dyn companion_core::StorageBackend>) -> Self {
        Self { storage }
    }

    fn settings_key(user_id: &str) -> String {
        format!("user#{user_id}/settings")
    }
}

#[async_trait]
impl UserSettingsStore for StorageUserSettingsStore {
    async fn get_user_settings(&self, user_id: &str) -> Result<UserSettings> {
        match self.storage.get(&Self::settings_key(user_id)).await {
            Ok(data) => serde_json::from_slice(&data).map_err(|e| {
                Error::serialization(format!("decode settings for {user_id}: {e}"))
            }),
            Err(companion_core::Error::NotFound(_)) => Ok(UserSettings::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn update_user_settings(&self, user_id: &str, settings: UserSettings) -> Result<()> {
        let body = serde_json::to_vec(&settings)
            .map_err(|e| Error::serialization(format!("encode settings for {user_id}: {e}")))?;
        self.storage
            .put(
                &Self::settings_key(user_id),
                bytes::Bytes::from(body),
                companion_core::WritePrecondition::None,
            )
            .await?;
        Ok(())
    }
}

/// In-memory user settings store.
#[derive(Debug, Default)]
pub struct MemoryUserSettingsStore {
    settings: Mutex<HashMap<String, UserSettings>>,
}

impl MemoryUserSettingsStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserSettingsStore for MemoryUserSettingsStore {
    async fn get_user_settings(&self, user_id: &str) -> Result<UserSettings> {
        Ok(self
            .settings
            .lock()
            .expect("settings lock poisoned")
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn update_user_settings(&self, user_id: &str, settings: UserSettings) -> Result<()> {
        self.settings
            .lock()
            .expect("settings lock poisoned")
            .insert(user_id.to_string(), settings);
        Ok(())
    }
}

/// In-memory LLM returning a canned or failing response.
#[derive(Debug)]
pub struct MemoryLlmClient {
    response: std::result::Result<String, String>,
}

impl MemoryLlmClient {
    /// Creates a client that always returns `response`.
    #[must_use]
    pub fn replying(response: impl Into<String>) -> Self {
        Self {
            response: Ok(response.into()),
        }
    }

    /// Creates a client that always fails with `message`.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            response: Err(message.into()),
        }
    }
}

#[async_trait]
impl LlmClient for MemoryLlmClient {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        match &self.response {
            Ok(text) => Ok(text.clone()),
            Err(message) => Err(Error::Core(companion_core::Error::storage(message.clone()))),
        }
    }
}

/// In-memory error reporter recording every report.
#[derive(Debug, Default)]
pub struct MemoryErrorReporter {
    reports: Mutex<Vec<(String, JobFailureContext)>>,
}

impl MemoryErrorReporter {
    /// Creates an empty reporter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all reports recorded so far.
    #[must_use]
    pub fn reports(&self) -> Vec<(String, JobFailureContext)> {
        self.reports.lock().expect("reporter lock poisoned").clone()
    }
}

impl ErrorReporter for MemoryErrorReporter {
    fn report(&self, message: &str, context: &JobFailureContext) {
        tracing::error!(
            job_id = %context.job_id,
            job_type = %context.job_type,
            attempts = context.attempts,
            "job failure reported: {message}"
        );
        self.reports
            .lock()
            .expect("reporter lock poisoned")
            .push((message.to_string(), context.clone()));
    }
}

/// Reporter that only logs, for deployments without an external tracker.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogErrorReporter;

impl ErrorReporter for LogErrorReporter {
    fn report(&self, message: &str, context: &JobFailureContext) {
        tracing::error!(
            job_id = %context.job_id,
            job_type = %context.job_type,
            attempts = context.attempts,
            payload = %context.payload,
            "job failure: {message}"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_chat_client_records_messages() {
        let chat = MemoryChatClient::new();
        chat.send_message("U1", "hello").await.expect("send");
        assert_eq!(chat.sent_messages(), vec![("U1".into(), "hello".into())]);
    }

    #[tokio::test]
    async fn memory_chat_client_serves_profile_timezone() {
        let chat = MemoryChatClient::new();
        assert!(chat.fetch_user_timezone("U1").await.expect("fetch").is_none());

        chat.set_profile_timezone("U1", "Europe/Berlin");
        assert_eq!(
            chat.fetch_user_timezone("U1").await.expect("fetch").as_deref(),
            Some("Europe/Berlin")
        );
    }

    #[tokio::test]
    async fn memory_log_store_filters_by_user_and_time() {
        let store = MemoryLogStore::new();
        let now = Utc::now();
        store.append(LogEntry {
            user_id: "U1".into(),
            timestamp: now - chrono::Duration::hours(2),
            text: "old".into(),
        });
        store.append(LogEntry {
            user_id: "U1".into(),
            timestamp: now,
            text: "new".into(),
        });
        store.append(LogEntry {
            user_id: "U2".into(),
            timestamp: now,
            text: "other user".into(),
        });

        let logs = store
            .fetch_logs_since("U1", now - chrono::Duration::hours(1))
            .await
            .expect("fetch");
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].text, "new");
    }

    #[tokio::test]
    async fn storage_settings_store_roundtrips() {
        let backend = std::sync::Arc::new(companion_core::MemoryBackend::new());
        let store = StorageUserSettingsStore::new(backend);

        assert!(store.get_user_settings("U1").await.expect("get").timezone.is_none());

        store
            .update_user_settings(
                "U1",
                UserSettings {
                    timezone: Some("Europe/Berlin".into()),
                },
            )
            .await
            .expect("update");
        assert_eq!(
            store.get_user_settings("U1").await.expect("get").timezone.as_deref(),
            Some("Europe/Berlin")
        );
    }

    #[tokio::test]
    async fn settings_store_defaults_then_updates() {
        let store = MemoryUserSettingsStore::new();
        assert!(store.get_user_settings("U1").await.expect("get").timezone.is_none());

        store
            .update_user_settings(
                "U1",
                UserSettings {
                    timezone: Some("America/New_York".into()),
                },
            )
            .await
            .expect("update");
        assert_eq!(
            store.get_user_settings("U1").await.expect("get").timezone.as_deref(),
            Some("America/New_York")
        );
    }

    #[test]
    fn memory_reporter_captures_context() {
        let reporter = MemoryErrorReporter::new();
        let context = JobFailureContext {
            job_id: JobId::generate(),
            job_type: "daily_summary".into(),
            attempts: 3,
            payload: serde_json::json!({"userId": "U1"}),
        };
        reporter.report("llm timed out", &context);

        let reports = reporter.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].0, "llm timed out");
        assert_eq!(reports[0].1.attempts, 3);
    }
}
