//! Built-in job handlers.
//!
//! All handlers are idempotent: re-delivery after a crashed worker repeats a
//! log line, a chat message, or a settings write, never corrupts state.

use async_trait::async_trait;
use chrono::Duration;
use serde::Deserialize;
use ulid::Ulid;

use crate::handler::{
    HandlerFailure, HandlerRegistry, HandlerResult, JobContext, JobHandler,
};
use crate::schedule::ScheduleOptions;

/// Registers every built-in handler.
pub fn register_builtin_handlers(registry: &mut HandlerRegistry) {
    registry.register(HeartbeatEventHandler);
    registry.register(SendChatMessageHandler);
    registry.register(DailySummaryHandler);
    registry.register(WorkSamplingPromptHandler);
    registry.register(UserSyncHandler);
}

/// Payload of a `heartbeat_event` job.
#[derive(Debug, Deserialize)]
pub struct HeartbeatEventPayload {
    /// The UUID generated by the timed heartbeat.
    pub uuid: String,
}

/// Logs the event half of the heartbeat diagnostic pair.
pub struct HeartbeatEventHandler;

#[async_trait]
impl JobHandler for HeartbeatEventHandler {
    type Payload = HeartbeatEventPayload;

    fn job_type(&self) -> &'static str {
        "heartbeat_event"
    }

    async fn run(&self, payload: Self::Payload, _ctx: &JobContext) -> HandlerResult {
        tracing::info!("Heartbeat (event): UUID={}", payload.uuid);
        Ok(())
    }
}

/// Payload of a `send_chat_message` job.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendChatMessagePayload {
    /// Recipient user.
    pub user_id: String,
    /// Message body.
    pub message: String,
    /// Optional trace identifier threaded through follow-up jobs.
    #[serde(default)]
    pub trace_id: Option<String>,
}

/// Delivers a direct message through the chat platform.
pub struct SendChatMessageHandler;

#[async_trait]
impl JobHandler for SendChatMessageHandler {
    type Payload = SendChatMessagePayload;

    fn job_type(&self) -> &'static str {
        "send_chat_message"
    }

    async fn run(&self, payload: Self::Payload, ctx: &JobContext) -> HandlerResult {
        tracing::info!(
            user_id = %payload.user_id,
            trace_id = payload.trace_id.as_deref().unwrap_or("none"),
            "sending chat message"
        );
        ctx.chat
            .send_message(&payload.user_id, &payload.message)
            .await
            .map_err(|e| HandlerFailure::retryable(format!("chat delivery failed: {e}")))
    }
}

/// Payload of a `daily_summary` job.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailySummaryPayload {
    /// User to summarize.
    pub user_id: String,
    /// One of `today`, `yesterday`, `lastweek`.
    pub summary_range: String,
}

/// Summarizes a user's activity log and enqueues the delivery message.
pub struct DailySummaryHandler;

#[async_trait]
impl JobHandler for DailySummaryHandler {
    type Payload = DailySummaryPayload;

    fn job_type(&self) -> &'static str {
        "daily_summary"
    }

    async fn run(&self, payload: Self::Payload, ctx: &JobContext) -> HandlerResult {
        let now = ctx.clock.now();
        let today_start = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|naive| naive.and_utc())
            .ok_or_else(|| HandlerFailure::retryable("could not compute day boundary"))?;

        // Unknown ranges are rejected before any external call: the payload
        // can never become valid, so retrying is pointless.
        let (since, until) = match payload.summary_range.as_str() {
            "today" => (today_start, now),
            "yesterday" => (today_start - Duration::days(1), today_start),
            "lastweek" => (now - Duration::days(7), now),
            other => {
                return Err(HandlerFailure::permanent(format!(
                    "unknown summary range: {other}"
                )));
            }
        };

        let entries = ctx
            .log_store
            .fetch_logs_since(&payload.user_id, since)
            .await
            .map_err(|e| HandlerFailure::retryable(format!("log fetch failed: {e}")))?;
        let entries: Vec<_> = entries
            .into_iter()
            .filter(|e| e.timestamp < until)
            .collect();

        let summary = if entries.is_empty() {
            "No activity logged for this period.".to_string()
        } else {
            let lines = entries
                .iter()
                .map(|e| format!("- [{}] {}", e.timestamp.to_rfc3339(), e.text))
                .collect::<Vec<_>>()
                .join("\n");
            let prompt = format!(
                "Summarize the following activity log for {} ({}):\n{lines}",
                payload.user_id, payload.summary_range
            );
            ctx.llm
                .complete(&prompt)
                .await
                .map_err(|e| HandlerFailure::retryable(format!("summary generation failed: {e}")))?
        };

        // Delivery is its own job so a chat outage retries the send, not the
        // LLM call.
        ctx.scheduler
            .schedule(
                "send_chat_message",
                serde_json::json!({
                    "userId": payload.user_id,
                    "message": summary,
                    "traceId": Ulid::new().to_string(),
                }),
                now,
                ScheduleOptions::new(),
            )
            .await
            .map_err(|e| HandlerFailure::retryable(format!("follow-up enqueue failed: {e}")))?;
        Ok(())
    }
}

/// Payload of a `work_sampling_prompt` job.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkSamplingPayload {
    /// User to prompt.
    pub user_id: String,
    /// Which workday slot this prompt belongs to.
    pub slot_index: u32,
}

/// Asks the user what they are working on right now.
pub struct WorkSamplingPromptHandler;

#[async_trait]
impl JobHandler for WorkSamplingPromptHandler {
    type Payload = WorkSamplingPayload;

    fn job_type(&self) -> &'static str {
        "work_sampling_prompt"
    }

    async fn run(&self, payload: Self::Payload, ctx: &JobContext) -> HandlerResult {
        tracing::debug!(
            user_id = %payload.user_id,
            slot_index = payload.slot_index,
            "sending work sampling prompt"
        );
        ctx.chat
            .send_message(
                &payload.user_id,
                "What are you working on right now? Reply with a quick note.",
            )
            .await
            .map_err(|e| HandlerFailure::retryable(format!("prompt delivery failed: {e}")))
    }
}

/// Payload of a `user_sync` job.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSyncPayload {
    /// User whose profile to refresh.
    pub user_id: String,
}

/// Refreshes a user's timezone from their chat profile.
pub struct UserSyncHandler;

#[async_trait]
impl JobHandler for UserSyncHandler {
    type Payload = UserSyncPayload;

    fn job_type(&self) -> &'static str {
        "user_sync"
    }

    async fn run(&self, payload: Self::Payload, ctx: &JobContext) -> HandlerResult {
        let timezone = ctx
            .chat
            .fetch_user_timezone(&payload.user_id)
            .await
            .map_err(|e| HandlerFailure::retryable(format!("profile fetch failed: {e}")))?;

        let Some(timezone) = timezone else {
            tracing::info!(user_id = %payload.user_id, "no timezone in chat profile");
            return Ok(());
        };

        let mut settings = ctx
            .user_settings
            .get_user_settings(&payload.user_id)
            .await
            .map_err(|e| HandlerFailure::retryable(format!("settings read failed: {e}")))?;
        settings.timezone = Some(timezone.clone());

        ctx.user_settings
            .update_user_settings(&payload.user_id, settings)
            .await
            .map_err(|e| HandlerFailure::retryable(format!("settings write failed: {e}")))?;

        tracing::info!(user_id = %payload.user_id, timezone, "user timezone synced");
        Ok(())
    }
}
