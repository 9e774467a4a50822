use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use teloxide::types::{CallbackQuery, Message};
use tracing::info;

pub const TIMING_TARGET: &str = "studio.timing";

const LOGGED_TEXT_LIMIT: usize = 300;

fn clip_for_log(value: &str) -> String {
    let flattened = value.replace('\n', " ");
    if flattened.chars().count() > LOGGED_TEXT_LIMIT {
        flattened.chars().take(LOGGED_TEXT_LIMIT).collect()
    } else {
        flattened
    }
}

#[derive(Debug)]
pub struct CommandTimer {
    command: String,
    chat_id: Option<i64>,
    user_id: Option<i64>,
    username: Option<String>,
    message_id: Option<i64>,
    text: Option<String>,
    started_at: DateTime<Utc>,
    started_perf: Instant,
    status: String,
    detail: Option<String>,
    completed: bool,
}

impl CommandTimer {
    fn new(
        command: &str,
        chat_id: Option<i64>,
        user: Option<&teloxide::types::User>,
        message_id: Option<i64>,
        text: Option<String>,
    ) -> Self {
        CommandTimer {
            command: command.to_string(),
            chat_id,
            user_id: user.and_then(|u| i64::try_from(u.id.0).ok()),
            username: user.and_then(|u| u.username.clone()),
            message_id,
            text,
            started_at: Utc::now(),
            started_perf: Instant::now(),
            status: "success".to_string(),
            detail: None,
            completed: false,
        }
    }

    pub fn from_message(command: &str, message: &Message) -> Self {
        let text = message.text().or_else(|| message.caption()).map(clip_for_log);
        Self::new(
            command,
            Some(message.chat.id.0),
            message.from.as_ref(),
            Some(message.id.0 as i64),
            text,
        )
    }

    pub fn from_callback(action: &str, query: &CallbackQuery) -> Self {
        let (chat_id, message_id) = query
            .message
            .as_ref()
            .map(|message| (Some(message.chat().id.0), Some(message.id().0 as i64)))
            .unwrap_or((None, None));
        Self::new(
            action,
            chat_id,
            Some(&query.from),
            message_id,
            query.data.as_deref().map(clip_for_log),
        )
    }

    pub fn log_received(&self) {
        info!(
            target: TIMING_TARGET,
            "event=command_received command={} chat_id={:?} user_id={:?} username={:?} message_id={:?} received_at={} text={:?}",
            self.command,
            self.chat_id,
            self.user_id,
            self.username,
            self.message_id,
            self.started_at.to_rfc3339(),
            self.text
        );
    }

    pub fn mark_status(&mut self, status: &str, detail: Option<String>) {
        self.status = status.to_string();
        self.detail = detail;
    }

    pub fn log_completed(&mut self) {
        if self.completed {
            return;
        }
        self.completed = true;
        let completed_at = Utc::now();
        let duration = self.started_perf.elapsed().as_secs_f64();
        info!(
            target: TIMING_TARGET,
            "event=command_completed command={} chat_id={:?} user_id={:?} message_id={:?} started_at={} response_sent_at={} duration_s={:.3} status={} detail={}",
            self.command,
            self.chat_id,
            self.user_id,
            self.message_id,
            self.started_at.to_rfc3339(),
            completed_at.to_rfc3339(),
            duration,
            self.status,
            self.detail.clone().unwrap_or_default()
        );
    }
}

impl Drop for CommandTimer {
    fn drop(&mut self) {
        self.log_completed();
    }
}

pub fn start_command_timer(command: &str, message: &Message) -> CommandTimer {
    let timer = CommandTimer::from_message(command, message);
    timer.log_received();
    timer
}

pub fn start_callback_timer(action: &str, query: &CallbackQuery) -> CommandTimer {
    let timer = CommandTimer::from_callback(action, query);
    timer.log_received();
    timer
}

pub fn complete_command_timer(timer: &mut CommandTimer, status: &str, detail: Option<String>) {
    timer.mark_status(status, detail);
    timer.log_completed();
}

pub async fn log_llm_timing<T, F, Fut>(
    provider: &str,
    model: &str,
    operation: &str,
    metadata: Option<JsonValue>,
    call: F,
) -> Result<T, anyhow::Error>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, anyhow::Error>>,
{
    let started_at = Utc::now();
    let started_perf = Instant::now();
    let metadata_text = metadata
        .as_ref()
        .map(|value| value.to_string())
        .unwrap_or_else(|| "{}".to_string());
    info!(
        target: TIMING_TARGET,
        "event=llm_request provider={} model={} operation={} started_at={} metadata={}",
        provider,
        model,
        operation,
        started_at.to_rfc3339(),
        metadata_text
    );

    let result = call().await;
    let status = if result.is_ok() { "success" } else { "error" };

    let completed_at = Utc::now();
    let duration = started_perf.elapsed().as_secs_f64();
    info!(
        target: TIMING_TARGET,
        "event=llm_response provider={} model={} operation={} completed_at={} duration_s={:.3} status={} metadata={}",
        provider,
        model,
        operation,
        completed_at.to_rfc3339(),
        duration,
        status,
        metadata_text
    );

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_flattens_and_bounds_text() {
        assert_eq!(clip_for_log("a\nb"), "a b");
        let long = "é".repeat(LOGGED_TEXT_LIMIT + 20);
        assert_eq!(clip_for_log(&long).chars().count(), LOGGED_TEXT_LIMIT);
    }

    #[tokio::test]
    async fn llm_timing_passes_results_through() {
        let ok = log_llm_timing("gemini", "m", "op", None, || async { Ok::<_, anyhow::Error>(7) })
            .await
            .unwrap();
        assert_eq!(ok, 7);

        let err = log_llm_timing("gemini", "m", "op", None, || async {
            Err::<u8, _>(anyhow::anyhow!("boom"))
        })
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }
}
