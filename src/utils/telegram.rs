use std::time::Duration;

use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, InputFile, MessageId, ParseMode, ReplyParameters};
use teloxide::RequestError;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::config::CONFIG;
use crate::utils::formatting::{html_to_plain, split_message};

const CHAT_ACTION_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(4);
const TELEGRAM_RETRY_ATTEMPTS: usize = 3;

pub struct ChatActionHeartbeat {
    task_handle: Option<JoinHandle<()>>,
}

impl Drop for ChatActionHeartbeat {
    fn drop(&mut self) {
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

pub fn start_chat_action_heartbeat(
    bot: Bot,
    chat_id: ChatId,
    action: ChatAction,
) -> ChatActionHeartbeat {
    let task_handle = tokio::spawn(async move {
        loop {
            if let Err(err) = bot.send_chat_action(chat_id, action.clone()).await {
                warn!("send_chat_action failed: {err}");
            }
            tokio::time::sleep(CHAT_ACTION_HEARTBEAT_INTERVAL).await;
        }
    });

    ChatActionHeartbeat {
        task_handle: Some(task_handle),
    }
}

fn telegram_retryable_error(err: &RequestError) -> bool {
    matches!(
        err,
        RequestError::Network(_) | RequestError::RetryAfter(_) | RequestError::Io(_)
    )
}

async fn send_text_with_retry(
    bot: &Bot,
    chat_id: ChatId,
    text: &str,
    parse_mode: Option<ParseMode>,
    reply_to: Option<MessageId>,
) -> Result<Message, RequestError> {
    let mut delay = Duration::from_secs_f32(1.5);
    let mut attempt = 0;
    loop {
        let mut request = bot.send_message(chat_id, text.to_string());
        if let Some(mode) = parse_mode {
            request = request.parse_mode(mode);
        }
        if let Some(reply_to) = reply_to {
            request = request.reply_parameters(ReplyParameters::new(reply_to));
        }
        match request.await {
            Ok(message) => return Ok(message),
            Err(err) => {
                attempt += 1;
                if !telegram_retryable_error(&err) || attempt == TELEGRAM_RETRY_ATTEMPTS {
                    return Err(err);
                }
                warn!("send_message attempt {} failed: {err}", attempt);
                if let RequestError::RetryAfter(wait) = err {
                    tokio::time::sleep(wait.duration()).await;
                } else {
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }
}

/// Sends pre-rendered Telegram HTML, split to the configured length. A chunk
/// Telegram rejects is resent with the markup stripped.
pub async fn send_html(
    bot: &Bot,
    chat_id: ChatId,
    html: &str,
    reply_to: Option<MessageId>,
) -> Result<()> {
    for chunk in split_message(html, CONFIG.telegram_max_length) {
        if let Err(err) =
            send_text_with_retry(bot, chat_id, &chunk, Some(ParseMode::Html), reply_to).await
        {
            warn!("Failed to send formatted response: {err}");
            send_text_with_retry(bot, chat_id, &html_to_plain(&chunk), None, reply_to).await?;
        }
    }
    Ok(())
}

pub async fn send_plain(
    bot: &Bot,
    chat_id: ChatId,
    text: &str,
    reply_to: Option<MessageId>,
) -> Result<()> {
    for chunk in split_message(text, CONFIG.telegram_max_length) {
        send_text_with_retry(bot, chat_id, &chunk, None, reply_to).await?;
    }
    Ok(())
}

pub async fn send_document_bytes(
    bot: &Bot,
    chat_id: ChatId,
    bytes: Vec<u8>,
    file_name: &str,
    caption: Option<String>,
) -> Result<Message> {
    let input = InputFile::memory(bytes).file_name(file_name.to_string());
    let mut request = bot.send_document(chat_id, input);
    if let Some(caption) = caption {
        request = request.caption(caption).parse_mode(ParseMode::Html);
    }
    Ok(request.await?)
}
