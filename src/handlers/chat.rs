use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, MessageId};
use tracing::info;

use crate::state::AppState;
use crate::utils::formatting::markdown_to_telegram_html;
use crate::utils::telegram::{send_html, start_chat_action_heartbeat};
use crate::utils::timing::{complete_command_timer, start_command_timer};

/// Asks the design assistant about the current conversation window and posts
/// the answer. The answer is recorded only if the project was not reset
/// while the model was thinking.
pub async fn reply_with_advice(
    bot: &Bot,
    state: &AppState,
    chat_id: ChatId,
    reply_to: Option<MessageId>,
) -> Result<bool> {
    let (project_id, context) = state.with_session(chat_id, |session| {
        (session.project_id().to_string(), session.advice_context())
    });

    let advice = {
        let _typing = start_chat_action_heartbeat(bot.clone(), chat_id, ChatAction::Typing);
        state.gateway.advise(&context).await
    };
    let fallback = advice.is_fallback();
    let text = advice.into_text();

    let recorded = state
        .with_project(chat_id, &project_id, |session| {
            session.push_model_turn(text.clone())
        })
        .is_some();
    if !recorded {
        info!("Discarding advice for project {project_id}; the chat moved on");
        return Ok(false);
    }

    send_html(bot, chat_id, &markdown_to_telegram_html(&text), reply_to).await?;
    Ok(!fallback)
}

pub async fn chat_message_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let Some(text) = message.text().map(str::trim).filter(|text| !text.is_empty()) else {
        return Ok(());
    };
    let mut timer = start_command_timer("chat", &message);

    state.with_session(message.chat.id, |session| session.push_user_turn(text));
    let answered = reply_with_advice(&bot, &state, message.chat.id, Some(message.id)).await?;

    let status = if answered { "success" } else { "fallback" };
    complete_command_timer(&mut timer, status, None);
    Ok(())
}
