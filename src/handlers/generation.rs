use anyhow::Result;
use chrono::Local;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, InputFile, MessageId, ParseMode, ReplyParameters};
use tracing::{error, info, warn};

use crate::state::AppState;
use crate::studio::artifacts::{blueprint_file_name, render_blueprint_pdf, vision_file_name};
use crate::studio::prompt::VisualizationBrief;
use crate::studio::{GenerationResult, SessionError, PRODUCT_NAME};
use crate::utils::formatting::{escape_html, markdown_to_telegram_html, report_to_telegram_html};
use crate::utils::telegram::{send_document_bytes, send_html, start_chat_action_heartbeat};
use crate::utils::timing::{complete_command_timer, start_command_timer};

/// Conversation turn recorded when an image generation fails.
pub const GENERATION_ERROR_TURN: &str =
    "**Error:** The visualization field was interrupted. Please check permissions or try again.";

const MISSING_ROOM_REPLY: &str =
    "Send a photo of your room first. I need a base image to build the visualization on.";
const NOTHING_GENERATED_REPLY: &str = "Nothing generated yet. Run /generate once your room photo is in.";

fn vision_caption(project_id: &str, result: &GenerationResult) -> String {
    let mut caption = format!(
        "<b>{PRODUCT_NAME} Vision #{}</b>\n{} · {}",
        escape_html(project_id),
        result.mode.label(),
        escape_html(result.budget.label())
    );
    if !result.location.trim().is_empty() {
        caption.push_str(&format!(" · {}", escape_html(result.location.trim())));
    }
    if !result.directive.is_empty() {
        let directive: String = result.directive.chars().take(200).collect();
        caption.push_str(&format!("\n<i>{}</i>", escape_html(&directive)));
    }
    caption
}

/// Image call followed by the strategy report. The report never fails the
/// generation; the gateway substitutes fallback text.
async fn run_generation(
    state: &AppState,
    brief: &VisualizationBrief,
) -> Result<GenerationResult, crate::llm::VisualizationError> {
    let image = state.gateway.generate_visualization(brief).await?;
    let mut result = GenerationResult::from_brief(brief, image, String::new());
    let report = state.gateway.write_blueprint(&result.blueprint_brief()).await;
    if report.is_fallback() {
        warn!("Using fallback report text for this visualization");
    }
    result.report = report.into_text();
    Ok(result)
}

async fn deliver_vision(
    bot: &Bot,
    chat_id: ChatId,
    reply_to: MessageId,
    project_id: &str,
    result: &GenerationResult,
) -> Result<()> {
    let caption = vision_caption(project_id, result);
    let file_name = format!(
        "{PRODUCT_NAME}-Vision-{project_id}.{}",
        result.image.extension()
    );
    let photo = InputFile::memory(result.image.bytes().to_vec()).file_name(file_name.clone());
    let sent = bot
        .send_photo(chat_id, photo)
        .caption(caption.clone())
        .parse_mode(ParseMode::Html)
        .reply_parameters(ReplyParameters::new(reply_to))
        .await;
    if let Err(err) = sent {
        warn!("send_photo failed, sending the visualization as a file: {err}");
        send_document_bytes(bot, chat_id, result.image.bytes().to_vec(), &file_name, Some(caption))
            .await?;
    }

    send_html(bot, chat_id, &report_to_telegram_html(&result.report), None).await
}

pub async fn generate_handler(
    bot: Bot,
    state: AppState,
    message: Message,
    directive: String,
) -> Result<()> {
    let mut timer = start_command_timer("generate", &message);
    let chat_id = message.chat.id;

    let (slot, brief) = match state.claim_generation(chat_id, &directive) {
        Ok(claimed) => claimed,
        Err(err) => {
            let (reply, status) = match err {
                SessionError::MissingBaseImage => (MISSING_ROOM_REPLY.to_string(), "no_base_image"),
                SessionError::AlreadyGenerating => (
                    "Still working on the current visualization. I'll post it as soon as it's ready."
                        .to_string(),
                    "busy",
                ),
                other => (other.to_string(), "rejected"),
            };
            bot.send_message(chat_id, reply)
                .reply_parameters(ReplyParameters::new(message.id))
                .await?;
            complete_command_timer(&mut timer, status, None);
            return Ok(());
        }
    };
    let project_id = slot.project_id().to_string();

    info!(
        "Generation started for project {project_id}: mode={} format={:?} refs={} links={}",
        brief.options.mode,
        brief.options.format,
        brief.references.len(),
        brief.external_items.len()
    );
    let acknowledged = bot
        .send_message(
            chat_id,
            format!(
                "Rendering {} ({}, {}). This can take up to a minute.",
                brief.options.format.label(),
                brief.options.mode.label(),
                brief.options.budget.label()
            ),
        )
        .reply_parameters(ReplyParameters::new(message.id))
        .await;
    if let Err(err) = acknowledged {
        warn!("Failed to acknowledge generation for project {project_id}: {err}");
    }

    let outcome = {
        let _uploading = start_chat_action_heartbeat(bot.clone(), chat_id, ChatAction::UploadPhoto);
        run_generation(&state, &brief).await
    };

    match outcome {
        Ok(result) => {
            let delivered = deliver_vision(&bot, chat_id, message.id, &project_id, &result).await;
            if !slot.release(Some(result)) {
                info!("Project {project_id} was reset during generation; result discarded");
            }
            delivered?;
            complete_command_timer(&mut timer, "success", None);
        }
        Err(err) => {
            error!("Visualization failed for project {project_id}: {err:#}");
            let recorded = state
                .with_project(chat_id, &project_id, |session| {
                    session.push_error_turn(GENERATION_ERROR_TURN);
                })
                .is_some();
            slot.release(None);
            if recorded {
                send_html(
                    &bot,
                    chat_id,
                    &markdown_to_telegram_html(GENERATION_ERROR_TURN),
                    Some(message.id),
                )
                .await?;
            }
            complete_command_timer(&mut timer, "error", Some(err.to_string()));
        }
    }
    Ok(())
}

pub async fn vision_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let mut timer = start_command_timer("vision", &message);
    let snapshot = state.with_session(message.chat.id, |session| {
        session
            .result()
            .map(|result| (session.project_id().to_string(), result.clone()))
    });
    let Some((project_id, result)) = snapshot else {
        bot.send_message(message.chat.id, NOTHING_GENERATED_REPLY)
            .reply_parameters(ReplyParameters::new(message.id))
            .await?;
        complete_command_timer(&mut timer, "empty", None);
        return Ok(());
    };

    let png = match result.image.to_png() {
        Ok(png) => png,
        Err(err) => {
            warn!("PNG conversion failed, sending the original bytes: {err}");
            result.image.clone()
        }
    };
    send_document_bytes(
        &bot,
        message.chat.id,
        png.into_bytes(),
        &vision_file_name(&project_id),
        Some(vision_caption(&project_id, &result)),
    )
    .await?;
    complete_command_timer(&mut timer, "success", None);
    Ok(())
}

pub async fn blueprint_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let mut timer = start_command_timer("blueprint", &message);
    let snapshot = state.with_session(message.chat.id, |session| {
        session.result().map(|result| {
            (
                session.project_id().to_string(),
                result.clone(),
                session.references().to_vec(),
            )
        })
    });
    let Some((project_id, result, references)) = snapshot else {
        bot.send_message(message.chat.id, NOTHING_GENERATED_REPLY)
            .reply_parameters(ReplyParameters::new(message.id))
            .await?;
        complete_command_timer(&mut timer, "empty", None);
        return Ok(());
    };

    let _uploading =
        start_chat_action_heartbeat(bot.clone(), message.chat.id, ChatAction::UploadDocument);
    let today = Local::now().date_naive();
    let render_id = project_id.clone();
    let pdf = tokio::task::spawn_blocking(move || {
        render_blueprint_pdf(&render_id, today, &result, &references)
    })
    .await?;

    send_document_bytes(
        &bot,
        message.chat.id,
        pdf,
        &blueprint_file_name(&project_id),
        Some(format!(
            "<b>{PRODUCT_NAME} Design Blueprint #{}</b>",
            escape_html(&project_id)
        )),
    )
    .await?;
    complete_command_timer(&mut timer, "success", None);
    Ok(())
}
