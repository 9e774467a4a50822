use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, InlineKeyboardButton, InlineKeyboardMarkup, ParseMode, ReplyParameters};
use tracing::info;
use url::Url;

use crate::state::AppState;
use crate::studio::options::{BudgetIndex, BUDGET_LEVELS};
use crate::studio::{DesignMode, GenerationFormat, Session, MAX_REFERENCE_ASSETS, PRODUCT_NAME};
use crate::utils::formatting::{escape_html, markdown_to_telegram_html};
use crate::utils::telegram::{send_html, start_chat_action_heartbeat};
use crate::utils::timing::{complete_command_timer, start_callback_timer, start_command_timer};

const MODE_CALLBACK_PREFIX: &str = "mode:";
const BUDGET_CALLBACK_PREFIX: &str = "budget:";
const FORMAT_CALLBACK_PREFIX: &str = "format:";
const RESET_CALLBACK_PREFIX: &str = "reset:";
const LINK_PREVIEW_CHARS: usize = 160;

pub const CALLBACK_PREFIXES: [&str; 4] = [
    MODE_CALLBACK_PREFIX,
    BUDGET_CALLBACK_PREFIX,
    FORMAT_CALLBACK_PREFIX,
    RESET_CALLBACK_PREFIX,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StudioCallback {
    Mode(DesignMode),
    Budget(BudgetIndex),
    Format(GenerationFormat),
    Reset { confirmed: bool },
}

impl StudioCallback {
    pub fn parse(data: &str) -> Option<Self> {
        if let Some(key) = data.strip_prefix(MODE_CALLBACK_PREFIX) {
            return DesignMode::from_key(key).map(StudioCallback::Mode);
        }
        if let Some(value) = data.strip_prefix(BUDGET_CALLBACK_PREFIX) {
            return BudgetIndex::parse(value).ok().map(StudioCallback::Budget);
        }
        if let Some(key) = data.strip_prefix(FORMAT_CALLBACK_PREFIX) {
            return GenerationFormat::from_key(key).map(StudioCallback::Format);
        }
        match data.strip_prefix(RESET_CALLBACK_PREFIX)? {
            "confirm" => Some(StudioCallback::Reset { confirmed: true }),
            "cancel" => Some(StudioCallback::Reset { confirmed: false }),
            _ => None,
        }
    }

    fn action_name(self) -> &'static str {
        match self {
            StudioCallback::Mode(_) => "mode_select",
            StudioCallback::Budget(_) => "budget_select",
            StudioCallback::Format(_) => "format_select",
            StudioCallback::Reset { .. } => "reset_confirm",
        }
    }
}

fn selected(label: &str, is_current: bool) -> String {
    if is_current {
        format!("✓ {label}")
    } else {
        label.to_string()
    }
}

pub fn build_mode_keyboard(current: DesignMode) -> InlineKeyboardMarkup {
    let rows = DesignMode::ALL
        .chunks(2)
        .map(|chunk| {
            chunk
                .iter()
                .map(|mode| {
                    InlineKeyboardButton::callback(
                        selected(mode.label(), *mode == current),
                        format!("{}{}", MODE_CALLBACK_PREFIX, mode.key()),
                    )
                })
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();
    InlineKeyboardMarkup::new(rows)
}

pub fn build_budget_keyboard(current: BudgetIndex) -> InlineKeyboardMarkup {
    let buttons = BudgetIndex::all()
        .map(|index| {
            InlineKeyboardButton::callback(
                selected(index.label(), index == current),
                format!("{}{}", BUDGET_CALLBACK_PREFIX, index.value()),
            )
        })
        .collect::<Vec<_>>();
    let rows = buttons
        .chunks(3)
        .map(|chunk| chunk.to_vec())
        .collect::<Vec<_>>();
    InlineKeyboardMarkup::new(rows)
}

pub fn build_format_keyboard(current: GenerationFormat) -> InlineKeyboardMarkup {
    let row = GenerationFormat::ALL
        .iter()
        .map(|format| {
            InlineKeyboardButton::callback(
                selected(format.label(), *format == current),
                format!("{}{}", FORMAT_CALLBACK_PREFIX, format.key()),
            )
        })
        .collect::<Vec<_>>();
    InlineKeyboardMarkup::new(vec![row])
}

fn build_reset_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::callback("Start new project", format!("{RESET_CALLBACK_PREFIX}confirm")),
        InlineKeyboardButton::callback("Keep working", format!("{RESET_CALLBACK_PREFIX}cancel")),
    ]])
}

fn on_off(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}

/// HTML summary of the project's current options and assets.
pub fn render_settings(session: &Session) -> String {
    let options = session.options();
    let location = match options.location.trim() {
        "" => "not set".to_string(),
        value => escape_html(value),
    };
    let lock = if options.structure_lock_applies() && !options.structure_locked {
        format!("{} (forced by {})", on_off(true), options.mode.label())
    } else {
        on_off(options.structure_locked).to_string()
    };
    format!(
        "<b>Project #{project}</b>\n\
         Mode: {mode}\n\
         Budget: {budget} ({index}/{max})\n\
         Format: {format}\n\
         Structure lock: {lock}\n\
         Location: {location}\n\
         Room photo: {photo}\n\
         References: {refs}/{max_refs}\n\
         Linked items: {links}\n\
         Last vision: {vision}",
        project = escape_html(session.project_id()),
        mode = options.mode.label(),
        budget = escape_html(options.budget.label()),
        index = options.budget.value(),
        max = BUDGET_LEVELS.len() - 1,
        format = options.format.label(),
        lock = lock,
        location = location,
        photo = if session.base_image().is_some() { "uploaded" } else { "missing" },
        refs = session.references().len(),
        max_refs = MAX_REFERENCE_ASSETS,
        links = session.external_links().len(),
        vision = if session.is_generating() {
            "generating"
        } else if session.result().is_some() {
            "ready"
        } else {
            "none"
        },
    )
}

pub fn render_references(session: &Session) -> String {
    if session.references().is_empty() {
        return format!(
            "No reference images yet. Send a photo captioned <code>style</code> or <code>element</code> (up to {MAX_REFERENCE_ASSETS})."
        );
    }
    let mut text = format!(
        "<b>References ({}/{})</b>\n",
        session.references().len(),
        MAX_REFERENCE_ASSETS
    );
    for (index, reference) in session.references().iter().enumerate() {
        text.push_str(&format!("{}. {}\n", index + 1, reference.kind.label()));
    }
    text.push_str("\nRemove one with /unref &lt;n&gt; or all with /clearrefs.");
    text
}

pub fn render_links(session: &Session) -> String {
    if session.external_links().is_empty() {
        return "No linked items. Add a product page with /link &lt;url&gt;.".to_string();
    }
    let mut text = "<b>Linked items</b>\n".to_string();
    for (index, item) in session.external_links().iter().enumerate() {
        let preview: String = item.analysis.chars().take(LINK_PREVIEW_CHARS).collect();
        let ellipsis = if item.analysis.chars().count() > LINK_PREVIEW_CHARS {
            "…"
        } else {
            ""
        };
        text.push_str(&format!(
            "{}. <b>{}</b> {}\n{}{}\n\n",
            index + 1,
            escape_html(&item.label),
            escape_html(&item.url),
            escape_html(&preview),
            ellipsis
        ));
    }
    text.push_str("Remove one with /unlink &lt;n&gt;.");
    text
}

/// Accepts only absolute http(s) URLs.
pub fn parse_link(value: &str) -> Option<Url> {
    let url = Url::parse(value.trim()).ok()?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Some(url),
        _ => None,
    }
}

async fn reply_html(bot: &Bot, message: &Message, text: String) -> Result<()> {
    send_html(bot, message.chat.id, &text, Some(message.id)).await
}

pub async fn start_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let welcome = state.with_session(message.chat.id, |session| {
        session
            .conversation()
            .turns()
            .first()
            .map(|turn| turn.text.clone())
            .unwrap_or_default()
    });
    let text = format!(
        "{}\n\nSend a room photo to begin, then /generate when you are ready. /help lists everything I can do.",
        markdown_to_telegram_html(&welcome)
    );
    reply_html(&bot, &message, text).await
}

pub async fn help_handler(bot: Bot, message: Message) -> Result<()> {
    let help_text = format!(
        "<b>{PRODUCT_NAME} Design Studio</b>

<b>Your space</b>
Send a photo of your room to set it as the base image. I will review it right away.
Send a photo captioned <code>style</code> or <code>element</code> to add a reference (albums share the caption).
Any other message is a conversation with your design architect.

<b>Direction</b>
/mode - Redesign, Style Transfer, Clean or Seasonal
/budget [0-8] - Spending level
/format - Single shot or 2x2 grids
/lock [on|off] - Keep walls, windows and doors in place
/location [place] - Regional style and sourcing (/location clear to reset)
/link &lt;url&gt; - Analyze a product page and include it in the design
/links, /unlink &lt;n&gt; - Review or remove linked items
/refs, /unref &lt;n&gt;, /clearrefs - Manage reference images
/settings - Show the current project

<b>Results</b>
/generate [directive] - Create the visualization
/vision - Download the latest visualization
/blueprint - Download the design blueprint (PDF)
/reset - Start a new project"
    );

    bot.send_message(message.chat.id, help_text)
        .reply_parameters(ReplyParameters::new(message.id))
        .parse_mode(ParseMode::Html)
        .await?;
    Ok(())
}

pub async fn mode_handler(bot: Bot, state: AppState, message: Message, arg: String) -> Result<()> {
    let arg = arg.trim();
    if arg.is_empty() {
        let current = state.with_session(message.chat.id, |session| session.options().mode);
        bot.send_message(
            message.chat.id,
            format!("Current mode: {}. {}", current.label(), current.description()),
        )
        .reply_markup(build_mode_keyboard(current))
        .await?;
        return Ok(());
    }

    let Some(mode) = DesignMode::from_key(arg) else {
        let keys = DesignMode::ALL
            .iter()
            .map(|mode| mode.key())
            .collect::<Vec<_>>()
            .join(", ");
        bot.send_message(message.chat.id, format!("Unknown mode. Choose one of: {keys}"))
            .reply_parameters(ReplyParameters::new(message.id))
            .await?;
        return Ok(());
    };
    state.with_session(message.chat.id, |session| session.set_mode(mode));
    bot.send_message(
        message.chat.id,
        format!("Mode set to {}. {}", mode.label(), mode.description()),
    )
    .reply_parameters(ReplyParameters::new(message.id))
    .await?;
    Ok(())
}

pub async fn budget_handler(bot: Bot, state: AppState, message: Message, arg: String) -> Result<()> {
    let arg = arg.trim();
    if arg.is_empty() {
        let current = state.with_session(message.chat.id, |session| session.options().budget);
        bot.send_message(
            message.chat.id,
            format!("Current budget: {}. {}", current.label(), current.level().description),
        )
        .reply_markup(build_budget_keyboard(current))
        .await?;
        return Ok(());
    }

    let reply = match BudgetIndex::parse(arg) {
        Ok(budget) => {
            state.with_session(message.chat.id, |session| session.set_budget(budget));
            format!("Budget set to {}. {}", budget.label(), budget.level().description)
        }
        Err(err) => err.to_string(),
    };
    bot.send_message(message.chat.id, reply)
        .reply_parameters(ReplyParameters::new(message.id))
        .await?;
    Ok(())
}

pub async fn format_handler(bot: Bot, state: AppState, message: Message, arg: String) -> Result<()> {
    let arg = arg.trim();
    if arg.is_empty() {
        let current = state.with_session(message.chat.id, |session| session.options().format);
        bot.send_message(message.chat.id, format!("Current format: {}", current.label()))
            .reply_markup(build_format_keyboard(current))
            .await?;
        return Ok(());
    }

    let reply = match GenerationFormat::from_key(arg) {
        Some(format) => {
            state.with_session(message.chat.id, |session| session.set_format(format));
            format!("Format set to {}.", format.label())
        }
        None => {
            let keys = GenerationFormat::ALL
                .iter()
                .map(|format| format.key())
                .collect::<Vec<_>>()
                .join(", ");
            format!("Unknown format. Choose one of: {keys}")
        }
    };
    bot.send_message(message.chat.id, reply)
        .reply_parameters(ReplyParameters::new(message.id))
        .await?;
    Ok(())
}

pub async fn lock_handler(bot: Bot, state: AppState, message: Message, arg: String) -> Result<()> {
    let requested = match arg.trim().to_lowercase().as_str() {
        "" => None,
        "on" | "true" | "yes" => Some(true),
        "off" | "false" | "no" => Some(false),
        _ => {
            bot.send_message(message.chat.id, "Usage: /lock [on|off]")
                .reply_parameters(ReplyParameters::new(message.id))
                .await?;
            return Ok(());
        }
    };

    let (locked, mode) = state.with_session(message.chat.id, |session| {
        let locked = match requested {
            Some(value) => {
                session.set_structure_locked(value);
                value
            }
            None => session.toggle_structure_lock(),
        };
        (locked, session.options().mode)
    });

    let mut reply = format!("Structure lock is {}.", on_off(locked));
    if !locked && mode.forces_structure_lock() {
        reply.push_str(&format!(
            " {} mode keeps the architecture fixed regardless.",
            mode.label()
        ));
    }
    bot.send_message(message.chat.id, reply)
        .reply_parameters(ReplyParameters::new(message.id))
        .await?;
    Ok(())
}

pub async fn location_handler(
    bot: Bot,
    state: AppState,
    message: Message,
    arg: String,
) -> Result<()> {
    let arg = arg.trim();
    let reply = if arg.is_empty() {
        let current = state.with_session(message.chat.id, |session| {
            session.options().location.clone()
        });
        if current.is_empty() {
            "No location set. Usage: /location Lisbon, Portugal".to_string()
        } else {
            format!("Location: {current}")
        }
    } else if arg.eq_ignore_ascii_case("clear") {
        state.with_session(message.chat.id, |session| session.set_location(""));
        "Location cleared.".to_string()
    } else {
        state.with_session(message.chat.id, |session| session.set_location(arg));
        format!("Location set to {arg}.")
    };
    bot.send_message(message.chat.id, reply)
        .reply_parameters(ReplyParameters::new(message.id))
        .await?;
    Ok(())
}

pub async fn settings_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let text = state.with_session(message.chat.id, |session| render_settings(session));
    reply_html(&bot, &message, text).await
}

pub async fn refs_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let text = state.with_session(message.chat.id, |session| render_references(session));
    reply_html(&bot, &message, text).await
}

pub async fn unref_handler(bot: Bot, state: AppState, message: Message, arg: String) -> Result<()> {
    let reply = match arg.trim().parse::<usize>() {
        Ok(position) => state.with_session(message.chat.id, |session| {
            match session.remove_reference(position) {
                Ok(removed) => format!(
                    "Removed {} reference {}. {} left.",
                    removed.kind.label(),
                    position,
                    session.references().len()
                ),
                Err(err) => err.to_string(),
            }
        }),
        Err(_) => "Usage: /unref <n> (see /refs for numbers)".to_string(),
    };
    bot.send_message(message.chat.id, reply)
        .reply_parameters(ReplyParameters::new(message.id))
        .await?;
    Ok(())
}

pub async fn clearrefs_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let removed = state.with_session(message.chat.id, |session| session.clear_references());
    bot.send_message(message.chat.id, format!("Cleared {removed} reference image(s)."))
        .reply_parameters(ReplyParameters::new(message.id))
        .await?;
    Ok(())
}

pub async fn links_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let text = state.with_session(message.chat.id, |session| render_links(session));
    reply_html(&bot, &message, text).await
}

pub async fn unlink_handler(bot: Bot, state: AppState, message: Message, arg: String) -> Result<()> {
    let reply = match arg.trim().parse::<usize>() {
        Ok(position) => state.with_session(message.chat.id, |session| {
            match session.remove_external_link(position) {
                Ok(removed) => format!("Removed {} ({}).", removed.label, removed.url),
                Err(err) => err.to_string(),
            }
        }),
        Err(_) => "Usage: /unlink <n> (see /links for numbers)".to_string(),
    };
    bot.send_message(message.chat.id, reply)
        .reply_parameters(ReplyParameters::new(message.id))
        .await?;
    Ok(())
}

pub async fn link_handler(bot: Bot, state: AppState, message: Message, arg: String) -> Result<()> {
    let mut timer = start_command_timer("link", &message);
    let Some(url) = parse_link(&arg) else {
        bot.send_message(message.chat.id, "Usage: /link https://shop.example/product")
            .reply_parameters(ReplyParameters::new(message.id))
            .await?;
        complete_command_timer(&mut timer, "invalid", Some("not an http(s) url".to_string()));
        return Ok(());
    };

    let chat_id = message.chat.id;
    let project_id = state.with_session(chat_id, |session| session.project_id().to_string());
    let analysis = {
        let _typing = start_chat_action_heartbeat(bot.clone(), chat_id, ChatAction::Typing);
        state.gateway.analyze_link(url.as_str()).await
    };
    let fallback = analysis.is_fallback();

    let stored = state.with_project(chat_id, &project_id, |session| {
        let item = session.add_external_link(url.as_str(), analysis.into_text());
        format!(
            "<b>{}</b> linked.\n{}",
            escape_html(&item.label),
            escape_html(&item.analysis)
        )
    });
    let Some(reply) = stored else {
        info!("Dropping link analysis for reset project {project_id}");
        complete_command_timer(&mut timer, "discarded", Some("project reset".to_string()));
        return Ok(());
    };

    reply_html(&bot, &message, reply).await?;
    let status = if fallback { "fallback" } else { "success" };
    complete_command_timer(&mut timer, status, None);
    Ok(())
}

pub async fn reset_handler(bot: Bot, message: Message) -> Result<()> {
    bot.send_message(
        message.chat.id,
        "Start a new project? This will clear your current design.",
    )
    .reply_parameters(ReplyParameters::new(message.id))
    .reply_markup(build_reset_keyboard())
    .await?;
    Ok(())
}

pub async fn studio_callback(bot: Bot, state: AppState, query: CallbackQuery) -> Result<()> {
    let _ = bot.answer_callback_query(query.id.clone()).await;
    let Some(callback) = query.data.as_deref().and_then(StudioCallback::parse) else {
        return Ok(());
    };
    let Some(message) = query.message.as_ref() else {
        return Ok(());
    };
    let mut timer = start_callback_timer(callback.action_name(), &query);
    let chat_id = message.chat().id;

    let (text, html) = state.with_session(chat_id, |session| match callback {
        StudioCallback::Mode(mode) => {
            session.set_mode(mode);
            (format!("Mode set to {}. {}", mode.label(), mode.description()), false)
        }
        StudioCallback::Budget(budget) => {
            session.set_budget(budget);
            (
                format!("Budget set to {}. {}", budget.label(), budget.level().description),
                false,
            )
        }
        StudioCallback::Format(format) => {
            session.set_format(format);
            (format!("Format set to {}.", format.label()), false)
        }
        StudioCallback::Reset { confirmed: true } => {
            session.reset();
            let intro = session
                .conversation()
                .turns()
                .first()
                .map(|turn| markdown_to_telegram_html(&turn.text))
                .unwrap_or_default();
            (intro, true)
        }
        StudioCallback::Reset { confirmed: false } => {
            ("Keeping the current project.".to_string(), false)
        }
    });

    let request = bot.edit_message_text(chat_id, message.id(), text);
    if html {
        request.parse_mode(ParseMode::Html).await?;
    } else {
        request.await?;
    }
    complete_command_timer(&mut timer, "success", None);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::studio::image::EncodedImage;
    use crate::studio::ReferenceKind;
    use teloxide::types::InlineKeyboardButtonKind;

    fn callback_data(button: &InlineKeyboardButton) -> &str {
        match &button.kind {
            InlineKeyboardButtonKind::CallbackData(data) => data,
            other => panic!("unexpected button kind {other:?}"),
        }
    }

    #[test]
    fn callbacks_round_trip_through_keyboards() {
        let keyboard = build_budget_keyboard(BudgetIndex::default());
        let buttons: Vec<&InlineKeyboardButton> = keyboard.inline_keyboard.iter().flatten().collect();
        assert_eq!(buttons.len(), BUDGET_LEVELS.len());
        assert!(buttons[4].text.starts_with("✓ "));
        for (index, button) in buttons.iter().enumerate() {
            assert_eq!(
                StudioCallback::parse(callback_data(button)),
                Some(StudioCallback::Budget(BudgetIndex::new(index as i64).unwrap()))
            );
        }

        let modes = build_mode_keyboard(DesignMode::Clean);
        let first = &modes.inline_keyboard[0][0];
        assert_eq!(
            StudioCallback::parse(callback_data(first)),
            Some(StudioCallback::Mode(DesignMode::ALL[0]))
        );

        let formats = build_format_keyboard(GenerationFormat::GridVariants);
        assert_eq!(formats.inline_keyboard[0].len(), 3);
    }

    #[test]
    fn callback_parsing_rejects_garbage() {
        assert_eq!(StudioCallback::parse("budget:9"), None);
        assert_eq!(StudioCallback::parse("mode:unknown"), None);
        assert_eq!(StudioCallback::parse("reset:maybe"), None);
        assert_eq!(
            StudioCallback::parse("reset:confirm"),
            Some(StudioCallback::Reset { confirmed: true })
        );
        assert_eq!(StudioCallback::parse("other"), None);
    }

    #[test]
    fn links_must_be_http() {
        assert!(parse_link("https://shop.example/chair?id=2").is_some());
        assert!(parse_link(" http://example.com ").is_some());
        assert!(parse_link("ftp://example.com/file").is_none());
        assert!(parse_link("not a url").is_none());
        assert!(parse_link("mailto:me@example.com").is_none());
    }

    #[test]
    fn settings_escape_user_text() {
        let mut session = Session::new();
        session.set_location("<Lisbon & Porto>");
        let rendered = render_settings(&session);
        assert!(rendered.contains("Location: &lt;Lisbon &amp; Porto&gt;"));
        assert!(rendered.contains("Room photo: missing"));
        assert!(rendered.contains(&format!("Project #{}", session.project_id())));
    }

    #[test]
    fn reference_listing_is_numbered() {
        let mut session = Session::new();
        assert!(render_references(&session).starts_with("No reference images"));
        let image = EncodedImage::from_model_output(Some("image/jpeg"), vec![1, 2, 3]).unwrap();
        session.add_reference(image.clone(), ReferenceKind::Style).unwrap();
        session.add_reference(image, ReferenceKind::Element).unwrap();
        let listing = render_references(&session);
        assert!(listing.contains("1. style\n2. element\n"));
        assert!(listing.contains("(2/8)"));
    }
}
