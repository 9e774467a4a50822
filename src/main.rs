use std::error::Error;
use std::future::Future;

use dotenvy::dotenv;
use teloxide::dispatching::UpdateFilterExt;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tracing::{error, info, warn};

mod config;
mod handlers;
mod llm;
mod state;
mod studio;
mod utils;

use config::CONFIG;
use handlers::media::message_has_image;
use handlers::studio::CALLBACK_PREFIXES;
use handlers::{chat, generation, media, studio as studio_handlers};
use llm::{DesignGateway, HttpGeminiTransport};
use state::AppState;
use utils::logging::init_logging;

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase")]
enum Command {
    #[command(description = "start the studio")]
    Start,
    #[command(description = "show help")]
    Help,
    #[command(description = "choose a design mode")]
    Mode(String),
    #[command(description = "set the budget level 0-8")]
    Budget(String),
    #[command(description = "single shot or 2x2 grid")]
    Format(String),
    #[command(description = "toggle the architectural lock")]
    Lock(String),
    #[command(description = "set the project location")]
    Location(String),
    #[command(description = "analyze a product link")]
    Link(String),
    #[command(description = "list linked items")]
    Links,
    #[command(description = "remove a linked item")]
    Unlink(String),
    #[command(description = "list reference images")]
    Refs,
    #[command(description = "remove a reference image")]
    Unref(String),
    #[command(description = "remove all reference images")]
    Clearrefs,
    #[command(description = "show project settings")]
    Settings,
    #[command(description = "create the visualization")]
    Generate(String),
    #[command(description = "download the latest visualization")]
    Vision,
    #[command(description = "download the design blueprint")]
    Blueprint,
    #[command(description = "start a new project")]
    Reset,
}

type HandlerResult = Result<(), Box<dyn Error + Send + Sync>>;

fn spawn_handler<F>(name: &'static str, task: F)
where
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(err) = task.await {
            error!("{name} handler failed: {err:#}");
        }
    });
}

#[tokio::main]
async fn main() -> HandlerResult {
    dotenv().ok();
    let _guards = init_logging();
    for warning in &CONFIG.startup_warnings {
        warn!("{warning}");
    }

    let bot = Bot::new(CONFIG.bot_token.clone());
    let transport = HttpGeminiTransport::new(
        CONFIG.gemini_api_key.clone(),
        CONFIG.gemini_api_base.clone(),
        CONFIG.gemini_timeout(),
    );
    let state = AppState::new(DesignGateway::new(transport, CONFIG.gateway_settings()));
    let settings = state.gateway.settings();
    info!(
        "Starting {} studio bot (image model {}, reasoning model {}, safety {})",
        studio::PRODUCT_NAME,
        settings.image_model,
        settings.reasoning_model,
        settings.safety.as_str()
    );

    if let Err(err) = bot.set_my_commands(Command::bot_commands()).await {
        warn!("Failed to register bot commands: {err}");
    }

    let command_handler = dptree::entry()
        .filter_command::<Command>()
        .endpoint(handle_command);

    let message_handler = Update::filter_message()
        .branch(command_handler)
        .branch(dptree::filter(|msg: Message| message_has_image(&msg)).endpoint(handle_image))
        .branch(
            dptree::filter(|msg: Message| {
                msg.text()
                    .map(|text| !text.trim_start().starts_with('/'))
                    .unwrap_or(false)
            })
            .endpoint(handle_chat),
        )
        .endpoint(ignore_message);

    let callback_handler = Update::filter_callback_query().endpoint(handle_callback_query);

    let handler = dptree::entry()
        .branch(message_handler)
        .branch(callback_handler);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_command(
    bot: Bot,
    state: AppState,
    message: Message,
    command: Command,
) -> HandlerResult {
    match command {
        Command::Start => studio_handlers::start_handler(bot, state, message).await?,
        Command::Help => studio_handlers::help_handler(bot, message).await?,
        Command::Mode(arg) => studio_handlers::mode_handler(bot, state, message, arg).await?,
        Command::Budget(arg) => studio_handlers::budget_handler(bot, state, message, arg).await?,
        Command::Format(arg) => studio_handlers::format_handler(bot, state, message, arg).await?,
        Command::Lock(arg) => studio_handlers::lock_handler(bot, state, message, arg).await?,
        Command::Location(arg) => {
            studio_handlers::location_handler(bot, state, message, arg).await?
        }
        Command::Link(arg) => spawn_handler(
            "link",
            studio_handlers::link_handler(bot, state, message, arg),
        ),
        Command::Links => studio_handlers::links_handler(bot, state, message).await?,
        Command::Unlink(arg) => studio_handlers::unlink_handler(bot, state, message, arg).await?,
        Command::Refs => studio_handlers::refs_handler(bot, state, message).await?,
        Command::Unref(arg) => studio_handlers::unref_handler(bot, state, message, arg).await?,
        Command::Clearrefs => studio_handlers::clearrefs_handler(bot, state, message).await?,
        Command::Settings => studio_handlers::settings_handler(bot, state, message).await?,
        Command::Generate(arg) => spawn_handler(
            "generate",
            generation::generate_handler(bot, state, message, arg),
        ),
        Command::Vision => spawn_handler("vision", generation::vision_handler(bot, state, message)),
        Command::Blueprint => spawn_handler(
            "blueprint",
            generation::blueprint_handler(bot, state, message),
        ),
        Command::Reset => studio_handlers::reset_handler(bot, message).await?,
    }
    Ok(())
}

async fn handle_callback_query(bot: Bot, state: AppState, query: CallbackQuery) -> HandlerResult {
    let Some(data) = query.data.as_deref() else {
        return Ok(());
    };
    if CALLBACK_PREFIXES.iter().any(|prefix| data.starts_with(prefix)) {
        spawn_handler(
            "studio callback",
            studio_handlers::studio_callback(bot, state, query),
        );
    }
    Ok(())
}

async fn handle_image(bot: Bot, state: AppState, message: Message) -> HandlerResult {
    spawn_handler("upload", media::image_message_handler(bot, state, message));
    Ok(())
}

async fn handle_chat(bot: Bot, state: AppState, message: Message) -> HandlerResult {
    spawn_handler("chat", chat::chat_message_handler(bot, state, message));
    Ok(())
}

async fn ignore_message(_message: Message) -> HandlerResult {
    Ok(())
}
