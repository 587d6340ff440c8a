//! Chat handlers: settings commands and job requests.

use std::path::Path;
use std::sync::Arc;
use teloxide::net::Download;
use teloxide::{prelude::*, types::*, utils::command::BotCommands};

use crate::config::AppConfig;
use crate::error::{ConfigurationValueError, PipelineError, TransferError};
use crate::pipeline::{sanitize_name, FinishedJob, Pipeline, RemoteRequest};
use crate::runner::ProcessRunner;
use crate::settings::{Movement, Settings, SettingsStore};
use crate::upload::{self, truncate_chars, Upload};

pub type BotPipeline = Arc<Pipeline<ProcessRunner>>;

/// Leaves room below Telegram's 4096-character message limit.
const MESSAGE_LIMIT: usize = 3500;
const MOVE_PREFIX: &str = "wm_move_";

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "These commands are supported:")]
pub enum Command {
    #[command(description = "Displays this help message.")]
    Help,
    #[command(description = "Shows what this bot does.")]
    Start,
    #[command(description = "Shows the current settings.")]
    Settings,
    #[command(description = "Sets the watermark text, or /d to disable it.")]
    SetWatermark(String),
    #[command(description = "Sets watermark movement: none, lr or tb.")]
    SetMovement(String),
    #[command(description = "Sets the speed of a moving watermark.")]
    SetSpeed(String),
    #[command(description = "Sets stationary placement: center or bottom-right.")]
    SetPosition(String),
    #[command(description = "Sets compression (8-28, lower is better quality), /d for default.")]
    SetCrf(String),
    #[command(description = "Sets the maximum download height, e.g. 720, /d for best.")]
    SetQuality(String),
    #[command(description = "Sets a thumbnail URL or path, /d to extract one.")]
    SetThumb(String),
    #[command(description = "Restores the default settings.")]
    Reset,
    #[command(
        description = "Downloads a URL: /drm <url> [--key KID:KEY ...].",
        aliases = ["download"]
    )]
    Drm(String),
    #[command(description = "Reply to a video to apply the current settings.")]
    Watermark,
    #[command(description = "Shows the active defaults.")]
    About,
    #[command(description = "Checks that the bot is alive.")]
    Ping,
}

fn settings_text(settings: &Settings) -> String {
    format!(
        "⚙️ Current settings\n\n\
        Watermark: {}\n\
        Movement: {}\n\
        Speed: {}\n\
        Position: {}\n\
        CRF: {}\n\
        Quality: {}\n\
        Thumbnail: {}",
        settings.watermark_label(),
        settings.movement,
        settings.speed,
        settings.position,
        settings.crf,
        settings
            .quality
            .map(|q| format!("{}p", q))
            .unwrap_or_else(|| "best".to_string()),
        settings.thumbnail.as_deref().unwrap_or("auto"),
    )
}

fn movement_keyboard() -> InlineKeyboardMarkup {
    let button = |movement: Movement| {
        InlineKeyboardButton::callback(movement.to_string(), format!("{}{}", MOVE_PREFIX, movement.code()))
    };
    InlineKeyboardMarkup::new(vec![
        vec![button(Movement::Stationary), button(Movement::LeftToRight)],
        vec![button(Movement::TopToBottom)],
    ])
}

fn rejected(err: &ConfigurationValueError) -> String {
    format!("⚠️ {}", err)
}

fn failure_text(err: &PipelineError) -> String {
    let text = match err.diagnostics() {
        Some(stderr) => format!("❌ {}\n\n{}", err, stderr.trim()),
        None => format!("❌ {}", err),
    };
    truncate_chars(&text, MESSAGE_LIMIT)
}

/// Splits `/drm` arguments into the URL and the optional key spec.
fn parse_drm_args(args: &str) -> Option<(String, Option<String>)> {
    let mut parts = args.split_whitespace();
    let url = parts.next()?.to_string();
    let keys: Vec<&str> = parts.collect();
    let key_spec = (!keys.is_empty()).then(|| keys.join(" "));
    Some((url, key_spec))
}

/// Output name derived from the last path segment of a URL.
fn name_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let segment = path.trim_end_matches('/').rsplit('/').next().unwrap_or("");
    let stem = Path::new(segment)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("");
    sanitize_name(stem)
}

/// Handler for bot commands.
pub async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    store: SettingsStore,
    pipeline: BotPipeline,
    config: Arc<AppConfig>,
    client: reqwest::Client,
) -> Result<(), teloxide::RequestError> {
    let reply = match cmd {
        Command::Help => Command::descriptions().to_string(),
        Command::Start => "👋 Send /drm <url> to download and re-upload a video, or reply to a video with \
            /watermark.\n\nThe configured watermark is drawn onto the video; without one the streams \
            are copied unchanged.\n\nUse /help to see every command."
            .to_string(),
        Command::Settings => {
            let settings = store.snapshot().await;
            bot.send_message(msg.chat.id, settings_text(&settings))
                .reply_markup(movement_keyboard())
                .await?;
            return Ok(());
        }
        Command::About => {
            let defaults = &config.defaults;
            format!(
                "🤖 Watermark bot\n\nDefault CRF: {}\nDefault quality: {}\nFont: {}",
                defaults.crf,
                defaults
                    .quality
                    .map(|q| format!("{}p", q))
                    .unwrap_or_else(|| "best".to_string()),
                config.font_file,
            )
        }
        Command::SetWatermark(raw) => match store.set_watermark(&raw).await {
            Ok(Some(text)) => format!("✅ Video watermark `{}` enabled.", text),
            Ok(None) => "✅ Video watermark disabled.".to_string(),
            Err(e) => rejected(&e),
        },
        Command::SetMovement(raw) => match store.set_movement(&raw).await {
            Ok(movement) => format!("✅ Watermark movement: {}.", movement),
            Err(e) => rejected(&e),
        },
        Command::SetSpeed(raw) => match store.set_speed(&raw).await {
            Ok(speed) => format!("✅ Watermark speed set to {}.", speed),
            Err(e) => rejected(&e),
        },
        Command::SetPosition(raw) => match store.set_position(&raw).await {
            Ok(position) => format!("✅ Watermark position: {}.", position),
            Err(e) => rejected(&e),
        },
        Command::SetCrf(raw) => match store.set_crf(&raw).await {
            Ok(crf) => format!(
                "✅ CRF set to {}.\nLower → higher quality, larger size.\nHigher → smaller size, lower quality.",
                crf
            ),
            Err(e) => rejected(&e),
        },
        Command::SetQuality(raw) => match store.set_quality(&raw).await {
            Ok(Some(height)) => format!("✅ Downloads capped at {}p.", height),
            Ok(None) => "✅ Downloads use the best available quality.".to_string(),
            Err(e) => rejected(&e),
        },
        Command::SetThumb(raw) => match store.set_thumbnail(&raw).await {
            Ok(Some(thumb)) => format!("✅ Thumbnail set to {}.", thumb),
            Ok(None) => "✅ Thumbnails will be extracted from the video.".to_string(),
            Err(e) => rejected(&e),
        },
        Command::Ping => "🏓 Pong!".to_string(),
        Command::Reset => {
            store.reset().await;
            "🔄 Settings restored to defaults.".to_string()
        }
        Command::Drm(args) => match parse_drm_args(&args) {
            Some((url, key_spec)) => {
                let settings = store.snapshot().await;
                bot.send_message(msg.chat.id, format!("🔗 Processing:\n{}", url))
                    .reply_parameters(ReplyParameters::new(msg.id))
                    .await?;
                tokio::spawn(run_remote_job(
                    bot.clone(),
                    msg.chat.id,
                    pipeline,
                    config,
                    client,
                    settings,
                    url,
                    key_spec,
                ));
                return Ok(());
            }
            None => "❗ Usage: /drm <video_url> [--key KID:KEY ...]".to_string(),
        },
        Command::Watermark => match msg.reply_to_message() {
            Some(reply) if reply.video().is_some() || reply.document().is_some() => {
                let settings = store.snapshot().await;
                bot.send_message(msg.chat.id, "⚙️ Processing... please wait ⏳")
                    .reply_parameters(ReplyParameters::new(msg.id))
                    .await?;
                tokio::spawn(run_local_job(
                    bot.clone(),
                    msg.chat.id,
                    reply.clone(),
                    pipeline,
                    config,
                    client,
                    settings,
                ));
                return Ok(());
            }
            _ => "🎥 Reply to a video with /watermark to apply the current settings.".to_string(),
        },
    };

    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

/// Handler for the movement keyboard.
pub async fn handle_callback_query(
    bot: Bot,
    q: CallbackQuery,
    store: SettingsStore,
) -> Result<(), teloxide::RequestError> {
    let Some(code) = q.data.as_deref().and_then(|d| d.strip_prefix(MOVE_PREFIX)) else {
        return Ok(());
    };

    match store.set_movement(code).await {
        Ok(movement) => {
            bot.answer_callback_query(q.id.clone())
                .text(format!("Watermark movement: {}", movement))
                .await?;
            if let Some(message) = q.message {
                let settings = store.snapshot().await;
                bot.edit_message_text(message.chat().id, message.id(), settings_text(&settings))
                    .reply_markup(movement_keyboard())
                    .await?;
            }
        }
        Err(e) => {
            log::warn!("Rejected movement callback `{}`: {}", code, e);
            bot.answer_callback_query(q.id.clone()).text(rejected(&e)).await?;
        }
    }
    Ok(())
}

/// Handler for anything that is not a command.
pub async fn handle_message(bot: Bot, msg: Message) -> Result<(), teloxide::RequestError> {
    if msg.chat.is_private() {
        bot.send_message(
            msg.chat.id,
            "To process a video, either:\n\
            1. Send /drm <url> [--key KID:KEY ...].\n\
            2. Reply to a video with /watermark.\n\n\
            Use /help to see other commands.",
        )
        .await?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_remote_job(
    bot: Bot,
    chat: ChatId,
    pipeline: BotPipeline,
    config: Arc<AppConfig>,
    client: reqwest::Client,
    settings: Settings,
    url: String,
    key_spec: Option<String>,
) {
    let name = name_from_url(&url);
    let request = RemoteRequest {
        url: &url,
        key_spec: key_spec.as_deref(),
        quality: settings.quality,
        name: &name,
    };

    let result = pipeline.process_remote(settings, &request).await;
    deliver_result(&bot, chat, &pipeline, &config, &client, &name, result).await;
}

async fn run_local_job(
    bot: Bot,
    chat: ChatId,
    source: Message,
    pipeline: BotPipeline,
    config: Arc<AppConfig>,
    client: reqwest::Client,
    settings: Settings,
) {
    let input = pipeline
        .work_root()
        .join(format!("incoming_{}_{}.mp4", source.chat.id, source.id.0));

    if let Err(e) = fetch_video(&bot, &source, &input).await {
        log::error!("Failed to download video from chat {}: {}", chat, e);
        let _ = tokio::fs::remove_file(&input).await;
        if let Err(e) = bot.send_message(chat, format!("❌ Could not download the video: {}", e)).await {
            log::error!("Error sending failure message: {:?}", e);
        }
        return;
    }

    let name = source
        .video()
        .and_then(|v| v.file_name.clone())
        .or_else(|| source.document().and_then(|d| d.file_name.clone()))
        .map(|n| sanitize_name(Path::new(&n).file_stem().and_then(|s| s.to_str()).unwrap_or(&n)))
        .unwrap_or_else(|| "video".to_string());

    let result = pipeline.process_local(settings, &input).await;
    deliver_result(&bot, chat, &pipeline, &config, &client, &name, result).await;
}

/// Downloads the video (or video document) attached to `source` into `target`.
async fn fetch_video(bot: &Bot, source: &Message, target: &Path) -> Result<(), TransferError> {
    let file_id = source
        .video()
        .map(|v| v.file.id.clone())
        .or_else(|| source.document().map(|d| d.file.id.clone()))
        .ok_or(TransferError::NoVideo)?;

    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let file = bot.get_file(file_id).await?;
    let mut dst = tokio::fs::File::create(target).await?;
    bot.download_file(&file.path, &mut dst).await?;
    Ok(())
}

async fn deliver_result(
    bot: &Bot,
    chat: ChatId,
    pipeline: &BotPipeline,
    config: &AppConfig,
    client: &reqwest::Client,
    name: &str,
    result: Result<FinishedJob, PipelineError>,
) {
    let finished = match result {
        Ok(finished) => finished,
        Err(e) => {
            if let Err(send_err) = bot.send_message(chat, failure_text(&e)).await {
                log::error!("Error sending failure message: {:?}", send_err);
            }
            return;
        }
    };

    let thumbnail = upload::prepare_thumbnail(pipeline, client, &finished).await;
    let target = config.upload_chat.unwrap_or(chat);
    let delivery = Upload {
        path: &finished.output,
        caption: upload::job_caption(name, &finished),
        thumbnail,
        supports_streaming: true,
    };

    let delivered = match upload::deliver(bot, target, &delivery).await {
        Ok(()) => {
            if target != chat {
                if let Err(e) = bot.send_message(chat, format!("✅ {} uploaded.", name)).await {
                    log::error!("Error sending upload notice: {:?}", e);
                }
            }
            true
        }
        Err(e) => {
            log::error!("[job {}] upload failed: {:?}", finished.id, e);
            if let Err(send_err) = bot.send_message(chat, format!("❌ Upload failed: {}", e)).await {
                log::error!("Error sending failure message: {:?}", send_err);
            }
            false
        }
    };
    finished.complete(delivered).await;
}
