//! Telegram handlers: commands, image uploads, and menu callbacks.
//!
//! Handlers are thin adapters: every admission and session-state decision is
//! delegated to the [`AdmissionGate`], every pixel is touched elsewhere. No
//! gate lock is held across any of the awaits in this module.

use crate::cache::ResultCache;
use crate::config::{Settings, QUALITY_PRESETS};
use crate::imaging;
use crate::session::{AdmissionGate, Decision, GateError, ImageRef, Operation};
use crate::utils::{format_file_size, retry_telegram_operation};
use crate::validation::{validate_upload, ValidationError};
use crate::vendors::{VendorClients, VendorError};
use anyhow::Result;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{
    FileId, InlineKeyboardButton, InlineKeyboardMarkup, InputFile, MessageId, ParseMode,
};
use teloxide::utils::command::BotCommands;
use teloxide::utils::html;
use tracing::{error, info, warn};

/// Supported commands for the bot
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Supported commands:")]
pub enum Command {
    /// Start the bot and show welcome message
    #[command(description = "Start the bot.")]
    Start,
    /// Describe available features
    #[command(description = "Show available features.")]
    Help,
    /// Show remaining rate-limit quota
    #[command(description = "Show remaining quota.")]
    Usage,
}

/// Safe extraction of user ID from a message.
/// Returns 0 if the user information is missing.
#[must_use]
pub fn get_user_id_safe(msg: &Message) -> u64 {
    msg.from.as_ref().map_or(0, |u| u.id.0)
}

fn get_user_name(msg: &Message) -> String {
    msg.from
        .as_ref()
        .map_or_else(|| "User".to_string(), |u| u.first_name.clone())
}

/// Inline keyboard with the processing options, hiding unconfigured vendors
#[must_use]
pub fn options_keyboard(clients: &VendorClients) -> InlineKeyboardMarkup {
    let mut rows = Vec::new();
    if clients.removebg.is_some() {
        rows.push(vec![InlineKeyboardButton::callback(
            "🎯 Remove Background",
            "remove_bg",
        )]);
    }
    if clients.photoroom.is_some() {
        rows.push(vec![InlineKeyboardButton::callback(
            "🎨 AI Image Editing",
            "ai_edit",
        )]);
    }
    rows.push(vec![InlineKeyboardButton::callback(
        "⬆️ Enhance Quality",
        "enhance_quality",
    )]);
    rows.push(vec![InlineKeyboardButton::callback(
        "🖼 Convert to Wallpaper",
        "wallpaper",
    )]);
    InlineKeyboardMarkup::new(rows)
}

/// Inline keyboard with the quality presets and a back button
#[must_use]
pub fn quality_keyboard() -> InlineKeyboardMarkup {
    let mut rows: Vec<Vec<InlineKeyboardButton>> = QUALITY_PRESETS
        .iter()
        .map(|preset| {
            vec![InlineKeyboardButton::callback(
                preset.label,
                format!("quality_{}", preset.key),
            )]
        })
        .collect();
    rows.push(vec![InlineKeyboardButton::callback(
        "⬅️ Back to Options",
        "back_to_options",
    )]);
    InlineKeyboardMarkup::new(rows)
}

/// `/start` handler
///
/// # Errors
///
/// Returns an error if the welcome message cannot be sent.
pub async fn start(bot: Bot, msg: Message, settings: Arc<Settings>) -> Result<()> {
    let user_id = get_user_id_safe(&msg);
    let user_name = get_user_name(&msg);
    info!("User {user_id} ({user_name}) initiated /start command.");

    let text = format!(
        "🎨 <b>Welcome to AI Image Editor Bot, {}!</b>\n\n\
         I can help you with:\n\
         • 🎯 Background removal\n\
         • 🎨 AI-powered image editing\n\
         • ⬆️ Quality enhancement (HD, 4K, 8K)\n\
         • 🖼 Wallpaper conversion\n\n\
         <b>How to use:</b>\n\
         1. Send me an image (photo or document)\n\
         2. Choose an editing option\n\
         3. Download your enhanced image\n\n\
         <b>Supported formats:</b> JPEG, PNG, WebP\n\
         <b>Max file size:</b> {}\n\n\
         Send me an image to get started! 📸",
        html::escape(&user_name),
        format_file_size(settings.max_file_size_bytes)
    );

    bot.send_message(msg.chat.id, text)
        .parse_mode(ParseMode::Html)
        .await?;
    Ok(())
}

/// `/help` handler
///
/// # Errors
///
/// Returns an error if the help message cannot be sent.
pub async fn help(bot: Bot, msg: Message, clients: Arc<VendorClients>) -> Result<()> {
    let removebg_note = if clients.removebg.is_some() { "" } else { " (not configured)" };
    let photoroom_note = if clients.photoroom.is_some() { "" } else { " (not configured)" };

    let text = format!(
        "🔧 <b>Available Commands:</b>\n\
         /start - Start the bot\n\
         /help - Show this message\n\
         /usage - Show your remaining quota\n\n\
         <b>Features:</b>\n\
         🎯 Background removal{removebg_note}\n\
         🎨 AI image editing{photoroom_note}\n\
         ⬆️ Quality enhancement (HD, Full HD, 4K, 8K)\n\
         🖼 Wallpaper conversion (16:9)\n\n\
         Send an image and pick an operation from the menu."
    );

    bot.send_message(msg.chat.id, text)
        .parse_mode(ParseMode::Html)
        .await?;
    Ok(())
}

/// `/usage` handler: remaining quota and store statistics
///
/// # Errors
///
/// Returns an error if the message cannot be sent.
pub async fn usage(
    bot: Bot,
    msg: Message,
    gate: Arc<AdmissionGate>,
    settings: Arc<Settings>,
    cache: Arc<ResultCache>,
) -> Result<()> {
    let user_id = get_user_id_safe(&msg);
    let remaining = gate.remaining_requests(user_id);

    let text = format!(
        "📊 <b>Usage</b>\n\
         Requests left: {remaining} of {} (per {} min)\n\
         Tracked sessions: {}\n\
         Cached results: {}",
        settings.max_requests_per_window,
        settings.window_seconds / 60,
        gate.session_count(),
        cache.entry_count()
    );

    bot.send_message(msg.chat.id, text)
        .parse_mode(ParseMode::Html)
        .await?;
    Ok(())
}

struct UploadMeta {
    file_id: String,
    file_size: u64,
    mime_type: Option<String>,
}

/// Photo upload handler
///
/// # Errors
///
/// Returns an error if a Telegram API call fails.
pub async fn handle_photo(
    bot: Bot,
    msg: Message,
    gate: Arc<AdmissionGate>,
    settings: Arc<Settings>,
    clients: Arc<VendorClients>,
) -> Result<()> {
    // Telegram offers several sizes; take the largest.
    let Some(photo) = msg.photo().and_then(|sizes| sizes.last()) else {
        return Ok(());
    };

    let upload = UploadMeta {
        file_id: photo.file.id.clone().0,
        file_size: u64::from(photo.file.size),
        // Photos are re-encoded as JPEG by Telegram; no format check needed.
        mime_type: None,
    };
    accept_upload(&bot, &msg, &gate, &settings, &clients, upload).await
}

/// Image document upload handler
///
/// # Errors
///
/// Returns an error if a Telegram API call fails.
pub async fn handle_document(
    bot: Bot,
    msg: Message,
    gate: Arc<AdmissionGate>,
    settings: Arc<Settings>,
    clients: Arc<VendorClients>,
) -> Result<()> {
    let Some(document) = msg.document() else {
        return Ok(());
    };

    let mime_type = document
        .mime_type
        .as_ref()
        .map_or_else(|| "unknown".to_string(), ToString::to_string);

    let upload = UploadMeta {
        file_id: document.file.id.clone().0,
        file_size: u64::from(document.file.size),
        mime_type: Some(mime_type),
    };
    accept_upload(&bot, &msg, &gate, &settings, &clients, upload).await
}

/// Validate, admit, and remember an upload, then show the options menu.
async fn accept_upload(
    bot: &Bot,
    msg: &Message,
    gate: &AdmissionGate,
    settings: &Settings,
    clients: &VendorClients,
    upload: UploadMeta,
) -> Result<()> {
    let user_id = get_user_id_safe(msg);

    // Validation failures never reach the gate and never cost a slot.
    if let Err(e) = validate_upload(upload.file_size, upload.mime_type.as_deref(), settings) {
        warn!("Rejected upload from user {user_id}: {e}");
        let text = match e {
            ValidationError::TooLarge { .. } => format!(
                "❌ File too large! Maximum size is {}.",
                format_file_size(settings.max_file_size_bytes)
            ),
            ValidationError::UnsupportedFormat(_) => {
                "❌ Unsupported file format! Please send JPEG, PNG, or WebP images.".to_string()
            }
        };
        bot.send_message(msg.chat.id, text).await?;
        return Ok(());
    }

    match gate.admit(user_id) {
        Decision::Denied { retry_after } => {
            bot.send_message(
                msg.chat.id,
                format!(
                    "⚠️ You've reached the rate limit. Try again in {}.",
                    format_retry_after(retry_after)
                ),
            )
            .await?;
            return Ok(());
        }
        Decision::Allowed { remaining } => {
            info!("Admitted upload from user {user_id} ({remaining} requests left in window)");
        }
    }

    gate.record_upload(
        user_id,
        ImageRef {
            file_id: upload.file_id,
            file_size: upload.file_size,
        },
    );

    bot.send_message(
        msg.chat.id,
        "📸 <b>Image received!</b> What would you like to do?",
    )
    .parse_mode(ParseMode::Html)
    .reply_markup(options_keyboard(clients))
    .await?;
    Ok(())
}

fn format_retry_after(retry_after: Duration) -> String {
    let secs = retry_after.as_secs().max(1);
    if secs < 120 {
        format!("{secs}s")
    } else {
        format!("{} min", secs.div_ceil(60))
    }
}

/// Everything an in-flight callback needs, bundled to keep signatures small
struct CallbackCtx<'a> {
    bot: &'a Bot,
    chat_id: ChatId,
    message_id: MessageId,
    gate: &'a AdmissionGate,
    clients: &'a VendorClients,
    cache: &'a ResultCache,
}

/// Inline keyboard callback handler
///
/// # Errors
///
/// Returns an error if a Telegram API call fails.
pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    gate: Arc<AdmissionGate>,
    clients: Arc<VendorClients>,
    cache: Arc<ResultCache>,
) -> Result<()> {
    let Some(data) = q.data.clone() else {
        return Ok(());
    };
    let _ = bot.answer_callback_query(q.id.clone()).await;

    let Some(message) = q.message.as_ref() else {
        return Ok(());
    };
    let ctx = CallbackCtx {
        bot: &bot,
        chat_id: message.chat().id,
        message_id: message.id(),
        gate: &gate,
        clients: &clients,
        cache: &cache,
    };
    let user_id = q.from.id.0;

    match data.as_str() {
        "enhance_quality" => {
            ctx.bot
                .edit_message_text(
                    ctx.chat_id,
                    ctx.message_id,
                    "⬆️ <b>Choose Quality Enhancement Level:</b>",
                )
                .parse_mode(ParseMode::Html)
                .reply_markup(quality_keyboard())
                .await?;
        }
        "back_to_options" => {
            ctx.bot
                .edit_message_text(
                    ctx.chat_id,
                    ctx.message_id,
                    "📸 What would you like to do with your image?",
                )
                .reply_markup(options_keyboard(ctx.clients))
                .await?;
        }
        other => {
            if let Some(operation) = Operation::from_callback_data(other) {
                run_selected_operation(&ctx, user_id, operation).await?;
            } else {
                warn!("Unknown callback data from user {user_id}: {other}");
            }
        }
    }
    Ok(())
}

/// Record the selection, consume the pending job, and execute it.
async fn run_selected_operation(
    ctx: &CallbackCtx<'_>,
    user_id: u64,
    operation: Operation,
) -> Result<()> {
    if let Some(text) = service_unavailable(operation, ctx.clients) {
        ctx.bot
            .edit_message_text(ctx.chat_id, ctx.message_id, text)
            .await?;
        return Ok(());
    }

    if let Err(GateError::NoImagePending) = ctx.gate.select_operation(user_id, operation) {
        ctx.bot
            .edit_message_text(
                ctx.chat_id,
                ctx.message_id,
                "❌ Session expired. Please send a new image.",
            )
            .await?;
        return Ok(());
    }

    // One-shot: a racing duplicate tap gets None here and does nothing.
    let Some((image, operation)) = ctx.gate.consume_pending(user_id) else {
        return Ok(());
    };

    ctx.bot
        .edit_message_text(
            ctx.chat_id,
            ctx.message_id,
            format!(
                "{}...\nThis may take a few moments.",
                progress_label(operation)
            ),
        )
        .await?;

    if let Err(e) = execute_job(ctx, &image, operation).await {
        // Recoverable per request: report and leave the session clean. The
        // admitted slot stays spent; the vendor failure costs nothing extra.
        error!(
            "Operation {} failed for user {user_id}: {e:#}",
            operation.callback_data()
        );
        let _ = ctx
            .bot
            .edit_message_text(
                ctx.chat_id,
                ctx.message_id,
                "❌ Processing failed, please try again.",
            )
            .await;
    }
    Ok(())
}

/// Download, process (or reuse a cached result), and send the document back.
async fn execute_job(ctx: &CallbackCtx<'_>, image: &ImageRef, operation: Operation) -> Result<()> {
    let result = if let Some(cached) = ctx.cache.get(&image.file_id, operation).await {
        info!(
            "Result cache hit for {}:{}",
            image.file_id,
            operation.callback_data()
        );
        cached
    } else {
        let buffer = retry_telegram_operation(|| async {
            let file = ctx.bot.get_file(FileId(image.file_id.clone())).await?;
            let mut buf = Vec::new();
            ctx.bot.download_file(&file.path, &mut buf).await?;
            Ok(buf)
        })
        .await?;

        let processed = process(Bytes::from(buffer), operation, ctx.clients).await?;
        ctx.cache
            .insert(&image.file_id, operation, processed.clone())
            .await;
        processed
    };

    ctx.bot
        .send_document(
            ctx.chat_id,
            InputFile::memory(result).file_name(result_filename(operation)),
        )
        .caption(done_caption(operation))
        .await?;

    ctx.bot
        .edit_message_text(
            ctx.chat_id,
            ctx.message_id,
            format!("✅ <b>{}</b>", done_label(operation)),
        )
        .parse_mode(ParseMode::Html)
        .await?;
    Ok(())
}

/// Dispatch to the vendor API or local transform for this operation
async fn process(image: Bytes, operation: Operation, clients: &VendorClients) -> Result<Bytes> {
    match operation {
        Operation::RemoveBackground => {
            let client = clients
                .removebg
                .as_ref()
                .ok_or(VendorError::NotConfigured("Remove.bg"))?;
            Ok(client.remove_background(image).await?)
        }
        Operation::AiEdit => {
            let client = clients
                .photoroom
                .as_ref()
                .ok_or(VendorError::NotConfigured("PhotoRoom"))?;
            Ok(client.edit(image).await?)
        }
        Operation::EnhanceQuality(preset) => {
            Ok(imaging::enhance_quality(image, preset.width, preset.height).await?)
        }
        Operation::Wallpaper => Ok(imaging::to_wallpaper(image).await?),
    }
}

const fn service_unavailable(
    operation: Operation,
    clients: &VendorClients,
) -> Option<&'static str> {
    match operation {
        Operation::RemoveBackground if clients.removebg.is_none() => {
            Some("❌ Background removal service is not available.")
        }
        Operation::AiEdit if clients.photoroom.is_none() => {
            Some("❌ AI editing service is not available.")
        }
        _ => None,
    }
}

const fn progress_label(operation: Operation) -> &'static str {
    match operation {
        Operation::RemoveBackground => "🎯 Removing background",
        Operation::AiEdit => "🎨 Processing with AI",
        Operation::EnhanceQuality(_) => "⬆️ Enhancing quality",
        Operation::Wallpaper => "🖼 Converting to wallpaper",
    }
}

fn done_label(operation: Operation) -> String {
    match operation {
        Operation::RemoveBackground => "Background removal completed!".to_string(),
        Operation::AiEdit => "AI editing completed!".to_string(),
        Operation::EnhanceQuality(preset) => {
            format!("Quality enhanced to {}!", preset.label)
        }
        Operation::Wallpaper => "Wallpaper conversion completed!".to_string(),
    }
}

fn done_caption(operation: Operation) -> String {
    match operation {
        Operation::RemoveBackground => "✅ Background removed successfully!".to_string(),
        Operation::AiEdit => "✅ AI editing completed successfully!".to_string(),
        Operation::EnhanceQuality(preset) => {
            format!("✅ Enhanced to {} successfully!", preset.label)
        }
        Operation::Wallpaper => "✅ Wallpaper conversion completed successfully!".to_string(),
    }
}

fn result_filename(operation: Operation) -> String {
    match operation {
        Operation::RemoveBackground => "background_removed.png".to_string(),
        Operation::AiEdit => "ai_edited.png".to_string(),
        Operation::EnhanceQuality(preset) => {
            format!("enhanced_{}.png", preset.key.to_lowercase())
        }
        Operation::Wallpaper => "wallpaper.png".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::quality_preset;
    use crate::vendors::{PhotoRoomClient, RemoveBgClient};

    fn clients(photoroom: bool, removebg: bool) -> VendorClients {
        VendorClients {
            photoroom: photoroom.then(|| PhotoRoomClient::new("http://localhost", "key")),
            removebg: removebg.then(|| RemoveBgClient::new("http://localhost", "key")),
        }
    }

    fn callback_data(keyboard: &InlineKeyboardMarkup) -> Vec<String> {
        keyboard
            .inline_keyboard
            .iter()
            .flatten()
            .filter_map(|button| match &button.kind {
                teloxide::types::InlineKeyboardButtonKind::CallbackData(data) => {
                    Some(data.clone())
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_options_keyboard_hides_unconfigured_vendors() {
        let data = callback_data(&options_keyboard(&clients(false, false)));
        assert_eq!(data, vec!["enhance_quality", "wallpaper"]);

        let data = callback_data(&options_keyboard(&clients(true, true)));
        assert_eq!(
            data,
            vec!["remove_bg", "ai_edit", "enhance_quality", "wallpaper"]
        );
    }

    #[test]
    fn test_quality_keyboard_covers_all_presets() {
        let data = callback_data(&quality_keyboard());
        assert_eq!(
            data,
            vec![
                "quality_HD",
                "quality_1080p",
                "quality_4K",
                "quality_8K",
                "back_to_options"
            ]
        );

        // Every button except Back parses into an operation.
        for entry in &data[..data.len() - 1] {
            assert!(Operation::from_callback_data(entry).is_some());
        }
    }

    #[test]
    fn test_service_unavailable_only_for_missing_vendor() {
        let only_local = clients(false, false);
        assert!(service_unavailable(Operation::RemoveBackground, &only_local).is_some());
        assert!(service_unavailable(Operation::AiEdit, &only_local).is_some());
        assert!(service_unavailable(Operation::Wallpaper, &only_local).is_none());

        let full = clients(true, true);
        assert!(service_unavailable(Operation::RemoveBackground, &full).is_none());
        assert!(service_unavailable(Operation::AiEdit, &full).is_none());
    }

    #[test]
    fn test_format_retry_after() {
        assert_eq!(format_retry_after(Duration::from_secs(0)), "1s");
        assert_eq!(format_retry_after(Duration::from_secs(35)), "35s");
        assert_eq!(format_retry_after(Duration::from_secs(119)), "119s");
        assert_eq!(format_retry_after(Duration::from_secs(121)), "3 min");
        assert_eq!(format_retry_after(Duration::from_secs(3600)), "60 min");
    }

    #[test]
    fn test_result_filenames() {
        let preset = quality_preset("4K").expect("preset");
        assert_eq!(
            result_filename(Operation::EnhanceQuality(preset)),
            "enhanced_4k.png"
        );
        assert_eq!(
            result_filename(Operation::RemoveBackground),
            "background_removed.png"
        );
        assert_eq!(result_filename(Operation::Wallpaper), "wallpaper.png");
    }
}
