//! Telegram update handlers
//!
//! Commands, text messages and file uploads. Every path that reaches the
//! model ends with a message to the user, even when something failed.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tracing::{error, info, warn};

use crate::conversational::ConversationService;
use crate::error::RelayError;
use crate::models::Attachment;
use crate::telegram::client::BotApi;
use crate::telegram::markdown::{
    chunk_text, escape_markdown_v2, split_markdown_v2, MESSAGE_CHUNK_CHARS,
};
use crate::telegram::types::{BotCommand, InlineKeyboardMarkup, Message, Update};
use crate::Result;

/// Document types the model proxy can analyse
pub const SUPPORTED_MIME_TYPES: &[&str] = &["image/jpeg", "image/png", "application/pdf", "text/plain"];

pub const DEFAULT_FILE_PROMPT: &str =
    "Describe this file and explain what it shows or what it contains.";

const WELCOME_TEXT: &str = "👋 Hi! I'm the Gemini Proxy Bot, focused on analysing text and files.\n\
Ask me a question or attach a photo/document (PDF, TXT) with a question to analyse it!";

const HELP_TEXT: &str = "📘 Commands:\n\
/start — get started\n\
/help — list commands\n\
/reset — clear the conversation history\n\
/app — open the Web App\n\n\
💬 In groups, mention me with @ to get an answer. I remember the context of the last few messages.\n\
🖼️ Analysis: send a photo or a document (PDF, TXT) with a caption that mentions me to have it analysed.";

const WEB_APP_BUTTON: &str = "📱 Open Web App";
const THINKING_TEXT: &str = "⌛ Thinking...";
const MENTION_NUDGE: &str = "💬 Ask your question right after mentioning me!";

/// Everything a handler needs, shared across concurrent updates
pub struct BotContext {
    pub api: BotApi,
    pub conversations: ConversationService,
    /// Bot username without the leading `@`
    pub username: String,
    pub webapp_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Reset,
    App,
}

/// File attached to a message, as far as the bot is concerned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileChoice {
    Supported { file_id: String, mime_type: String },
    Unsupported { mime_type: String },
    None,
}

/// Commands shown in the private-chat menu
pub fn bot_commands() -> Vec<BotCommand> {
    [
        ("start", "Start working with the bot"),
        ("help", "Show the list of commands"),
        ("reset", "Clear the conversation history"),
        ("app", "Open the Web App"),
    ]
    .into_iter()
    .map(|(command, description)| BotCommand {
        command: command.to_string(),
        description: description.to_string(),
    })
    .collect()
}

/// Parse `/cmd` or `/cmd@botname`. Commands addressed to another bot and
/// unknown commands yield `None`.
pub fn parse_command(text: &str, username: &str) -> Option<Command> {
    let token = text.split_whitespace().next()?.strip_prefix('/')?;

    let (name, target) = match token.split_once('@') {
        Some((name, target)) => (name, Some(target)),
        None => (token, None),
    };

    if let Some(target) = target {
        if !target.eq_ignore_ascii_case(username) {
            return None;
        }
    }

    match name.to_ascii_lowercase().as_str() {
        "start" => Some(Command::Start),
        "help" => Some(Command::Help),
        "reset" => Some(Command::Reset),
        "app" => Some(Command::App),
        _ => None,
    }
}

/// Remove every `@username` mention, ignoring case. Returns `None` when the
/// text does not mention the bot at all.
pub fn strip_mention(text: &str, username: &str) -> Option<String> {
    let needle = format!("@{}", username.to_ascii_lowercase());
    // ASCII lowercasing keeps byte offsets aligned with `text`
    let haystack = text.to_ascii_lowercase();

    if !haystack.contains(&needle) {
        return None;
    }

    let mut stripped = String::with_capacity(text.len());
    let mut last = 0;
    for (idx, _) in haystack.match_indices(&needle) {
        stripped.push_str(&text[last..idx]);
        last = idx + needle.len();
    }
    stripped.push_str(&text[last..]);

    Some(stripped.trim().to_string())
}

/// Pick the file to analyse: the largest photo size, or a document
pub fn select_file(message: &Message) -> FileChoice {
    if let Some(largest) = message.photo.as_ref().and_then(|sizes| sizes.last()) {
        return FileChoice::Supported {
            file_id: largest.file_id.clone(),
            mime_type: "image/jpeg".to_string(),
        };
    }

    match &message.document {
        Some(document) => {
            let mime_type = document.mime_type.clone().unwrap_or_default();
            if SUPPORTED_MIME_TYPES.contains(&mime_type.as_str()) {
                FileChoice::Supported {
                    file_id: document.file_id.clone(),
                    mime_type,
                }
            } else {
                FileChoice::Unsupported { mime_type }
            }
        }
        None => FileChoice::None,
    }
}

/// Route one update to its handler, logging anything that fails
pub async fn handle_update(ctx: &BotContext, update: Update) {
    let Some(message) = update.message else {
        return;
    };

    let chat_id = message.chat.id;
    let result = if message.photo.is_some() || message.document.is_some() {
        handle_files(ctx, &message).await
    } else if let Some(text) = message.text.as_deref() {
        if text.starts_with('/') {
            match parse_command(text, &ctx.username) {
                Some(command) => handle_command(ctx, &message, command).await,
                None => Ok(()),
            }
        } else {
            handle_text(ctx, &message, text).await
        }
    } else {
        Ok(())
    };

    if let Err(e) = result {
        error!(chat_id, update_id = update.update_id, "Failed to handle update: {}", e);
    }
}

pub async fn handle_command(ctx: &BotContext, message: &Message, command: Command) -> Result<()> {
    let chat_id = message.chat.id;
    info!(chat_id, ?command, "Handling command");

    match command {
        Command::Start => {
            ctx.api.send_message(chat_id, WELCOME_TEXT, None, None).await?;
        }
        Command::Help => {
            let markup = InlineKeyboardMarkup::web_app_button(WEB_APP_BUTTON, &ctx.webapp_url);
            ctx.api
                .send_message(chat_id, HELP_TEXT, None, Some(&markup))
                .await?;
        }
        Command::Reset => {
            let text = if ctx.conversations.reset(&chat_id.to_string()).await {
                "✅ The conversation history has been cleared. Start a new conversation."
            } else {
                "⚠️ The conversation history is already empty."
            };
            ctx.api.send_message(chat_id, text, None, None).await?;
        }
        Command::App => {
            let markup = InlineKeyboardMarkup::web_app_button(WEB_APP_BUTTON, &ctx.webapp_url);
            ctx.api
                .send_message(
                    chat_id,
                    "Open the Web App for convenient work with Gemini AI:",
                    None,
                    Some(&markup),
                )
                .await?;
        }
    }

    Ok(())
}

pub async fn handle_text(ctx: &BotContext, message: &Message, text: &str) -> Result<()> {
    let chat_id = message.chat.id;
    let is_group = message.chat.is_group();

    // Groups only get an answer when the bot is mentioned
    let prompt = if is_group {
        match strip_mention(text, &ctx.username) {
            Some(prompt) => prompt,
            None => return Ok(()),
        }
    } else {
        text.to_string()
    };

    if prompt.is_empty() {
        if is_group {
            ctx.api.send_message(chat_id, MENTION_NUDGE, None, None).await?;
        }
        return Ok(());
    }

    send_typing(ctx, chat_id).await;
    let status = ctx.api.send_message(chat_id, THINKING_TEXT, None, None).await?;

    let answer = match ctx.conversations.chat(&chat_id.to_string(), &prompt).await {
        Ok(answer) => answer,
        Err(e) => {
            warn!(chat_id, "Model call failed, sending error text: {}", e);
            e.user_message()
        }
    };

    deliver_answer(ctx, chat_id, status.message_id, &answer).await
}

pub async fn handle_files(ctx: &BotContext, message: &Message) -> Result<()> {
    let chat_id = message.chat.id;
    let caption = message
        .caption
        .as_deref()
        .or(message.text.as_deref())
        .unwrap_or_default();

    let prompt = if message.chat.is_group() {
        match strip_mention(caption, &ctx.username) {
            Some(prompt) => prompt,
            None => return Ok(()),
        }
    } else {
        caption.trim().to_string()
    };

    let (file_id, mime_type) = match select_file(message) {
        FileChoice::Supported { file_id, mime_type } => (file_id, mime_type),
        FileChoice::Unsupported { mime_type } => {
            let shown = if mime_type.is_empty() { "unknown" } else { mime_type.as_str() };
            let text = format!(
                "Sorry, I can't process files of type `{}`. Only images, PDF and TXT are supported.",
                shown
            );
            ctx.api.send_message(chat_id, &text, None, None).await?;
            return Ok(());
        }
        FileChoice::None => return Ok(()),
    };

    let prompt = if prompt.is_empty() {
        DEFAULT_FILE_PROMPT.to_string()
    } else {
        prompt
    };

    send_typing(ctx, chat_id).await;
    let status = ctx
        .api
        .send_message(
            chat_id,
            &format!("1️⃣ Downloading and analysing your file ({})...", mime_type),
            None,
            None,
        )
        .await?;

    match analyze_file(ctx, chat_id, status.message_id, &file_id, &mime_type, &prompt).await {
        Ok(answer) => deliver_answer(ctx, chat_id, status.message_id, &answer).await,
        Err(e) => {
            error!(chat_id, "File handling error: {}", e);
            let text = format!("❌ An error occurred while processing the file. Details: {}", e);
            if ctx
                .api
                .edit_message_text(chat_id, status.message_id, &text, None)
                .await
                .is_err()
            {
                ctx.api.send_message(chat_id, &text, None, None).await?;
            }
            Ok(())
        }
    }
}

async fn analyze_file(
    ctx: &BotContext,
    chat_id: i64,
    status_id: i64,
    file_id: &str,
    mime_type: &str,
    prompt: &str,
) -> Result<String> {
    let bytes = ctx.api.download_file(file_id).await.map_err(|e| match e {
        RelayError::DownloadError(_) => e,
        other => RelayError::DownloadError(other.to_string()),
    })?;

    info!(chat_id, mime_type, bytes = bytes.len(), "Downloaded file for analysis");
    let attachment = Attachment::new(mime_type, STANDARD.encode(&bytes));

    send_typing(ctx, chat_id).await;
    if let Err(e) = ctx
        .api
        .edit_message_text(chat_id, status_id, "2️⃣ Analysing the file with Gemini...", None)
        .await
    {
        warn!(chat_id, "Could not update status message: {}", e);
    }

    // Uploads never share the rolling text history
    let answer = match ctx.conversations.analyze_file(prompt, &attachment).await {
        Ok(answer) => answer,
        Err(e) => {
            warn!(chat_id, "Model call failed, sending error text: {}", e);
            e.user_message()
        }
    };

    Ok(answer)
}

/// Replace the status message with the formatted answer.
///
/// Falls back to chunked MarkdownV2 messages. If a chunk is rejected, the
/// raw text of that chunk and the ones after it is sent without formatting.
pub async fn deliver_answer(ctx: &BotContext, chat_id: i64, status_id: i64, answer: &str) -> Result<()> {
    let escaped = escape_markdown_v2(answer);

    let Err(edit_error) = ctx
        .api
        .edit_message_text(chat_id, status_id, &escaped, Some("MarkdownV2"))
        .await
    else {
        return Ok(());
    };

    warn!(chat_id, "MarkdownV2 edit failed, sending in chunks: {}", edit_error);

    let chunks = split_markdown_v2(answer, MESSAGE_CHUNK_CHARS);
    for (idx, chunk) in chunks.iter().enumerate() {
        if let Err(e) = ctx
            .api
            .send_message(chat_id, &chunk.formatted, Some("MarkdownV2"), None)
            .await
        {
            error!(chat_id, chunk = idx, "MarkdownV2 reply failed, sending plain text: {}", e);
            let undelivered: String = chunks[idx..].iter().map(|c| c.plain.as_str()).collect();
            let plain = format!(
                "❌ Sorry, a formatting error occurred. Here is the text without formatting:\n\n{}",
                undelivered
            );
            for piece in chunk_text(&plain, MESSAGE_CHUNK_CHARS) {
                ctx.api.send_message(chat_id, &piece, None, None).await?;
            }
            break;
        }
    }

    Ok(())
}

async fn send_typing(ctx: &BotContext, chat_id: i64) {
    if let Err(e) = ctx.api.send_chat_action(chat_id, "typing").await {
        warn!(chat_id, "sendChatAction failed: {}", e);
    }
}
