//! Minimal Telegram Bot API client over reqwest

use crate::error::RelayError;
use crate::telegram::types::{
    BotCommand, File, InlineKeyboardMarkup, Message, TelegramResponse, Update, User,
};
use crate::Result;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// Telegram refuses bot downloads above 20 MB
pub const MAX_DOWNLOAD_BYTES: usize = 20 * 1024 * 1024;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct BotApi {
    client: Client,
    base_url: String,
    token: String,
}

impl BotApi {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token, method)
    }

    async fn call<T, P>(&self, method: &str, payload: &P, timeout: Duration) -> Result<T>
    where
        T: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        debug!(method, "Calling Telegram Bot API");

        let response = self
            .client
            .post(self.method_url(method))
            .timeout(timeout)
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        let body: TelegramResponse<T> = response.json().await.map_err(|e| {
            RelayError::TelegramError(format!("{} returned unreadable body ({}): {}", method, status, e))
        })?;

        if !body.ok {
            return Err(RelayError::TelegramError(format!(
                "{} failed ({}): {}",
                method,
                body.error_code.unwrap_or(status.as_u16() as i64),
                body.description.unwrap_or_default()
            )));
        }

        body.result
            .ok_or_else(|| RelayError::TelegramError(format!("{} returned no result", method)))
    }

    pub async fn get_me(&self) -> Result<User> {
        self.call("getMe", &json!({}), REQUEST_TIMEOUT).await
    }

    /// Long-poll for updates starting at `offset`
    pub async fn get_updates(&self, offset: i64, poll_timeout_secs: u64) -> Result<Vec<Update>> {
        let payload = json!({
            "offset": offset,
            "timeout": poll_timeout_secs,
            "allowed_updates": ["message"],
        });
        // Server-side poll plus headroom
        let timeout = Duration::from_secs(poll_timeout_secs + 15);
        self.call("getUpdates", &payload, timeout).await
    }

    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        parse_mode: Option<&str>,
        reply_markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<Message> {
        let mut payload = json!({
            "chat_id": chat_id,
            "text": text,
        });
        if let Some(mode) = parse_mode {
            payload["parse_mode"] = json!(mode);
        }
        if let Some(markup) = reply_markup {
            payload["reply_markup"] = serde_json::to_value(markup)?;
        }
        self.call("sendMessage", &payload, REQUEST_TIMEOUT).await
    }

    pub async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        parse_mode: Option<&str>,
    ) -> Result<()> {
        let mut payload = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": text,
        });
        if let Some(mode) = parse_mode {
            payload["parse_mode"] = json!(mode);
        }
        // Result is the edited Message, or `true` for inline messages
        let _: Value = self.call("editMessageText", &payload, REQUEST_TIMEOUT).await?;
        Ok(())
    }

    pub async fn send_chat_action(&self, chat_id: i64, action: &str) -> Result<()> {
        let payload = json!({ "chat_id": chat_id, "action": action });
        let _: bool = self.call("sendChatAction", &payload, REQUEST_TIMEOUT).await?;
        Ok(())
    }

    /// Register the command menu shown in private chats
    pub async fn set_my_commands(&self, commands: &[BotCommand]) -> Result<()> {
        let payload = json!({
            "commands": commands,
            "scope": {"type": "all_private_chats"},
        });
        let _: bool = self.call("setMyCommands", &payload, REQUEST_TIMEOUT).await?;
        Ok(())
    }

    pub async fn get_file(&self, file_id: &str) -> Result<File> {
        self.call("getFile", &json!({ "file_id": file_id }), REQUEST_TIMEOUT)
            .await
    }

    /// Fetch a file's bytes by `file_id`
    pub async fn download_file(&self, file_id: &str) -> Result<Vec<u8>> {
        let file = self.get_file(file_id).await?;

        let file_path = file.file_path.ok_or_else(|| {
            RelayError::DownloadError("no file_path in getFile response".to_string())
        })?;

        if file.file_size.unwrap_or(0) as usize > MAX_DOWNLOAD_BYTES {
            return Err(RelayError::DownloadError(
                "file too large (max 20MB)".to_string(),
            ));
        }

        let url = format!("{}/file/bot{}/{}", self.base_url, self.token, file_path);
        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(60))
            .send()
            .await
            .map_err(|e| RelayError::DownloadError(format!("file download failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(RelayError::DownloadError(format!(
                "file download returned {}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| RelayError::DownloadError(format!("file read failed: {}", e)))?;

        if bytes.len() > MAX_DOWNLOAD_BYTES {
            return Err(RelayError::DownloadError(
                "file too large (max 20MB)".to_string(),
            ));
        }

        Ok(bytes.to_vec())
    }
}
