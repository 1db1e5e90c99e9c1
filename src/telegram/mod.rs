//! Telegram front-end
//!
//! Long-polls the Bot API and hands each update to its own task.

pub mod client;
pub mod handlers;
pub mod markdown;
pub mod types;

pub use client::BotApi;
pub use handlers::{bot_commands, handle_update, BotContext};

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::conversational::ConversationService;
use crate::error::RelayError;
use crate::Result;

/// Server-side long-poll window for getUpdates
const POLL_TIMEOUT_SECS: u64 = 30;
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

pub struct TelegramBot {
    ctx: Arc<BotContext>,
    error_backoff: Duration,
}

impl TelegramBot {
    /// Connect to the Bot API and register the command menu
    pub async fn connect(
        api: BotApi,
        conversations: ConversationService,
        webapp_url: impl Into<String>,
    ) -> Result<Self> {
        let me = api.get_me().await?;
        let username = me
            .username
            .ok_or_else(|| RelayError::TelegramError("getMe returned no username".to_string()))?;

        info!(bot = %username, "Connected to Telegram");

        if let Err(e) = api.set_my_commands(&bot_commands()).await {
            warn!("Could not register bot commands: {}", e);
        }

        Ok(Self {
            ctx: Arc::new(BotContext {
                api,
                conversations,
                username,
                webapp_url: webapp_url.into(),
            }),
            error_backoff: POLL_ERROR_BACKOFF,
        })
    }

    /// Pause after a failed getUpdates call
    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    pub fn username(&self) -> &str {
        &self.ctx.username
    }

    /// Poll for updates forever
    pub async fn run(&self) {
        info!("Telegram polling loop started");
        let mut offset: i64 = 0;

        loop {
            offset = self.poll_once(offset).await;
        }
    }

    /// Fetch one batch of updates, spawn a task per update and return the
    /// next offset. Failed polls keep the offset unchanged.
    pub async fn poll_once(&self, offset: i64) -> i64 {
        let updates = match self.ctx.api.get_updates(offset, POLL_TIMEOUT_SECS).await {
            Ok(updates) => updates,
            Err(RelayError::HttpError(e)) if e.is_timeout() => return offset,
            Err(e) => {
                warn!("Telegram getUpdates failed: {}", e);
                tokio::time::sleep(self.error_backoff).await;
                return offset;
            }
        };

        let mut next = offset;
        for update in updates {
            next = next.max(update.update_id + 1);
            debug!(update_id = update.update_id, "Dispatching update");

            let ctx = Arc::clone(&self.ctx);
            tokio::spawn(async move {
                handle_update(&ctx, update).await;
            });
        }

        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::gemini::{ModelGateway, RequestBuilder};
    use crate::memory::InMemoryHistoryStore;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn conversations() -> ConversationService {
        ConversationService::new(
            Arc::new(ModelGateway::new(GatewayConfig::default()).unwrap()),
            RequestBuilder::default(),
            Arc::new(InMemoryHistoryStore::new()),
            4,
        )
    }

    async fn connected_bot(server: &MockServer) -> TelegramBot {
        Mock::given(method("POST"))
            .and(path("/botTOKEN/getMe"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": {"id": 1, "is_bot": true, "first_name": "Relay", "username": "relay_bot"}
            })))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/setMyCommands"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": true})))
            .mount(server)
            .await;

        let api = BotApi::new(server.uri(), "TOKEN").unwrap();
        TelegramBot::connect(api, conversations(), "https://app.example")
            .await
            .unwrap()
            .with_error_backoff(Duration::from_millis(10))
    }

    async fn wait_for_calls(server: &MockServer, api_method: &str, count: usize) -> Vec<serde_json::Value> {
        let suffix = format!("/{}", api_method);
        for _ in 0..100 {
            let calls: Vec<serde_json::Value> = server
                .received_requests()
                .await
                .unwrap()
                .into_iter()
                .filter(|r| r.url.path().ends_with(&suffix))
                .map(|r| r.body_json().unwrap())
                .collect();
            if calls.len() >= count {
                return calls;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("{} was not called {} times", api_method, count);
    }

    #[test]
    fn test_command_menu() {
        let names: Vec<String> = bot_commands().into_iter().map(|c| c.command).collect();
        assert_eq!(names, vec!["start", "help", "reset", "app"]);
    }

    #[tokio::test]
    async fn test_connect_registers_commands() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/getMe"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": {"id": 1, "is_bot": true, "first_name": "Relay", "username": "relay_bot"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/setMyCommands"))
            .and(body_partial_json(json!({"scope": {"type": "all_private_chats"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": true})))
            .expect(1)
            .mount(&server)
            .await;

        let api = BotApi::new(server.uri(), "TOKEN").unwrap();
        let bot = TelegramBot::connect(api, conversations(), "https://app.example")
            .await
            .unwrap();

        assert_eq!(bot.username(), "relay_bot");
    }

    #[tokio::test]
    async fn test_connect_survives_command_registration_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/getMe"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": {"id": 1, "is_bot": true, "first_name": "Relay", "username": "relay_bot"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/setMyCommands"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "ok": false, "error_code": 500, "description": "Internal"
            })))
            .mount(&server)
            .await;

        let api = BotApi::new(server.uri(), "TOKEN").unwrap();
        let bot = tokio_test::assert_ok!(
            TelegramBot::connect(api, conversations(), "https://app.example").await
        );
        assert_eq!(bot.username(), "relay_bot");
    }

    #[tokio::test]
    async fn test_connect_fails_on_bad_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/getMe"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "ok": false, "error_code": 401, "description": "Unauthorized"
            })))
            .mount(&server)
            .await;

        let api = BotApi::new(server.uri(), "TOKEN").unwrap();
        let error = TelegramBot::connect(api, conversations(), "https://app.example")
            .await
            .err()
            .unwrap();

        assert!(error.to_string().contains("Unauthorized"));
    }

    #[tokio::test]
    async fn test_poll_advances_offset_and_dispatches_updates() {
        let server = MockServer::start().await;
        let bot = connected_bot(&server).await;

        Mock::given(method("POST"))
            .and(path("/botTOKEN/getUpdates"))
            .and(body_partial_json(json!({"offset": 0, "timeout": 30})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": [
                    {
                        "update_id": 41,
                        "message": {
                            "message_id": 1,
                            "chat": {"id": 77, "type": "private"},
                            "text": "/start"
                        }
                    },
                    {
                        "update_id": 42,
                        "message": {
                            "message_id": 2,
                            "chat": {"id": -5, "type": "group"},
                            "text": "not for the bot"
                        }
                    }
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendMessage"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": {"message_id": 9, "chat": {"id": 77, "type": "private"}}
            })))
            .mount(&server)
            .await;

        assert_eq!(bot.poll_once(0).await, 43);

        let sent = wait_for_calls(&server, "sendMessage", 1).await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["chat_id"], 77);
        assert!(sent[0]["text"].as_str().unwrap().contains("Hi!"));
    }

    #[tokio::test]
    async fn test_poll_without_updates_keeps_offset() {
        let server = MockServer::start().await;
        let bot = connected_bot(&server).await;

        Mock::given(method("POST"))
            .and(path("/botTOKEN/getUpdates"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": []})))
            .mount(&server)
            .await;

        assert_eq!(bot.poll_once(17).await, 17);
    }

    #[tokio::test]
    async fn test_failed_poll_keeps_offset() {
        let server = MockServer::start().await;
        let bot = connected_bot(&server).await;

        Mock::given(method("POST"))
            .and(path("/botTOKEN/getUpdates"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "ok": false, "error_code": 409, "description": "Conflict: terminated by other getUpdates request"
            })))
            .expect(1)
            .mount(&server)
            .await;

        assert_eq!(bot.poll_once(17).await, 17);
    }
}
