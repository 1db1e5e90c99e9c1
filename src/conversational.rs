//! Conversational round-trips
//!
//! Shared by the Telegram bot and the HTTP API: load history, build the
//! request, call the gateway, remember the exchange.

use crate::config::AppConfig;
use crate::gemini::{GatewayError, ModelGateway, RequestBuilder};
use crate::memory::{HistoryStore, InMemoryHistoryStore};
use crate::models::{Attachment, Turn};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct ConversationService {
    gateway: Arc<ModelGateway>,
    builder: RequestBuilder,
    history: Arc<dyn HistoryStore>,
    window: usize,
}

impl ConversationService {
    pub fn new(
        gateway: Arc<ModelGateway>,
        builder: RequestBuilder,
        history: Arc<dyn HistoryStore>,
        window: usize,
    ) -> Self {
        Self {
            gateway,
            builder,
            history,
            window,
        }
    }

    /// Wire the gateway, builder and an in-memory store from configuration
    pub fn from_config(config: &AppConfig) -> crate::Result<Self> {
        let builder = RequestBuilder::new(config.gateway.system_instruction.clone());
        let gateway = ModelGateway::new(config.gateway.clone())?;

        Ok(Self::new(
            Arc::new(gateway),
            builder,
            Arc::new(InMemoryHistoryStore::new()),
            config.history_window,
        ))
    }

    /// Answer a text prompt within the rolling history of `key`.
    ///
    /// Only successful exchanges are remembered.
    pub async fn chat(&self, key: &str, prompt: &str) -> Result<String, GatewayError> {
        let history = self.history.get(key).await;
        let request = self.builder.build(prompt, &history, None);

        info!(
            conversation = key,
            history_turns = history.len(),
            "Handling conversational message"
        );

        let answer = self.gateway.send(&request).await?;

        self.history
            .append_and_trim(
                key,
                vec![Turn::user_text(prompt), Turn::model_text(answer.clone())],
                self.window,
            )
            .await;

        Ok(answer)
    }

    /// Analyse a file outside of any ongoing conversation
    pub async fn analyze_file(
        &self,
        prompt: &str,
        attachment: &Attachment,
    ) -> Result<String, GatewayError> {
        if !attachment.is_complete() {
            warn!("Attachment is missing its MIME type or data, sending prompt only");
        }

        info!(mime_type = %attachment.mime_type, "Handling file analysis");

        let request = self.builder.build(prompt, &[], Some(attachment));
        self.gateway.send(&request).await
    }

    /// Clear the history of `key`. Returns whether any history was known.
    pub async fn reset(&self, key: &str) -> bool {
        let existed = self.history.reset(key).await;
        info!(conversation = key, existed, "Conversation history reset");
        existed
    }

    pub async fn history(&self, key: &str) -> Vec<Turn> {
        self.history.get(key).await
    }

    pub async fn conversation_count(&self) -> usize {
        self.history.len().await
    }
}
