//! Telegram Bot API client
//!
//! Rich-text messages use HTML parse mode with link previews disabled; the
//! API wraps results in an `ok`/`result` envelope.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::config::TelegramConfig;
use crate::delivery::{InlineKeyboard, Messenger, SentMessage};
use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

pub struct TelegramClient {
    client: Client,
    base_url: String,
    bot_token: String,
}

impl TelegramClient {
    pub fn new(config: &TelegramConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: config.base_url.clone(),
            bot_token: config.bot_token.clone(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.bot_token, method)
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<T> {
        let response = self
            .client
            .post(self.method_url(method))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Messaging(format!("{} request failed: {}", method, e)))?;

        let envelope: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| Error::Messaging(format!("{} response: {}", method, e)))?;

        if !envelope.ok {
            return Err(Error::Messaging(format!(
                "{} rejected: {}",
                method,
                envelope.description.unwrap_or_else(|| "no description".into())
            )));
        }

        envelope
            .result
            .ok_or_else(|| Error::Messaging(format!("{} returned no result", method)))
    }
}

#[async_trait]
impl Messenger for TelegramClient {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        markup: Option<&InlineKeyboard>,
    ) -> Result<SentMessage> {
        debug!(chat_id, len = text.len(), "Sending message");

        let mut body = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
            "link_preview_options": { "is_disabled": true },
        });
        if let Some(markup) = markup {
            body["reply_markup"] = serde_json::to_value(markup)?;
        }

        self.call("sendMessage", body).await
    }

    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        markup: Option<&InlineKeyboard>,
    ) -> Result<()> {
        debug!(chat_id, message_id, "Editing message");

        let mut body = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": text,
            "parse_mode": "HTML",
            "link_preview_options": { "is_disabled": true },
        });
        if let Some(markup) = markup {
            body["reply_markup"] = serde_json::to_value(markup)?;
        }

        // editMessageText returns the edited message; we only need success
        let _: serde_json::Value = self.call("editMessageText", body).await?;
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str, text: &str) -> Result<()> {
        let body = json!({
            "callback_query_id": callback_id,
            "text": text,
        });
        let _: serde_json::Value = self.call("answerCallbackQuery", body).await?;
        Ok(())
    }
}
