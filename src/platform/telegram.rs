use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use teloxide::prelude::*;
use teloxide::types::Recipient;
use tracing::{debug, info};

use crate::platform::{Messenger, Update};

/// Telegram rejects messages longer than 4096 characters.
const MAX_MESSAGE_LEN: usize = 4000;

/// The subset of a Telegram update this service reads. Every field is
/// optional so that any JSON object is accepted as an update.
#[derive(Debug, Deserialize)]
pub struct RawUpdate {
    #[serde(default)]
    pub update_id: Option<i64>,
    #[serde(default)]
    pub message: Option<RawMessage>,
    #[serde(default)]
    pub edited_message: Option<RawMessage>,
}

#[derive(Debug, Deserialize)]
pub struct RawMessage {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub chat: Option<RawChat>,
    #[serde(default)]
    pub from: Option<RawUser>,
}

#[derive(Debug, Deserialize)]
pub struct RawChat {
    pub id: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct RawUser {
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

impl RawUpdate {
    pub fn parse(body: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(body)
    }

    /// Normalize into an [`Update`]. Returns `None` when there is no
    /// message or edited message carrying non-empty text.
    pub fn into_update(self) -> Option<Update> {
        let message = self.message.or(self.edited_message)?;

        let text = message.text.as_deref().map(str::trim).unwrap_or_default();
        if text.is_empty() {
            return None;
        }

        let chat_id = match message.chat?.id {
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
            _ => return None,
        };

        let sender_is_bot = message.from.as_ref().is_some_and(|u| u.is_bot);
        let sender_name = message
            .from
            .as_ref()
            .map(RawUser::display_name)
            .unwrap_or_else(|| "unknown".to_string());

        Some(Update {
            text: text.to_string(),
            chat_id,
            sender_is_bot,
            sender_name,
        })
    }
}

impl RawUser {
    fn display_name(&self) -> String {
        [&self.username, &self.first_name, &self.last_name]
            .into_iter()
            .flatten()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
            .unwrap_or("unknown")
            .to_string()
    }
}

/// Split long messages for Telegram's 4096 char limit
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + max_len).min(text.len());
        // Walk back to a valid UTF-8 char boundary so slicing doesn't panic
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        let actual_end = if end < text.len() {
            text[start..end]
                .rfind('\n')
                .or_else(|| text[start..end].rfind(' '))
                .map(|pos| start + pos + 1)
                .unwrap_or(end)
        } else {
            end
        };

        chunks.push(text[start..actual_end].to_string());
        start = actual_end;
    }

    chunks
}

/// Numeric identifiers address a chat directly, anything else is
/// treated as a public `@username`.
fn recipient(chat_id: &str) -> Recipient {
    match chat_id.parse::<i64>() {
        Ok(id) => Recipient::Id(ChatId(id)),
        Err(_) => Recipient::ChannelUsername(chat_id.to_string()),
    }
}

/// Sends plain-text messages through the Bot API.
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot_token: &str) -> Self {
        Self {
            bot: Bot::new(bot_token),
        }
    }

    #[cfg(test)]
    fn with_api_url(bot_token: &str, api_url: &str) -> Result<Self> {
        let url = reqwest::Url::parse(api_url).context("Invalid API URL")?;
        Ok(Self {
            bot: Bot::new(bot_token).set_api_url(url),
        })
    }
}

#[async_trait]
impl Messenger for TelegramMessenger {
    /// Long texts go out as several messages. Sending stops at the first
    /// failed chunk; chunks before it stay delivered.
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<()> {
        let chunks = split_message(text, MAX_MESSAGE_LEN);
        let total = chunks.len();
        for (index, chunk) in chunks.into_iter().enumerate() {
            self.bot
                .send_message(recipient(chat_id), chunk)
                .await
                .with_context(|| {
                    format!(
                        "Failed to send message to chat {} (chunk {}/{}, {} already delivered)",
                        chat_id,
                        index + 1,
                        total,
                        index
                    )
                })?;
        }
        debug!("Sent message to chat {}", chat_id);
        Ok(())
    }
}

/// Point Telegram's webhook at `{public_url}/webhook/{secret}`.
pub async fn register_webhook(
    bot_token: &str,
    public_url: &str,
    secret: Option<&str>,
) -> Result<()> {
    let url = webhook_url(public_url, secret)?;
    info!("Registering webhook at {}/webhook/…", public_url.trim_end_matches('/'));

    Bot::new(bot_token)
        .set_webhook(url)
        .await
        .context("Telegram rejected setWebhook")?;

    Ok(())
}

fn webhook_url(public_url: &str, secret: Option<&str>) -> Result<reqwest::Url> {
    let raw = format!(
        "{}/webhook/{}",
        public_url.trim_end_matches('/'),
        secret.unwrap_or_default()
    );
    reqwest::Url::parse(&raw).with_context(|| format!("Invalid public URL: {}", public_url))
}
