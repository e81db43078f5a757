pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;

/// A text message received from the chat platform, normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    /// Message text, trimmed and never empty
    pub text: String,
    /// Chat the message came from, as a string
    pub chat_id: String,
    pub sender_is_bot: bool,
    /// Username, else first name, else last name, else "unknown"
    pub sender_name: String,
}

/// Outbound "send text to chat X" capability.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<()>;
}
