//! Platform trait: the abstraction over the chat platform connection.
//!
//! A Platform owns the single live connection to the event source. It yields
//! inbound messages and performs outbound calls on behalf of the Gateway.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PlatformError;
use crate::event::{HistoryMessage, ReplyContext};

/// A message received from the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformMessage {
    /// Platform-assigned message id
    pub message_id: String,

    pub channel_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<String>,

    pub author_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,

    #[serde(default)]
    pub author_is_bot: bool,

    pub is_direct_message: bool,

    #[serde(default)]
    pub mentions_bot: bool,

    pub content: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_topic: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplyContext>,

    pub timestamp: DateTime<Utc>,
}

/// Inbound message stream. An `Err` item or a closed stream means the
/// connection dropped.
pub type PlatformStream =
    tokio::sync::mpsc::Receiver<std::result::Result<PlatformMessage, PlatformError>>;

/// The core Platform trait.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Human-readable platform name (e.g., "discord", "console").
    fn name(&self) -> &str;

    /// The bot's own user id, once connected.
    fn bot_user_id(&self) -> Option<String>;

    /// Open the connection and start yielding messages.
    async fn connect(&self) -> std::result::Result<PlatformStream, PlatformError>;

    /// Post a message to a channel.
    async fn send(
        &self,
        channel_id: &str,
        content: &str,
        reply_to: Option<&str>,
    ) -> std::result::Result<(), PlatformError>;

    /// Show a typing indicator (if the platform supports it).
    async fn send_typing(&self, _channel_id: &str) -> std::result::Result<(), PlatformError> {
        Ok(())
    }

    /// React to a message (if the platform supports it).
    async fn add_reaction(
        &self,
        _channel_id: &str,
        _message_id: &str,
        _emoji: &str,
    ) -> std::result::Result<(), PlatformError> {
        Ok(())
    }

    /// Messages posted after `after_message_id`, oldest first, excluding
    /// the bot's own.
    async fn fetch_history(
        &self,
        channel_id: &str,
        after_message_id: &str,
        limit: usize,
    ) -> std::result::Result<Vec<HistoryMessage>, PlatformError>;

    /// Close the connection gracefully.
    async fn disconnect(&self) -> std::result::Result<(), PlatformError> {
        Ok(())
    }
}
