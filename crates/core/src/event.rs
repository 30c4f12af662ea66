//! Pipeline envelopes: what the Gateway enqueues, what the Worker publishes
//! back, and what workers announce on the heartbeat channel.
//!
//! All of these cross a process boundary through the broker, so they are
//! plain serde records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conversation::ConversationKey;

/// The message being replied to, when the platform reports one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyContext {
    pub message_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// One inbound platform event. Immutable once enqueued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Source-assigned unique id (the platform message id)
    pub event_id: String,

    pub channel_id: String,

    /// Guild (server) the channel belongs to; `None` for direct messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<String>,

    pub author_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,

    pub is_direct_message: bool,

    /// Whether the bot was mentioned in the message
    #[serde(default)]
    pub mentions_bot: bool,

    pub raw_text: String,

    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_context: Option<ReplyContext>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_topic: Option<String>,
}

impl InboundEvent {
    /// The memory isolation key of this event.
    pub fn conversation_key(&self) -> ConversationKey {
        ConversationKey {
            channel_id: self.channel_id.clone(),
            is_direct_message: self.is_direct_message,
        }
    }

    /// Split a marker-prefixed message into `(command, args)`.
    ///
    /// The command token is lowercased; args keep their original case and
    /// are trimmed. Returns `None` for free-form text.
    pub fn command(&self, marker: char) -> Option<(String, String)> {
        let body = self.raw_text.trim_start().strip_prefix(marker)?;
        let mut parts = body.splitn(2, char::is_whitespace);
        let name = parts.next().unwrap_or_default().to_lowercase();
        if name.is_empty() {
            return None;
        }
        let args = parts.next().unwrap_or_default().trim().to_string();
        Some((name, args))
    }

    /// Number of whitespace-separated words in the message.
    pub fn word_count(&self) -> usize {
        self.raw_text.split_whitespace().count()
    }
}

/// Queue envelope around one [`InboundEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Matches the eventual [`ResponseEnvelope`]s to this item
    pub correlation_id: String,

    pub event: InboundEvent,

    pub enqueued_at: DateTime<Utc>,

    /// Delivery attempt, starting at 1; incremented by the broker on redelivery
    #[serde(default = "first_attempt")]
    pub attempt: u32,
}

fn first_attempt() -> u32 {
    1
}

impl WorkItem {
    pub fn new(event: InboundEvent) -> Self {
        Self {
            correlation_id: Uuid::new_v4().to_string(),
            event,
            enqueued_at: Utc::now(),
            attempt: first_attempt(),
        }
    }
}

/// An outbound platform call requested by a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundAction {
    /// Post text to a channel
    Message {
        channel_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to: Option<String>,
    },

    /// Show a typing indicator
    Typing { channel_id: String },

    /// React to a message
    Reaction {
        channel_id: String,
        message_id: String,
        emoji: String,
    },

    /// Fetch channel history after a message; the result is written to
    /// `messages_response:{request_id}` in the key/value store
    FetchHistory {
        request_id: String,
        channel_id: String,
        after_message_id: String,
        limit: usize,
    },
}

impl OutboundAction {
    pub fn message(channel_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Message {
            channel_id: channel_id.into(),
            content: content.into(),
            reply_to: None,
        }
    }
}

/// What a worker publishes on the response channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub correlation_id: String,
    pub action: OutboundAction,
    pub sent_at: DateTime<Utc>,
}

impl ResponseEnvelope {
    pub fn new(correlation_id: impl Into<String>, action: OutboundAction) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            action,
            sent_at: Utc::now(),
        }
    }
}

/// Key under which fetched history for `request_id` is stored.
pub fn history_response_key(request_id: &str) -> String {
    format!("messages_response:{request_id}")
}

/// One message of fetched channel history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub id: String,
    pub author: String,
    pub author_id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Worker liveness announcement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub worker_id: String,
    pub started_at: DateTime<Utc>,
    pub sent_at: DateTime<Utc>,
    pub in_flight: usize,
    pub processed: u64,
}

/// Key holding the gateway's [`GatewayStatus`].
pub const GATEWAY_STATUS_KEY: &str = "gateway:status";

/// Written by the gateway each time it (re)connects to the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayStatus {
    pub platform: String,

    /// The bot's own user id on the platform, used to strip self-mentions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_user_id: Option<String>,

    pub connected_at: DateTime<Utc>,

    /// Number of (re)connects since the gateway started
    pub connects: u64,
}
