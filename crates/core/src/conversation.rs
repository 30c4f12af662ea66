//! Conversation domain types.
//!
//! A conversation is identified by a [`ConversationKey`]: the channel it
//! happens in plus whether that channel is a direct message. Turns are
//! append-only within a key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The role of a turn's author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The community member
    User,
    /// The bot
    Assistant,
}

/// A single turn in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,

    pub text: String,

    pub timestamp: DateTime<Utc>,

    /// Display name of the author, when known (guild channels carry several users)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
}

impl ConversationTurn {
    /// Create a user turn stamped now.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            timestamp: Utc::now(),
            author_name: None,
        }
    }

    /// Create an assistant turn stamped now.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            timestamp: Utc::now(),
            author_name: None,
        }
    }

    pub fn with_author(mut self, name: impl Into<String>) -> Self {
        self.author_name = Some(name.into());
        self
    }

    /// Truncate the text to at most `max_chars` characters.
    pub fn truncated(mut self, max_chars: usize) -> Self {
        if self.text.chars().count() > max_chars {
            self.text = self.text.chars().take(max_chars).collect();
        }
        self
    }
}

/// Isolation unit for memory.
///
/// A direct-message key and a guild-channel key never compare equal, and
/// every cache tier derives its storage key from the full value, so the two
/// can never alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationKey {
    pub channel_id: String,
    pub is_direct_message: bool,
}

impl ConversationKey {
    pub fn direct(channel_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            is_direct_message: true,
        }
    }

    pub fn channel(channel_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            is_direct_message: false,
        }
    }

    /// Broker key for this conversation of `user_id` at `tier`:
    /// `conversation:{user}:{dm|ch}:{channel}:{tier}`.
    pub fn storage_key(&self, user_id: &str, tier: &str) -> String {
        format!("{}{self}:{tier}", Self::user_prefix(user_id))
    }

    /// Prefix shared by every broker key belonging to `user_id`.
    pub fn user_prefix(user_id: &str) -> String {
        format!("conversation:{user_id}:")
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_direct_message { "dm" } else { "ch" };
        write!(f, "{kind}:{}", self.channel_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dm_and_channel_keys_never_alias() {
        let dm = ConversationKey::direct("42");
        let ch = ConversationKey::channel("42");
        assert_ne!(dm, ch);
        assert_ne!(dm.storage_key("u1", "medium"), ch.storage_key("u1", "medium"));
    }

    #[test]
    fn storage_key_layout() {
        let key = ConversationKey::channel("900");
        assert_eq!(key.storage_key("7", "medium"), "conversation:7:ch:900:medium");
        assert!(key.storage_key("7", "medium").starts_with(&ConversationKey::user_prefix("7")));
    }

    #[test]
    fn truncation_counts_chars_not_bytes() {
        let turn = ConversationTurn::user("🌱🌱🌱🌱").truncated(2);
        assert_eq!(turn.text, "🌱🌱");
    }

    #[test]
    fn turn_serialization() {
        let turn = ConversationTurn::assistant("hello").with_author("Seedkeeper");
        let json = serde_json::to_string(&turn).unwrap();
        assert!(json.contains("\"assistant\""));
        assert!(json.contains("Seedkeeper"));
    }
}
