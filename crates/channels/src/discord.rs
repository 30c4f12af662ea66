//! Discord platform connection (stub).
//!
//! Implements the Platform trait for the Discord bot API. The live gateway
//! socket is not wired in; messages enter through [`DiscordPlatform::inject_message`]
//! and outbound calls are recorded so the bridge can be exercised end to end.

use async_trait::async_trait;
use chrono::Utc;
use seedkeeper_core::error::PlatformError;
use seedkeeper_core::platform::PlatformStream;
use seedkeeper_core::{HistoryMessage, Platform, PlatformMessage};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tracing::info;

/// Discord connection configuration.
#[derive(Clone)]
pub struct DiscordConfig {
    /// Bot token from the Discord Developer Portal
    pub bot_token: String,
    /// The bot's own user id, reported once connected
    pub bot_user_id: String,
    /// Messages kept per channel for history fetches
    pub history_per_channel: usize,
}

impl DiscordConfig {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            bot_user_id: "seedkeeper".into(),
            history_per_channel: 500,
        }
    }
}

impl std::fmt::Debug for DiscordConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordConfig")
            .field("bot_token", &"[REDACTED]")
            .field("bot_user_id", &self.bot_user_id)
            .field("history_per_channel", &self.history_per_channel)
            .finish()
    }
}

/// An outbound call the platform performed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Message {
        channel_id: String,
        content: String,
        reply_to: Option<String>,
    },
    Typing {
        channel_id: String,
    },
    Reaction {
        channel_id: String,
        message_id: String,
        emoji: String,
    },
}

pub struct DiscordPlatform {
    config: DiscordConfig,
    inject_tx: tokio::sync::Mutex<Option<mpsc::Sender<Result<PlatformMessage, PlatformError>>>>,
    history: crate::ChannelHistory,
    delivered: Mutex<Vec<Delivery>>,
    connects: AtomicUsize,
}

impl DiscordPlatform {
    pub fn new(config: DiscordConfig) -> Self {
        let history = crate::ChannelHistory::new(config.history_per_channel);
        Self {
            config,
            inject_tx: tokio::sync::Mutex::new(None),
            history,
            delivered: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
        }
    }

    /// Inject a message as if it came from Discord.
    pub async fn inject_message(&self, msg: PlatformMessage) -> Result<(), PlatformError> {
        self.history.record(
            &msg.channel_id,
            HistoryMessage {
                id: msg.message_id.clone(),
                author: msg.author_name.clone().unwrap_or_else(|| msg.author_id.clone()),
                author_id: msg.author_id.clone(),
                content: msg.content.clone(),
                timestamp: msg.timestamp,
            },
        );

        let guard = self.inject_tx.lock().await;
        if let Some(tx) = guard.as_ref() {
            tx.send(Ok(msg))
                .await
                .map_err(|_| PlatformError::ConnectionLost("Message channel closed".into()))
        } else {
            Err(PlatformError::ConnectionLost("Platform not connected".into()))
        }
    }

    /// Drop the live connection as if the socket closed.
    pub async fn drop_connection(&self) {
        info!("Discord connection dropped");
        *self.inject_tx.lock().await = None;
    }

    /// Number of successful `connect` calls so far.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::Relaxed)
    }

    pub async fn is_connected(&self) -> bool {
        self.inject_tx.lock().await.is_some()
    }

    /// Everything sent so far, in order.
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.delivered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Only the posted message bodies.
    pub fn sent_messages(&self) -> Vec<String> {
        self.deliveries()
            .into_iter()
            .filter_map(|d| match d {
                Delivery::Message { content, .. } => Some(content),
                _ => None,
            })
            .collect()
    }

    fn deliver(&self, delivery: Delivery) {
        self.delivered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(delivery);
    }
}

#[async_trait]
impl Platform for DiscordPlatform {
    fn name(&self) -> &str {
        "discord"
    }

    fn bot_user_id(&self) -> Option<String> {
        Some(self.config.bot_user_id.clone())
    }

    async fn connect(&self) -> Result<PlatformStream, PlatformError> {
        if self.config.bot_token.is_empty() {
            return Err(PlatformError::NotConfigured("Discord bot token is empty".into()));
        }
        info!("Discord platform connecting (stub mode)");
        let (tx, rx) = mpsc::channel(64);
        *self.inject_tx.lock().await = Some(tx);
        self.connects.fetch_add(1, Ordering::Relaxed);
        Ok(rx)
    }

    async fn send(
        &self,
        channel_id: &str,
        content: &str,
        reply_to: Option<&str>,
    ) -> Result<(), PlatformError> {
        info!(
            channel_id = %channel_id,
            reply_to = ?reply_to,
            content_len = content.len(),
            "Discord send (stub)"
        );
        self.history.record(
            channel_id,
            HistoryMessage {
                id: uuid::Uuid::new_v4().to_string(),
                author: "Seedkeeper".into(),
                author_id: self.config.bot_user_id.clone(),
                content: content.to_string(),
                timestamp: Utc::now(),
            },
        );
        self.deliver(Delivery::Message {
            channel_id: channel_id.to_string(),
            content: content.to_string(),
            reply_to: reply_to.map(str::to_string),
        });
        Ok(())
    }

    async fn send_typing(&self, channel_id: &str) -> Result<(), PlatformError> {
        self.deliver(Delivery::Typing {
            channel_id: channel_id.to_string(),
        });
        Ok(())
    }

    async fn add_reaction(
        &self,
        channel_id: &str,
        message_id: &str,
        emoji: &str,
    ) -> Result<(), PlatformError> {
        self.deliver(Delivery::Reaction {
            channel_id: channel_id.to_string(),
            message_id: message_id.to_string(),
            emoji: emoji.to_string(),
        });
        Ok(())
    }

    async fn fetch_history(
        &self,
        channel_id: &str,
        after_message_id: &str,
        limit: usize,
    ) -> Result<Vec<HistoryMessage>, PlatformError> {
        self.history.after(
            channel_id,
            after_message_id,
            limit,
            Some(&self.config.bot_user_id),
        )
    }

    async fn disconnect(&self) -> Result<(), PlatformError> {
        info!("Discord platform disconnecting");
        *self.inject_tx.lock().await = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str, content: &str) -> PlatformMessage {
        PlatformMessage {
            message_id: id.into(),
            channel_id: "garden".into(),
            guild_id: Some("guild1".into()),
            author_id: "user456".into(),
            author_name: Some("Bob".into()),
            author_is_bot: false,
            is_direct_message: false,
            mentions_bot: false,
            content: content.into(),
            channel_topic: None,
            reply_to: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn connect_inject_and_receive() {
        let platform = DiscordPlatform::new(DiscordConfig::new("test-discord-token"));
        let mut rx = platform.connect().await.unwrap();

        platform
            .inject_message(message("1", "Hey from Discord!"))
            .await
            .unwrap();
        let received = rx.recv().await.unwrap().unwrap();
        assert_eq!(received.content, "Hey from Discord!");
        assert_eq!(platform.connect_count(), 1);
    }

    #[tokio::test]
    async fn inject_before_connect_fails() {
        let platform = DiscordPlatform::new(DiscordConfig::new("t"));
        assert!(matches!(
            platform.inject_message(message("1", "hi")).await,
            Err(PlatformError::ConnectionLost(_))
        ));
    }

    #[tokio::test]
    async fn dropped_connection_closes_stream() {
        let platform = DiscordPlatform::new(DiscordConfig::new("t"));
        let mut rx = platform.connect().await.unwrap();
        platform.drop_connection().await;
        assert!(rx.recv().await.is_none());
        assert!(!platform.is_connected().await);
    }

    #[tokio::test]
    async fn empty_token_refuses_to_connect() {
        let platform = DiscordPlatform::new(DiscordConfig::new(""));
        assert!(matches!(
            platform.connect().await,
            Err(PlatformError::NotConfigured(_))
        ));
    }

    #[tokio::test]
    async fn history_excludes_bot_messages() {
        let platform = DiscordPlatform::new(DiscordConfig::new("t"));
        let _rx = platform.connect().await.unwrap();
        platform.inject_message(message("1", "first")).await.unwrap();
        platform.send("garden", "a reply", None).await.unwrap();
        platform.inject_message(message("2", "second")).await.unwrap();

        let history = platform.fetch_history("garden", "1", 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "second");
        assert_eq!(platform.sent_messages(), vec!["a reply".to_string()]);
    }
}
