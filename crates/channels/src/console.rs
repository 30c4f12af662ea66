//! Console platform: interactive terminal chat.
//!
//! Reads lines from stdin and writes replies to stdout. Every line is a
//! direct message from the local user, so free-form text always reaches
//! the conversation handler. Used by `seedkeeper dev`, which stops once
//! [`ConsolePlatform::closed`] reports that the user left.

use async_trait::async_trait;
use chrono::Utc;
use seedkeeper_core::error::PlatformError;
use seedkeeper_core::platform::PlatformStream;
use seedkeeper_core::{HistoryMessage, Platform, PlatformMessage};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};

const CHANNEL_ID: &str = "console";
const LOCAL_USER: &str = "local_user";
const BOT_USER: &str = "seedkeeper";

pub struct ConsolePlatform {
    history: Arc<crate::ChannelHistory>,
    next_id: Arc<AtomicU64>,
    closed: Arc<watch::Sender<bool>>,
}

impl ConsolePlatform {
    pub fn new() -> Self {
        Self {
            history: Arc::new(crate::ChannelHistory::new(1000)),
            next_id: Arc::new(AtomicU64::new(1)),
            closed: Arc::new(watch::channel(false).0),
        }
    }

    /// Flips to `true` once the user types `exit` or closes stdin.
    pub fn closed(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    fn line_to_message(line: String, id: u64) -> PlatformMessage {
        PlatformMessage {
            message_id: id.to_string(),
            channel_id: CHANNEL_ID.into(),
            guild_id: None,
            author_id: LOCAL_USER.into(),
            author_name: Some("You".into()),
            author_is_bot: false,
            is_direct_message: true,
            mentions_bot: false,
            content: line,
            channel_topic: None,
            reply_to: None,
            timestamp: Utc::now(),
        }
    }
}

impl Default for ConsolePlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Platform for ConsolePlatform {
    fn name(&self) -> &str {
        "console"
    }

    fn bot_user_id(&self) -> Option<String> {
        Some(BOT_USER.into())
    }

    async fn connect(&self) -> Result<PlatformStream, PlatformError> {
        let (tx, rx) = mpsc::channel(32);
        let history = self.history.clone();
        let next_id = self.next_id.clone();
        let closed = self.closed.clone();

        tokio::spawn(async move {
            let reader = BufReader::new(io::stdin());
            let mut lines = reader.lines();

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim().to_string();
                        if line.is_empty() {
                            continue;
                        }
                        if matches!(line.as_str(), "exit" | "quit" | "/exit" | "/quit" | ":q") {
                            break;
                        }

                        let msg = Self::line_to_message(line, next_id.fetch_add(1, Ordering::Relaxed));
                        history.record(
                            CHANNEL_ID,
                            HistoryMessage {
                                id: msg.message_id.clone(),
                                author: "You".into(),
                                author_id: LOCAL_USER.into(),
                                content: msg.content.clone(),
                                timestamp: msg.timestamp,
                            },
                        );
                        if tx.send(Ok(msg)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break, // EOF (Ctrl+D)
                    Err(e) => {
                        let _ = tx.send(Err(PlatformError::ConnectionLost(e.to_string()))).await;
                        break;
                    }
                }
            }
            closed.send_replace(true);
        });

        Ok(rx)
    }

    async fn send(
        &self,
        channel_id: &str,
        content: &str,
        _reply_to: Option<&str>,
    ) -> Result<(), PlatformError> {
        self.history.record(
            channel_id,
            HistoryMessage {
                id: self.next_id.fetch_add(1, Ordering::Relaxed).to_string(),
                author: "Seedkeeper".into(),
                author_id: BOT_USER.into(),
                content: content.to_string(),
                timestamp: Utc::now(),
            },
        );
        println!("\n🌱 {content}\n");
        Ok(())
    }

    async fn fetch_history(
        &self,
        channel_id: &str,
        after_message_id: &str,
        limit: usize,
    ) -> Result<Vec<HistoryMessage>, PlatformError> {
        self.history
            .after(channel_id, after_message_id, limit, Some(BOT_USER))
    }
}
