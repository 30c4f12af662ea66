//! `!catchup <link> [focus]`: summarise a channel from a message onwards.
//!
//! The worker holds no platform connection, so the history comes from the
//! gateway: a `fetch_history` action goes out on the response channel and
//! the gateway writes the result to `messages_response:{request_id}`, which
//! this handler polls until `fetch_timeout_secs` runs out.

use super::truncate_chars;
use crate::context::WorkerContext;
use crate::handler::{Category, CommandHandler, HandlerDescriptor, Invocation, Reply};
use crate::rate_limit::RateClass;
use async_trait::async_trait;
use regex_lite::Regex;
use seedkeeper_core::event::history_response_key;
use seedkeeper_core::{
    ChatMessage, HistoryMessage, ModelChoice, OutboundAction, Result, SystemBlock,
};
use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const CONVERSATION_CHARS: usize = 4000;
const FOCUS_CHARS: usize = 100;

const USAGE: &str = "**Catchup Command**\n\n\
    Usage: `!catchup [message_link] [optional_focus]`\n\n\
    I'll summarize the conversation from that message onwards.\n\n\
    Example: `!catchup https://discord.com/channels/...`\n\
    With focus: `!catchup [link] consciousness`";

const SYSTEM: &str = "You are Seedkeeper, helping community members catch up on conversations they missed.\n\n\
    Your role is to provide clear, practical summaries that help people quickly understand:\n\
    - Who was involved in the conversation\n\
    - What topics were discussed\n\
    - Any important decisions or outcomes\n\
    - The overall mood and highlights\n\n\
    Be warm and conversational, but focus on being genuinely helpful rather than philosophical.\n\
    Use bullet points for clarity. Mention specific usernames when relevant.\n\
    Think of yourself as a friendly community member who took notes for someone who stepped away.";

static MESSAGE_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://(?:www\.|ptb\.|canary\.)?discord(?:app)?\.com/channels/(\d+)/(\d+)/(\d+)")
        .expect("link pattern compiles")
});

const DESCRIPTOR: HandlerDescriptor = HandlerDescriptor {
    usage: "<message link> [focus]",
    summary: "Summarize a conversation from a message onwards",
    rate_class: Some(RateClass::Catchup),
    route: Some(ModelChoice::Deep),
    ..HandlerDescriptor::new("catchup", Category::General)
};

pub struct CatchupHandler {
    descriptor: HandlerDescriptor,
}

pub fn factory() -> Arc<dyn CommandHandler> {
    Arc::new(CatchupHandler {
        descriptor: DESCRIPTOR,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageLink {
    pub guild_id: String,
    pub channel_id: String,
    pub message_id: String,
}

pub fn parse_link(raw: &str) -> Option<MessageLink> {
    let caps = MESSAGE_LINK.captures(raw.trim())?;
    Some(MessageLink {
        guild_id: caps.get(1)?.as_str().to_string(),
        channel_id: caps.get(2)?.as_str().to_string(),
        message_id: caps.get(3)?.as_str().to_string(),
    })
}

/// Keep words and light punctuation, collapse whitespace, cap the length.
pub fn sanitize_focus(raw: &str) -> String {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || "-'.,?!&".contains(*c))
        .collect();
    let collapsed = kept.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(FOCUS_CHARS).collect()
}

enum Fetched {
    Messages(Vec<HistoryMessage>),
    Unavailable,
    TimedOut,
}

fn transcript(messages: &[HistoryMessage]) -> String {
    let mut out = String::new();
    for m in messages.iter().filter(|m| !m.content.trim().is_empty()) {
        out.push_str(&format!(
            "[{}] {}: {}\n",
            m.timestamp.format("%H:%M"),
            m.author,
            m.content
        ));
    }
    out
}

fn fallback_summary(messages: &[HistoryMessage]) -> String {
    let participants: BTreeSet<&str> = messages.iter().map(|m| m.author.as_str()).collect();
    format!(
        "Conversation with {} participants and {} messages. Unable to generate detailed summary.",
        participants.len(),
        messages.len()
    )
}

impl CatchupHandler {
    async fn fetch(&self, inv: &Invocation, ctx: &WorkerContext, link: &MessageLink) -> Result<Fetched> {
        let limit = ctx.bot_config.get().await.max_catchup_messages;
        let request_id = uuid::Uuid::new_v4().simple().to_string();
        let key = history_response_key(&request_id);

        ctx.publish(
            &inv.correlation_id,
            OutboundAction::FetchHistory {
                request_id: request_id.clone(),
                channel_id: link.channel_id.clone(),
                after_message_id: link.message_id.clone(),
                limit,
            },
        )
        .await?;
        ctx.typing(inv).await;

        let deadline = Instant::now() + Duration::from_secs(ctx.config.worker.fetch_timeout_secs);
        loop {
            match ctx.broker.get(&key).await {
                Ok(Some(raw)) => {
                    if let Err(e) = ctx.broker.delete(&key).await {
                        debug!(key, error = %e, "History response not deleted; it expires by TTL");
                    }
                    return Ok(
                        match serde_json::from_str::<Option<Vec<HistoryMessage>>>(&raw) {
                            Ok(Some(messages)) => Fetched::Messages(messages),
                            Ok(None) => Fetched::Unavailable,
                            Err(e) => {
                                warn!(key, error = %e, "History response unreadable");
                                Fetched::Unavailable
                            }
                        },
                    );
                }
                Ok(None) => {}
                Err(e) => warn!(key, error = %e, "History poll failed"),
            }
            if Instant::now() >= deadline {
                return Ok(Fetched::TimedOut);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl CommandHandler for CatchupHandler {
    fn descriptor(&self) -> &HandlerDescriptor {
        &self.descriptor
    }

    async fn handle(&self, inv: &Invocation, ctx: &WorkerContext) -> Result<Reply> {
        let args = inv.args.trim();
        if args.is_empty() {
            return Ok(Reply::text(USAGE));
        }

        let (raw_link, focus) = match args.split_once(char::is_whitespace) {
            Some((link, focus)) => (link, Some(sanitize_focus(focus))),
            None => (args, None),
        };
        let focus = focus.filter(|f| !f.is_empty());

        let Some(link) = parse_link(raw_link) else {
            return Ok(Reply::text(
                "Invalid message link format. Please use a Discord message URL.",
            ));
        };
        if !inv.event.is_direct_message && inv.event.guild_id.as_deref() != Some(link.guild_id.as_str()) {
            return Ok(Reply::text(
                "You can only catch up on conversations from this server.",
            ));
        }

        let messages = match self.fetch(inv, ctx, &link).await? {
            Fetched::Messages(messages) => messages,
            Fetched::Unavailable => return Ok(Reply::text("Could not access that channel.")),
            Fetched::TimedOut => {
                warn!(correlation_id = %inv.correlation_id, channel_id = %link.channel_id, "History fetch timed out");
                return Ok(Reply::text(
                    "The gateway didn't bring those messages back in time. Please try again in a moment. 🌱",
                ));
            }
        };
        if messages.is_empty() {
            return Ok(Reply::text("No messages found after that point."));
        }

        let channel_context = inv
            .event
            .channel_topic
            .as_deref()
            .map(|t| format!("This channel's topic: {t}\n\n"))
            .unwrap_or_default();
        let about = focus
            .as_deref()
            .map(|f| format!(", particularly about: {f}"))
            .unwrap_or_default();
        let conversation: String = transcript(&messages).chars().take(CONVERSATION_CHARS).collect();
        let prompt = format!(
            "{channel_context}A community member returns and needs to catch up on what they missed{about}\n\n\
             Please provide a practical summary with:\n\
             - Key topics discussed (as bullet points)\n\
             - Who talked about what (mention specific users)\n\
             - Any important decisions or outcomes\n\
             - Notable moments or highlights\n\n\
             Keep it conversational but informative - help them quickly understand what happened.\n\n\
             The conversation:\n{conversation}"
        );

        let mut request = ctx.backend.request(
            vec![SystemBlock {
                text: SYSTEM.to_string(),
                cache: true,
            }],
            vec![ChatMessage::user(prompt)],
        );
        request.max_tokens = 800;
        request.temperature = 0.7;

        let choice = ctx.route(Some(self.descriptor.name), args, inv.event.is_direct_message);
        ctx.typing(inv).await;
        let summary = match ctx.call_backend(inv, choice, request).await {
            Ok(reply) if !reply.response.text.trim().is_empty() => {
                reply.response.text.trim().to_string()
            }
            Ok(_) => fallback_summary(&messages),
            Err(e) => {
                warn!(correlation_id = %inv.correlation_id, error = %e, "Catchup summary failed");
                fallback_summary(&messages)
            }
        };

        info!(
            correlation_id = %inv.correlation_id,
            channel_id = %link.channel_id,
            messages = messages.len(),
            focused = focus.is_some(),
            "Catchup summarised"
        );

        let mut text = String::from("🌱 **Conversation Catchup**\n\n");
        if let Some(focus) = &focus {
            text.push_str(&format!("*Focusing on: {}*\n\n", truncate_chars(focus, FOCUS_CHARS)));
        }
        text.push_str(&summary);
        text.push_str(&format!("\n\n*Caught up on {} messages* 🍃", messages.len()));
        Ok(Reply::Text(text))
    }
}
