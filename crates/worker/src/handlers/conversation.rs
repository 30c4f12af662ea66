//! Free-form conversation: DMs and messages that mention the bot.

use crate::context::WorkerContext;
use crate::handler::{Category, CommandHandler, HandlerDescriptor, Invocation, Reply};
use crate::rate_limit::RateClass;
use async_trait::async_trait;
use regex_lite::Regex;
use seedkeeper_core::{ConversationTurn, Result};
use seedkeeper_prompt::{CompileInput, SelectMode};
use std::sync::{Arc, LazyLock};
use tracing::{info, warn};

const EMPTY_MENTION: &str = "🌱 I'm here. What's on your mind?";
const TANGLED: &str =
    "I heard you, but my thoughts got tangled in the garden vines. Could you try again?";

static ANY_MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*<@!?\d+>\s*").expect("mention pattern compiles"));

// A leading roleplay action such as "*waves*" or "_smiles_".
static LEADING_EMOTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([*_])[^*_\n]+([*_])\s+").expect("emote pattern compiles"));

const DESCRIPTOR: HandlerDescriptor = HandlerDescriptor {
    summary: "Talk with me in a DM or by mentioning me",
    rate_class: Some(RateClass::Conversation),
    listed: false,
    ..HandlerDescriptor::new("conversation", Category::General)
};

pub struct ConversationHandler {
    descriptor: HandlerDescriptor,
}

pub fn factory() -> Arc<dyn CommandHandler> {
    Arc::new(ConversationHandler {
        descriptor: DESCRIPTOR,
    })
}

/// Remove the bot's own mention (anywhere) and a leading emote.
pub fn clean_message(raw: &str, bot_user_id: Option<&str>) -> String {
    let text = match bot_user_id {
        Some(id) => raw
            .replace(&format!("<@{id}>"), "")
            .replace(&format!("<@!{id}>"), ""),
        None => ANY_MENTION.replace(raw, "").into_owned(),
    };
    let text = text.trim();
    let text = match LEADING_EMOTE.find(text) {
        Some(m) if m.end() < text.len() => &text[m.end()..],
        _ => text,
    };
    text.trim().to_string()
}

#[async_trait]
impl CommandHandler for ConversationHandler {
    fn descriptor(&self) -> &HandlerDescriptor {
        &self.descriptor
    }

    async fn handle(&self, inv: &Invocation, ctx: &WorkerContext) -> Result<Reply> {
        let bot_id = ctx.bot_user_id().await;
        let text = clean_message(&inv.args, bot_id.as_deref());
        if text.is_empty() {
            return Ok(Reply::text(EMPTY_MENTION));
        }

        let user_id = inv.author_id();
        let key = inv.event.conversation_key();
        let history = ctx
            .memory
            .recent(user_id, &key, ctx.config.memory.history_limit)
            .await
            .unwrap_or_else(|e| {
                warn!(user_id, error = %e, "Conversation history unreadable; answering without it");
                Vec::new()
            });

        let compiled = ctx.compiler.compile(&CompileInput {
            mode: SelectMode::Sampled(ctx.config.perspectives.sample_count),
            channel_topic: inv.event.channel_topic.as_deref(),
            history: &history,
            author_name: Some(inv.author_name()),
            ..CompileInput::new(&text)
        });

        let choice = ctx.route(None, &text, inv.event.is_direct_message);
        let request = ctx
            .backend
            .request(compiled.system_blocks(), compiled.messages.clone());

        ctx.typing(inv).await;
        let reply = ctx.call_backend(inv, choice, request).await?;

        let answer = match reply.response.text.trim() {
            "" => TANGLED.to_string(),
            answer => answer.to_string(),
        };

        let user_turn = ConversationTurn::user(text.as_str()).with_author(inv.author_name());
        for turn in [user_turn, ConversationTurn::assistant(answer.as_str())] {
            if let Err(e) = ctx.memory.append(user_id, &key, turn).await {
                warn!(user_id, error = %e, "Conversation turn not recorded");
                break;
            }
        }

        info!(
            correlation_id = %inv.correlation_id,
            user_id,
            model = %reply.choice,
            retried = reply.retried,
            history = history.len(),
            prompt_tokens = compiled.total_tokens,
            cache_read = reply.response.usage.read_cache(),
            "Conversation reply"
        );
        Ok(Reply::Text(answer))
    }
}
