//! `!memory` and `!forgetme`.

use super::split_subcommand;
use crate::context::WorkerContext;
use crate::handler::{Category, CommandHandler, HandlerDescriptor, Invocation, Reply};
use async_trait::async_trait;
use seedkeeper_core::Result;
use seedkeeper_memory::MemoryStatus;
use std::sync::Arc;
use tracing::info;

const HELP: &str = "🧠 **Memory Commands**\n\
    `!memory status` - Check memory status\n\
    `!memory on` / `!memory off` - Turn memory on or off\n\
    `!memory clear` - Clear conversation history\n\
    `!forgetme` - Forget everything about you";

const FORGOTTEN: &str = "🌱 I've forgotten everything we've discussed. \
    We're starting fresh, like meeting for the first time.\n\n\
    *The garden gate swings open to new possibilities...*";

pub struct MemoryHandler {
    descriptor: HandlerDescriptor,
}

pub fn factory() -> Arc<dyn CommandHandler> {
    Arc::new(MemoryHandler {
        descriptor: HandlerDescriptor {
            usage: "[status|on|off|clear]",
            summary: "See or change what I remember about you",
            ..HandlerDescriptor::new("memory", Category::Memory)
        },
    })
}

pub struct ForgetMeHandler {
    descriptor: HandlerDescriptor,
}

pub fn forget_me() -> Arc<dyn CommandHandler> {
    Arc::new(ForgetMeHandler {
        descriptor: HandlerDescriptor {
            summary: "Erase every conversation I remember with you",
            ..HandlerDescriptor::new("forgetme", Category::Memory)
        },
    })
}

fn status_text(status: &MemoryStatus) -> String {
    let state = if status.enabled { "enabled" } else { "disabled" };
    let mut text = format!(
        "🧠 Memory is {state}\n\
         - Private (DM) memories: {}\n\
         - Public (channel) memories: {}\n\
         - Total: {}\n",
        status.dm_turns, status.channel_turns, status.total_turns
    );
    if let (Some(oldest), Some(newest)) = (status.oldest, status.newest) {
        text.push_str(&format!(
            "- Conversations: {} (from {} to {})\n",
            status.conversations,
            oldest.format("%Y-%m-%d"),
            newest.format("%Y-%m-%d")
        ));
    }
    text.push_str(
        "\n🔒 **Privacy:**\n\
         - In DMs: I can see both your private and public history\n\
         - In channels: I only see public channel conversations\n\
         - Your DM conversations never appear in public channels",
    );
    text
}

#[async_trait]
impl CommandHandler for MemoryHandler {
    fn descriptor(&self) -> &HandlerDescriptor {
        &self.descriptor
    }

    async fn handle(&self, inv: &Invocation, ctx: &WorkerContext) -> Result<Reply> {
        let user_id = inv.author_id();
        let (sub, _) = split_subcommand(&inv.args);

        let text = match sub.as_str() {
            "" | "status" => status_text(&ctx.memory.status(user_id).await?),
            "clear" => {
                ctx.memory.clear(user_id).await?;
                info!(user_id, "Memory cleared");
                "🌱 Memory cleared. Starting fresh!".to_string()
            }
            "on" | "enable" => {
                if ctx.memory.set_enabled(user_id, true).await? {
                    "🧠 Memory enabled! I'll remember our conversations to provide better context."
                        .to_string()
                } else {
                    "🧠 Memory is already on.".to_string()
                }
            }
            "off" | "disable" => {
                if ctx.memory.set_enabled(user_id, false).await? {
                    "🧠 Memory disabled. Our conversation history won't be saved anymore."
                        .to_string()
                } else {
                    "🧠 Memory is already off.".to_string()
                }
            }
            _ => HELP.to_string(),
        };
        Ok(Reply::Text(text))
    }
}

#[async_trait]
impl CommandHandler for ForgetMeHandler {
    fn descriptor(&self) -> &HandlerDescriptor {
        &self.descriptor
    }

    async fn handle(&self, inv: &Invocation, ctx: &WorkerContext) -> Result<Reply> {
        ctx.memory.clear(inv.author_id()).await?;
        info!(user_id = %inv.author_id(), "User asked to be forgotten");
        Ok(Reply::text(FORGOTTEN))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::{MockProvider, harness, invocation};
    use seedkeeper_core::{ConversationKey, ConversationTurn};

    #[tokio::test]
    async fn status_counts_remembered_turns() {
        let h = harness(MockProvider::replying("unused"));
        let key = ConversationKey::direct("dm-1");
        h.ctx.memory.append("42", &key, ConversationTurn::user("hi")).await.unwrap();
        h.ctx.memory.append("42", &key, ConversationTurn::assistant("hello")).await.unwrap();

        let reply = factory()
            .handle(&invocation("memory", "status", "42", false), &h.ctx)
            .await
            .unwrap();
        let Reply::Text(text) = reply else {
            panic!("expected text");
        };
        assert!(text.starts_with("🧠 Memory is enabled"));
        assert!(text.contains("Private (DM) memories: 2"));
        assert!(text.contains("Total: 2"));
    }

    #[tokio::test]
    async fn clear_empties_every_tier() {
        let h = harness(MockProvider::replying("unused"));
        let key = ConversationKey::channel("chan-1");
        h.ctx.memory.append("42", &key, ConversationTurn::user("remember me")).await.unwrap();
        assert_eq!(h.ctx.memory.read("42", &key).await.unwrap().len(), 1);

        let reply = factory()
            .handle(&invocation("memory", "clear", "42", false), &h.ctx)
            .await
            .unwrap();
        assert_eq!(reply, Reply::text("🌱 Memory cleared. Starting fresh!"));
        assert!(h.ctx.memory.read("42", &key).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn toggling_reports_changes() {
        let h = harness(MockProvider::replying("unused"));
        let handler = factory();
        let off = handler.handle(&invocation("memory", "off", "42", false), &h.ctx).await.unwrap();
        assert!(matches!(off, Reply::Text(t) if t.starts_with("🧠 Memory disabled")));
        let again = handler.handle(&invocation("memory", "OFF", "42", false), &h.ctx).await.unwrap();
        assert_eq!(again, Reply::text("🧠 Memory is already off."));
        assert!(!h.ctx.memory.is_enabled("42").await);
    }

    #[tokio::test]
    async fn forgetme_clears_the_caller_only() {
        let h = harness(MockProvider::replying("unused"));
        let key = ConversationKey::channel("chan-1");
        h.ctx.memory.append("42", &key, ConversationTurn::user("mine")).await.unwrap();
        h.ctx.memory.append("7", &key, ConversationTurn::user("theirs")).await.unwrap();

        forget_me()
            .handle(&invocation("forgetme", "", "42", false), &h.ctx)
            .await
            .unwrap();
        assert!(h.ctx.memory.read("42", &key).await.unwrap().is_empty());
        assert_eq!(h.ctx.memory.read("7", &key).await.unwrap().len(), 1);
    }
}
