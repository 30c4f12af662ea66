//! `!commands` and the reply to commands nobody registered.

use crate::context::WorkerContext;
use crate::handler::{Category, CommandHandler, HandlerDescriptor, Invocation, Reply};
use async_trait::async_trait;
use seedkeeper_core::Result;
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct CommandsHandler {
    descriptor: HandlerDescriptor,
}

pub fn factory() -> Arc<dyn CommandHandler> {
    Arc::new(CommandsHandler {
        descriptor: HandlerDescriptor {
            aliases: &["help"],
            summary: "This list",
            ..HandlerDescriptor::new("commands", Category::General)
        },
    })
}

pub struct UnknownHandler {
    descriptor: HandlerDescriptor,
}

pub fn unknown() -> Arc<dyn CommandHandler> {
    Arc::new(UnknownHandler {
        descriptor: HandlerDescriptor {
            listed: false,
            ..HandlerDescriptor::new("unknown", Category::General)
        },
    })
}

#[async_trait]
impl CommandHandler for CommandsHandler {
    fn descriptor(&self) -> &HandlerDescriptor {
        &self.descriptor
    }

    async fn handle(&self, inv: &Invocation, ctx: &WorkerContext) -> Result<Reply> {
        let marker = ctx.config.worker.command_prefix;
        let table = ctx.registry.current();

        let mut groups: BTreeMap<Category, Vec<&HandlerDescriptor>> = BTreeMap::new();
        for d in table
            .enabled()
            .filter(|d| d.listed && (inv.is_admin || !d.admin_only))
        {
            groups.entry(d.category).or_default().push(d);
        }

        let mut text = String::from("🌱 **Seedkeeper Commands**\n");
        for (category, handlers) in groups {
            text.push_str(&format!("\n**{category}**\n"));
            for d in handlers {
                let usage = if d.usage.is_empty() {
                    String::new()
                } else {
                    format!(" {}", d.usage)
                };
                text.push_str(&format!("`{marker}{}{usage}` - {}\n", d.name, d.summary));
            }
        }
        text.push_str("\nYou can also talk with me directly: send a DM or mention me. 🍃");
        Ok(Reply::Text(text))
    }
}

#[async_trait]
impl CommandHandler for UnknownHandler {
    fn descriptor(&self) -> &HandlerDescriptor {
        &self.descriptor
    }

    async fn handle(&self, inv: &Invocation, ctx: &WorkerContext) -> Result<Reply> {
        let marker = ctx.config.worker.command_prefix;
        let command = inv.command.as_deref().unwrap_or_default();
        Ok(Reply::Text(format!(
            "Unknown command: `{marker}{command}` 🌱\nTry `{marker}commands` to see available commands."
        )))
    }
}
