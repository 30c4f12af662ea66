//! `!config [key] [value]`: view or change the run-time bot configuration.

use crate::bot_config::{ConfigUpdateError, readable_key};
use crate::context::WorkerContext;
use crate::handler::{Category, CommandHandler, HandlerDescriptor, Invocation, Reply};
use async_trait::async_trait;
use seedkeeper_core::{Error, Result};
use std::sync::Arc;
use tracing::info;

pub struct ConfigHandler {
    descriptor: HandlerDescriptor,
}

pub fn factory() -> Arc<dyn CommandHandler> {
    Arc::new(ConfigHandler {
        descriptor: HandlerDescriptor {
            usage: "[key] [value]",
            summary: "View or update bot configuration",
            admin_only: true,
            ..HandlerDescriptor::new("config", Category::Keepers)
        },
    })
}

#[async_trait]
impl CommandHandler for ConfigHandler {
    fn descriptor(&self) -> &HandlerDescriptor {
        &self.descriptor
    }

    async fn handle(&self, inv: &Invocation, ctx: &WorkerContext) -> Result<Reply> {
        let args = inv.args.trim();
        if args.is_empty() {
            let mut text = String::from("🌱 **Garden Configuration**\n\n");
            for (key, value) in ctx.bot_config.entries().await {
                text.push_str(&format!("- **{}**: {value}\n", readable_key(&key)));
            }
            text.push_str("\n*To change: `!config [key] [value]`*");
            return Ok(Reply::Text(text));
        }

        let (key, value) = match args.split_once(char::is_whitespace) {
            Some((key, value)) => (key.to_lowercase(), value.trim()),
            None => (args.to_lowercase(), ""),
        };

        if value.is_empty() {
            return Ok(Reply::Text(match ctx.bot_config.value(&key).await {
                Some(current) => format!("**{key}**: {current}"),
                None => ConfigUpdateError::UnknownKey(key).to_string(),
            }));
        }

        let shown = match ctx.bot_config.set(&key, value, inv.author_id()).await {
            Ok(shown) => shown,
            Err(ConfigUpdateError::Storage(e)) => return Err(Error::Memory(e)),
            Err(e) => return Ok(Reply::Text(e.to_string())),
        };

        if key == "disabled_commands" {
            let table = ctx.registry.rebuild(ctx.bot_config.disabled_commands().await);
            info!(version = table.version, "Handler table rebuilt for disabled commands");
        }

        Ok(Reply::Text(format!(
            "✨ Configuration updated\n**{key}** is now: {shown}\n\n*The Garden adapts to your tending.*"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::{MockProvider, harness, invocation};
    use crate::table::Resolution;

    #[tokio::test]
    async fn shows_every_key() {
        let h = harness(MockProvider::replying("unused"));
        let reply = factory()
            .handle(&invocation("config", "", "900", true), &h.ctx)
            .await
            .unwrap();
        let Reply::Text(text) = reply else {
            panic!("expected text");
        };
        assert!(text.contains("- **Max Catchup Messages**: 100"));
        assert!(text.contains("- **Disabled Commands**: none"));
    }

    #[tokio::test]
    async fn updates_and_rejects() {
        let h = harness(MockProvider::replying("unused"));
        let handler = factory();

        let updated = handler
            .handle(&invocation("config", "max_catchup_messages 250", "900", true), &h.ctx)
            .await
            .unwrap();
        assert!(matches!(updated, Reply::Text(t) if t.contains("**max_catchup_messages** is now: 250")));
        assert_eq!(h.ctx.bot_config.get().await.max_catchup_messages, 250);

        let unknown = handler
            .handle(&invocation("config", "colour green", "900", true), &h.ctx)
            .await
            .unwrap();
        assert_eq!(unknown, Reply::text("Configuration key 'colour' not found."));

        let wrong_type = handler
            .handle(&invocation("config", "allow_dm_commands maybe", "900", true), &h.ctx)
            .await
            .unwrap();
        assert!(matches!(wrong_type, Reply::Text(t) if t.starts_with("Invalid value for allow_dm_commands")));
        assert!(h.ctx.bot_config.get().await.allow_dm_commands);
    }

    #[tokio::test]
    async fn disabling_a_command_takes_effect_at_once() {
        let h = harness(MockProvider::replying("unused"));
        factory()
            .handle(&invocation("config", "disabled_commands seeds, tend", "900", true), &h.ctx)
            .await
            .unwrap();

        let event = crate::handlers::test_support::event("42", "!seeds", false);
        assert!(matches!(
            h.ctx.registry.current().resolve(&event, '!'),
            Resolution::Disabled(name) if name == "seeds"
        ));
    }
}
