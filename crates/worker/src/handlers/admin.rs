//! `!admin add|remove|list`: managing garden keepers.

use super::split_subcommand;
use crate::context::WorkerContext;
use crate::handler::{Category, CommandHandler, HandlerDescriptor, Invocation, Reply};
use crate::keepers::{Removal, parse_user_mention};
use async_trait::async_trait;
use seedkeeper_core::Result;
use std::sync::Arc;

const HELP: &str = "🌿 **Garden Keeper Commands**\n\n\
    - `!admin add @user` - Grant Garden Keeper powers\n\
    - `!admin remove @user` - Remove Garden Keeper powers\n\
    - `!admin list` - List all Garden Keepers\n\
    - `!config` - View bot configuration\n\
    - `!config [key] [value]` - Update configuration\n\
    - `!reload` - Reload commands, voice, and perspectives\n\
    - `!status` - Show worker status and statistics\n\n\
    *With great gardens come great responsibility* 🌱";

pub struct AdminHandler {
    descriptor: HandlerDescriptor,
}

pub fn factory() -> Arc<dyn CommandHandler> {
    Arc::new(AdminHandler {
        descriptor: HandlerDescriptor {
            usage: "<add|remove|list> [@user]",
            summary: "Manage Garden Keepers",
            admin_only: true,
            ..HandlerDescriptor::new("admin", Category::Keepers)
        },
    })
}

#[async_trait]
impl CommandHandler for AdminHandler {
    fn descriptor(&self) -> &HandlerDescriptor {
        &self.descriptor
    }

    async fn handle(&self, inv: &Invocation, ctx: &WorkerContext) -> Result<Reply> {
        let (sub, rest) = split_subcommand(&inv.args);
        let target = parse_user_mention(rest);

        let text = match (sub.as_str(), target) {
            ("list", _) => {
                let keepers = ctx.keepers.list().await;
                if keepers.is_empty() {
                    "*The Garden tends itself for now - no Keepers have been named.*".to_string()
                } else {
                    let lines: String = keepers.iter().map(|id| format!("- <@{id}>\n")).collect();
                    format!(
                        "🌿 **Garden Keepers**\n\n{lines}\n*These souls help tend The Garden with special care.*"
                    )
                }
            }
            ("add", Some(user_id)) => {
                if ctx.keepers.add(&user_id, inv.author_id()).await? {
                    format!(
                        "🌱 <@{user_id}> has been entrusted with Garden Keeper responsibilities.\n\
                         *May they tend The Garden with wisdom and care.*"
                    )
                } else {
                    format!("<@{user_id}> is already a Garden Keeper.")
                }
            }
            ("add", None) => {
                "Please mention a user or provide their ID to add as Garden Keeper.".to_string()
            }
            ("remove", Some(user_id)) => match ctx.keepers.remove(&user_id, inv.author_id()).await? {
                Removal::Removed => format!(
                    "🍂 <@{user_id}>'s Garden Keeper role has returned to the soil.\n\
                     *Their contributions remain part of The Garden's memory.*"
                ),
                Removal::NotAdmin => format!("<@{user_id}> is not a Garden Keeper."),
                Removal::Bootstrap => format!(
                    "<@{user_id}> is a founding Garden Keeper; that can only change in the configuration file."
                ),
            },
            ("remove", None) => {
                "Please mention a user or provide their ID to remove from Garden Keepers."
                    .to_string()
            }
            _ => HELP.to_string(),
        };
        Ok(Reply::Text(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::{MockProvider, harness, invocation};

    #[tokio::test]
    async fn add_list_remove() {
        let h = harness(MockProvider::replying("unused"));
        let handler = factory();

        let added = handler
            .handle(&invocation("admin", "add <@!77>", "900", true), &h.ctx)
            .await
            .unwrap();
        assert!(matches!(added, Reply::Text(t) if t.starts_with("🌱 <@77> has been entrusted")));
        assert!(h.ctx.keepers.is_admin("77").await);

        let again = handler
            .handle(&invocation("admin", "add 77", "900", true), &h.ctx)
            .await
            .unwrap();
        assert_eq!(again, Reply::text("<@77> is already a Garden Keeper."));

        let list = handler
            .handle(&invocation("admin", "list", "900", true), &h.ctx)
            .await
            .unwrap();
        assert!(matches!(&list, Reply::Text(t) if t.contains("- <@77>") && t.contains("- <@900>")));

        let removed = handler
            .handle(&invocation("admin", "remove <@77>", "900", true), &h.ctx)
            .await
            .unwrap();
        assert!(matches!(removed, Reply::Text(t) if t.starts_with("🍂 <@77>")));
        assert!(!h.ctx.keepers.is_admin("77").await);
    }

    #[tokio::test]
    async fn bootstrap_keepers_stay() {
        let h = harness(MockProvider::replying("unused"));
        let reply = factory()
            .handle(&invocation("admin", "remove 900", "900", true), &h.ctx)
            .await
            .unwrap();
        assert!(matches!(reply, Reply::Text(t) if t.contains("founding Garden Keeper")));
        assert!(h.ctx.keepers.is_admin("900").await);
    }

    #[tokio::test]
    async fn missing_target_is_explained() {
        let h = harness(MockProvider::replying("unused"));
        let reply = factory()
            .handle(&invocation("admin", "add someone", "900", true), &h.ctx)
            .await
            .unwrap();
        assert_eq!(
            reply,
            Reply::text("Please mention a user or provide their ID to add as Garden Keeper.")
        );
    }
}
