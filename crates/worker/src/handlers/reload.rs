//! `!reload [status|list|<command>]`: hot-reload without dropping the
//! gateway connection.

use super::split_subcommand;
use crate::context::WorkerContext;
use crate::handler::{Category, CommandHandler, HandlerDescriptor, Invocation, Reply};
use async_trait::async_trait;
use seedkeeper_core::Result;
use std::sync::Arc;
use tracing::info;

pub struct ReloadHandler {
    descriptor: HandlerDescriptor,
}

pub fn factory() -> Arc<dyn CommandHandler> {
    Arc::new(ReloadHandler {
        descriptor: HandlerDescriptor {
            usage: "[status|list|<command>]",
            summary: "Reload commands, voice, and perspectives",
            admin_only: true,
            ..HandlerDescriptor::new("reload", Category::Keepers)
        },
    })
}

#[async_trait]
impl CommandHandler for ReloadHandler {
    fn descriptor(&self) -> &HandlerDescriptor {
        &self.descriptor
    }

    async fn handle(&self, inv: &Invocation, ctx: &WorkerContext) -> Result<Reply> {
        let (sub, _) = split_subcommand(&inv.args);
        let marker = ctx.config.worker.command_prefix;

        let text = match sub.as_str() {
            "" | "all" => {
                let report = ctx.reload().await;
                info!(
                    requested_by = %inv.author_id(),
                    version = report.version,
                    "Reload requested"
                );
                let disabled = if report.disabled.is_empty() {
                    "none".to_string()
                } else {
                    report.disabled.join(", ")
                };
                format!(
                    "🔄 **Reloaded**\n\
                     - Handler table: v{} ({} commands)\n\
                     - Disabled: {disabled}\n\
                     - Perspectives: {}\n\n\
                     *Fresh growth, same roots.* 🌱",
                    report.version, report.handlers, report.perspectives
                )
            }
            "status" => {
                let table = ctx.registry.current();
                format!(
                    "🔄 **Reload Status**\n\
                     - Handler table: v{} built {}\n\
                     - Reloads since start: {}\n\
                     - Commands: {} ({} disabled)",
                    table.version,
                    table.built_at.format("%Y-%m-%d %H:%M:%S UTC"),
                    ctx.registry.reload_count(),
                    table.len(),
                    table.disabled().len()
                )
            }
            "list" => {
                let table = ctx.registry.current();
                let names: Vec<String> = table.enabled().map(|d| format!("`{}`", d.name)).collect();
                format!("🔄 **Reloadable commands**\n{}", names.join(", "))
            }
            name => match ctx.registry.reload_command(name) {
                Some(table) => {
                    info!(requested_by = %inv.author_id(), command = name, version = table.version, "Command reloaded");
                    format!("🔄 `{marker}{name}` reloaded (handler table v{}).", table.version)
                }
                None => format!(
                    "Unknown command: `{marker}{name}` 🌱\nTry `{marker}reload list` to see what can be reloaded."
                ),
            },
        };
        Ok(Reply::Text(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::{MockProvider, harness, invocation};

    #[tokio::test]
    async fn full_reload_bumps_the_version() {
        let h = harness(MockProvider::replying("unused"));
        let before = h.ctx.registry.current().version;
        let reply = factory()
            .handle(&invocation("reload", "", "900", true), &h.ctx)
            .await
            .unwrap();
        assert!(matches!(reply, Reply::Text(t) if t.starts_with("🔄 **Reloaded**")));
        assert!(h.ctx.registry.current().version > before);
    }

    #[tokio::test]
    async fn single_command_reload() {
        let h = harness(MockProvider::replying("unused"));
        let handler = factory();
        let before = h.ctx.registry.current();

        let reply = handler
            .handle(&invocation("reload", "seeds", "900", true), &h.ctx)
            .await
            .unwrap();
        assert!(matches!(reply, Reply::Text(t) if t.starts_with("🔄 `!seeds` reloaded")));
        let after = h.ctx.registry.current();
        assert!(!Arc::ptr_eq(before.get("seeds").unwrap(), after.get("seeds").unwrap()));
        assert!(Arc::ptr_eq(before.get("tend").unwrap(), after.get("tend").unwrap()));

        let missing = handler
            .handle(&invocation("reload", "bloom", "900", true), &h.ctx)
            .await
            .unwrap();
        assert!(matches!(missing, Reply::Text(t) if t.starts_with("Unknown command: `!bloom`")));
    }
}
