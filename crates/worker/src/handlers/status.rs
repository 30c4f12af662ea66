//! `!status` (keepers) and `!health` (everyone).

use crate::context::WorkerContext;
use crate::handler::{Category, CommandHandler, HandlerDescriptor, Invocation, Reply};
use crate::usage::UsageBook;
use async_trait::async_trait;
use chrono::Utc;
use seedkeeper_core::{ModelChoice, Result};
use std::fmt::Write;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum View {
    Status,
    Health,
}

pub struct StatusHandler {
    view: View,
    descriptor: HandlerDescriptor,
}

pub fn status() -> Arc<dyn CommandHandler> {
    Arc::new(StatusHandler {
        view: View::Status,
        descriptor: HandlerDescriptor {
            summary: "Worker, broker, memory, and backend statistics",
            admin_only: true,
            ..HandlerDescriptor::new("status", Category::Keepers)
        },
    })
}

pub fn health() -> Arc<dyn CommandHandler> {
    Arc::new(StatusHandler {
        view: View::Health,
        descriptor: HandlerDescriptor {
            summary: "Check that I'm healthy",
            ..HandlerDescriptor::new("health", Category::General)
        },
    })
}

/// `3725` → `1h 2m 5s`.
pub fn format_uptime(secs: i64) -> String {
    let secs = secs.max(0);
    let (days, hours, minutes, seconds) = (
        secs / 86_400,
        secs % 86_400 / 3_600,
        secs % 3_600 / 60,
        secs % 60,
    );
    match (days, hours, minutes) {
        (0, 0, 0) => format!("{seconds}s"),
        (0, 0, _) => format!("{minutes}m {seconds}s"),
        (0, _, _) => format!("{hours}h {minutes}m {seconds}s"),
        _ => format!("{days}d {hours}h {minutes}m"),
    }
}

impl StatusHandler {
    async fn broker_line(ctx: &WorkerContext) -> String {
        match ctx.broker.health_check().await {
            Ok(true) => format!("{} (reachable)", ctx.broker.name()),
            Ok(false) => format!("{} (not responding)", ctx.broker.name()),
            Err(e) => {
                warn!(error = %e, "Broker health check failed");
                format!("{} (unreachable)", ctx.broker.name())
            }
        }
    }

    async fn health_text(&self, ctx: &WorkerContext) -> String {
        let stats = ctx.stats.snapshot();
        let perspectives = ctx.compiler.perspectives().stats();
        format!(
            "🌱 **Seedkeeper Health Status**\n\n\
             **System**\n\
             - Worker: online for {}\n\
             - Broker: {}\n\
             - Messages handled: {}\n\n\
             **Knowledge Base**\n\
             - Perspectives: {} Lightward views loaded\n\n\
             **Last Check**: {}\n\n\
             *Use `!commands` to see available commands*",
            format_uptime(stats.uptime_secs),
            Self::broker_line(ctx).await,
            stats.processed,
            perspectives.total,
            Utc::now().format("%H:%M UTC"),
        )
    }

    fn usage_line(ctx: &WorkerContext) -> String {
        let book = match ctx.usage.snapshot() {
            Ok(book) => book,
            Err(e) => {
                warn!(error = %e, "Usage ledger unavailable");
                return "unavailable".into();
            }
        };
        let now = Utc::now();
        let (today, month) = (book.day(now), book.recent(now, 30));
        let top_model = UsageBook::top(&book.models, 1)
            .first()
            .map_or("none", |(model, _)| *model)
            .to_string();
        let top_users = UsageBook::top(&book.users, 3)
            .iter()
            .map(|(user, tally)| format!("<@{user}> ({})", tally.calls))
            .collect::<Vec<_>>();
        format!(
            "{} calls today, {} in 30 days, {} lifetime ({} tokens); top model {top_model}; top users {}",
            today.calls,
            month.calls,
            book.lifetime.calls,
            book.lifetime.total_tokens(),
            if top_users.is_empty() {
                "none".to_string()
            } else {
                top_users.join(", ")
            }
        )
    }

    async fn status_text(&self, ctx: &WorkerContext) -> String {
        let stats = ctx.stats.snapshot();
        let tiers = ctx.memory.tier_stats();
        let backend = ctx.backend.stats();
        let perspectives = ctx.compiler.perspectives().stats();
        let table = ctx.registry.current();
        let keepers = ctx.keepers.list().await.len();
        let queued = ctx
            .broker
            .queue_len(&ctx.config.broker.work_queue)
            .await
            .map(|n| n.to_string())
            .unwrap_or_else(|e| {
                warn!(error = %e, "Queue length unavailable");
                "unknown".into()
            });
        let durable = ctx
            .memory
            .durable_stats()
            .map(|d| format!("{} users, {} turns", d.users, d.turns))
            .unwrap_or_else(|e| {
                warn!(error = %e, "Durable tier statistics unavailable");
                "unavailable".into()
            });

        let mut text = String::from("🔧 **Worker Status**\n");
        let _ = writeln!(text, "**Worker**: `{}`", ctx.worker_id);
        let _ = writeln!(text, "**Uptime**: {}", format_uptime(stats.uptime_secs));
        let _ = writeln!(
            text,
            "**Processed**: {} ({} failed, {} duplicates skipped)",
            stats.processed, stats.failed, stats.duplicates
        );
        let _ = writeln!(text, "**In flight**: {} of {}", stats.in_flight, ctx.config.worker.concurrency);
        let _ = writeln!(text, "**Queue**: {queued} waiting");
        let _ = writeln!(text, "**Broker**: {}", Self::broker_line(ctx).await);
        let _ = writeln!(
            text,
            "**Memory**: {}/{} cached conversations, {} local hits, {} medium hits, {} durable reads; {durable}",
            tiers.local_entries,
            tiers.local_capacity,
            tiers.local_hits,
            tiers.medium_hits,
            tiers.durable_reads
        );
        let _ = writeln!(
            text,
            "**Perspectives**: {} ({} core, {} extended, v{})",
            perspectives.total, perspectives.core, perspectives.extended, perspectives.version
        );
        let _ = writeln!(
            text,
            "**Backend**: {} via {} / {}; {} calls, {} failures, {} retries, {} timeouts, cache {} writes / {} reads",
            ctx.backend.provider_name(),
            ctx.backend.model_for(ModelChoice::Deep),
            ctx.backend.model_for(ModelChoice::Economical),
            backend.calls,
            backend.failures,
            backend.retries,
            backend.timeouts,
            backend.cache_writes,
            backend.cache_reads
        );
        let _ = writeln!(text, "**Usage**: {}", Self::usage_line(ctx));
        let _ = writeln!(
            text,
            "**Handlers**: table v{} with {} commands, {} reloads",
            table.version,
            table.len(),
            ctx.registry.reload_count()
        );
        let _ = write!(text, "**Garden Keepers**: {keepers}");
        text
    }
}

#[async_trait]
impl CommandHandler for StatusHandler {
    fn descriptor(&self) -> &HandlerDescriptor {
        &self.descriptor
    }

    async fn handle(&self, _inv: &Invocation, ctx: &WorkerContext) -> Result<Reply> {
        let text = match self.view {
            View::Status => self.status_text(ctx).await,
            View::Health => self.health_text(ctx).await,
        };
        Ok(Reply::Text(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::{MockProvider, harness, invocation};

    #[test]
    fn uptime_reads_naturally() {
        assert_eq!(format_uptime(5), "5s");
        assert_eq!(format_uptime(125), "2m 5s");
        assert_eq!(format_uptime(3_725), "1h 2m 5s");
        assert_eq!(format_uptime(90_061), "1d 1h 1m");
    }

    #[tokio::test]
    async fn status_names_the_worker() {
        let h = harness(MockProvider::replying("unused"));
        let reply = status()
            .handle(&invocation("status", "", "900", true), &h.ctx)
            .await
            .unwrap();
        let Reply::Text(text) = reply else {
            panic!("expected text");
        };
        assert!(text.contains("**Worker**: `worker-test`"));
        assert!(text.contains("**Queue**: 0 waiting"));
        assert!(text.contains("**Backend**: mock"));
    }

    #[tokio::test]
    async fn status_reports_backend_usage() {
        let h = harness(MockProvider::replying("Water gently."));
        let reply = crate::handlers::garden::tend()
            .handle(&invocation("tend", "new members", "42", false), &h.ctx)
            .await
            .unwrap();
        assert!(matches!(reply, Reply::Text(_)));

        let reply = status()
            .handle(&invocation("status", "", "900", true), &h.ctx)
            .await
            .unwrap();
        let Reply::Text(text) = reply else {
            panic!("expected text");
        };
        assert!(text.contains("**Usage**: 1 calls today, 1 in 30 days, 1 lifetime"));
        assert!(text.contains("top users <@42> (1)"));

        let book = h.ctx.usage.snapshot().unwrap();
        assert_eq!(book.commands["tend"].calls, 1);
    }

    #[tokio::test]
    async fn health_is_public() {
        assert!(!health().descriptor().admin_only);
        let h = harness(MockProvider::replying("unused"));
        let reply = health()
            .handle(&invocation("health", "", "42", false), &h.ctx)
            .await
            .unwrap();
        assert!(matches!(reply, Reply::Text(t) if t.starts_with("🌱 **Seedkeeper Health Status**")));
    }
}
