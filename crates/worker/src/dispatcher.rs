//! The dispatch loop.
//!
//! Claims work items while a concurrency permit is free, runs each on its
//! own task, publishes the reply, and acknowledges the claim. A handler
//! error or panic becomes one apologetic reply; it never stops the loop.
//!
//! Delivery is at-least-once. A `processed:{event_id}` marker set with
//! `set_if_absent` keeps a redelivered event from being answered twice.
//! The marker lives for the visibility timeout and is renewed every third of
//! it while the handler runs, so a claim redelivered under a slow handler
//! still finds it. Once the reply is out it lives for `dedup_ttl_secs`.

use crate::context::WorkerContext;
use crate::handler::{Invocation, Reply};
use crate::table::Resolution;
use futures::FutureExt;
use seedkeeper_core::error::BrokerError;
use seedkeeper_core::{Claim, Error, OutboundAction, WorkItem};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

pub const BACKEND_FALLBACK: &str = "I'm having trouble processing that right now, but I'm here! 🌱";
pub const HANDLER_FALLBACK: &str =
    "Something went sideways while handling that. I've noted it and I'm still here. 🌱";
pub const KEEPERS_ONLY: &str = "🔒 That command is reserved for garden keepers.";
const DM_COMMANDS_OFF: &str = "🌙 Commands are only available in the garden channels.";

const CLAIM_WAIT: Duration = Duration::from_secs(2);
const MAX_BROKER_BACKOFF: Duration = Duration::from_secs(30);

/// What happened to one work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A reply was published
    Replied,
    /// Nothing to say (channel chatter, or the handler published its own output)
    Quiet,
    /// Already handled by this or another worker
    Duplicate,
    /// The reply could not be published; the claim is left to be redelivered
    Undelivered,
}

fn dedup_key(event_id: &str) -> String {
    format!("processed:{event_id}")
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".into())
}

#[derive(Clone)]
pub struct Dispatcher {
    ctx: Arc<WorkerContext>,
}

impl Dispatcher {
    pub fn new(ctx: Arc<WorkerContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<WorkerContext> {
        &self.ctx
    }

    /// Consume the work queue until `shutdown` flips to `true` (or its
    /// sender goes away), then wait for in-flight items to finish.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let ctx = &self.ctx;
        let queue = ctx.config.broker.work_queue.clone();
        let permits = Arc::new(Semaphore::new(ctx.config.worker.concurrency));
        let mut tasks = JoinSet::new();
        let mut backoff = Duration::from_millis(250);

        info!(
            worker_id = %ctx.worker_id,
            queue = %queue,
            concurrency = ctx.config.worker.concurrency,
            "Dispatcher started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let permit = tokio::select! {
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown.changed() => break,
            };

            let claimed = tokio::select! {
                claimed = ctx.broker.claim(&queue, CLAIM_WAIT) => claimed,
                _ = shutdown.changed() => break,
            };

            match claimed {
                Ok(Some(claim)) => {
                    backoff = Duration::from_millis(250);
                    let dispatcher = self.clone();
                    tasks.spawn(async move {
                        dispatcher.process(claim).await;
                        drop(permit);
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, retry_in_ms = backoff.as_millis() as u64, "Claim failed");
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = shutdown.changed() => break,
                    }
                    backoff = (backoff * 2).min(MAX_BROKER_BACKOFF);
                }
            }

            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    error!(error = %e, "Work item task aborted");
                }
            }
        }

        info!(in_flight = tasks.len(), "Dispatcher stopping; draining in-flight items");
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Work item task aborted");
            }
        }
        info!(worker_id = %ctx.worker_id, "Dispatcher stopped");
    }

    /// Handle one claimed item and settle its claim.
    pub async fn process(&self, claim: Claim) -> Outcome {
        let ctx = &self.ctx;
        ctx.stats.begin();
        let outcome = self.handle_item(&claim.item).await;
        ctx.stats.finish();

        if outcome == Outcome::Undelivered {
            warn!(
                correlation_id = %claim.item.correlation_id,
                "Leaving claim unacknowledged for redelivery"
            );
            return outcome;
        }

        match ctx.broker.ack(&ctx.config.broker.work_queue, &claim.receipt).await {
            Ok(true) => {}
            Ok(false) => warn!(
                correlation_id = %claim.item.correlation_id,
                "Claim expired before ack; the item may be redelivered"
            ),
            Err(e) => warn!(
                correlation_id = %claim.item.correlation_id,
                error = %e,
                "Ack failed; the item may be redelivered"
            ),
        }
        outcome
    }

    /// Resolve, run, and reply to one item without touching its claim.
    pub async fn handle_item(&self, item: &WorkItem) -> Outcome {
        let ctx = &self.ctx;
        let event = &item.event;
        let marker = dedup_key(&event.event_id);

        match ctx
            .broker
            .set_if_absent(
                &marker,
                &ctx.worker_id,
                Some(ctx.config.broker.visibility_timeout()),
            )
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                ctx.stats.record_duplicate();
                info!(
                    event_id = %event.event_id,
                    attempt = item.attempt,
                    "Duplicate delivery skipped"
                );
                return Outcome::Duplicate;
            }
            Err(e) => warn!(
                event_id = %event.event_id,
                error = %e,
                "Dedup marker unavailable; handling anyway"
            ),
        }

        let renewal = self.renew_marker(marker.clone());

        // Captured once; a reload during this item does not affect it.
        let table = ctx.registry.current();
        let reply = match table.resolve(event, ctx.config.worker.command_prefix) {
            Resolution::Ignore => {
                debug!(event_id = %event.event_id, "Not addressed to the bot");
                None
            }
            Resolution::Disabled(name) => {
                Some(format!("🌙 `{}{name}` is resting right now.", ctx.config.worker.command_prefix))
            }
            Resolution::Run {
                handler,
                command,
                args,
            } => {
                let inv = Invocation {
                    correlation_id: item.correlation_id.clone(),
                    event: event.clone(),
                    command,
                    args,
                    is_admin: ctx.keepers.is_admin(&event.author_id).await,
                };
                self.run_handler(handler.as_ref(), &inv).await
            }
            Resolution::Intent {
                handler,
                command,
                args,
            } => {
                let is_admin = ctx.keepers.is_admin(&event.author_id).await;
                // With DM commands off, a DM request stays a conversation
                // instead of drawing a refusal.
                let dm_blocked = event.is_direct_message
                    && !is_admin
                    && !ctx.bot_config.get().await.allow_dm_commands;
                let (handler, command, args) = if dm_blocked {
                    (table.conversation().clone(), None, event.raw_text.clone())
                } else {
                    info!(event_id = %event.event_id, command = %command, "Plain request routed to command");
                    (handler, Some(command), args)
                };
                let inv = Invocation {
                    correlation_id: item.correlation_id.clone(),
                    event: event.clone(),
                    command,
                    args,
                    is_admin,
                };
                self.run_handler(handler.as_ref(), &inv).await
            }
        };

        let outcome = match reply {
            None => Outcome::Quiet,
            Some(content) => {
                let action = OutboundAction::Message {
                    channel_id: event.channel_id.clone(),
                    content,
                    reply_to: None,
                };
                match ctx.publish(&item.correlation_id, action).await {
                    Ok(()) => Outcome::Replied,
                    Err(e) => {
                        error!(
                            correlation_id = %item.correlation_id,
                            error = %e,
                            "Reply could not be published"
                        );
                        Outcome::Undelivered
                    }
                }
            }
        };

        renewal.abort();
        let _ = renewal.await;
        self.settle_marker(&marker, &outcome).await;
        outcome
    }

    /// Keep the in-progress marker alive until the returned task is aborted.
    fn renew_marker(&self, marker: String) -> JoinHandle<()> {
        let ctx = self.ctx.clone();
        tokio::spawn(async move {
            let ttl = ctx.config.broker.visibility_timeout();
            let every = (ttl / 3).max(Duration::from_secs(1));
            let mut ticks = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            loop {
                ticks.tick().await;
                match ctx.broker.set(&marker, &ctx.worker_id, Some(ttl)).await {
                    Ok(()) => debug!(marker = %marker, "Dedup marker renewed"),
                    Err(e) => warn!(marker = %marker, error = %e, "Dedup marker renewal failed"),
                }
            }
        })
    }

    async fn settle_marker(&self, marker: &str, outcome: &Outcome) {
        let ctx = &self.ctx;
        let result: Result<(), BrokerError> = if *outcome == Outcome::Undelivered {
            ctx.broker.delete(marker).await.map(|_| ())
        } else {
            let ttl = Duration::from_secs(ctx.config.worker.dedup_ttl_secs);
            ctx.broker.set(marker, "done", Some(ttl)).await
        };
        if let Err(e) = result {
            warn!(marker, error = %e, "Dedup marker not updated");
        }
    }

    /// Policy checks, then the handler itself. Every path yields a reply
    /// text or deliberate silence.
    async fn run_handler(
        &self,
        handler: &dyn crate::handler::CommandHandler,
        inv: &Invocation,
    ) -> Option<String> {
        let ctx = &self.ctx;
        let descriptor = handler.descriptor();
        let label = inv.command.as_deref().unwrap_or("conversation");

        if inv.command.is_some() && inv.event.is_direct_message && !inv.is_admin {
            let allowed = ctx.bot_config.get().await.allow_dm_commands;
            if !allowed {
                return Some(DM_COMMANDS_OFF.to_string());
            }
        }

        if descriptor.admin_only && !inv.is_admin {
            info!(command = label, user_id = %inv.event.author_id, "Keeper command refused");
            return Some(KEEPERS_ONLY.to_string());
        }

        if let Some(class) = descriptor.rate_class {
            if !inv.is_admin {
                if let Err(denial) = ctx.rate_limiter.check(&inv.event.author_id, class).await {
                    info!(
                        user_id = %inv.event.author_id,
                        class = %denial.class,
                        retry_after_secs = denial.retry_after.as_secs(),
                        "Rate limited"
                    );
                    return Some(denial.message);
                }
            }
        }

        let result = AssertUnwindSafe(handler.handle(inv, ctx.as_ref()))
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(Reply::Text(text))) => Some(text),
            Ok(Ok(Reply::Silent)) => None,
            Ok(Err(Error::Provider(e))) => {
                ctx.stats.record_failure();
                warn!(
                    command = label,
                    correlation_id = %inv.correlation_id,
                    error = %e,
                    "Backend unavailable; sending fallback"
                );
                Some(BACKEND_FALLBACK.to_string())
            }
            Ok(Err(e)) => {
                ctx.stats.record_failure();
                error!(
                    command = label,
                    correlation_id = %inv.correlation_id,
                    error = %e,
                    "Handler failed"
                );
                Some(HANDLER_FALLBACK.to_string())
            }
            Err(panic) => {
                ctx.stats.record_failure();
                error!(
                    command = label,
                    correlation_id = %inv.correlation_id,
                    panic = %panic_message(panic.as_ref()),
                    "Handler panicked"
                );
                Some(HANDLER_FALLBACK.to_string())
            }
        }
    }
}
