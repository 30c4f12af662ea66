//! # Seedkeeper Worker
//!
//! Consumes the work queue, runs each event through the handler table, and
//! publishes the resulting actions for the gateway. Any number of workers
//! can share one queue.
//!
//! - [`Dispatcher`]: bounded-concurrency claim/handle/ack loop
//! - [`HandlerRegistry`]: the handler table and its hot reload
//! - [`WorkerContext`]: everything a handler may touch
//! - [`heartbeat`]: liveness announcements and worker registration
//! - [`intent`]: plain-language requests routed to commands
//! - [`UsageLedger`]: persisted backend usage by model, command, and user

pub mod birthdays;
pub mod bot_config;
pub mod context;
pub mod dispatcher;
pub mod handler;
pub mod handlers;
pub mod heartbeat;
pub mod intent;
pub mod keepers;
mod lock;
pub mod rate_limit;
pub mod table;
pub mod usage;

pub use birthdays::{BirthdayBook, BirthdayEntry, JsonBirthdayBook};
pub use bot_config::{BotConfig, BotConfigStore};
pub use context::{ReloadReport, StatsSnapshot, WorkerContext};
pub use dispatcher::{Dispatcher, Outcome};
pub use handler::{Category, CommandHandler, HandlerDescriptor, Invocation, Reply};
pub use keepers::KeeperStore;
pub use rate_limit::{RateClass, RateLimiter};
pub use table::{HandlerRegistry, HandlerTable, Resolution};
pub use usage::{UsageBook, UsageLedger};

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

/// A worker process: warm-up, heartbeat, and the dispatch loop.
pub struct Worker {
    ctx: Arc<WorkerContext>,
}

impl Worker {
    pub fn new(ctx: WorkerContext) -> Self {
        Self { ctx: Arc::new(ctx) }
    }

    pub fn context(&self) -> &Arc<WorkerContext> {
        &self.ctx
    }

    /// Run until `shutdown` flips to `true`. In-flight items finish and the
    /// worker deregisters before this returns.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        self.ctx.warm_up().await;
        info!(
            worker_id = %self.ctx.worker_id,
            handlers = self.ctx.registry.current().len(),
            perspectives = self.ctx.compiler.perspectives().stats().total,
            "Worker ready"
        );

        let heartbeat = tokio::spawn(heartbeat::run(self.ctx.clone(), shutdown.clone()));
        Dispatcher::new(self.ctx.clone()).run(shutdown).await;

        if let Err(e) = heartbeat.await {
            error!(error = %e, "Heartbeat task aborted");
        }
    }
}
