//! Everything a handler may touch, owned by one worker instance.
//!
//! There are no process-wide singletons: two workers in one test process
//! each get their own context, caches, and handler table.

use crate::birthdays::{BirthdayBook, JsonBirthdayBook};
use crate::bot_config::BotConfigStore;
use crate::handler::Invocation;
use crate::keepers::KeeperStore;
use crate::rate_limit::RateLimiter;
use crate::table::{HandlerRegistry, HandlerTable};
use crate::usage::{UsageEntry, UsageLedger};
use chrono::{DateTime, Utc};
use seedkeeper_config::AppConfig;
use seedkeeper_core::broker::{get_json, publish_json};
use seedkeeper_core::error::{BrokerError, ProviderError};
use seedkeeper_core::event::GATEWAY_STATUS_KEY;
use seedkeeper_core::{
    Broker, CompletionRequest, GatewayStatus, ModelChoice, OutboundAction, Provider,
    ResponseEnvelope,
};
use seedkeeper_memory::TieredMemoryStore;
use seedkeeper_prompt::{PerspectiveStore, PromptCompiler, Voice};
use seedkeeper_providers::{BackendCaller, BackendReply, ModelRouter, RouteRequest};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Live counters, reported by heartbeats and `!status`.
pub struct WorkerStats {
    started_at: DateTime<Utc>,
    in_flight: AtomicUsize,
    processed: AtomicU64,
    failed: AtomicU64,
    duplicates: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
    pub in_flight: usize,
    pub processed: u64,
    pub failed: u64,
    pub duplicates: u64,
}

impl WorkerStats {
    fn new() -> Self {
        Self {
            started_at: Utc::now(),
            in_flight: AtomicUsize::new(0),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
        }
    }

    pub(crate) fn begin(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn finish(&self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds(),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
        }
    }
}

/// Outcome of a full reload.
#[derive(Debug, Clone)]
pub struct ReloadReport {
    pub version: u64,
    pub handlers: usize,
    pub disabled: Vec<String>,
    pub perspectives: usize,
}

pub struct WorkerContext {
    pub worker_id: String,
    pub config: AppConfig,
    pub broker: Arc<dyn Broker>,
    pub memory: TieredMemoryStore,
    pub compiler: PromptCompiler,
    pub backend: BackendCaller,
    pub usage: UsageLedger,
    pub router: ModelRouter,
    pub rate_limiter: RateLimiter,
    pub keepers: KeeperStore,
    pub bot_config: BotConfigStore,
    pub birthdays: Arc<dyn BirthdayBook>,
    pub registry: HandlerRegistry,
    pub stats: WorkerStats,
}

impl WorkerContext {
    /// A context with the standard command set.
    pub fn new(config: AppConfig, broker: Arc<dyn Broker>, provider: Arc<dyn Provider>) -> Self {
        Self::with_registry(config, broker, provider, crate::handlers::registry())
    }

    pub fn with_registry(
        config: AppConfig,
        broker: Arc<dyn Broker>,
        provider: Arc<dyn Provider>,
        registry: HandlerRegistry,
    ) -> Self {
        let data_dir = config.memory.data_dir.clone();
        let perspectives = Arc::new(PerspectiveStore::new(config.perspectives.core.clone()));

        let mut router = ModelRouter::default();
        for handler in registry.current().enabled() {
            if let Some(choice) = handler.route {
                router.set_override(handler.name, choice);
            }
        }

        Self {
            worker_id: format!("worker-{}", uuid::Uuid::new_v4().simple()),
            memory: TieredMemoryStore::new(&config.memory, broker.clone()),
            compiler: PromptCompiler::new(perspectives, Voice::load(&data_dir)),
            backend: BackendCaller::new(provider, &config.backend),
            usage: UsageLedger::new(data_dir.join("usage_stats.json"), broker.clone()),
            router,
            rate_limiter: RateLimiter::new(&config.rate_limits, broker.clone()),
            keepers: KeeperStore::load(data_dir.join("admins.json"), &config.admins.bootstrap),
            bot_config: BotConfigStore::load(data_dir.join("bot_config.json")),
            birthdays: Arc::new(JsonBirthdayBook::load(data_dir.join("birthdays.json"))),
            registry,
            stats: WorkerStats::new(),
            broker,
            config,
        }
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn with_birthdays(mut self, book: Arc<dyn BirthdayBook>) -> Self {
        self.birthdays = book;
        self
    }

    /// Load the perspective cache, warm the memory tiers, and apply the
    /// stored bot configuration to the handler table.
    pub async fn warm_up(&self) {
        match self
            .compiler
            .perspectives()
            .load_file(&self.config.perspectives.cache_file)
        {
            Ok(count) => debug!(count, "Perspective cache loaded"),
            Err(e) => warn!(error = %e, "Perspective cache unreadable; continuing without it"),
        }

        if self.config.memory.warm_on_start {
            if let Err(e) = self.memory.warm().await {
                warn!(error = %e, "Memory warm-up failed; tiers fill on demand");
            }
        }

        let disabled = self.bot_config.disabled_commands().await;
        if !disabled.is_empty() {
            self.registry.rebuild(disabled);
        }
    }

    /// Publish an action for the gateway to perform.
    pub async fn publish(
        &self,
        correlation_id: &str,
        action: OutboundAction,
    ) -> Result<(), BrokerError> {
        let envelope = ResponseEnvelope::new(correlation_id, action);
        let receivers =
            publish_json(self.broker.as_ref(), &self.config.broker.response_channel, &envelope)
                .await?;
        if receivers == 0 {
            warn!(correlation_id, "No gateway subscribed to the response channel");
        }
        Ok(())
    }

    /// Show a typing indicator in the invocation's channel. Failures are
    /// logged, not returned.
    pub async fn typing(&self, inv: &Invocation) {
        let action = OutboundAction::Typing {
            channel_id: inv.channel_id().to_string(),
        };
        if let Err(e) = self.publish(&inv.correlation_id, action).await {
            warn!(correlation_id = %inv.correlation_id, error = %e, "Typing indicator not sent");
        }
    }

    /// Call the backend on behalf of `inv` and add the call to the usage
    /// ledger. A ledger failure is logged; the reply still goes out.
    pub async fn call_backend(
        &self,
        inv: &Invocation,
        choice: ModelChoice,
        request: CompletionRequest,
    ) -> Result<BackendReply, ProviderError> {
        let reply = self.backend.call(choice, request).await?;
        let entry = UsageEntry {
            user_id: &inv.event.author_id,
            command: inv.command.as_deref().unwrap_or("conversation"),
            model: &reply.response.model,
            usage: &reply.response.usage,
        };
        if let Err(e) = self.usage.record(entry).await {
            warn!(correlation_id = %inv.correlation_id, error = %e, "Usage not recorded");
        }
        Ok(reply)
    }

    /// Backend tier for a request, honouring per-command overrides.
    pub fn route(&self, command: Option<&str>, text: &str, is_dm: bool) -> ModelChoice {
        self.router
            .route(&RouteRequest::from_text(command, text, is_dm))
    }

    /// The bot's own platform id, as last reported by the gateway.
    pub async fn bot_user_id(&self) -> Option<String> {
        match get_json::<GatewayStatus>(self.broker.as_ref(), GATEWAY_STATUS_KEY).await {
            Ok(status) => status.and_then(|s| s.bot_user_id),
            Err(e) => {
                debug!(error = %e, "Gateway status unavailable");
                None
            }
        }
    }

    /// Re-read every run-time input and swap in a fresh handler table.
    pub async fn reload(&self) -> ReloadReport {
        let data_dir = &self.config.memory.data_dir;
        self.compiler.reload_voice(data_dir);

        let perspectives = match self
            .compiler
            .perspectives()
            .load_file(&self.config.perspectives.cache_file)
        {
            Ok(0) => self.compiler.perspectives().stats().total,
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "Perspective reload failed; keeping the current set");
                self.compiler.perspectives().stats().total
            }
        };

        if let Err(e) = self.bot_config.reload().await {
            warn!(error = %e, "Bot configuration reload failed; keeping the current values");
        }
        if let Err(e) = self.keepers.reload().await {
            warn!(error = %e, "Keeper list reload failed; keeping the current list");
        }
        if let Err(e) = self.birthdays.reload().await {
            warn!(error = %e, "Birthday reload failed; keeping the current book");
        }

        let disabled = self.bot_config.disabled_commands().await;
        let table: Arc<HandlerTable> = self.registry.rebuild(disabled);
        info!(
            worker_id = %self.worker_id,
            version = table.version,
            perspectives,
            "Worker reloaded"
        );
        ReloadReport {
            version: table.version,
            handlers: table.len(),
            disabled: table.disabled().iter().cloned().collect(),
            perspectives,
        }
    }
}
