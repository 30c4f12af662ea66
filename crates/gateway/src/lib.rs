//! # Seedkeeper Gateway
//!
//! Owns the single live platform connection. Inbound messages become
//! [`WorkItem`]s on the work queue; actions workers publish on the response
//! channel become platform calls. The gateway keeps no conversation state,
//! so any number of workers can come and go behind it.
//!
//! Connection loss is retried with exponential backoff. Items already on the
//! queue live in the broker and are unaffected.

pub mod health;
pub mod responder;
pub mod split;

pub use responder::Responder;
pub use split::{MAX_MESSAGE_CHARS, split_message};

use chrono::{DateTime, Utc};
use seedkeeper_config::AppConfig;
use seedkeeper_core::broker::set_json;
use seedkeeper_core::error::{BrokerError, PlatformError};
use seedkeeper_core::event::GATEWAY_STATUS_KEY;
use seedkeeper_core::platform::PlatformStream;
use seedkeeper_core::{
    Broker, GatewayStatus, InboundEvent, Platform, PlatformMessage, WorkItem,
};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

const PUSH_ATTEMPTS: u32 = 3;

/// Exponential delay between reconnect attempts.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.max(Duration::from_millis(1));
        Self {
            initial,
            max: max.max(initial),
            current: initial,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            Duration::from_millis(config.gateway.reconnect_initial_ms),
            Duration::from_millis(config.gateway.reconnect_max_ms),
        )
    }

    /// The delay to wait now; doubles the next one up to the ceiling.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Live gateway counters, served on `/health`.
pub struct GatewayStats {
    started_at: DateTime<Utc>,
    connected: AtomicBool,
    connects: AtomicU64,
    forwarded: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewaySnapshot {
    pub started_at: DateTime<Utc>,
    pub connected: bool,
    pub connects: u64,
    pub forwarded: u64,
    pub delivered: u64,
    pub failed: u64,
}

impl GatewayStats {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            connected: AtomicBool::new(false),
            connects: AtomicU64::new(0),
            forwarded: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    fn record_connect(&self) -> u64 {
        self.connected.store(true, Ordering::Relaxed);
        self.connects.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn record_disconnect(&self) {
        self.connected.store(false, Ordering::Relaxed);
    }

    fn record_forward(&self) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivery(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> GatewaySnapshot {
        GatewaySnapshot {
            started_at: self.started_at,
            connected: self.connected.load(Ordering::Relaxed),
            connects: self.connects.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

impl Default for GatewayStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the queue event for a platform message.
pub fn to_event(msg: PlatformMessage) -> InboundEvent {
    InboundEvent {
        event_id: msg.message_id,
        channel_id: msg.channel_id,
        guild_id: msg.guild_id,
        author_id: msg.author_id,
        author_name: msg.author_name,
        is_direct_message: msg.is_direct_message,
        mentions_bot: msg.mentions_bot,
        raw_text: msg.content,
        timestamp: msg.timestamp,
        reply_context: msg.reply_to,
        channel_topic: msg.channel_topic,
    }
}

enum Ended {
    Shutdown,
    Lost(String),
}

pub struct Gateway {
    platform: Arc<dyn Platform>,
    broker: Arc<dyn Broker>,
    config: AppConfig,
    stats: Arc<GatewayStats>,
}

impl Gateway {
    pub fn new(config: AppConfig, platform: Arc<dyn Platform>, broker: Arc<dyn Broker>) -> Self {
        Self {
            platform,
            broker,
            config,
            stats: Arc::new(GatewayStats::new()),
        }
    }

    pub fn stats(&self) -> &Arc<GatewayStats> {
        &self.stats
    }

    /// Bridge the platform and the broker until `shutdown` flips to `true`.
    ///
    /// Returns an error only when the platform cannot be used at all (for
    /// example a missing token); every other failure is retried.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), PlatformError> {
        let responder = Responder::new(self.platform.clone(), self.broker.clone(), self.stats.clone());
        let responses = tokio::spawn(responder.run(
            self.config.broker.response_channel.clone(),
            Backoff::from_config(&self.config),
            shutdown.clone(),
        ));

        let mut backoff = Backoff::from_config(&self.config);
        let result = loop {
            if *shutdown.borrow() {
                break Ok(());
            }

            match self.platform.connect().await {
                Ok(stream) => {
                    backoff.reset();
                    self.announce().await;
                    let ended = self.pump(stream, &mut shutdown).await;
                    self.stats.record_disconnect();
                    match ended {
                        Ended::Shutdown => break Ok(()),
                        Ended::Lost(reason) => {
                            warn!(platform = self.platform.name(), reason = %reason, "Platform connection lost")
                        }
                    }
                }
                Err(e @ PlatformError::NotConfigured(_)) => {
                    error!(platform = self.platform.name(), error = %e, "Platform cannot connect");
                    break Err(e);
                }
                Err(e) => warn!(platform = self.platform.name(), error = %e, "Platform connect failed"),
            }

            let delay = backoff.next_delay();
            info!(retry_in_ms = delay.as_millis() as u64, "Reconnecting");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break Ok(()),
            }
        };

        if let Err(e) = self.platform.disconnect().await {
            warn!(error = %e, "Platform disconnect failed");
        }
        responses.abort();
        info!(platform = self.platform.name(), "Gateway stopped");
        result
    }

    /// Record the connection in `gateway:status` for the workers.
    async fn announce(&self) {
        let connects = self.stats.record_connect();
        let status = GatewayStatus {
            platform: self.platform.name().to_string(),
            bot_user_id: self.platform.bot_user_id(),
            connected_at: Utc::now(),
            connects,
        };
        match set_json(self.broker.as_ref(), GATEWAY_STATUS_KEY, &status, None).await {
            Ok(()) => info!(
                platform = %status.platform,
                bot_user_id = ?status.bot_user_id,
                connects,
                "Gateway connected"
            ),
            Err(e) => warn!(error = %e, "Gateway status not recorded"),
        }
    }

    async fn pump(&self, mut stream: PlatformStream, shutdown: &mut watch::Receiver<bool>) -> Ended {
        loop {
            tokio::select! {
                msg = stream.recv() => match msg {
                    Some(Ok(msg)) => self.forward(msg).await,
                    Some(Err(e)) => return Ended::Lost(e.to_string()),
                    None => return Ended::Lost("stream closed".into()),
                },
                _ = shutdown.changed() => return Ended::Shutdown,
            }
        }
    }

    /// Enqueue one platform message, skipping the bot's own.
    pub async fn forward(&self, msg: PlatformMessage) {
        if self.platform.bot_user_id().as_deref() == Some(msg.author_id.as_str()) {
            debug!(message_id = %msg.message_id, "Own message skipped");
            return;
        }

        let item = WorkItem::new(to_event(msg));
        match self.push(&item).await {
            Ok(()) => {
                self.stats.record_forward();
                debug!(
                    correlation_id = %item.correlation_id,
                    event_id = %item.event.event_id,
                    "Event enqueued"
                );
            }
            Err(e) => error!(
                event_id = %item.event.event_id,
                error = %e,
                "Event could not be enqueued"
            ),
        }
    }

    async fn push(&self, item: &WorkItem) -> Result<(), BrokerError> {
        let queue = &self.config.broker.work_queue;
        let mut delay = Duration::from_millis(250);
        let mut attempt = 1;
        loop {
            match self.broker.push(queue, item).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < PUSH_ATTEMPTS => {
                    warn!(attempt, error = %e, "Enqueue failed; retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
