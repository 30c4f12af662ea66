//! Performs the actions workers publish on the response channel.

use crate::GatewayStats;
use crate::split::{MAX_MESSAGE_CHARS, split_message};
use seedkeeper_core::broker::set_json;
use seedkeeper_core::error::PlatformError;
use seedkeeper_core::event::history_response_key;
use seedkeeper_core::{Broker, OutboundAction, Platform, ResponseEnvelope};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// How long fetched history waits for the worker that asked for it.
pub const HISTORY_RESPONSE_TTL: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct Responder {
    platform: Arc<dyn Platform>,
    broker: Arc<dyn Broker>,
    stats: Arc<GatewayStats>,
}

impl Responder {
    pub fn new(platform: Arc<dyn Platform>, broker: Arc<dyn Broker>, stats: Arc<GatewayStats>) -> Self {
        Self {
            platform,
            broker,
            stats,
        }
    }

    /// Perform one published action.
    pub async fn perform(&self, envelope: ResponseEnvelope) -> Result<(), PlatformError> {
        let correlation_id = envelope.correlation_id.as_str();
        match envelope.action {
            OutboundAction::Message {
                channel_id,
                content,
                reply_to,
            } => {
                let chunks = split_message(&content, MAX_MESSAGE_CHARS);
                debug!(correlation_id, channel_id = %channel_id, chunks = chunks.len(), "Delivering reply");
                for (i, chunk) in chunks.iter().enumerate() {
                    let reply_to = if i == 0 { reply_to.as_deref() } else { None };
                    self.platform.send(&channel_id, chunk, reply_to).await?;
                }
                self.stats.record_delivery();
                Ok(())
            }
            OutboundAction::Typing { channel_id } => self.platform.send_typing(&channel_id).await,
            OutboundAction::Reaction {
                channel_id,
                message_id,
                emoji,
            } => {
                self.platform
                    .add_reaction(&channel_id, &message_id, &emoji)
                    .await
            }
            OutboundAction::FetchHistory {
                request_id,
                channel_id,
                after_message_id,
                limit,
            } => {
                self.fetch_history(&request_id, &channel_id, &after_message_id, limit)
                    .await;
                Ok(())
            }
        }
    }

    /// Fetch history and store it for the requesting worker. A failed fetch
    /// stores `null` so the worker can answer at once instead of timing out.
    async fn fetch_history(&self, request_id: &str, channel_id: &str, after: &str, limit: usize) {
        let messages = match self.platform.fetch_history(channel_id, after, limit).await {
            Ok(messages) => {
                info!(request_id, channel_id, count = messages.len(), "History fetched");
                Some(messages)
            }
            Err(e) => {
                warn!(request_id, channel_id, error = %e, "History fetch failed");
                None
            }
        };

        if let Err(e) = set_json(
            self.broker.as_ref(),
            &history_response_key(request_id),
            &messages,
            Some(HISTORY_RESPONSE_TTL),
        )
        .await
        {
            warn!(request_id, error = %e, "History response not stored");
        }
    }

    /// Forward actions from `channel` until shutdown, resubscribing with
    /// backoff whenever the subscription drops.
    pub async fn run(
        self,
        channel: String,
        mut backoff: crate::Backoff,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.broker.subscribe(&channel).await {
                Ok(mut rx) => {
                    backoff.reset();
                    info!(channel = %channel, "Listening for worker responses");
                    loop {
                        tokio::select! {
                            payload = rx.recv() => match payload {
                                Some(payload) => self.dispatch(&payload).await,
                                None => break,
                            },
                            _ = shutdown.changed() => return,
                        }
                    }
                    warn!(channel = %channel, "Response subscription closed");
                }
                Err(e) => warn!(channel = %channel, error = %e, "Response subscription failed"),
            }

            let delay = backoff.next_delay();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }
    }

    /// Messages and typing run in arrival order; history fetches run on their
    /// own task so a slow platform call never holds up replies.
    async fn dispatch(&self, payload: &str) {
        let envelope: ResponseEnvelope = match serde_json::from_str(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Unreadable response envelope dropped");
                return;
            }
        };

        if matches!(envelope.action, OutboundAction::FetchHistory { .. }) {
            let responder = self.clone();
            tokio::spawn(async move { responder.perform_logged(envelope).await });
        } else {
            self.perform_logged(envelope).await;
        }
    }

    async fn perform_logged(&self, envelope: ResponseEnvelope) {
        let correlation_id = envelope.correlation_id.clone();
        if let Err(e) = self.perform(envelope).await {
            self.stats.record_failure();
            warn!(correlation_id = %correlation_id, error = %e, "Platform action failed");
        }
    }
}
