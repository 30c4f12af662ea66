//! Broker trait: the shared queue / key-value / pub-sub service that
//! decouples the Gateway from the Workers.
//!
//! Contract:
//! - Work queues deliver each item to one claimant at a time. A claim hides
//!   the item for a visibility window; an item that is not acked within that
//!   window is redelivered. Delivery is at-least-once.
//! - Keys carry an optional TTL and read as absent once it lapses.
//! - Pub/sub is fire-and-forget to whoever is subscribed at publish time.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::error::BrokerError;
use crate::event::WorkItem;

/// A claimed work item plus the receipt needed to ack it.
#[derive(Debug, Clone)]
pub struct Claim {
    pub item: WorkItem,
    pub receipt: String,
}

/// Messages arriving on a subscribed channel. Closes when the subscription
/// is lost; callers resubscribe.
pub type Subscription = tokio::sync::mpsc::Receiver<String>;

#[async_trait]
pub trait Broker: Send + Sync {
    /// Implementation name (e.g., "memory", "remote").
    fn name(&self) -> &str;

    // ── Work queue ─────────────────────────────────────────────

    /// Append an item to `queue`.
    async fn push(&self, queue: &str, item: &WorkItem) -> Result<(), BrokerError>;

    /// Claim the oldest visible item, waiting up to `wait` for one to arrive.
    async fn claim(&self, queue: &str, wait: Duration) -> Result<Option<Claim>, BrokerError>;

    /// Acknowledge a claim, removing the item for good. Returns false when
    /// the receipt is unknown (already acked, or expired and reclaimed).
    async fn ack(&self, queue: &str, receipt: &str) -> Result<bool, BrokerError>;

    /// Number of items waiting (visible or claimed) in `queue`.
    async fn queue_len(&self, queue: &str) -> Result<usize, BrokerError>;

    // ── Key / value ────────────────────────────────────────────

    async fn get(&self, key: &str) -> Result<Option<String>, BrokerError>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), BrokerError>;

    /// Set only when the key is absent. Returns true when this call wrote it.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, BrokerError>;

    async fn delete(&self, key: &str) -> Result<bool, BrokerError>;

    /// Delete every key starting with `prefix`; returns how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize, BrokerError>;

    // ── Pub / sub ──────────────────────────────────────────────

    /// Publish to `channel`; returns the number of subscribers reached.
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize, BrokerError>;

    async fn subscribe(&self, channel: &str) -> Result<Subscription, BrokerError>;

    /// Can we reach the broker?
    async fn health_check(&self) -> Result<bool, BrokerError> {
        Ok(true)
    }
}

/// Read a JSON value stored under `key`.
pub async fn get_json<T: DeserializeOwned>(
    broker: &dyn Broker,
    key: &str,
) -> Result<Option<T>, BrokerError> {
    match broker.get(key).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| BrokerError::Serialization(format!("{key}: {e}"))),
        None => Ok(None),
    }
}

/// Store `value` as JSON under `key`.
pub async fn set_json<T: Serialize + ?Sized>(
    broker: &dyn Broker,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<(), BrokerError> {
    let raw = serde_json::to_string(value)
        .map_err(|e| BrokerError::Serialization(format!("{key}: {e}")))?;
    broker.set(key, &raw, ttl).await
}

/// Publish `value` as JSON on `channel`.
pub async fn publish_json<T: Serialize + ?Sized>(
    broker: &dyn Broker,
    channel: &str,
    value: &T,
) -> Result<usize, BrokerError> {
    let raw = serde_json::to_string(value)
        .map_err(|e| BrokerError::Serialization(format!("{channel}: {e}")))?;
    broker.publish(channel, &raw).await
}
