//! In-process broker.
//!
//! Queues hold ready items plus claimed items with a visibility deadline.
//! Claims that outlive their deadline are put back at the head of the queue
//! with `attempt` bumped, which is what makes delivery at-least-once. Keys
//! live in a [`TtlCache`]. Publishing hands the payload to every
//! subscriber's buffer before it returns; a subscriber whose buffer is full
//! is dropped, which closes its [`Subscription`] so it knows to resync.

use async_trait::async_trait;
use seedkeeper_core::broker::{Broker, Claim, Subscription};
use seedkeeper_core::error::BrokerError;
use seedkeeper_core::{TtlCache, WorkItem};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 256;

struct InFlight {
    item: WorkItem,
    deadline: Instant,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<WorkItem>,
    in_flight: HashMap<String, InFlight>,
}

impl QueueState {
    /// Move expired claims back to the head of the queue.
    fn reclaim_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, f)| f.deadline <= now)
            .map(|(r, _)| r.clone())
            .collect();

        for receipt in &expired {
            if let Some(mut flight) = self.in_flight.remove(receipt) {
                flight.item.attempt += 1;
                warn!(
                    correlation_id = %flight.item.correlation_id,
                    attempt = flight.item.attempt,
                    "Claim expired, redelivering work item"
                );
                self.ready.push_front(flight.item);
            }
        }
        expired.len()
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.in_flight.values().map(|f| f.deadline).min()
    }
}

/// The broker contract implemented in one process.
pub struct MemoryBroker {
    queues: Mutex<HashMap<String, QueueState>>,
    pushed: Notify,
    kv: Mutex<TtlCache<String, String>>,
    channels: Mutex<HashMap<String, Vec<mpsc::Sender<String>>>>,
    visibility_timeout: Duration,
}

impl MemoryBroker {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            pushed: Notify::new(),
            kv: Mutex::new(TtlCache::new(None, None)),
            channels: Mutex::new(HashMap::new()),
            visibility_timeout,
        }
    }

    fn lock_queues(&self) -> std::sync::MutexGuard<'_, HashMap<String, QueueState>> {
        self.queues.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_kv(&self) -> std::sync::MutexGuard<'_, TtlCache<String, String>> {
        self.kv.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_channels(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<mpsc::Sender<String>>>> {
        self.channels.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Try to claim without waiting. Also reports when the next claim in
    /// this queue expires, so a waiting claimer knows when to look again.
    fn try_claim(&self, queue: &str) -> (Option<Claim>, Option<Instant>) {
        let now = Instant::now();
        let mut queues = self.lock_queues();
        let state = queues.entry(queue.to_string()).or_default();
        state.reclaim_expired(now);

        match state.ready.pop_front() {
            Some(item) => {
                let receipt = Uuid::new_v4().to_string();
                state.in_flight.insert(
                    receipt.clone(),
                    InFlight {
                        item: item.clone(),
                        deadline: now + self.visibility_timeout,
                    },
                );
                (Some(Claim { item, receipt }), None)
            }
            None => (None, state.next_deadline()),
        }
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(Duration::from_secs(180))
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    fn name(&self) -> &str {
        "memory"
    }

    async fn push(&self, queue: &str, item: &WorkItem) -> Result<(), BrokerError> {
        self.lock_queues()
            .entry(queue.to_string())
            .or_default()
            .ready
            .push_back(item.clone());
        debug!(queue, correlation_id = %item.correlation_id, "Work item pushed");
        self.pushed.notify_waiters();
        Ok(())
    }

    async fn claim(&self, queue: &str, wait: Duration) -> Result<Option<Claim>, BrokerError> {
        let give_up = Instant::now() + wait;

        loop {
            // Register interest before looking so a push in between is not missed.
            let notified = self.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let (claim, next_expiry) = self.try_claim(queue);
            if claim.is_some() {
                return Ok(claim);
            }

            let now = Instant::now();
            if now >= give_up {
                return Ok(None);
            }
            let wake_at = next_expiry.map_or(give_up, |at| at.min(give_up));
            let _ = tokio::time::timeout_at(wake_at, notified).await;
        }
    }

    async fn ack(&self, queue: &str, receipt: &str) -> Result<bool, BrokerError> {
        let mut queues = self.lock_queues();
        let acked = queues
            .get_mut(queue)
            .and_then(|state| state.in_flight.remove(receipt))
            .is_some();
        if !acked {
            warn!(queue, receipt, "Ack for unknown or expired claim");
        }
        Ok(acked)
    }

    async fn queue_len(&self, queue: &str) -> Result<usize, BrokerError> {
        let queues = self.lock_queues();
        Ok(queues
            .get(queue)
            .map_or(0, |s| s.ready.len() + s.in_flight.len()))
    }

    async fn get(&self, key: &str) -> Result<Option<String>, BrokerError> {
        Ok(self.lock_kv().get(&key.to_string()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), BrokerError> {
        self.lock_kv()
            .insert_with_ttl(key.to_string(), value.to_string(), ttl);
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, BrokerError> {
        let kv = self.lock_kv();
        if kv.contains(&key.to_string()) {
            return Ok(false);
        }
        kv.insert_with_ttl(key.to_string(), value.to_string(), ttl);
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool, BrokerError> {
        Ok(self.lock_kv().remove(&key.to_string()).is_some())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize, BrokerError> {
        Ok(self.lock_kv().retain(|k, _| !k.starts_with(prefix)))
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<usize, BrokerError> {
        let mut channels = self.lock_channels();
        // No subscribers is not an error.
        let Some(subscribers) = channels.get_mut(channel) else {
            return Ok(0);
        };

        let mut reached = 0;
        subscribers.retain(|tx| match tx.try_send(payload.to_string()) {
            Ok(()) => {
                reached += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(channel, "Subscriber lagged, dropping it");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        if subscribers.is_empty() {
            channels.remove(channel);
        }
        Ok(reached)
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, BrokerError> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        self.lock_channels()
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use seedkeeper_core::InboundEvent;
    use std::sync::Arc;

    fn item(event_id: &str) -> WorkItem {
        WorkItem::new(InboundEvent {
            event_id: event_id.into(),
            channel_id: "c1".into(),
            guild_id: None,
            author_id: "u1".into(),
            author_name: None,
            is_direct_message: true,
            mentions_bot: false,
            raw_text: "hi".into(),
            timestamp: Utc::now(),
            reply_context: None,
            channel_topic: None,
        })
    }

    #[tokio::test]
    async fn claim_is_fifo_and_exclusive() {
        let broker = MemoryBroker::default();
        broker.push("q", &item("1")).await.unwrap();
        broker.push("q", &item("2")).await.unwrap();

        let first = broker.claim("q", Duration::ZERO).await.unwrap().unwrap();
        let second = broker.claim("q", Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(first.item.event.event_id, "1");
        assert_eq!(second.item.event.event_id, "2");
        assert!(broker.claim("q", Duration::ZERO).await.unwrap().is_none());

        assert!(broker.ack("q", &first.receipt).await.unwrap());
        assert!(!broker.ack("q", &first.receipt).await.unwrap());
        assert_eq!(broker.queue_len("q").await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unacked_claim_is_redelivered_after_visibility_timeout() {
        let broker = MemoryBroker::new(Duration::from_secs(5));
        broker.push("q", &item("1")).await.unwrap();

        let claim = broker.claim("q", Duration::ZERO).await.unwrap().unwrap();
        assert!(broker.claim("q", Duration::ZERO).await.unwrap().is_none());

        tokio::time::advance(Duration::from_secs(6)).await;
        let again = broker.claim("q", Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(again.item.correlation_id, claim.item.correlation_id);
        assert_eq!(again.item.attempt, 2);

        // The stale receipt no longer acks anything.
        assert!(!broker.ack("q", &claim.receipt).await.unwrap());
        assert!(broker.ack("q", &again.receipt).await.unwrap());
    }

    #[tokio::test]
    async fn waiting_claim_wakes_on_push() {
        let broker = Arc::new(MemoryBroker::default());
        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.claim("q", Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        broker.push("q", &item("late")).await.unwrap();

        let claim = waiter.await.unwrap().unwrap().unwrap();
        assert_eq!(claim.item.event.event_id, "late");
    }

    #[tokio::test(start_paused = true)]
    async fn kv_ttl_and_set_if_absent() {
        let broker = MemoryBroker::default();
        assert!(broker
            .set_if_absent("processed:1", "1", Some(Duration::from_secs(10)))
            .await
            .unwrap());
        assert!(!broker
            .set_if_absent("processed:1", "1", Some(Duration::from_secs(10)))
            .await
            .unwrap());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(broker.get("processed:1").await.unwrap().is_none());
        assert!(broker
            .set_if_absent("processed:1", "1", None)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn delete_prefix_only_touches_matching_keys() {
        let broker = MemoryBroker::default();
        broker.set("conversation:u1:dm:1:medium", "a", None).await.unwrap();
        broker.set("conversation:u1:ch:2:medium", "b", None).await.unwrap();
        broker.set("conversation:u10:ch:2:medium", "c", None).await.unwrap();

        assert_eq!(broker.delete_prefix("conversation:u1:").await.unwrap(), 2);
        assert!(broker.get("conversation:u10:ch:2:medium").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn publish_reaches_subscribers() {
        let broker = MemoryBroker::default();
        assert_eq!(broker.publish("chan", "nobody").await.unwrap(), 0);

        let mut sub = broker.subscribe("chan").await.unwrap();
        assert_eq!(broker.publish("chan", "hello").await.unwrap(), 1);
        // Delivered before publish returned.
        assert_eq!(sub.try_recv().unwrap(), "hello");

        drop(sub);
        assert_eq!(broker.publish("chan", "gone").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn lagging_subscriber_is_closed() {
        let broker = MemoryBroker::default();
        let mut slow = broker.subscribe("chan").await.unwrap();
        for n in 0..=CHANNEL_CAPACITY {
            broker.publish("chan", &n.to_string()).await.unwrap();
        }

        let mut seen = 0;
        while slow.recv().await.is_some() {
            seen += 1;
        }
        assert_eq!(seen, CHANNEL_CAPACITY);
    }
}
