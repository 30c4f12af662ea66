//! Short-lived locks held in the broker, shared by every worker.

use seedkeeper_core::broker::Broker;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

const LOCK_TTL: Duration = Duration::from_secs(5);
const LOCK_RETRY: Duration = Duration::from_millis(25);
const LOCK_ATTEMPTS: usize = 40;

/// A lock this worker holds. It expires on its own after [`LOCK_TTL`].
pub(crate) struct HeldLock {
    key: String,
    token: String,
}

/// Take the lock at `key`, retrying for about a second. `None` when it
/// stays busy or the broker fails.
pub(crate) async fn acquire(broker: &dyn Broker, key: &str) -> Option<HeldLock> {
    let lock = HeldLock {
        key: key.to_string(),
        token: Uuid::new_v4().to_string(),
    };
    for _ in 0..LOCK_ATTEMPTS {
        match broker.set_if_absent(&lock.key, &lock.token, Some(LOCK_TTL)).await {
            Ok(true) => return Some(lock),
            Ok(false) => tokio::time::sleep(LOCK_RETRY).await,
            Err(e) => {
                warn!(key = %lock.key, error = %e, "Broker lock failed");
                return None;
            }
        }
    }
    None
}

impl HeldLock {
    pub(crate) async fn release(self, broker: &dyn Broker) {
        // Only our own lock: after LOCK_TTL it may belong to someone else.
        match broker.get(&self.key).await {
            Ok(Some(holder)) if holder == self.token => {
                if let Err(e) = broker.delete(&self.key).await {
                    warn!(key = %self.key, error = %e, "Broker lock not released; it expires");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(key = %self.key, error = %e, "Broker lock not released; it expires"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seedkeeper_broker::MemoryBroker;

    #[tokio::test(start_paused = true)]
    async fn busy_lock_is_not_granted_twice() {
        let broker = MemoryBroker::default();
        let held = acquire(&broker, "usage:lock").await.unwrap();
        assert!(acquire(&broker, "usage:lock").await.is_none());

        held.release(&broker).await;
        assert!(acquire(&broker, "usage:lock").await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_lock_is_not_released_by_its_old_holder() {
        let broker = MemoryBroker::default();
        let stale = acquire(&broker, "k:lock").await.unwrap();
        tokio::time::advance(LOCK_TTL + Duration::from_secs(1)).await;

        let _current = acquire(&broker, "k:lock").await.unwrap();
        stale.release(&broker).await;
        assert!(broker.get("k:lock").await.unwrap().is_some());
    }
}
