//! The three-tier conversation store.
//!
//! Reads go in-process cache → broker (medium tier) → durable log, filling
//! the faster tiers on the way back. Writes go to the durable log first and
//! are then written through to both caches. Every tier is addressed by the
//! full `(user, ConversationKey)` pair, so two conversations can never see
//! each other's turns no matter which tier answers.
//!
//! The medium tier is best effort: broker failures are logged and the store
//! carries on with the durable log.
//!
//! Several worker processes share the durable log and the broker, but each
//! has its own in-process tier. Every write or clear is announced on
//! [`INVALIDATION_CHANNEL`], and each store drains that feed before it looks
//! at its local tier. A store without a live feed does not trust or fill its
//! local tier at all.

use crate::durable::{DurableLog, DurableStats};
use crate::locks::KeyedLocks;
use crate::record::JsonRecord;
use crate::settings::MemorySettings;
use chrono::{DateTime, Utc};
use seedkeeper_config::MemoryConfig;
use seedkeeper_core::broker::{Broker, Subscription, get_json, publish_json, set_json};
use seedkeeper_core::error::MemoryError;
use seedkeeper_core::{ConversationKey, ConversationTurn, TtlCache};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

const MEDIUM_TIER: &str = "medium";

/// Pub/sub channel carrying [`Invalidation`]s between stores.
pub const INVALIDATION_CHANNEL: &str = "memory:invalidate";

/// Tells other stores which of a user's conversations changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Invalidation {
    origin: String,
    user_id: String,
    /// `None` means every conversation of the user.
    #[serde(default)]
    keys: Option<Vec<ConversationKey>>,
}

type LocalKey = (String, ConversationKey);
type Turns = Arc<Vec<ConversationTurn>>;

/// Which tier answered reads, since start.
#[derive(Default)]
struct Counters {
    local_hits: AtomicU64,
    medium_hits: AtomicU64,
    durable_reads: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TierStats {
    pub local_entries: usize,
    pub local_capacity: usize,
    pub local_hits: u64,
    pub medium_hits: u64,
    pub durable_reads: u64,
}

/// What `!memory status` reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MemoryStatus {
    pub enabled: bool,
    pub total_turns: usize,
    pub dm_turns: usize,
    pub channel_turns: usize,
    pub conversations: usize,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

pub struct TieredMemoryStore {
    durable: DurableLog,
    medium: Arc<dyn Broker>,
    medium_ttl: Duration,
    local: TtlCache<LocalKey, Turns>,
    local_capacity: usize,
    store_id: String,
    feed: Mutex<Option<Subscription>>,
    locks: KeyedLocks<LocalKey>,
    settings: JsonRecord<MemorySettings>,
    counters: Counters,
}

impl TieredMemoryStore {
    pub fn new(config: &MemoryConfig, medium: Arc<dyn Broker>) -> Self {
        let local_capacity = config.local_capacity.max(1);
        Self {
            durable: DurableLog::new(
                config.data_dir.join("memory"),
                config.durable_cap,
                config.max_turn_chars,
            ),
            medium,
            medium_ttl: config.medium_ttl(),
            local: TtlCache::bounded(local_capacity, config.local_ttl()),
            local_capacity,
            store_id: Uuid::new_v4().to_string(),
            feed: Mutex::new(None),
            locks: KeyedLocks::new(),
            settings: JsonRecord::load(config.data_dir.join("memory_settings.json")),
            counters: Counters::default(),
        }
    }

    pub fn durable(&self) -> &DurableLog {
        &self.durable
    }

    fn lock_feed(&self) -> std::sync::MutexGuard<'_, Option<Subscription>> {
        self.feed.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply every invalidation other stores have announced. Returns whether
    /// the local tier can be trusted, i.e. the feed is live.
    async fn sync_local(&self) -> bool {
        if self.lock_feed().is_none() {
            let subscription = match self.medium.subscribe(INVALIDATION_CHANNEL).await {
                Ok(s) => s,
                Err(e) => {
                    debug!(error = %e, "Invalidation feed unavailable, bypassing local tier");
                    return false;
                }
            };
            let mut feed = self.lock_feed();
            if feed.is_none() {
                // Whatever was cached before the feed existed may be stale.
                self.local.clear();
                *feed = Some(subscription);
                debug!(store_id = %self.store_id, "Subscribed to memory invalidations");
            }
        }

        let mut feed = self.lock_feed();
        let Some(subscription) = feed.as_mut() else {
            return false;
        };
        loop {
            match subscription.try_recv() {
                Ok(raw) => self.apply_invalidation(&raw),
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => {
                    warn!("Invalidation feed lost, dropping local tier");
                    *feed = None;
                    self.local.clear();
                    return false;
                }
            }
        }
    }

    fn apply_invalidation(&self, raw: &str) {
        let notice: Invalidation = match serde_json::from_str(raw) {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "Malformed memory invalidation ignored");
                return;
            }
        };
        if notice.origin == self.store_id {
            return;
        }
        match notice.keys {
            Some(keys) => {
                for key in keys {
                    self.local.remove(&(notice.user_id.clone(), key));
                }
            }
            None => {
                self.local.retain(|(owner, _), _| owner != &notice.user_id);
            }
        }
    }

    async fn announce(&self, user_id: &str, keys: Option<Vec<ConversationKey>>) {
        let notice = Invalidation {
            origin: self.store_id.clone(),
            user_id: user_id.to_string(),
            keys,
        };
        if let Err(e) = publish_json(self.medium.as_ref(), INVALIDATION_CHANNEL, &notice).await {
            warn!(user_id, error = %e, "Memory invalidation not announced; other caches expire by TTL");
        }
    }

    async fn read_medium(&self, user_id: &str, key: &ConversationKey) -> Option<Vec<ConversationTurn>> {
        let storage_key = key.storage_key(user_id, MEDIUM_TIER);
        match get_json::<Vec<ConversationTurn>>(self.medium.as_ref(), &storage_key).await {
            Ok(turns) => turns,
            Err(e) => {
                warn!(key = %storage_key, error = %e, "Medium tier read failed, falling through");
                None
            }
        }
    }

    async fn write_medium(&self, user_id: &str, key: &ConversationKey, turns: &[ConversationTurn]) {
        let storage_key = key.storage_key(user_id, MEDIUM_TIER);
        if let Err(e) = set_json(
            self.medium.as_ref(),
            &storage_key,
            turns,
            Some(self.medium_ttl),
        )
        .await
        {
            warn!(key = %storage_key, error = %e, "Medium tier write failed");
        }
    }

    /// The full remembered conversation, oldest first.
    pub async fn read(
        &self,
        user_id: &str,
        key: &ConversationKey,
    ) -> Result<Vec<ConversationTurn>, MemoryError> {
        if !self.is_enabled(user_id).await {
            return Ok(Vec::new());
        }

        let local_key = (user_id.to_string(), key.clone());
        let _guard = self.locks.lock(&local_key).await;
        let trusted = self.sync_local().await;

        if trusted {
            if let Some(turns) = self.local.get(&local_key) {
                self.counters.local_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(turns.as_ref().clone());
            }
        }

        if let Some(turns) = self.read_medium(user_id, key).await {
            self.counters.medium_hits.fetch_add(1, Ordering::Relaxed);
            debug!(user_id, conversation = %key, turns = turns.len(), "Medium tier hit");
            if trusted {
                self.local.insert(local_key, Arc::new(turns.clone()));
            }
            return Ok(turns);
        }

        self.counters.durable_reads.fetch_add(1, Ordering::Relaxed);
        let turns = self.durable.conversation(user_id, key).await?;
        if !turns.is_empty() {
            self.write_medium(user_id, key, &turns).await;
        }
        if trusted {
            self.local.insert(local_key, Arc::new(turns.clone()));
        }
        Ok(turns)
    }

    /// The last `limit` turns of a conversation.
    pub async fn recent(
        &self,
        user_id: &str,
        key: &ConversationKey,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, MemoryError> {
        let mut turns = self.read(user_id, key).await?;
        let skip = turns.len().saturating_sub(limit);
        turns.drain(..skip);
        Ok(turns)
    }

    /// Record a turn. Nothing is stored for users who turned memory off.
    pub async fn append(
        &self,
        user_id: &str,
        key: &ConversationKey,
        turn: ConversationTurn,
    ) -> Result<(), MemoryError> {
        if !self.is_enabled(user_id).await {
            debug!(user_id, "Memory disabled, turn not recorded");
            return Ok(());
        }

        let local_key = (user_id.to_string(), key.clone());
        let guard = self.locks.lock(&local_key).await;
        let trusted = self.sync_local().await;

        let appended = self.durable.append(user_id, key, turn).await?;
        let turns = appended.record.conversation(key);
        self.write_medium(user_id, key, &turns).await;
        if trusted {
            self.local.insert(local_key, Arc::new(turns));
        }
        drop(guard);

        // The cap is per user, so the append may have trimmed other
        // conversations too.
        for other in &appended.evicted {
            self.refresh(user_id, other).await?;
        }

        let mut changed = vec![key.clone()];
        changed.extend(appended.evicted);
        self.announce(user_id, Some(changed)).await;
        Ok(())
    }

    /// Rewrite the caches of one conversation from the durable log.
    async fn refresh(&self, user_id: &str, key: &ConversationKey) -> Result<(), MemoryError> {
        let local_key = (user_id.to_string(), key.clone());
        let _guard = self.locks.lock(&local_key).await;

        let turns = self.durable.conversation(user_id, key).await?;
        if turns.is_empty() {
            let storage_key = key.storage_key(user_id, MEDIUM_TIER);
            if let Err(e) = self.medium.delete(&storage_key).await {
                warn!(key = %storage_key, error = %e, "Medium tier delete failed");
            }
        } else {
            self.write_medium(user_id, key, &turns).await;
        }
        self.local.remove(&local_key);
        debug!(user_id, conversation = %key, turns = turns.len(), "Trimmed conversation refreshed");
        Ok(())
    }

    /// Remove everything remembered about `user_id` from all three tiers.
    /// The durable record is gone before this returns `Ok`.
    pub async fn clear(&self, user_id: &str) -> Result<(), MemoryError> {
        let mut keys: Vec<ConversationKey> = self
            .durable
            .load(user_id)
            .await?
            .map(|r| r.keys())
            .unwrap_or_default();
        let cached_keys = self.local.keys();
        for (owner, key) in cached_keys {
            if owner == user_id && !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys.sort();

        // Fixed order so two clears cannot deadlock.
        let mut guards = Vec::with_capacity(keys.len());
        for key in &keys {
            guards.push(self.locks.lock(&(user_id.to_string(), key.clone())).await);
        }

        self.durable.clear(user_id).await?;

        let prefix = ConversationKey::user_prefix(user_id);
        match self.medium.delete_prefix(&prefix).await {
            Ok(removed) => debug!(user_id, removed, "Medium tier entries cleared"),
            Err(e) => warn!(user_id, error = %e, "Medium tier clear failed; entries expire by TTL"),
        }

        let evicted = self.local.retain(|(owner, _), _| owner != user_id);
        drop(guards);

        self.announce(user_id, None).await;
        info!(user_id, conversations = keys.len(), evicted, "Memory cleared");
        Ok(())
    }

    pub async fn is_enabled(&self, user_id: &str) -> bool {
        self.settings.read(|s| s.is_enabled(user_id)).await
    }

    /// Turn memory on or off for a user. Returns whether anything changed.
    pub async fn set_enabled(&self, user_id: &str, enabled: bool) -> Result<bool, MemoryError> {
        let changed = self
            .settings
            .update(|s| s.set_enabled(user_id, enabled))
            .await?;
        if changed {
            info!(user_id, enabled, "Memory preference changed");
        }
        Ok(changed)
    }

    pub async fn status(&self, user_id: &str) -> Result<MemoryStatus, MemoryError> {
        let enabled = self.is_enabled(user_id).await;
        let Some(record) = self.durable.load(user_id).await? else {
            return Ok(MemoryStatus {
                enabled,
                ..MemoryStatus::default()
            });
        };

        let dm_turns = record
            .entries
            .iter()
            .filter(|e| e.key.is_direct_message)
            .count();
        Ok(MemoryStatus {
            enabled,
            total_turns: record.entries.len(),
            dm_turns,
            channel_turns: record.entries.len() - dm_turns,
            conversations: record.keys().len(),
            oldest: record.entries.iter().map(|e| e.turn.timestamp).min(),
            newest: record.entries.iter().map(|e| e.turn.timestamp).max(),
        })
    }

    /// Load durable records into the caches at startup. Stops filling the
    /// in-process cache once it is full. Returns the number of conversations
    /// warmed.
    pub async fn warm(&self) -> Result<usize, MemoryError> {
        let records = self.durable.records()?;
        let trusted = self.sync_local().await;
        let mut warmed = 0;

        for record in records {
            if !self.is_enabled(&record.user_id).await {
                continue;
            }
            for key in record.keys() {
                let turns = record.conversation(&key);
                self.write_medium(&record.user_id, &key, &turns).await;
                if trusted && warmed < self.local_capacity {
                    self.local.insert((record.user_id.clone(), key), Arc::new(turns));
                }
                warmed += 1;
            }
        }

        info!(conversations = warmed, "Memory cache warmed");
        Ok(warmed)
    }

    pub fn tier_stats(&self) -> TierStats {
        TierStats {
            local_entries: self.local.len(),
            local_capacity: self.local_capacity,
            local_hits: self.counters.local_hits.load(Ordering::Relaxed),
            medium_hits: self.counters.medium_hits.load(Ordering::Relaxed),
            durable_reads: self.counters.durable_reads.load(Ordering::Relaxed),
        }
    }

    pub fn durable_stats(&self) -> Result<DurableStats, MemoryError> {
        self.durable.stats()
    }
}
