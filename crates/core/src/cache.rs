//! Capacity- and TTL-bounded cache over [`mini_moka::sync::Cache`].
//!
//! One abstraction for every cache in the system: the in-process
//! conversation tier and the in-memory broker's key/value space.
//! mini-moka owns storage, capacity eviction and the default TTL. Each entry
//! also carries its own deadline on the tokio clock, checked on read, so a
//! per-key TTL can be shorter than the default and paused-clock tests see
//! expiry when they advance time.
//!
//! Internally synchronized: every method takes `&self`.

use mini_moka::sync::Cache;
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Clone)]
struct Entry<V> {
    value: V,
    expires_at: Option<Instant>,
}

impl<V> Entry<V> {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

pub struct TtlCache<K, V> {
    inner: Cache<K, Entry<V>>,
    capacity: Option<usize>,
    default_ttl: Option<Duration>,
}

impl<K, V> TtlCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache. `None` capacity means unbounded; `None` TTL means
    /// entries live until evicted or removed.
    pub fn new(capacity: Option<usize>, default_ttl: Option<Duration>) -> Self {
        let mut builder = Cache::builder();
        if let Some(capacity) = capacity {
            builder = builder.max_capacity(capacity as u64);
        }
        if let Some(ttl) = default_ttl {
            builder = builder.time_to_live(ttl);
        }
        Self {
            inner: builder.build(),
            capacity,
            default_ttl,
        }
    }

    /// Capacity-bounded cache with a default TTL.
    pub fn bounded(capacity: usize, ttl: Duration) -> Self {
        Self::new(Some(capacity), Some(ttl))
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// A clone of the live value under `key`.
    pub fn get(&self, key: &K) -> Option<V> {
        let entry = self.inner.get(key)?;
        if entry.is_live(Instant::now()) {
            Some(entry.value)
        } else {
            self.inner.invalidate(key);
            None
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Insert with the default TTL.
    pub fn insert(&self, key: K, value: V) {
        self.insert_with_ttl(key, value, self.default_ttl);
    }

    /// Insert with an explicit TTL (`None` = no expiry of its own). A TTL
    /// longer than the cache default is cut to the default.
    pub fn insert_with_ttl(&self, key: K, value: V, ttl: Option<Duration>) {
        let ttl = match (ttl, self.default_ttl) {
            (Some(own), Some(default)) => Some(own.min(default)),
            (own, default) => own.or(default),
        };
        self.inner.insert(
            key,
            Entry {
                value,
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let previous = self.get(key);
        self.inner.invalidate(key);
        previous
    }

    /// Keep only live entries for which `keep` returns true. Returns how many
    /// live entries were removed; expired ones are dropped silently.
    pub fn retain(&self, mut keep: impl FnMut(&K, &V) -> bool) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        let mut doomed = Vec::new();
        for entry in self.inner.iter() {
            if !entry.value().is_live(now) {
                doomed.push(entry.key().clone());
            } else if !keep(entry.key(), &entry.value().value) {
                doomed.push(entry.key().clone());
                removed += 1;
            }
        }
        for key in &doomed {
            self.inner.invalidate(key);
        }
        removed
    }

    /// Live keys, in no particular order.
    pub fn keys(&self) -> Vec<K> {
        let now = Instant::now();
        self.inner
            .iter()
            .filter(|entry| entry.value().is_live(now))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.inner
            .iter()
            .filter(|entry| entry.value().is_live(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let keys: Vec<K> = self.inner.iter().map(|entry| entry.key().clone()).collect();
        for key in &keys {
            self.inner.invalidate(key);
        }
    }
}
