//! Backend usage ledger.
//!
//! Every backend call adds its token counts to `usage_stats.json`, broken
//! down by day, model, command, and user. Workers sharing a data directory
//! share the file: each update re-reads it under a broker lock, so no
//! worker's counts overwrite another's. Daily buckets older than
//! [`DAILY_RETENTION_DAYS`] are pruned on write.

use crate::lock;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use seedkeeper_core::broker::Broker;
use seedkeeper_core::error::MemoryError;
use seedkeeper_core::Usage;
use seedkeeper_memory::{read_json, write_json_atomic};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub const DAILY_RETENTION_DAYS: i64 = 90;
const LOCK_KEY: &str = "usage:lock";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Calls and tokens in one bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_write_tokens: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
}

impl Tally {
    fn add(&mut self, usage: &Usage) {
        self.calls += 1;
        self.input_tokens += u64::from(usage.input_tokens);
        self.output_tokens += u64::from(usage.output_tokens);
        self.cache_write_tokens += u64::from(usage.cache_creation_input_tokens);
        self.cache_read_tokens += u64::from(usage.cache_read_input_tokens);
    }

    fn merge(&mut self, other: &Tally) {
        self.calls += other.calls;
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_write_tokens += other.cache_write_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// The persisted ledger.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageBook {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_tracked: Option<DateTime<Utc>>,
    #[serde(default)]
    pub lifetime: Tally,
    /// Keyed by `YYYY-MM-DD`
    #[serde(default)]
    pub daily: BTreeMap<String, Tally>,
    #[serde(default)]
    pub models: BTreeMap<String, Tally>,
    #[serde(default)]
    pub commands: BTreeMap<String, Tally>,
    #[serde(default)]
    pub users: BTreeMap<String, Tally>,
}

/// One backend call to account for.
#[derive(Debug, Clone, Copy)]
pub struct UsageEntry<'a> {
    pub user_id: &'a str,
    /// Command name, or `conversation`
    pub command: &'a str,
    pub model: &'a str,
    pub usage: &'a Usage,
}

impl UsageBook {
    fn add(&mut self, entry: &UsageEntry<'_>, now: DateTime<Utc>) {
        self.first_tracked.get_or_insert(now);
        self.lifetime.add(entry.usage);
        self.daily
            .entry(now.format(DATE_FORMAT).to_string())
            .or_default()
            .add(entry.usage);
        self.models.entry(entry.model.to_string()).or_default().add(entry.usage);
        self.commands.entry(entry.command.to_string()).or_default().add(entry.usage);
        self.users.entry(entry.user_id.to_string()).or_default().add(entry.usage);

        let cutoff = (now.date_naive() - Duration::days(DAILY_RETENTION_DAYS))
            .format(DATE_FORMAT)
            .to_string();
        // ISO dates sort chronologically as strings.
        self.daily.retain(|day, _| *day >= cutoff);
    }

    /// Usage on the UTC day of `now`.
    pub fn day(&self, now: DateTime<Utc>) -> Tally {
        self.daily
            .get(&now.format(DATE_FORMAT).to_string())
            .cloned()
            .unwrap_or_default()
    }

    /// Usage over the `days` UTC days ending with the day of `now`.
    pub fn recent(&self, now: DateTime<Utc>, days: i64) -> Tally {
        let today = now.date_naive();
        let mut total = Tally::default();
        for (day, tally) in &self.daily {
            let Ok(date) = NaiveDate::parse_from_str(day, DATE_FORMAT) else {
                continue;
            };
            if date <= today && (today - date).num_days() < days {
                total.merge(tally);
            }
        }
        total
    }

    /// The `n` heaviest entries of a breakdown by total tokens.
    pub fn top(breakdown: &BTreeMap<String, Tally>, n: usize) -> Vec<(&str, &Tally)> {
        let mut ranked: Vec<(&str, &Tally)> =
            breakdown.iter().map(|(k, v)| (k.as_str(), v)).collect();
        ranked.sort_by(|a, b| b.1.total_tokens().cmp(&a.1.total_tokens()).then(a.0.cmp(b.0)));
        ranked.truncate(n);
        ranked
    }
}

pub struct UsageLedger {
    path: PathBuf,
    broker: Arc<dyn Broker>,
    /// Serializes this worker's own writers; the broker lock covers others.
    writing: Mutex<()>,
}

impl UsageLedger {
    pub fn new(path: impl Into<PathBuf>, broker: Arc<dyn Broker>) -> Self {
        Self {
            path: path.into(),
            broker,
            writing: Mutex::new(()),
        }
    }

    pub async fn record(&self, entry: UsageEntry<'_>) -> Result<(), MemoryError> {
        self.record_at(entry, Utc::now()).await
    }

    pub(crate) async fn record_at(
        &self,
        entry: UsageEntry<'_>,
        now: DateTime<Utc>,
    ) -> Result<(), MemoryError> {
        let _local = self.writing.lock().await;
        let held = lock::acquire(self.broker.as_ref(), LOCK_KEY).await;
        if held.is_none() {
            warn!(path = %self.path.display(), "Usage lock unavailable; recording without it");
        }

        let result = self.apply(&entry, now);
        if let Some(held) = held {
            held.release(self.broker.as_ref()).await;
        }
        result
    }

    fn apply(&self, entry: &UsageEntry<'_>, now: DateTime<Utc>) -> Result<(), MemoryError> {
        let mut book = match read_json::<UsageBook>(&self.path) {
            Ok(book) => book.unwrap_or_default(),
            Err(MemoryError::Corrupt { path, reason }) => {
                warn!(path = %path, reason = %reason, "Usage ledger unreadable; starting a new one");
                UsageBook::default()
            }
            Err(e) => return Err(e),
        };
        book.add(entry, now);
        write_json_atomic(&self.path, &book)?;
        debug!(
            user_id = entry.user_id,
            command = entry.command,
            model = entry.model,
            "Usage recorded"
        );
        Ok(())
    }

    /// The ledger as last written by any worker.
    pub fn snapshot(&self) -> Result<UsageBook, MemoryError> {
        Ok(read_json(&self.path)?.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use seedkeeper_broker::MemoryBroker;
    use tempfile::TempDir;

    fn usage(input: u32, output: u32) -> Usage {
        Usage {
            input_tokens: input,
            output_tokens: output,
            cache_creation_input_tokens: 0,
            cache_read_input_tokens: 0,
        }
    }

    fn entry<'a>(user_id: &'a str, command: &'a str, usage: &'a Usage) -> UsageEntry<'a> {
        UsageEntry {
            user_id,
            command,
            model: "claude-economical",
            usage,
        }
    }

    fn ledger(dir: &TempDir) -> UsageLedger {
        UsageLedger::new(
            dir.path().join("usage_stats.json"),
            Arc::new(MemoryBroker::default()),
        )
    }

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn calls_are_broken_down() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger(&dir);
        let small = usage(100, 10);
        let large = usage(1_000, 50);

        ledger.record_at(entry("42", "conversation", &small), at(1)).await.unwrap();
        ledger.record_at(entry("42", "catchup", &large), at(2)).await.unwrap();
        ledger.record_at(entry("43", "conversation", &small), at(2)).await.unwrap();

        let book = ledger.snapshot().unwrap();
        assert_eq!(book.lifetime.calls, 3);
        assert_eq!(book.lifetime.input_tokens, 1_200);
        assert_eq!(book.first_tracked, Some(at(1)));
        assert_eq!(book.commands["conversation"].calls, 2);
        assert_eq!(book.users["42"].output_tokens, 60);
        assert_eq!(book.models["claude-economical"].calls, 3);
        assert_eq!(book.day(at(2)).calls, 2);
        assert_eq!(book.recent(at(2), 30).calls, 3);

        let top = UsageBook::top(&book.users, 1);
        assert_eq!(top[0].0, "42");
    }

    #[tokio::test]
    async fn two_workers_add_to_one_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("usage_stats.json");
        let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::default());
        let a = Arc::new(UsageLedger::new(&path, broker.clone()));
        let b = Arc::new(UsageLedger::new(&path, broker.clone()));

        let mut tasks = Vec::new();
        for n in 0..10 {
            let ledger = if n % 2 == 0 { a.clone() } else { b.clone() };
            tasks.push(tokio::spawn(async move {
                let used = usage(10, 1);
                ledger.record(entry("42", "conversation", &used)).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(a.snapshot().unwrap().lifetime.calls, 10);
        assert!(broker.get(LOCK_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn old_days_are_pruned() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger(&dir);
        let used = usage(10, 1);

        ledger.record_at(entry("42", "seeds", &used), at(1)).await.unwrap();
        let later = at(1) + Duration::days(DAILY_RETENTION_DAYS + 1);
        ledger.record_at(entry("42", "seeds", &used), later).await.unwrap();

        let book = ledger.snapshot().unwrap();
        assert_eq!(book.daily.len(), 1);
        assert_eq!(book.lifetime.calls, 2);
        assert_eq!(book.recent(later, 30).calls, 1);
    }
}
