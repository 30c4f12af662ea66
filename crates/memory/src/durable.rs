//! Durable tier: one append log per user on disk.
//!
//! Each user's turns across every conversation live in a single record,
//! `memory/user_{id}_{hash}.json`, tagged with the [`ConversationKey`] they
//! were written under. The cap applies to the whole record and evicts from
//! the front, so the oldest turns go first regardless of which conversation
//! they belong to.

use crate::locks::KeyedLocks;
use crate::record::{read_json, write_json_atomic};
use chrono::{DateTime, Utc};
use seedkeeper_core::error::MemoryError;
use seedkeeper_core::{ConversationKey, ConversationTurn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A turn plus the conversation it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTurn {
    pub key: ConversationKey,
    #[serde(flatten)]
    pub turn: ConversationTurn,
}

/// Everything remembered about one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub entries: Vec<StoredTurn>,
}

impl MemoryRecord {
    pub fn new(user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            created_at: now,
            updated_at: now,
            entries: Vec::new(),
        }
    }

    /// Turns of one conversation, oldest first.
    pub fn conversation(&self, key: &ConversationKey) -> Vec<ConversationTurn> {
        self.entries
            .iter()
            .filter(|e| &e.key == key)
            .map(|e| e.turn.clone())
            .collect()
    }

    /// Distinct conversation keys in order of first appearance.
    pub fn keys(&self) -> Vec<ConversationKey> {
        let mut keys: Vec<ConversationKey> = Vec::new();
        for entry in &self.entries {
            if !keys.contains(&entry.key) {
                keys.push(entry.key.clone());
            }
        }
        keys
    }
}

/// The record after an append, plus the other conversations that lost
/// turns to the cap.
#[derive(Debug, Clone)]
pub struct Appended {
    pub record: MemoryRecord,
    pub evicted: Vec<ConversationKey>,
}

/// Aggregate numbers over the whole durable tier.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DurableStats {
    pub users: usize,
    pub turns: usize,
}

pub struct DurableLog {
    dir: PathBuf,
    cap: usize,
    max_turn_chars: usize,
    locks: KeyedLocks<String>,
}

impl DurableLog {
    /// `dir` is the directory holding the per-user records.
    pub fn new(dir: impl Into<PathBuf>, cap: usize, max_turn_chars: usize) -> Self {
        Self {
            dir: dir.into(),
            cap: cap.max(1),
            max_turn_chars,
            locks: KeyedLocks::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// File holding `user_id`'s record. The readable part is sanitized; the
    /// hash keeps distinct ids from colliding after sanitizing.
    pub fn path_for(&self, user_id: &str) -> PathBuf {
        let readable: String = user_id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .take(32)
            .collect();
        let digest = hex::encode(Sha256::digest(user_id.as_bytes()));
        self.dir
            .join(format!("user_{readable}_{}.json", &digest[..16]))
    }

    /// The user's record, or `None` if nothing has been recorded.
    pub async fn load(&self, user_id: &str) -> Result<Option<MemoryRecord>, MemoryError> {
        let _guard = self.locks.lock(&user_id.to_string()).await;
        self.read(user_id)
    }

    fn read(&self, user_id: &str) -> Result<Option<MemoryRecord>, MemoryError> {
        match read_json::<MemoryRecord>(&self.path_for(user_id)) {
            Ok(record) => Ok(record),
            Err(MemoryError::Corrupt { path, reason }) => {
                // Treated as empty; the next append rewrites it.
                warn!(user_id, path = %path, reason = %reason, "Corrupt memory record ignored");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Append one turn, evicting the oldest turns beyond the cap. The cap is
    /// shared by all of the user's conversations, so the eviction can reach
    /// keys other than `key`; those are reported in [`Appended::evicted`].
    pub async fn append(
        &self,
        user_id: &str,
        key: &ConversationKey,
        turn: ConversationTurn,
    ) -> Result<Appended, MemoryError> {
        let _guard = self.locks.lock(&user_id.to_string()).await;
        let mut record = self
            .read(user_id)?
            .unwrap_or_else(|| MemoryRecord::new(user_id));

        record.entries.push(StoredTurn {
            key: key.clone(),
            turn: turn.truncated(self.max_turn_chars),
        });
        let mut evicted: Vec<ConversationKey> = Vec::new();
        if record.entries.len() > self.cap {
            let excess = record.entries.len() - self.cap;
            for dropped in record.entries.drain(..excess) {
                if &dropped.key != key && !evicted.contains(&dropped.key) {
                    evicted.push(dropped.key);
                }
            }
            debug!(user_id, dropped = excess, other_conversations = evicted.len(), "Durable cap reached");
        }
        record.updated_at = Utc::now();

        write_json_atomic(&self.path_for(user_id), &record)?;
        Ok(Appended { record, evicted })
    }

    /// One conversation's turns, oldest first. Empty when the user is unknown.
    pub async fn conversation(
        &self,
        user_id: &str,
        key: &ConversationKey,
    ) -> Result<Vec<ConversationTurn>, MemoryError> {
        Ok(self
            .load(user_id)
            .await?
            .map(|r| r.conversation(key))
            .unwrap_or_default())
    }

    /// Delete the user's record. Returns whether one existed.
    pub async fn clear(&self, user_id: &str) -> Result<bool, MemoryError> {
        let _guard = self.locks.lock(&user_id.to_string()).await;
        let path = self.path_for(user_id);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!(user_id, "Durable memory cleared");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(MemoryError::Storage(format!(
                "Failed to delete {}: {e}",
                path.display()
            ))),
        }
    }

    /// Every readable record on disk. Unreadable files are skipped with a warning.
    pub fn records(&self) -> Result<Vec<MemoryRecord>, MemoryError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(MemoryError::Storage(format!(
                    "Failed to list {}: {e}",
                    self.dir.display()
                )));
            }
        };

        let mut records = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let is_record = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("user_") && n.ends_with(".json"));
            if !is_record {
                continue;
            }
            match read_json::<MemoryRecord>(&path) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable memory record"),
            }
        }
        Ok(records)
    }

    pub fn stats(&self) -> Result<DurableStats, MemoryError> {
        let records = self.records()?;
        Ok(DurableStats {
            users: records.len(),
            turns: records.iter().map(|r| r.entries.len()).sum(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn log(dir: &TempDir, cap: usize) -> DurableLog {
        DurableLog::new(dir.path(), cap, 2000)
    }

    #[tokio::test]
    async fn append_creates_record() {
        let dir = TempDir::new().unwrap();
        let log = log(&dir, 10);
        let key = ConversationKey::direct("d1");

        log.append("u1", &key, ConversationTurn::user("hello")).await.unwrap();
        log.append("u1", &key, ConversationTurn::assistant("hi!")).await.unwrap();

        let turns = log.conversation("u1", &key).await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].text, "hello");
        assert!(log.path_for("u1").exists());
    }

    #[tokio::test]
    async fn cap_evicts_oldest_and_keeps_order() {
        let dir = TempDir::new().unwrap();
        let log = log(&dir, 3);
        let key = ConversationKey::channel("c1");

        for i in 0..5 {
            let appended = log
                .append("u1", &key, ConversationTurn::user(format!("m{i}")))
                .await
                .unwrap();
            // Trimming its own conversation is not reported.
            assert!(appended.evicted.is_empty());
        }

        let texts: Vec<String> = log
            .conversation("u1", &key)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.text)
            .collect();
        assert_eq!(texts, vec!["m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn cap_spans_conversations() {
        let dir = TempDir::new().unwrap();
        let log = log(&dir, 2);
        let dm = ConversationKey::direct("d1");
        let ch = ConversationKey::channel("c1");

        log.append("u1", &dm, ConversationTurn::user("old dm")).await.unwrap();
        let first = log.append("u1", &ch, ConversationTurn::user("ch 1")).await.unwrap();
        assert!(first.evicted.is_empty());
        let second = log.append("u1", &ch, ConversationTurn::user("ch 2")).await.unwrap();
        assert_eq!(second.evicted, vec![dm.clone()]);

        assert!(log.conversation("u1", &dm).await.unwrap().is_empty());
        assert_eq!(log.conversation("u1", &ch).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn long_turns_are_truncated() {
        let dir = TempDir::new().unwrap();
        let log = DurableLog::new(dir.path(), 10, 5);
        let key = ConversationKey::direct("d1");

        log.append("u1", &key, ConversationTurn::user("abcdefghij")).await.unwrap();
        assert_eq!(log.conversation("u1", &key).await.unwrap()[0].text, "abcde");
    }

    #[tokio::test]
    async fn clear_removes_file() {
        let dir = TempDir::new().unwrap();
        let log = log(&dir, 10);
        let key = ConversationKey::direct("d1");

        log.append("u1", &key, ConversationTurn::user("x")).await.unwrap();
        assert!(log.clear("u1").await.unwrap());
        assert!(!log.clear("u1").await.unwrap());
        assert!(log.load("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn records_skip_corrupt_files() {
        let dir = TempDir::new().unwrap();
        let log = log(&dir, 10);
        log.append("u1", &ConversationKey::direct("d1"), ConversationTurn::user("x"))
            .await
            .unwrap();
        std::fs::write(dir.path().join("user_bad_0000.json"), "nope").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let stats = log.stats().unwrap();
        assert_eq!(stats.users, 1);
        assert_eq!(stats.turns, 1);
    }

    #[test]
    fn path_is_sanitized_and_unique() {
        let log = DurableLog::new("/data/memory", 10, 10);
        let a = log.path_for("../evil");
        let b = log.path_for("..evil");
        assert_ne!(a, b);
        assert_eq!(a.parent(), Some(Path::new("/data/memory")));
        assert!(a.file_name().unwrap().to_str().unwrap().starts_with("user_evil_"));
    }
}
