//! Garden keepers: the admin list.
//!
//! Stored in `admins.json`. Users named in `admins.bootstrap` are always
//! keepers and cannot be removed through chat.

use chrono::{DateTime, Utc};
use seedkeeper_core::error::MemoryError;
use seedkeeper_memory::JsonRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeeperList {
    #[serde(default)]
    pub admins: BTreeSet<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    Removed,
    NotAdmin,
    /// Configured at startup; only the config file can change it
    Bootstrap,
}

pub struct KeeperStore {
    record: JsonRecord<KeeperList>,
    bootstrap: BTreeSet<String>,
}

impl KeeperStore {
    pub fn load(path: impl Into<PathBuf>, bootstrap: &[String]) -> Self {
        Self {
            record: JsonRecord::load(path),
            bootstrap: bootstrap.iter().cloned().collect(),
        }
    }

    pub async fn is_admin(&self, user_id: &str) -> bool {
        self.bootstrap.contains(user_id) || self.record.read(|l| l.admins.contains(user_id)).await
    }

    pub fn is_bootstrap(&self, user_id: &str) -> bool {
        self.bootstrap.contains(user_id)
    }

    /// Returns `false` if the user already was a keeper.
    pub async fn add(&self, user_id: &str, added_by: &str) -> Result<bool, MemoryError> {
        if self.bootstrap.contains(user_id) {
            return Ok(false);
        }
        let added = self
            .record
            .update(|l| {
                let added = l.admins.insert(user_id.to_string());
                if added {
                    l.updated_at = Some(Utc::now());
                }
                added
            })
            .await?;
        if added {
            info!(user_id, added_by, "Keeper added");
        }
        Ok(added)
    }

    pub async fn remove(&self, user_id: &str, removed_by: &str) -> Result<Removal, MemoryError> {
        if self.bootstrap.contains(user_id) {
            return Ok(Removal::Bootstrap);
        }
        let removed = self
            .record
            .update(|l| {
                let removed = l.admins.remove(user_id);
                if removed {
                    l.updated_at = Some(Utc::now());
                }
                removed
            })
            .await?;
        if removed {
            info!(user_id, removed_by, "Keeper removed");
            Ok(Removal::Removed)
        } else {
            Ok(Removal::NotAdmin)
        }
    }

    /// Bootstrap keepers and stored keepers, sorted.
    pub async fn list(&self) -> Vec<String> {
        let stored = self.record.read(|l| l.admins.clone()).await;
        stored.union(&self.bootstrap).cloned().collect()
    }

    pub async fn reload(&self) -> Result<(), MemoryError> {
        self.record.reload().await
    }
}

/// Accepts `<@123>`, `<@!123>`, or a bare numeric id.
pub fn parse_user_mention(raw: &str) -> Option<String> {
    let id = raw
        .trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .trim_start_matches('@')
        .trim_start_matches('!');
    (!id.is_empty() && id.chars().all(|c| c.is_ascii_digit())).then(|| id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &tempfile::TempDir) -> KeeperStore {
        KeeperStore::load(dir.path().join("admins.json"), &["100".to_string()])
    }

    #[tokio::test]
    async fn add_and_remove_persist() {
        let dir = tempfile::tempdir().unwrap();
        let keepers = store(&dir);

        assert!(!keepers.is_admin("200").await);
        assert!(keepers.add("200", "100").await.unwrap());
        assert!(!keepers.add("200", "100").await.unwrap());
        assert!(keepers.is_admin("200").await);

        let reopened = store(&dir);
        assert!(reopened.is_admin("200").await);
        assert_eq!(reopened.list().await, vec!["100".to_string(), "200".to_string()]);

        assert_eq!(reopened.remove("200", "100").await.unwrap(), Removal::Removed);
        assert_eq!(reopened.remove("200", "100").await.unwrap(), Removal::NotAdmin);
    }

    #[tokio::test]
    async fn bootstrap_keepers_are_fixed() {
        let dir = tempfile::tempdir().unwrap();
        let keepers = store(&dir);
        assert!(keepers.is_admin("100").await);
        assert_eq!(keepers.remove("100", "100").await.unwrap(), Removal::Bootstrap);
        assert!(keepers.is_admin("100").await);
    }

    #[test]
    fn mentions_parse_to_ids() {
        assert_eq!(parse_user_mention("<@123>"), Some("123".into()));
        assert_eq!(parse_user_mention("<@!456>"), Some("456".into()));
        assert_eq!(parse_user_mention("789"), Some("789".into()));
        assert_eq!(parse_user_mention("<@fern>"), None);
        assert_eq!(parse_user_mention(""), None);
    }
}
