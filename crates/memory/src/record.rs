//! Keyed JSON records on disk.
//!
//! Every durable record in the system (memory logs, memory settings, the
//! admin list, bot configuration, birthdays) is one pretty-printed JSON file
//! written atomically: the new content goes to a sibling `.tmp` file which is
//! then renamed over the old one, so a reader never sees half a record.

use seedkeeper_core::error::MemoryError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Read a JSON record. A missing file is `Ok(None)`.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, MemoryError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(MemoryError::Storage(format!(
                "Failed to read {}: {e}",
                path.display()
            )));
        }
    };

    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| MemoryError::Corrupt {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
}

/// Write a JSON record atomically, creating parent directories as needed.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), MemoryError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            MemoryError::Storage(format!("Failed to create {}: {e}", parent.display()))
        })?;
    }

    let content = serde_json::to_string_pretty(value)
        .map_err(|e| MemoryError::Storage(format!("Failed to serialize record: {e}")))?;

    let tmp = tmp_path(path);
    std::fs::write(&tmp, content)
        .map_err(|e| MemoryError::Storage(format!("Failed to write {}: {e}", tmp.display())))?;
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        MemoryError::Storage(format!("Failed to replace {}: {e}", path.display()))
    })?;

    debug!(path = %path.display(), "Record written");
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// A single JSON document held in memory and flushed on every update.
///
/// Loading never fails: a missing file starts from `T::default()`, and a
/// corrupt one is logged and replaced on the next write.
pub struct JsonRecord<T> {
    path: PathBuf,
    value: RwLock<T>,
}

impl<T> JsonRecord<T>
where
    T: Serialize + DeserializeOwned + Default + Clone,
{
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let value = match read_json(&path) {
            Ok(Some(v)) => v,
            Ok(None) => T::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unreadable record, starting from defaults");
                T::default()
            }
        };
        Self {
            path,
            value: RwLock::new(value),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the current value.
    pub async fn get(&self) -> T {
        self.value.read().await.clone()
    }

    /// Read through a closure without cloning the whole record.
    pub async fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&*self.value.read().await)
    }

    /// Mutate the record and persist it. The in-memory value only changes
    /// when the write succeeds.
    pub async fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, MemoryError> {
        let mut guard = self.value.write().await;
        let mut next = guard.clone();
        let out = f(&mut next);
        write_json_atomic(&self.path, &next)?;
        *guard = next;
        Ok(out)
    }

    /// Re-read the file, keeping the current value if it cannot be parsed.
    pub async fn reload(&self) -> Result<(), MemoryError> {
        let fresh = read_json::<T>(&self.path)?.unwrap_or_default();
        *self.value.write().await = fresh;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct Counters {
        values: BTreeMap<String, u32>,
    }

    #[test]
    fn missing_file_reads_as_none() {
        let dir = TempDir::new().unwrap();
        let value: Option<Counters> = read_json(&dir.path().join("absent.json")).unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = read_json::<Counters>(&path).unwrap_err();
        assert!(matches!(err, MemoryError::Corrupt { .. }));
    }

    #[test]
    fn atomic_write_leaves_no_tmp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("record.json");
        write_json_atomic(&path, &Counters::default()).unwrap();

        assert!(path.exists());
        assert!(!dir.path().join("nested").join("record.json.tmp").exists());
    }

    #[tokio::test]
    async fn update_persists_and_reloads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("counters.json");

        let record: JsonRecord<Counters> = JsonRecord::load(&path);
        record
            .update(|c| c.values.insert("a".into(), 1))
            .await
            .unwrap();

        let again: JsonRecord<Counters> = JsonRecord::load(&path);
        assert_eq!(again.get().await.values.get("a"), Some(&1));
    }

    #[tokio::test]
    async fn corrupt_record_loads_as_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("counters.json");
        std::fs::write(&path, "garbage").unwrap();

        let record: JsonRecord<Counters> = JsonRecord::load(&path);
        assert_eq!(record.get().await, Counters::default());
    }
}
