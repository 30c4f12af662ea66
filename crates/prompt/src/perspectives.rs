//! The perspective corpus.
//!
//! A bulk source is a run of `<file name="NAME">BODY</file>` blocks. Parsing
//! builds a complete [`PerspectiveSet`] off to the side and then swaps the
//! shared pointer, so readers see either the old set or the new one, never
//! a mix. Selection resamples the extended tier on every call.

use crate::PromptError;
use chrono::{DateTime, Utc};
use rand::seq::IndexedRandom;
use regex_lite::Regex;
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, RwLock};
use std::time::Duration;
use tracing::{info, warn};

static FILE_BLOCK: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"(?s)<file name="([^"]+)">(.*?)</file>"#).ok());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Core,
    Extended,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PerspectiveFragment {
    pub name: String,
    pub body: String,
    pub tier: Tier,
}

/// How much of the corpus a compilation wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectMode {
    /// The curated core only
    Core,
    /// Core plus `k` fragments sampled from the extended tier
    Sampled(usize),
    /// Everything
    All,
}

/// An immutable, versioned snapshot of the corpus.
#[derive(Debug, Default)]
pub struct PerspectiveSet {
    fragments: Vec<Arc<PerspectiveFragment>>,
    pub version: u64,
    pub loaded_at: Option<DateTime<Utc>>,
}

impl PerspectiveSet {
    /// Parse a bulk source. Later duplicates of a name are ignored.
    pub fn parse(source: &str, core_names: &[String], version: u64) -> Self {
        let mut fragments: Vec<Arc<PerspectiveFragment>> = Vec::new();
        let Some(pattern) = FILE_BLOCK.as_ref() else {
            return Self::default();
        };
        for caps in pattern.captures_iter(source) {
            let (Some(raw_name), Some(body)) = (caps.get(1), caps.get(2)) else {
                continue;
            };
            let name = normalize_name(raw_name.as_str());
            if name.is_empty() || fragments.iter().any(|f| f.name == name) {
                continue;
            }
            let tier = if core_names.iter().any(|c| c == &name) {
                Tier::Core
            } else {
                Tier::Extended
            };
            fragments.push(Arc::new(PerspectiveFragment {
                name,
                body: body.as_str().trim().to_string(),
                tier,
            }));
        }

        Self {
            fragments,
            version,
            loaded_at: Some(Utc::now()),
        }
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<PerspectiveFragment>> {
        let name = normalize_name(name);
        self.fragments.iter().find(|f| f.name == name)
    }

    /// Core fragments in corpus order.
    pub fn core(&self) -> Vec<Arc<PerspectiveFragment>> {
        self.of_tier(Tier::Core)
    }

    pub fn extended(&self) -> Vec<Arc<PerspectiveFragment>> {
        self.of_tier(Tier::Extended)
    }

    pub fn all(&self) -> &[Arc<PerspectiveFragment>] {
        &self.fragments
    }

    fn of_tier(&self, tier: Tier) -> Vec<Arc<PerspectiveFragment>> {
        self.fragments
            .iter()
            .filter(|f| f.tier == tier)
            .cloned()
            .collect()
    }

    /// Pick one fragment uniformly from the whole corpus.
    pub fn random(&self) -> Option<Arc<PerspectiveFragment>> {
        self.fragments.choose(&mut rand::rng()).cloned()
    }
}

/// `3-perspectives/three-body.txt` → `three-body`
pub fn normalize_name(raw: &str) -> String {
    let base = raw.trim().rsplit('/').next().unwrap_or_default();
    base.strip_suffix(".txt").unwrap_or(base).to_string()
}

/// The result of [`PerspectiveStore::select`].
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub core: Vec<Arc<PerspectiveFragment>>,
    pub sampled: Vec<Arc<PerspectiveFragment>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerspectiveStats {
    pub version: u64,
    pub total: usize,
    pub core: usize,
    pub extended: usize,
    pub loaded_at: Option<DateTime<Utc>>,
}

pub struct PerspectiveStore {
    current: RwLock<Arc<PerspectiveSet>>,
    core_names: Vec<String>,
    next_version: AtomicU64,
}

impl PerspectiveStore {
    pub fn new(core_names: Vec<String>) -> Self {
        Self {
            current: RwLock::new(Arc::new(PerspectiveSet::default())),
            core_names,
            next_version: AtomicU64::new(1),
        }
    }

    /// The set readers should use right now.
    pub fn snapshot(&self) -> Arc<PerspectiveSet> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn swap(&self, set: PerspectiveSet) {
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(set);
    }

    /// Replace the corpus with the fragments in `source`. Returns how many
    /// were loaded.
    pub fn load(&self, source: &str) -> usize {
        let version = self.next_version.fetch_add(1, Ordering::Relaxed);
        let set = PerspectiveSet::parse(source, &self.core_names, version);
        let count = set.len();
        let core = set.core().len();
        self.swap(set);
        info!(version, count, core, "Perspectives loaded");
        count
    }

    /// Load from a cached bulk file. A missing file leaves the store empty.
    pub fn load_file(&self, path: &Path) -> Result<usize, PromptError> {
        match std::fs::read_to_string(path) {
            Ok(source) => Ok(self.load(&source)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "No perspective cache yet; run a refresh");
                Ok(0)
            }
            Err(e) => Err(PromptError::Io(format!("{}: {e}", path.display()))),
        }
    }

    /// Core subset plus whatever `mode` asks for from the extended tier.
    pub fn select(&self, mode: SelectMode) -> Selection {
        let set = self.snapshot();
        let core = set.core();
        let sampled = match mode {
            SelectMode::Core => Vec::new(),
            SelectMode::All => set.extended(),
            SelectMode::Sampled(k) => set
                .extended()
                .choose_multiple(&mut rand::rng(), k)
                .cloned()
                .collect(),
        };
        Selection { core, sampled }
    }

    /// Fetch the bulk source from `url`, keep a copy in `cache_file`, then
    /// swap it in. An empty or failed download leaves the current set alone.
    pub async fn refresh(&self, url: &str, cache_file: &Path) -> Result<usize, PromptError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PromptError::Fetch(e.to_string()))?;
        let source = client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PromptError::Fetch(format!("{url}: {e}")))?
            .text()
            .await
            .map_err(|e| PromptError::Fetch(format!("{url}: {e}")))?;

        let version = self.next_version.fetch_add(1, Ordering::Relaxed);
        let set = PerspectiveSet::parse(&source, &self.core_names, version);
        if set.is_empty() {
            return Err(PromptError::Fetch(format!(
                "{url}: no perspectives found in {} bytes",
                source.len()
            )));
        }

        write_atomic(cache_file, &source)?;
        let count = set.len();
        self.swap(set);
        info!(url, version, count, "Perspectives refreshed");
        Ok(count)
    }

    pub fn stats(&self) -> PerspectiveStats {
        let set = self.snapshot();
        let core = set.core().len();
        PerspectiveStats {
            version: set.version,
            total: set.len(),
            core,
            extended: set.len() - core,
            loaded_at: set.loaded_at,
        }
    }
}

fn write_atomic(path: &Path, content: &str) -> Result<(), PromptError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| PromptError::Io(format!("{}: {e}", parent.display())))?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, content).map_err(|e| PromptError::Io(format!("{}: {e}", tmp.display())))?;
    std::fs::rename(&tmp, path).map_err(|e| PromptError::Io(format!("{}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const SOURCE: &str = r#"
<file name="3-perspectives/presence.txt">
Being here.
</file>
<file name="3-perspectives/awareness.txt">Noticing.</file>
<file name="2-watch-this/riverwalk.txt">
Walking by the river.
</file>
<file name="views/ness">ness body</file>
<file name="extra-one">one</file>
<file name="extra-two">two</file>
"#;

    fn store() -> PerspectiveStore {
        PerspectiveStore::new(vec!["presence".into(), "awareness".into()])
    }

    #[test]
    fn names_are_normalized() {
        assert_eq!(normalize_name("3-perspectives/three-body.txt"), "three-body");
        assert_eq!(normalize_name("plain"), "plain");
    }

    #[test]
    fn parse_splits_tiers() {
        let store = store();
        assert_eq!(store.load(SOURCE), 6);

        let set = store.snapshot();
        let core: Vec<String> = set.core().iter().map(|f| f.name.clone()).collect();
        assert_eq!(core, vec!["presence", "awareness"]);
        assert_eq!(set.extended().len(), 4);
        assert_eq!(set.get("riverwalk").unwrap().body, "Walking by the river.");
    }

    #[test]
    fn sampled_selection_is_without_replacement() {
        let store = store();
        store.load(SOURCE);

        let selection = store.select(SelectMode::Sampled(3));
        assert_eq!(selection.core.len(), 2);
        assert_eq!(selection.sampled.len(), 3);
        let unique: HashSet<&str> = selection.sampled.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(unique.len(), 3);
        assert!(selection.sampled.iter().all(|f| f.tier == Tier::Extended));

        // Asking for more than exists returns everything once.
        assert_eq!(store.select(SelectMode::Sampled(50)).sampled.len(), 4);
        assert!(store.select(SelectMode::Core).sampled.is_empty());
    }

    #[test]
    fn reload_replaces_wholesale() {
        let store = store();
        store.load(SOURCE);
        let before = store.snapshot();

        store.load(r#"<file name="only">just one</file>"#);
        let after = store.snapshot();

        // A reader holding the old snapshot still sees the whole old set.
        assert_eq!(before.len(), 6);
        assert_eq!(after.len(), 1);
        assert!(after.version > before.version);
    }

    #[test]
    fn missing_cache_file_is_empty_not_error() {
        let store = store();
        let dir = tempfile::TempDir::new().unwrap();
        assert_eq!(store.load_file(&dir.path().join("views.txt")).unwrap(), 0);
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn load_file_reads_bulk_source() {
        let store = store();
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("views.txt");
        std::fs::write(&path, SOURCE).unwrap();
        assert_eq!(store.load_file(&path).unwrap(), 6);
        assert_eq!(store.stats().core, 2);
    }
}
