//! IA-mirror state: which (date, tribunal) pairs are already resolved (§4.5).
//!
//! Persisted as a single JSON file, loaded once at startup and written back
//! atomically (temp file + rename) after each run, mirroring the teacher's
//! keeper state file.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{NaiveDate, Utc};
use eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

const STATE_VERSION: u32 = 1;
const PRUNE_TTL_DAYS: i64 = 90;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Uploaded,
    Absent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StateDoc {
    version: u32,
    updated_at: String,
    #[serde(default, rename = "entries")]
    dates: BTreeMap<String, BTreeMap<String, ItemStatus>>,
}

impl Default for StateDoc {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            updated_at: Utc::now().to_rfc3339(),
            dates: BTreeMap::new(),
        }
    }
}

/// Tracks which tribunals have already been resolved (uploaded or proven
/// absent) for each date, so a rerun never redoes settled work.
pub struct MirrorState {
    inner: Mutex<StateDoc>,
}

impl MirrorState {
    fn new(doc: StateDoc) -> Self {
        Self {
            inner: Mutex::new(doc),
        }
    }

    pub fn empty() -> Self {
        Self::new(StateDoc::default())
    }

    pub async fn is_done(&self, date: NaiveDate, tribunal: &str) -> bool {
        let doc = self.inner.lock().await;
        doc.dates
            .get(&date.format("%Y-%m-%d").to_string())
            .map(|t| t.contains_key(tribunal))
            .unwrap_or(false)
    }

    pub async fn get_status(&self, date: NaiveDate, tribunal: &str) -> Option<ItemStatus> {
        let doc = self.inner.lock().await;
        doc.dates
            .get(&date.format("%Y-%m-%d").to_string())
            .and_then(|t| t.get(tribunal))
            .copied()
    }

    pub async fn get_done_tribunals(&self, date: NaiveDate) -> BTreeMap<String, ItemStatus> {
        let doc = self.inner.lock().await;
        doc.dates
            .get(&date.format("%Y-%m-%d").to_string())
            .cloned()
            .unwrap_or_default()
    }

    pub async fn mark(&self, date: NaiveDate, tribunal: &str, status: ItemStatus) {
        let mut doc = self.inner.lock().await;
        doc.dates
            .entry(date.format("%Y-%m-%d").to_string())
            .or_default()
            .insert(tribunal.to_string(), status);
        doc.updated_at = Utc::now().to_rfc3339();
    }

    /// Seed already-known tribunals for a date (e.g. from an IA metadata
    /// listing) without disturbing entries the caller doesn't mention.
    pub async fn seed(&self, date: NaiveDate, known: BTreeMap<String, ItemStatus>) {
        if known.is_empty() {
            return;
        }
        let mut doc = self.inner.lock().await;
        let entry = doc.dates.entry(date.format("%Y-%m-%d").to_string()).or_default();
        for (tribunal, status) in known {
            entry.entry(tribunal).or_insert(status);
        }
        doc.updated_at = Utc::now().to_rfc3339();
    }

    /// Drop date buckets older than the retention window, keyed on ISO-8601
    /// lexicographic ordering so no date parsing is needed on the cutoff.
    pub async fn prune(&self, today: NaiveDate) -> usize {
        let cutoff = today - chrono::Duration::days(PRUNE_TTL_DAYS);
        let cutoff_key = cutoff.format("%Y-%m-%d").to_string();
        let mut doc = self.inner.lock().await;
        let before = doc.dates.len();
        doc.dates.retain(|k, _| k.as_str() >= cutoff_key.as_str());
        let removed = before - doc.dates.len();
        if removed > 0 {
            doc.updated_at = Utc::now().to_rfc3339();
        }
        removed
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let pruned = self.prune(Utc::now().date_naive()).await;
        if pruned > 0 {
            info!(removed = pruned, "state_cache_pruned");
        }
        let doc = self.inner.lock().await;
        save_doc(&doc, path.as_ref())
    }
}

fn save_doc(doc: &StateDoc, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .map_err(|e| eyre!("failed to create state directory {}: {e}", parent.display()))?;
        }
    }

    let json = serde_json::to_string_pretty(doc)
        .map_err(|e| eyre!("failed to serialize mirror state: {e}"))?;

    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, json)
        .map_err(|e| eyre!("failed to write temp state file {}: {e}", tmp_path.display()))?;

    if let Err(err) = fs::rename(&tmp_path, path) {
        if cfg!(windows) {
            let _ = fs::remove_file(path);
            fs::rename(&tmp_path, path)
                .map_err(|e| eyre!("failed to replace state file {}: {e}", path.display()))?;
        } else {
            return Err(eyre!("failed to replace state file {}: {err}", path.display()));
        }
    }
    Ok(())
}

/// Load from `path`, tolerating a missing or corrupt file — state is a cache,
/// never a source of truth, so a cold start just means redoing some work.
pub async fn load_state(path: impl AsRef<Path>) -> MirrorState {
    let path = path.as_ref();
    if !path.exists() {
        return MirrorState::empty();
    }
    match fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str::<StateDoc>(&raw) {
            Ok(doc) => MirrorState::new(doc),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "state_file_corrupt_resetting");
                MirrorState::empty()
            }
        },
        Err(err) => {
            warn!(path = %path.display(), error = %err, "state_file_unreadable_resetting");
            MirrorState::empty()
        }
    }
}

pub async fn save_state(state: &MirrorState, path: impl AsRef<Path>) -> Result<()> {
    state.save(path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[tokio::test]
    async fn mark_and_is_done_roundtrip() {
        let state = MirrorState::empty();
        let date = d("2024-01-15");
        assert!(!state.is_done(date, "TJSP").await);
        state.mark(date, "TJSP", ItemStatus::Uploaded).await;
        assert!(state.is_done(date, "TJSP").await);
        assert!(!state.is_done(date, "TJRJ").await);
    }

    #[tokio::test]
    async fn seed_does_not_overwrite_existing_entries() {
        let state = MirrorState::empty();
        let date = d("2024-01-15");
        state.mark(date, "TJSP", ItemStatus::Uploaded).await;

        let mut known = BTreeMap::new();
        known.insert("TJSP".to_string(), ItemStatus::Absent);
        known.insert("TJRJ".to_string(), ItemStatus::Absent);
        state.seed(date, known).await;

        let done = state.get_done_tribunals(date).await;
        assert_eq!(done.get("TJSP"), Some(&ItemStatus::Uploaded));
        assert_eq!(done.get("TJRJ"), Some(&ItemStatus::Absent));
    }

    #[tokio::test]
    async fn prune_removes_entries_older_than_ttl() {
        let state = MirrorState::empty();
        let old_date = d("2023-01-01");
        let recent_date = d("2024-01-10");
        state.mark(old_date, "TJSP", ItemStatus::Uploaded).await;
        state.mark(recent_date, "TJSP", ItemStatus::Uploaded).await;

        let today = d("2024-01-15");
        let removed = state.prune(today).await;
        assert_eq!(removed, 1);
        assert!(!state.is_done(old_date, "TJSP").await);
        assert!(state.is_done(recent_date, "TJSP").await);
    }

    #[tokio::test]
    async fn save_then_load_roundtrips_through_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        let state = MirrorState::empty();
        let date = Utc::now().date_naive();
        state.mark(date, "TJSP", ItemStatus::Uploaded).await;
        save_state(&state, &path).await.unwrap();

        let loaded = load_state(&path).await;
        assert!(loaded.is_done(date, "TJSP").await);
    }

    #[tokio::test]
    async fn save_prunes_entries_older_than_ttl() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        let state = MirrorState::empty();
        let old_date = Utc::now().date_naive() - chrono::Duration::days(PRUNE_TTL_DAYS + 1);
        let recent_date = Utc::now().date_naive();
        state.mark(old_date, "TJSP", ItemStatus::Uploaded).await;
        state.mark(recent_date, "TJSP", ItemStatus::Uploaded).await;
        save_state(&state, &path).await.unwrap();

        let loaded = load_state(&path).await;
        assert!(!loaded.is_done(old_date, "TJSP").await);
        assert!(loaded.is_done(recent_date, "TJSP").await);
    }

    #[tokio::test]
    async fn load_state_tolerates_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("does-not-exist.json");
        let loaded = load_state(&path).await;
        assert!(loaded.get_done_tribunals(d("2024-01-15")).await.is_empty());
    }

    #[tokio::test]
    async fn load_state_tolerates_corrupt_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{not valid json").unwrap();
        let loaded = load_state(&path).await;
        assert!(loaded.get_done_tribunals(d("2024-01-15")).await.is_empty());
    }
}
