//! Per-tribunal backward-walk progress (§3 TribunalProgress, §4.8).

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{NaiveDate, Utc};
use eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

const STATE_VERSION: u32 = 1;
pub const STOP_THRESHOLD: u32 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LastResult {
    Hit,
    Empty,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TribunalProgress {
    pub cursor_date: NaiveDate,
    #[serde(default)]
    pub empty_streak: u32,
    #[serde(default)]
    pub stopped: bool,
    #[serde(default)]
    pub last_hit_date: Option<NaiveDate>,
    #[serde(default)]
    pub last_checked_at: Option<String>,
    #[serde(default)]
    pub last_result: Option<LastResult>,
}

impl TribunalProgress {
    fn new(cursor_date: NaiveDate) -> Self {
        Self {
            cursor_date,
            empty_streak: 0,
            stopped: false,
            last_hit_date: None,
            last_checked_at: None,
            last_result: None,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BackfillDoc {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    updated_at: String,
    #[serde(default)]
    tribunals: BTreeMap<String, TribunalProgress>,
}

fn default_version() -> u32 {
    STATE_VERSION
}

/// Per-tribunal backfill cursors, guarded by a single mutex (§5: each
/// tribunal walker owns its own progress, so the only cross-tribunal
/// contention is this map itself, not a hot-path concern).
pub struct BackfillState {
    inner: Mutex<BackfillDoc>,
}

impl BackfillState {
    pub fn empty() -> Self {
        Self {
            inner: Mutex::new(BackfillDoc {
                version: STATE_VERSION,
                updated_at: Utc::now().to_rfc3339(),
                tribunals: BTreeMap::new(),
            }),
        }
    }

    pub async fn get_or_init(&self, tribunal: &str, start_date: NaiveDate) -> TribunalProgress {
        let mut doc = self.inner.lock().await;
        doc.tribunals
            .entry(tribunal.to_string())
            .or_insert_with(|| TribunalProgress::new(start_date))
            .clone()
    }

    pub async fn record_hit(&self, tribunal: &str, d: NaiveDate) {
        let mut doc = self.inner.lock().await;
        if let Some(prog) = doc.tribunals.get_mut(tribunal) {
            prog.empty_streak = 0;
            prog.last_hit_date = Some(d);
            prog.last_result = Some(LastResult::Hit);
            prog.last_checked_at = Some(Utc::now().to_rfc3339());
        }
    }

    /// Returns true if this call just crossed the stop threshold.
    pub async fn record_empty(&self, tribunal: &str) -> bool {
        let mut doc = self.inner.lock().await;
        let Some(prog) = doc.tribunals.get_mut(tribunal) else {
            return false;
        };
        prog.empty_streak += 1;
        prog.last_result = Some(LastResult::Empty);
        prog.last_checked_at = Some(Utc::now().to_rfc3339());
        if prog.empty_streak >= STOP_THRESHOLD {
            prog.stopped = true;
            return true;
        }
        false
    }

    pub async fn record_error(&self, tribunal: &str) {
        let mut doc = self.inner.lock().await;
        if let Some(prog) = doc.tribunals.get_mut(tribunal) {
            prog.last_result = Some(LastResult::Error);
            prog.last_checked_at = Some(Utc::now().to_rfc3339());
        }
    }

    pub async fn advance_cursor(&self, tribunal: &str) {
        let mut doc = self.inner.lock().await;
        if let Some(prog) = doc.tribunals.get_mut(tribunal) {
            prog.cursor_date -= chrono::Duration::days(1);
        }
    }

    /// Returns true if the tribunal existed and was found.
    pub async fn reset_tribunal(&self, tribunal: &str) -> bool {
        let mut doc = self.inner.lock().await;
        if let Some(prog) = doc.tribunals.get_mut(tribunal) {
            prog.stopped = false;
            prog.empty_streak = 0;
            true
        } else {
            false
        }
    }

    /// Advance a stalled cursor forward to `min_date`, un-stopping it — the
    /// ratchet (§6 scenario: Ratchet advance). Returns true if changed.
    pub async fn ensure_cursor_at_least(&self, tribunal: &str, min_date: NaiveDate) -> bool {
        let mut doc = self.inner.lock().await;
        let Some(prog) = doc.tribunals.get_mut(tribunal) else {
            return false;
        };
        if prog.cursor_date < min_date {
            prog.cursor_date = min_date;
            if prog.stopped {
                prog.stopped = false;
                prog.empty_streak = 0;
            }
            true
        } else {
            false
        }
    }

    pub async fn get_all_progress(&self) -> BTreeMap<String, TribunalProgress> {
        let doc = self.inner.lock().await;
        doc.tribunals.clone()
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut doc = self.inner.lock().await;
        doc.updated_at = Utc::now().to_rfc3339();
        save_doc(&doc, path.as_ref())
    }
}

fn save_doc(doc: &BackfillDoc, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .map_err(|e| eyre!("failed to create backfill state directory {}: {e}", parent.display()))?;
        }
    }

    let json = serde_json::to_string_pretty(doc)
        .map_err(|e| eyre!("failed to serialize backfill state: {e}"))?;

    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, json)
        .map_err(|e| eyre!("failed to write temp backfill state {}: {e}", tmp_path.display()))?;

    if let Err(err) = fs::rename(&tmp_path, path) {
        if cfg!(windows) {
            let _ = fs::remove_file(path);
            fs::rename(&tmp_path, path)
                .map_err(|e| eyre!("failed to replace backfill state {}: {e}", path.display()))?;
        } else {
            return Err(eyre!("failed to replace backfill state {}: {err}", path.display()));
        }
    }
    Ok(())
}

pub async fn load_backfill_state(path: impl AsRef<Path>) -> BackfillState {
    let path = path.as_ref();
    if !path.exists() {
        return BackfillState::empty();
    }
    match fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str::<BackfillDoc>(&raw) {
            Ok(doc) => BackfillState {
                inner: Mutex::new(doc),
            },
            Err(err) => {
                warn!(path = %path.display(), error = %err, "backfill_state_corrupt");
                BackfillState::empty()
            }
        },
        Err(err) => {
            warn!(path = %path.display(), error = %err, "backfill_state_unreadable");
            BackfillState::empty()
        }
    }
}

pub async fn save_backfill_state(state: &BackfillState, path: impl AsRef<Path>) -> Result<()> {
    state.save(path).await
}
