//! Backfill engine: per-tribunal backward walk with a 60-empty-day stop
//! rule and cursor auto-advance on restart (§4.8).

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::archive_client;
use crate::backfill_state::{self, BackfillState};
use crate::circuit_breaker::CircuitBreaker;
use crate::error::SourceError;
use crate::source_client;
use crate::state::{self, ItemStatus, MirrorState};

pub struct BackfillConfig {
    pub start_date: NaiveDate,
    pub lower_bound: Option<NaiveDate>,
    pub tribunal: Option<String>,
    pub deadline_minutes: u64,
    pub max_items: usize,
    pub workers: usize,
    pub backfill_state_file: Option<PathBuf>,
    pub state_file: Option<PathBuf>,
    pub djen_proxy_url: String,
    pub ia_auth: String,
    pub dry_run: bool,
}

#[derive(Debug, Default)]
pub struct BackfillSummary {
    pub hits: AtomicU32,
    pub empties: AtomicU32,
    pub errors: AtomicU32,
    pub tribunals_scanned: AtomicU32,
    pub tribunals_stopped: AtomicU32,
    pub tribunals_skipped_stopped: AtomicU32,
}

#[derive(Debug, PartialEq, Eq)]
enum DateOutcome {
    Hit,
    Empty,
    Error,
}

fn deadline_exceeded(deadline: Instant) -> bool {
    let slack = std::time::Duration::from_secs(30);
    Instant::now() > deadline.checked_sub(slack).unwrap_or(deadline)
}

/// Process one `(tribunal, date)` for backfill, mirroring §4.7 with the two
/// divergences in §4.8: a mirror-state fast path, and empty classification
/// deferred until the marker upload itself succeeds.
async fn backfill_process_date(
    client: &reqwest::Client,
    breaker: &CircuitBreaker,
    tribunal: &str,
    date: NaiveDate,
    config: &BackfillConfig,
    bstate: &BackfillState,
    mirror: &MirrorState,
    summary: &BackfillSummary,
) -> DateOutcome {
    match mirror.get_status(date, tribunal).await {
        Some(ItemStatus::Uploaded) => {
            bstate.record_hit(tribunal, date).await;
            summary.hits.fetch_add(1, Ordering::Relaxed);
            return DateOutcome::Hit;
        }
        Some(ItemStatus::Absent) => {
            let stopped = bstate.record_empty(tribunal).await;
            summary.empties.fetch_add(1, Ordering::Relaxed);
            if stopped {
                summary.tribunals_stopped.fetch_add(1, Ordering::Relaxed);
            }
            return DateOutcome::Empty;
        }
        None => {}
    }

    if !breaker.allow_request().await {
        bstate.record_error(tribunal).await;
        summary.errors.fetch_add(1, Ordering::Relaxed);
        return DateOutcome::Error;
    }

    if config.dry_run {
        debug!(tribunal, date = %date, "backfill_dry_run");
        bstate.record_hit(tribunal, date).await;
        summary.hits.fetch_add(1, Ordering::Relaxed);
        return DateOutcome::Hit;
    }

    let content = match source_client::get_caderno_url(client, &config.djen_proxy_url, tribunal, date).await {
        Ok(url) => match source_client::download_zip(client, &url).await {
            Ok(bytes) => bytes,
            Err(SourceError::Absent(absent)) => {
                return backfill_absent(client, breaker, tribunal, date, config, bstate, mirror, summary, absent.status_code, &absent.reason).await;
            }
            Err(SourceError::Transient(err)) => {
                error!(tribunal, date = %date, error = %err, "backfill_download_error");
                bstate.record_error(tribunal).await;
                summary.errors.fetch_add(1, Ordering::Relaxed);
                return DateOutcome::Error;
            }
        },
        Err(SourceError::Absent(absent)) => {
            return backfill_absent(client, breaker, tribunal, date, config, bstate, mirror, summary, absent.status_code, &absent.reason).await;
        }
        Err(SourceError::Transient(err)) => {
            error!(tribunal, date = %date, error = %err, "backfill_download_error");
            bstate.record_error(tribunal).await;
            summary.errors.fetch_add(1, Ordering::Relaxed);
            return DateOutcome::Error;
        }
    };

    match archive_client::upload_zip(client, date, tribunal, content, &config.ia_auth).await {
        Ok(outcome) if outcome.is_success() => {
            breaker.record_success().await;
            mirror.mark(date, tribunal, ItemStatus::Uploaded).await;
            bstate.record_hit(tribunal, date).await;
            summary.hits.fetch_add(1, Ordering::Relaxed);
            DateOutcome::Hit
        }
        Ok(outcome) => {
            error!(tribunal, date = %date, status = outcome.status, "backfill_upload_failed");
            breaker.record_failure().await;
            bstate.record_error(tribunal).await;
            summary.errors.fetch_add(1, Ordering::Relaxed);
            DateOutcome::Error
        }
        Err(err) => {
            error!(tribunal, date = %date, error = %err, "backfill_upload_error");
            breaker.record_failure().await;
            bstate.record_error(tribunal).await;
            summary.errors.fetch_add(1, Ordering::Relaxed);
            DateOutcome::Error
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn backfill_absent(
    client: &reqwest::Client,
    breaker: &CircuitBreaker,
    tribunal: &str,
    date: NaiveDate,
    config: &BackfillConfig,
    bstate: &BackfillState,
    mirror: &MirrorState,
    summary: &BackfillSummary,
    status_code: u16,
    reason: &str,
) -> DateOutcome {
    info!(tribunal, date = %date, status_code, "backfill_empty");
    match archive_client::upload_absent_marker(client, date, tribunal, status_code, reason, &config.ia_auth).await {
        Ok(outcome) if outcome.is_success() => {
            breaker.record_success().await;
            mirror.mark(date, tribunal, ItemStatus::Absent).await;
            let stopped = bstate.record_empty(tribunal).await;
            summary.empties.fetch_add(1, Ordering::Relaxed);
            if stopped {
                summary.tribunals_stopped.fetch_add(1, Ordering::Relaxed);
            }
            DateOutcome::Empty
        }
        Ok(_) => {
            breaker.record_failure().await;
            bstate.record_error(tribunal).await;
            summary.errors.fetch_add(1, Ordering::Relaxed);
            DateOutcome::Error
        }
        Err(_) => {
            breaker.record_failure().await;
            bstate.record_error(tribunal).await;
            summary.errors.fetch_add(1, Ordering::Relaxed);
            DateOutcome::Error
        }
    }
}

/// Scan one tribunal backward until stopped, the lower bound, max-items, or
/// the deadline is reached.
async fn backfill_tribunal(
    client: &reqwest::Client,
    breaker: &CircuitBreaker,
    tribunal: &str,
    config: &BackfillConfig,
    bstate: &BackfillState,
    mirror: &MirrorState,
    deadline: Instant,
    summary: &BackfillSummary,
) {
    let mut prog = bstate.get_or_init(tribunal, config.start_date).await;

    if prog.stopped {
        info!(tribunal, "backfill_skipped_stopped");
        summary.tribunals_skipped_stopped.fetch_add(1, Ordering::Relaxed);
        return;
    }

    summary.tribunals_scanned.fetch_add(1, Ordering::Relaxed);
    let mut items_processed = 0usize;

    loop {
        if let Some(lower_bound) = config.lower_bound {
            if prog.cursor_date < lower_bound {
                break;
            }
        }
        if deadline_exceeded(deadline) {
            info!(tribunal, "backfill_deadline_reached");
            break;
        }
        if config.max_items > 0 && items_processed >= config.max_items {
            break;
        }

        let current_date = prog.cursor_date;
        debug!(tribunal, date = %current_date, empty_streak = prog.empty_streak, "backfill_date");

        backfill_process_date(client, breaker, tribunal, current_date, config, bstate, mirror, summary).await;

        bstate.advance_cursor(tribunal).await;
        items_processed += 1;

        if let Some(path) = &config.backfill_state_file {
            if let Err(err) = backfill_state::save_backfill_state(bstate, path).await {
                error!(error = %err, "backfill_state_save_failed");
            }
        }

        prog = bstate.get_or_init(tribunal, config.start_date).await;
        if prog.stopped {
            info!(tribunal, empty_streak = prog.empty_streak, cursor = %prog.cursor_date, "backfill_tribunal_stopped");
            break;
        }
    }
}

/// Execute the backfill pipeline. Returns the process exit code.
pub async fn run_backfill(config: BackfillConfig, client: reqwest::Client) -> i32 {
    let deadline = Instant::now() + std::time::Duration::from_secs(config.deadline_minutes * 60);

    let bstate = Arc::new(match &config.backfill_state_file {
        Some(path) => backfill_state::load_backfill_state(path).await,
        None => BackfillState::empty(),
    });
    let mirror = Arc::new(match &config.state_file {
        Some(path) => state::load_state(path).await,
        None => MirrorState::empty(),
    });

    let all_tribunals = match &config.tribunal {
        Some(t) => vec![t.clone()],
        None => crate::tribunals::get_tribunal_list(&client, &config.djen_proxy_url).await,
    };

    for t in &all_tribunals {
        if bstate.ensure_cursor_at_least(t, config.start_date).await {
            info!(tribunal = %t, new_cursor = %config.start_date, "cursor_auto_advanced");
        }
    }

    let summary = Arc::new(BackfillSummary::default());
    let breaker = Arc::new(CircuitBreaker::default());
    let queue = Arc::new(Mutex::new(all_tribunals));
    let config = Arc::new(config);

    let mut handles = Vec::new();
    for _ in 0..config.workers.max(1) {
        let client = client.clone();
        let breaker = breaker.clone();
        let bstate = bstate.clone();
        let mirror = mirror.clone();
        let summary = summary.clone();
        let queue = queue.clone();
        let config = config.clone();

        handles.push(tokio::spawn(async move {
            loop {
                if deadline_exceeded(deadline) {
                    break;
                }
                let next = {
                    let mut q = queue.lock().await;
                    q.pop()
                };
                let Some(tribunal) = next else { break };
                backfill_tribunal(&client, &breaker, &tribunal, &config, &bstate, &mirror, deadline, &summary).await;
            }
        }));
    }
    for h in handles {
        let _ = h.await;
    }

    if let Some(path) = &config.backfill_state_file {
        if let Err(err) = backfill_state::save_backfill_state(&bstate, path).await {
            error!(error = %err, "backfill_state_save_failed");
        }
    }
    if let Some(path) = &config.state_file {
        if let Err(err) = state::save_state(&mirror, path).await {
            error!(error = %err, "state_save_failed");
        }
    }

    info!(
        tribunals_scanned = summary.tribunals_scanned.load(Ordering::Relaxed),
        tribunals_stopped = summary.tribunals_stopped.load(Ordering::Relaxed),
        tribunals_skipped_stopped = summary.tribunals_skipped_stopped.load(Ordering::Relaxed),
        hits = summary.hits.load(Ordering::Relaxed),
        empties = summary.empties.load(Ordering::Relaxed),
        errors = summary.errors.load(Ordering::Relaxed),
        "backfill_complete"
    );

    0
}
