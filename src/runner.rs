//! Item processing state machine and scan orchestration (§4.7).

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use chrono::NaiveDate;
use futures::StreamExt as _;
use tokio::sync::Semaphore;
use tracing::{error, info};

use crate::archive_client;
use crate::circuit_breaker::CircuitBreaker;
use crate::error::SourceError;
use crate::gap::{discover_gaps, WorkItem};
use crate::source_client;
use crate::state::{self, ItemStatus, MirrorState};

pub struct RunConfig {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub tribunal: Option<String>,
    pub deadline_minutes: u64,
    pub max_items: usize,
    pub workers: usize,
    pub state_file: Option<PathBuf>,
    pub djen_proxy_url: String,
    pub ia_auth: String,
    pub dry_run: bool,
    pub force_recheck: bool,
}

#[derive(Debug, Default)]
pub struct Summary {
    pub total: AtomicU32,
    pub uploaded: AtomicU32,
    pub absent_marked: AtomicU32,
    pub skipped_deadline: AtomicU32,
    pub skipped_circuit: AtomicU32,
    pub failed: AtomicU32,
}

impl Summary {
    fn with_total(total: u32) -> Self {
        Self {
            total: AtomicU32::new(total),
            ..Default::default()
        }
    }

    pub fn processed(&self) -> u32 {
        self.uploaded.load(Ordering::Relaxed) + self.absent_marked.load(Ordering::Relaxed)
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.total.load(Ordering::Relaxed);
        if total == 0 {
            return 1.0;
        }
        f64::from(self.processed()) / f64::from(total)
    }
}

fn deadline_exceeded(run_start: Instant, deadline_minutes: u64) -> bool {
    let deadline = run_start + std::time::Duration::from_secs(deadline_minutes * 60);
    let slack = std::time::Duration::from_secs(30);
    Instant::now() > deadline.checked_sub(slack).unwrap_or(deadline)
}

/// Process a single work item through fetch → classify → upload → record.
#[allow(clippy::too_many_arguments)]
async fn process_item(
    client: &reqwest::Client,
    breaker: &CircuitBreaker,
    item: &WorkItem,
    mirror: &MirrorState,
    config: &RunConfig,
    run_start: Instant,
    summary: &Summary,
) {
    if deadline_exceeded(run_start, config.deadline_minutes) {
        info!(date = %item.date, tribunal = %item.tribunal, "skipped_deadline");
        summary.skipped_deadline.fetch_add(1, Ordering::Relaxed);
        return;
    }

    if !breaker.allow_request().await {
        info!(date = %item.date, tribunal = %item.tribunal, "skipped_circuit_breaker");
        summary.skipped_circuit.fetch_add(1, Ordering::Relaxed);
        return;
    }

    if config.dry_run {
        info!(date = %item.date, tribunal = %item.tribunal, "dry_run_skip");
        summary.uploaded.fetch_add(1, Ordering::Relaxed);
        return;
    }

    let content = match source_client::get_caderno_url(client, &config.djen_proxy_url, &item.tribunal, item.date).await {
        Ok(url) => match source_client::download_zip(client, &url).await {
            Ok(bytes) => bytes,
            Err(SourceError::Absent(absent)) => {
                handle_absent(client, breaker, item, mirror, config, summary, absent.status_code, &absent.reason).await;
                return;
            }
            Err(SourceError::Transient(err)) => {
                error!(date = %item.date, tribunal = %item.tribunal, error = %err, "djen_download_error");
                summary.failed.fetch_add(1, Ordering::Relaxed);
                return;
            }
        },
        Err(SourceError::Absent(absent)) => {
            handle_absent(client, breaker, item, mirror, config, summary, absent.status_code, &absent.reason).await;
            return;
        }
        Err(SourceError::Transient(err)) => {
            error!(date = %item.date, tribunal = %item.tribunal, error = %err, "djen_download_error");
            summary.failed.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };

    match archive_client::upload_zip(client, item.date, &item.tribunal, content, &config.ia_auth).await {
        Ok(outcome) if outcome.is_success() => {
            breaker.record_success().await;
            mirror.mark(item.date, &item.tribunal, ItemStatus::Uploaded).await;
            summary.uploaded.fetch_add(1, Ordering::Relaxed);
        }
        Ok(outcome) => {
            error!(date = %item.date, tribunal = %item.tribunal, status = outcome.status, "ia_upload_failed");
            breaker.record_failure().await;
            summary.failed.fetch_add(1, Ordering::Relaxed);
        }
        Err(err) => {
            error!(date = %item.date, tribunal = %item.tribunal, error = %err, "ia_upload_error");
            breaker.record_failure().await;
            summary.failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_absent(
    client: &reqwest::Client,
    breaker: &CircuitBreaker,
    item: &WorkItem,
    mirror: &MirrorState,
    config: &RunConfig,
    summary: &Summary,
    status_code: u16,
    reason: &str,
) {
    info!(date = %item.date, tribunal = %item.tribunal, status_code, "djen_not_found");
    match archive_client::upload_absent_marker(client, item.date, &item.tribunal, status_code, reason, &config.ia_auth).await {
        Ok(outcome) if outcome.is_success() => {
            breaker.record_success().await;
            mirror.mark(item.date, &item.tribunal, ItemStatus::Absent).await;
            summary.absent_marked.fetch_add(1, Ordering::Relaxed);
        }
        Ok(_) => {
            breaker.record_failure().await;
            summary.failed.fetch_add(1, Ordering::Relaxed);
        }
        Err(_) => {
            breaker.record_failure().await;
            summary.failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Execute the scan pipeline. Returns the process exit code (§6).
pub async fn run(config: RunConfig, client: reqwest::Client) -> i32 {
    let run_start = Instant::now();
    let mirror = match &config.state_file {
        Some(path) => state::load_state(path).await,
        None => MirrorState::empty(),
    };

    let all_tribunals = match &config.tribunal {
        Some(t) => vec![t.clone()],
        None => crate::tribunals::get_tribunal_list(&client, &config.djen_proxy_url).await,
    };

    info!(
        start = %config.start_date,
        end = %config.end_date,
        tribunals = all_tribunals.len(),
        "discovering_gaps"
    );

    let mut work_queue = discover_gaps(
        &client,
        &mirror,
        &all_tribunals,
        config.start_date,
        config.end_date,
        config.force_recheck,
    )
    .await;

    work_queue.sort_by(|a, b| b.date.cmp(&a.date));

    if config.max_items > 0 && work_queue.len() > config.max_items {
        work_queue.truncate(config.max_items);
    }

    if work_queue.is_empty() {
        info!("nothing_to_do");
        if let Some(path) = &config.state_file {
            if let Err(err) = state::save_state(&mirror, path).await {
                error!(error = %err, "state_save_failed");
            }
        }
        return 0;
    }

    info!(total = work_queue.len(), "work_queue_built");

    let summary = Summary::with_total(work_queue.len() as u32);
    let semaphore = Semaphore::new(config.workers.max(1));
    let breaker = CircuitBreaker::default();

    futures::stream::iter(work_queue.iter())
        .for_each_concurrent(config.workers.max(1), |item| {
            let client = &client;
            let breaker = &breaker;
            let mirror = &mirror;
            let config = &config;
            let summary = &summary;
            let semaphore = &semaphore;
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore not closed");
                process_item(client, breaker, item, mirror, config, run_start, summary).await;
            }
        })
        .await;

    if let Some(path) = &config.state_file {
        if let Err(err) = state::save_state(&mirror, path).await {
            error!(error = %err, "state_save_failed");
        }
    }

    info!(
        total = summary.total.load(Ordering::Relaxed),
        uploaded = summary.uploaded.load(Ordering::Relaxed),
        absent_marked = summary.absent_marked.load(Ordering::Relaxed),
        skipped_deadline = summary.skipped_deadline.load(Ordering::Relaxed),
        skipped_circuit = summary.skipped_circuit.load(Ordering::Relaxed),
        failed = summary.failed.load(Ordering::Relaxed),
        success_rate = summary.success_rate(),
        "run_complete"
    );

    if summary.success_rate() >= 0.5 {
        0
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_success_rate_defaults_to_full_when_no_work() {
        let summary = Summary::default();
        assert_eq!(summary.success_rate(), 1.0);
    }

    #[test]
    fn summary_success_rate_reflects_processed_over_total() {
        let summary = Summary::with_total(4);
        summary.uploaded.fetch_add(1, Ordering::Relaxed);
        summary.absent_marked.fetch_add(1, Ordering::Relaxed);
        summary.failed.fetch_add(2, Ordering::Relaxed);
        assert_eq!(summary.success_rate(), 0.5);
        assert_eq!(summary.processed(), 2);
    }

    #[test]
    fn deadline_exceeded_respects_thirty_second_slack() {
        let run_start = Instant::now() - std::time::Duration::from_secs(60 * 10 - 10);
        // 10-minute deadline, 9m50s elapsed: within 30s slack of expiry.
        assert!(deadline_exceeded(run_start, 10));
    }

    #[test]
    fn deadline_not_exceeded_well_before_cutoff() {
        let run_start = Instant::now();
        assert!(!deadline_exceeded(run_start, 45));
    }
}
