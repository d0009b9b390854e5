//! Gap discovery: for each date in a window, find tribunals missing from
//! the mirror, consulting cache before the authoritative listing (§4.6).

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::NaiveDate;
use futures::future::join_all;
use tokio::sync::Semaphore;

use crate::archive_client;
use crate::state::MirrorState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub date: NaiveDate,
    pub tribunal: String,
}

/// Dates from `end` down to `start`, inclusive, newest first.
fn date_range(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut dates = Vec::new();
    let mut current = end;
    while current >= start {
        dates.push(current);
        current -= chrono::Duration::days(1);
    }
    dates
}

#[allow(clippy::too_many_arguments)]
async fn check_date_from(
    client: &reqwest::Client,
    metadata_base: &str,
    date: NaiveDate,
    tribunals: &BTreeSet<String>,
    state: &MirrorState,
    force_recheck: bool,
    semaphore: &Semaphore,
) -> Vec<WorkItem> {
    if !force_recheck {
        let cached = state.get_done_tribunals(date).await;
        let remaining: Vec<&String> = tribunals.iter().filter(|t| !cached.contains_key(*t)).collect();
        if remaining.is_empty() {
            return Vec::new();
        }
    }

    let existing = {
        let _permit = semaphore.acquire().await.expect("semaphore not closed");
        archive_client::fetch_existing_from(client, metadata_base, date).await
    };

    state.seed(date, existing.clone()).await;

    let done: BTreeSet<String> = if force_recheck {
        existing.keys().cloned().collect()
    } else {
        state.get_done_tribunals(date).await.keys().cloned().collect()
    };

    let mut gaps: Vec<String> = tribunals.difference(&done).cloned().collect();
    gaps.sort();
    gaps.into_iter()
        .map(|tribunal| WorkItem { date, tribunal })
        .collect()
}

async fn discover_gaps_from(
    client: &reqwest::Client,
    metadata_base: &str,
    state: &MirrorState,
    tribunals: &[String],
    start_date: NaiveDate,
    end_date: NaiveDate,
    force_recheck: bool,
) -> Vec<WorkItem> {
    let dates = date_range(start_date, end_date);
    let tribunal_set: BTreeSet<String> = tribunals.iter().cloned().collect();
    let semaphore = Arc::new(Semaphore::new(5));

    let futures = dates.into_iter().map(|d| {
        let semaphore = semaphore.clone();
        let tribunal_set = &tribunal_set;
        async move {
            check_date_from(client, metadata_base, d, tribunal_set, state, force_recheck, &semaphore).await
        }
    });

    let results = join_all(futures).await;
    results.into_iter().flatten().collect()
}

/// Build the work queue of `(date, tribunal)` pairs not yet on the archive,
/// newest-date-first.
pub async fn discover_gaps(
    client: &reqwest::Client,
    state: &MirrorState,
    tribunals: &[String],
    start_date: NaiveDate,
    end_date: NaiveDate,
    force_recheck: bool,
) -> Vec<WorkItem> {
    discover_gaps_from(
        client,
        "https://archive.org/metadata",
        state,
        tribunals,
        start_date,
        end_date,
        force_recheck,
    )
    .await
}
