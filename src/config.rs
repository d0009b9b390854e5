//! CLI-to-domain-config construction: turns parsed `clap` args plus a
//! handful of externally-resolved values (proxy URL, IA auth) into the
//! validated `RunConfig`/`BackfillConfig` the core consumes.

use std::path::PathBuf;

use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use eyre::{eyre, Result};

use crate::backfill::BackfillConfig;
use crate::runner::RunConfig;

const DEFAULT_PROXY_URL: &str = "https://djen-proxy-mhgmawcn3a-rj.a.run.app";

pub fn resolve_proxy_url() -> String {
    std::env::var("DJEN_PROXY_URL")
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_PROXY_URL.to_string())
}

pub fn resolve_ia_auth(dry_run: bool) -> Result<String> {
    match crate::credentials::get_ia_s3_auth() {
        Ok(auth) => Ok(auth),
        Err(err) if dry_run => {
            tracing::debug!(error = %err, "ia_credentials_missing_using_dry_run_placeholder");
            Ok(crate::credentials::DRY_RUN_AUTH.to_string())
        }
        Err(err) => Err(err),
    }
}

fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|e| eyre!("invalid date '{value}': {e}"))
}

#[allow(clippy::too_many_arguments)]
pub fn build_run_config(
    start_date: Option<String>,
    end_date: Option<String>,
    tribunal: Option<String>,
    deadline_minutes: u64,
    max_items: usize,
    workers: usize,
    state_file: Option<PathBuf>,
    dry_run: bool,
    force_recheck: bool,
) -> Result<RunConfig> {
    let today = Utc::now().date_naive();
    let resolved_end = match end_date {
        Some(s) => parse_date(&s)?,
        None => today - ChronoDuration::days(1),
    };
    let resolved_start = match start_date {
        Some(s) => parse_date(&s)?,
        None => resolved_end - ChronoDuration::days(6),
    };

    if resolved_start > resolved_end {
        return Err(eyre!("start date {resolved_start} is after end date {resolved_end}"));
    }
    if workers == 0 {
        return Err(eyre!("workers must be > 0"));
    }

    Ok(RunConfig {
        start_date: resolved_start,
        end_date: resolved_end,
        tribunal,
        deadline_minutes,
        max_items,
        workers,
        state_file,
        djen_proxy_url: resolve_proxy_url(),
        ia_auth: resolve_ia_auth(dry_run)?,
        dry_run,
        force_recheck,
    })
}

#[allow(clippy::too_many_arguments)]
pub fn build_backfill_config(
    start_date: Option<String>,
    lower_bound: String,
    tribunal: Option<String>,
    deadline_minutes: u64,
    max_items: usize,
    workers: usize,
    backfill_state_file: Option<PathBuf>,
    state_file: Option<PathBuf>,
    dry_run: bool,
) -> Result<BackfillConfig> {
    let today = Utc::now().date_naive();
    let resolved_start = match start_date {
        Some(s) => parse_date(&s)?,
        None => today - ChronoDuration::days(1),
    };
    let resolved_lower = parse_date(&lower_bound)?;

    if workers == 0 {
        return Err(eyre!("workers must be > 0"));
    }

    Ok(BackfillConfig {
        start_date: resolved_start,
        lower_bound: Some(resolved_lower),
        tribunal,
        deadline_minutes,
        max_items,
        workers,
        backfill_state_file,
        state_file,
        djen_proxy_url: resolve_proxy_url(),
        ia_auth: resolve_ia_auth(dry_run)?,
        dry_run,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_proxy_url_falls_back_to_default_when_env_unset() {
        std::env::remove_var("DJEN_PROXY_URL");
        assert_eq!(resolve_proxy_url(), DEFAULT_PROXY_URL);
    }

    #[test]
    fn build_run_config_rejects_start_after_end() {
        let result = build_run_config(
            Some("2024-01-15".to_string()),
            Some("2024-01-01".to_string()),
            None,
            45,
            0,
            1,
            None,
            true,
            false,
        );
        assert!(result.is_err());
    }

    #[test]
    fn build_run_config_defaults_to_seven_day_window() {
        let config = build_run_config(None, None, None, 45, 0, 1, None, true, false).unwrap();
        assert_eq!(config.end_date - config.start_date, ChronoDuration::days(6));
    }

    #[test]
    fn build_run_config_rejects_zero_workers() {
        let result = build_run_config(None, None, None, 45, 0, 0, None, true, false);
        assert!(result.is_err());
    }

    #[test]
    fn dry_run_falls_back_to_placeholder_auth_without_credentials() {
        std::env::remove_var("IAS3_ACCESS_KEY");
        std::env::remove_var("IAS3_SECRET_KEY");
        let auth = resolve_ia_auth(true).unwrap();
        assert_eq!(auth, crate::credentials::DRY_RUN_AUTH);
    }
}
