mod archive_client;
mod backfill;
mod backfill_state;
mod circuit_breaker;
mod config;
mod credentials;
mod error;
mod gap;
mod retry;
mod runner;
mod source_client;
mod state;
mod tribunals;

use std::fs::OpenOptions;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use eyre::{eyre, Result};
use fs2::FileExt;

#[derive(Parser, Debug)]
#[command(name = "djen-backup", version, about = "Mirror DJEN judicial bulletins to the Internet Archive")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan recent dates for gaps and upload missing items.
    Scan {
        /// Start date (YYYY-MM-DD). Default: 7 days ago.
        #[arg(long)]
        start_date: Option<String>,
        /// End date (YYYY-MM-DD). Default: yesterday.
        #[arg(long)]
        end_date: Option<String>,
        /// Process a single tribunal (e.g. TJSP).
        #[arg(long)]
        tribunal: Option<String>,
        /// Time budget in minutes.
        #[arg(long, default_value_t = 45)]
        deadline_minutes: u64,
        /// Cap work queue size (0 = unlimited).
        #[arg(long, default_value_t = 0)]
        max_items: usize,
        /// Parallel workers.
        #[arg(long, default_value_t = 1)]
        workers: usize,
        /// Path to persistent state cache JSON.
        #[arg(long)]
        state_file: Option<PathBuf>,
        /// Log actions without uploading.
        #[arg(long)]
        dry_run: bool,
        /// Ignore state cache; re-query IA metadata for all dates.
        #[arg(long)]
        force_recheck: bool,
    },
    /// Scan backward through history per tribunal. Stops a tribunal after
    /// 60 consecutive authoritative empty days.
    Backfill {
        /// Newest date to begin backward scan (YYYY-MM-DD). Default: yesterday.
        #[arg(long)]
        start_date: Option<String>,
        /// Oldest date to scan (YYYY-MM-DD). Required.
        #[arg(long)]
        lower_bound: String,
        /// Backfill a single tribunal (e.g. TJSP).
        #[arg(long)]
        tribunal: Option<String>,
        /// Time budget in minutes.
        #[arg(long, default_value_t = 45)]
        deadline_minutes: u64,
        /// Max dates per tribunal per run (0 = unlimited).
        #[arg(long, default_value_t = 0)]
        max_items: usize,
        /// Concurrent tribunals to scan.
        #[arg(long, default_value_t = 1)]
        workers: usize,
        /// Path to backfill progress JSON.
        #[arg(long)]
        backfill_state_file: Option<PathBuf>,
        /// Path to IA state cache JSON (shared with scan).
        #[arg(long)]
        state_file: Option<PathBuf>,
        /// Log actions without uploading.
        #[arg(long)]
        dry_run: bool,
    },
    /// Show per-tribunal backfill progress.
    Status {
        /// Path to backfill progress JSON.
        #[arg(long)]
        backfill_state_file: PathBuf,
    },
    /// Reset stopped tribunal(s) for re-scanning.
    Reset {
        /// Path to backfill progress JSON.
        #[arg(long)]
        backfill_state_file: PathBuf,
        /// Reset a specific tribunal. Omit for --all.
        #[arg(long)]
        tribunal: Option<String>,
        /// Reset all stopped tribunals.
        #[arg(long)]
        all: bool,
    },
}

fn acquire_lock(state_file: &Option<PathBuf>) -> Result<Option<std::fs::File>> {
    let Some(state_file) = state_file else {
        return Ok(None);
    };
    if let Some(parent) = state_file.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| eyre!("failed to create state directory {}: {e}", parent.display()))?;
        }
    }
    let lock_path = state_file.with_extension("lock");
    let lock_file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|e| eyre!("failed to open lock file {}: {e}", lock_path.display()))?;
    lock_file.try_lock_exclusive().map_err(|e| {
        eyre!("djen-backup already running or lock unavailable ({}): {e}", lock_path.display())
    })?;
    Ok(Some(lock_file))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let client = reqwest::Client::new();

    let exit_code = match args.command {
        Command::Scan {
            start_date,
            end_date,
            tribunal,
            deadline_minutes,
            max_items,
            workers,
            state_file,
            dry_run,
            force_recheck,
        } => {
            let _lock_guard = acquire_lock(&state_file)?;
            let run_config = config::build_run_config(
                start_date,
                end_date,
                tribunal,
                deadline_minutes,
                max_items,
                workers,
                state_file,
                dry_run,
                force_recheck,
            )?;

            tracing::info!(
                start = %run_config.start_date,
                end = %run_config.end_date,
                tribunal = run_config.tribunal.as_deref().unwrap_or("all"),
                workers = run_config.workers,
                deadline_min = run_config.deadline_minutes,
                dry_run = run_config.dry_run,
                "starting_scan"
            );

            runner::run(run_config, client).await
        }
        Command::Backfill {
            start_date,
            lower_bound,
            tribunal,
            deadline_minutes,
            max_items,
            workers,
            backfill_state_file,
            state_file,
            dry_run,
        } => {
            let _lock_guard = acquire_lock(&backfill_state_file.clone().or_else(|| state_file.clone()))?;
            let backfill_config = config::build_backfill_config(
                start_date,
                lower_bound,
                tribunal,
                deadline_minutes,
                max_items,
                workers,
                backfill_state_file,
                state_file,
                dry_run,
            )?;

            tracing::info!(
                start = %backfill_config.start_date,
                lower_bound = ?backfill_config.lower_bound,
                tribunal = backfill_config.tribunal.as_deref().unwrap_or("all"),
                workers = backfill_config.workers,
                deadline_min = backfill_config.deadline_minutes,
                dry_run = backfill_config.dry_run,
                "starting_backfill"
            );

            backfill::run_backfill(backfill_config, client).await
        }
        Command::Status { backfill_state_file } => {
            let bstate = backfill_state::load_backfill_state(&backfill_state_file).await;
            let progress = bstate.get_all_progress().await;

            if progress.is_empty() {
                println!("No backfill state found.");
                return Ok(());
            }

            let running = progress.values().filter(|p| !p.stopped).count();
            let stopped = progress.values().filter(|p| p.stopped).count();
            println!("Tribunals: {} total, {running} running, {stopped} stopped\n", progress.len());

            for (code, prog) in &progress {
                let flag = if prog.stopped { "STOPPED" } else { "running" };
                let hit_str = prog
                    .last_hit_date
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "never".to_string());
                println!(
                    "  {code:12}  {flag:8}  cursor={}  streak={:3}  last_hit={hit_str}",
                    prog.cursor_date, prog.empty_streak
                );
            }
            0
        }
        Command::Reset {
            backfill_state_file,
            tribunal,
            all,
        } => {
            if tribunal.is_none() && !all {
                eprintln!("Error: provide --tribunal CODE or --all");
                return Ok(());
            }

            let bstate = backfill_state::load_backfill_state(&backfill_state_file).await;
            let mut count = 0;

            if let Some(tribunal) = &tribunal {
                if bstate.reset_tribunal(tribunal).await {
                    println!("Reset {tribunal}");
                    count = 1;
                } else {
                    eprintln!("Tribunal {tribunal} not found in state.");
                }
            } else {
                let progress = bstate.get_all_progress().await;
                for (code, prog) in progress {
                    if prog.stopped {
                        bstate.reset_tribunal(&code).await;
                        println!("Reset {code}");
                        count += 1;
                    }
                }
            }

            if count > 0 {
                backfill_state::save_backfill_state(&bstate, &backfill_state_file).await?;
                println!("\n{count} tribunal(s) reset.");
            } else {
                println!("Nothing to reset.");
            }
            0
        }
    };

    std::process::exit(exit_code);
}
