//! Internet Archive S3-compatible credential resolution (§6).

use std::path::PathBuf;

use eyre::{eyre, Result};
use tracing::debug;

/// Resolve the `Authorization` header value the core consumes verbatim:
/// `LOW {access}:{secret}`.
///
/// Resolution order: `IAS3_ACCESS_KEY`/`IAS3_SECRET_KEY` environment
/// variables, then `~/.config/internetarchive/ia.ini` `[s3]` section.
pub fn get_ia_s3_auth() -> Result<String> {
    let access = std::env::var("IAS3_ACCESS_KEY").unwrap_or_default().trim().to_string();
    let secret = std::env::var("IAS3_SECRET_KEY").unwrap_or_default().trim().to_string();
    if !access.is_empty() && !secret.is_empty() {
        debug!("ia_credentials_from_env");
        return Ok(format!("LOW {access}:{secret}"));
    }

    if let Some(home) = dirs_home() {
        let ini_path = home.join(".config").join("internetarchive").join("ia.ini");
        if ini_path.is_file() {
            if let Some((access, secret)) = read_ini_s3_section(&ini_path) {
                debug!(path = %ini_path.display(), "ia_credentials_from_ini");
                return Ok(format!("LOW {access}:{secret}"));
            }
        }
    }

    Err(eyre!(
        "Internet Archive S3 credentials not found. \
         Set IAS3_ACCESS_KEY and IAS3_SECRET_KEY environment variables, \
         or configure ~/.config/internetarchive/ia.ini [s3] section."
    ))
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

/// Minimal INI parser for the one section this crate needs — no crate in
/// the teacher/pack stack pulls in a generic INI parser for one section.
fn read_ini_s3_section(path: &std::path::Path) -> Option<(String, String)> {
    let contents = std::fs::read_to_string(path).ok()?;
    let mut in_s3_section = false;
    let mut access = None;
    let mut secret = None;

    for raw_line in contents.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }
        if line.starts_with('[') && line.ends_with(']') {
            in_s3_section = line.eq_ignore_ascii_case("[s3]");
            continue;
        }
        if !in_s3_section {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            let value = value.trim().to_string();
            if key.eq_ignore_ascii_case("access") {
                access = Some(value);
            } else if key.eq_ignore_ascii_case("secret") {
                secret = Some(value);
            }
        }
    }

    match (access, secret) {
        (Some(a), Some(s)) if !a.is_empty() && !s.is_empty() => Some((a, s)),
        _ => None,
    }
}

/// The placeholder auth string used in `--dry-run` when no real
/// credentials are configured (spec.md §6's `_resolve_ia_auth` behavior).
pub const DRY_RUN_AUTH: &str = "LOW dry-run:dry-run";
