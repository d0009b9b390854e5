//! Uniform outbound HTTP with bounded exponential backoff.
//!
//! Mirrors the original `djen_backup.retry.request_with_retry`: every
//! outbound call in this crate (source client, archive client) funnels
//! through here so retry policy lives in exactly one place.

use std::time::Duration;

use reqwest::{header::HeaderMap, Method, Response};
use tracing::warn;

const RETRIABLE_STATUS: &[u16] = &[408, 429, 500, 502, 503, 504];

#[derive(Debug, Clone, Copy)]
pub struct RetryOptions {
    pub max_retries: u32,
    /// The DJEN proxy is known to serve transient 400s; retry them when set.
    pub retry_source_400: bool,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_source_400: false,
        }
    }
}

/// Send `method url` with up to `opts.max_retries` extra attempts.
///
/// Returns the final response as-is when retries are exhausted (even a
/// non-success status) so the caller can classify it normally. A transport
/// error on the last attempt propagates.
pub async fn request_with_retry(
    client: &reqwest::Client,
    method: Method,
    url: &str,
    body: Option<Vec<u8>>,
    headers: Option<HeaderMap>,
    opts: RetryOptions,
) -> Result<Response, reqwest::Error> {
    let mut attempt: u32 = 0;

    loop {
        let mut req = client.request(method.clone(), url);
        if let Some(h) = headers.clone() {
            req = req.headers(h);
        }
        if let Some(b) = body.clone() {
            req = req.body(b);
        }

        match req.send().await {
            Ok(resp) => {
                let status = resp.status().as_u16();
                let retriable = RETRIABLE_STATUS.contains(&status)
                    || (opts.retry_source_400 && status == 400);

                if retriable && attempt < opts.max_retries {
                    let wait = backoff_for(attempt, &resp);
                    warn!(url, status, attempt = attempt + 1, wait_s = wait.as_secs(), "http_retry");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                    continue;
                }

                return Ok(resp);
            }
            Err(err) => {
                if attempt < opts.max_retries {
                    let wait = Duration::from_secs(2u64.saturating_pow(attempt));
                    warn!(url, error = %err, attempt = attempt + 1, wait_s = wait.as_secs(), "http_transport_retry");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                    continue;
                }
                return Err(err);
            }
        }
    }
}

/// Compute the wait before the next attempt, honoring `Retry-After` when present.
fn backoff_for(attempt: u32, resp: &Response) -> Duration {
    if let Some(value) = resp.headers().get(reqwest::header::RETRY_AFTER) {
        if let Ok(text) = value.to_str() {
            if let Some(d) = parse_retry_after(text) {
                return d;
            }
        }
    }
    Duration::from_secs(2u64.saturating_pow(attempt))
}

fn parse_retry_after(text: &str) -> Option<Duration> {
    if let Ok(secs) = text.trim().parse::<i64>() {
        return Some(Duration::from_secs(secs.max(1) as u64));
    }
    if let Ok(when) = chrono::DateTime::parse_from_rfc2822(text.trim()) {
        let now = chrono::Utc::now();
        let delta = when.with_timezone(&chrono::Utc) - now;
        let secs = delta.num_seconds().max(1);
        return Some(Duration::from_secs(secs as u64));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_retry_after_integer_seconds() {
        assert_eq!(parse_retry_after("5"), Some(Duration::from_secs(5)));
    }

    #[test]
    fn parse_retry_after_clamps_to_one_second() {
        assert_eq!(parse_retry_after("0"), Some(Duration::from_secs(1)));
        assert_eq!(parse_retry_after("-10"), Some(Duration::from_secs(1)));
    }

    #[test]
    fn parse_retry_after_rejects_garbage() {
        assert_eq!(parse_retry_after("not-a-date"), None);
    }

    #[test]
    fn parse_retry_after_http_date() {
        let future = chrono::Utc::now() + chrono::Duration::seconds(30);
        let text = future.to_rfc2822();
        let d = parse_retry_after(&text).expect("should parse http-date");
        // Allow slack for the round-trip through the test clock.
        assert!(d.as_secs() >= 25 && d.as_secs() <= 35);
    }
}
