//! Internet Archive client — metadata listing and S3-compatible upload (§4.3).

use std::collections::BTreeMap;

use chrono::{NaiveDate, Utc};
use md5::{Digest, Md5};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde::Serialize;
use tracing::warn;

use crate::retry::{request_with_retry, RetryOptions};
use crate::state::ItemStatus;

const METADATA_BASE: &str = "https://archive.org/metadata";
const S3_BASE: &str = "https://s3.us.archive.org";

/// List tribunals already present on the archive for `date`, as recorded by
/// the `djen-{date}-{T}.zip` / `.absent` naming convention. Non-200 or
/// malformed payloads yield an empty map — no facts learned, not an error.
pub async fn fetch_existing(
    client: &reqwest::Client,
    date: NaiveDate,
) -> BTreeMap<String, ItemStatus> {
    fetch_existing_from(client, METADATA_BASE, date).await
}

pub(crate) async fn fetch_existing_from(
    client: &reqwest::Client,
    metadata_base: &str,
    date: NaiveDate,
) -> BTreeMap<String, ItemStatus> {
    let url = format!("{metadata_base}/djen-{}", date.format("%Y-%m-%d"));
    let resp = match request_with_retry(client, Method::GET, &url, None, None, RetryOptions::default()).await {
        Ok(r) => r,
        Err(err) => {
            warn!(url, error = %err, "ia_metadata_transport_error");
            return BTreeMap::new();
        }
    };

    if resp.status().as_u16() != 200 {
        warn!(url, status = resp.status().as_u16(), "ia_metadata_error");
        return BTreeMap::new();
    }

    let body: serde_json::Value = match resp.json().await {
        Ok(v) => v,
        Err(_) => return BTreeMap::new(),
    };

    let Some(files) = body.get("files").and_then(|v| v.as_array()) else {
        return BTreeMap::new();
    };

    let prefix = format!("djen-{}-", date.format("%Y-%m-%d"));
    let mut result = BTreeMap::new();
    for entry in files {
        let Some(name) = entry.get("name").and_then(|v| v.as_str()) else {
            continue;
        };
        let Some(rest) = name.strip_prefix(&prefix) else {
            continue;
        };
        if let Some(tribunal) = rest.strip_suffix(".zip") {
            result.insert(tribunal.to_string(), ItemStatus::Uploaded);
        } else if let Some(tribunal) = rest.strip_suffix(".absent") {
            result.insert(tribunal.to_string(), ItemStatus::Absent);
        }
    }
    result
}

fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn build_upload_headers(date: NaiveDate, md5: &str, auth: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let mut set = |name: &'static str, value: String| {
        headers.insert(
            HeaderName::from_static(name),
            HeaderValue::from_str(&value).expect("header value is ASCII"),
        );
    };
    set("authorization", auth.to_string());
    set("content-md5", md5.to_string());
    set("x-archive-auto-make-bucket", "1".to_string());
    set("x-archive-queue-derive", "0".to_string());
    set("x-archive-meta-collection", "opensource".to_string());
    set("x-archive-meta-mediatype", "data".to_string());
    set(
        "x-archive-meta-title",
        format!("DJEN Data - {}", date.format("%Y-%m-%d")),
    );
    set(
        "x-archive-meta-description",
        "Diario de Justica Eletronico Nacional - Judicial communications from Brazilian courts."
            .to_string(),
    );
    set(
        "x-archive-meta-subject",
        "brazilian-law;djen;legal;judiciary;open-data".to_string(),
    );
    set("x-archive-meta-creator", "CausaGanha".to_string());
    set("x-archive-meta-date", date.format("%Y-%m-%d").to_string());
    headers
}

/// Result of an upload attempt: status < 400 is success, the rest feeds the
/// circuit breaker as a failure in the caller.
pub struct UploadOutcome {
    pub status: u16,
}

impl UploadOutcome {
    pub fn is_success(&self) -> bool {
        self.status < 400
    }
}

pub async fn upload_zip(
    client: &reqwest::Client,
    date: NaiveDate,
    tribunal: &str,
    content: Vec<u8>,
    auth: &str,
) -> Result<UploadOutcome, reqwest::Error> {
    upload_zip_to(client, S3_BASE, date, tribunal, content, auth).await
}

async fn upload_zip_to(
    client: &reqwest::Client,
    s3_base: &str,
    date: NaiveDate,
    tribunal: &str,
    content: Vec<u8>,
    auth: &str,
) -> Result<UploadOutcome, reqwest::Error> {
    let d = date.format("%Y-%m-%d");
    let url = format!("{s3_base}/djen-{d}/djen-{d}-{tribunal}.zip");
    let md5 = md5_hex(&content);
    let headers = build_upload_headers(date, &md5, auth);

    let resp = request_with_retry(client, Method::PUT, &url, Some(content), Some(headers), RetryOptions::default()).await?;
    Ok(UploadOutcome {
        status: resp.status().as_u16(),
    })
}

#[derive(Serialize)]
struct AbsentMarkerBody {
    status_code: u16,
    reason: String,
    checked_at: String,
}

pub async fn upload_absent_marker(
    client: &reqwest::Client,
    date: NaiveDate,
    tribunal: &str,
    status_code: u16,
    reason: &str,
    auth: &str,
) -> Result<UploadOutcome, reqwest::Error> {
    upload_absent_marker_to(client, S3_BASE, date, tribunal, status_code, reason, auth).await
}

#[allow(clippy::too_many_arguments)]
async fn upload_absent_marker_to(
    client: &reqwest::Client,
    s3_base: &str,
    date: NaiveDate,
    tribunal: &str,
    status_code: u16,
    reason: &str,
    auth: &str,
) -> Result<UploadOutcome, reqwest::Error> {
    let d = date.format("%Y-%m-%d");
    let url = format!("{s3_base}/djen-{d}/djen-{d}-{tribunal}.absent");

    let body = AbsentMarkerBody {
        status_code,
        reason: reason.to_string(),
        checked_at: Utc::now().to_rfc3339(),
    };
    let body_bytes = serde_json::to_vec(&body).expect("marker body always serializes");
    let md5 = md5_hex(&body_bytes);
    let headers = build_upload_headers(date, &md5, auth);

    let resp = request_with_retry(client, Method::PUT, &url, Some(body_bytes), Some(headers), RetryOptions::default()).await?;
    Ok(UploadOutcome {
        status: resp.status().as_u16(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_hex_matches_known_vector() {
        // MD5("") == d41d8cd98f00b204e9800998ecf8427e
        assert_eq!(md5_hex(b""), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn upload_headers_carry_required_set() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let headers = build_upload_headers(date, "abc123", "LOW access:secret");
        assert_eq!(headers.get("authorization").unwrap(), "LOW access:secret");
        assert_eq!(headers.get("content-md5").unwrap(), "abc123");
        assert_eq!(headers.get("x-archive-auto-make-bucket").unwrap(), "1");
        assert_eq!(headers.get("x-archive-queue-derive").unwrap(), "0");
        assert_eq!(headers.get("x-archive-meta-collection").unwrap(), "opensource");
        assert_eq!(headers.get("x-archive-meta-date").unwrap(), "2024-01-15");
        assert_eq!(
            headers.get("x-archive-meta-title").unwrap(),
            "DJEN Data - 2024-01-15"
        );
    }

    #[tokio::test]
    async fn fetch_existing_classifies_zip_and_absent_entries() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/djen-2024-01-15"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "files": [
                    {"name": "djen-2024-01-15-TJSP.zip"},
                    {"name": "djen-2024-01-15-TJRJ.absent"},
                    {"name": "djen-2024-01-15-unrelated.txt"},
                ]
            })))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let result = fetch_existing_from(&client, &server.uri(), date).await;

        assert_eq!(result.get("TJSP"), Some(&ItemStatus::Uploaded));
        assert_eq!(result.get("TJRJ"), Some(&ItemStatus::Absent));
        assert_eq!(result.len(), 2);
    }

    #[tokio::test]
    async fn fetch_existing_returns_empty_on_non_200() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/djen-2024-01-15"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let result = fetch_existing_from(&client, &server.uri(), date).await;
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn upload_zip_sends_content_md5_and_succeeds_under_400() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        let content = b"hello world".to_vec();
        let expected_md5 = md5_hex(&content);

        Mock::given(method("PUT"))
            .and(path("/djen-2024-01-15/djen-2024-01-15-TJSP.zip"))
            .respond_with(move |req: &wiremock::Request| {
                let got = req
                    .headers
                    .get("content-md5")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default();
                if got == expected_md5 {
                    ResponseTemplate::new(200)
                } else {
                    ResponseTemplate::new(400)
                }
            })
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let outcome = upload_zip_to(&client, &server.uri(), date, "TJSP", content, "LOW a:b")
            .await
            .unwrap();
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn upload_absent_marker_targets_dot_absent_filename() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/djen-2024-01-15/djen-2024-01-15-TJSP.absent"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let outcome = upload_absent_marker_to(
            &client,
            &server.uri(),
            date,
            "TJSP",
            404,
            "Not Found",
            "LOW a:b",
        )
        .await
        .unwrap();
        assert!(outcome.is_success());
    }
}
