//! DJEN proxy client — caderno URL lookup and ZIP download (§4.2).

use chrono::NaiveDate;
use reqwest::Method;
use tracing::error;

use crate::error::{AuthoritativeAbsent, SourceError};
use crate::retry::{request_with_retry, RetryOptions};

/// Resolve `(tribunal, date)` to a download URL, or an authoritative proof
/// that no caderno exists for that pair.
pub async fn get_caderno_url(
    client: &reqwest::Client,
    base_url: &str,
    tribunal: &str,
    date: NaiveDate,
) -> Result<String, SourceError> {
    let url = format!(
        "{base_url}/api/v1/caderno/{tribunal}/{}/D",
        date.format("%Y-%m-%d")
    );

    let opts = RetryOptions {
        retry_source_400: true,
        ..RetryOptions::default()
    };
    let resp = request_with_retry(client, Method::GET, &url, None, None, opts).await?;
    let status = resp.status();

    if status.as_u16() == 404 {
        return Err(SourceError::Absent(AuthoritativeAbsent::new(404, "Not Found")));
    }

    if !status.is_success() {
        error!(url, status = status.as_u16(), "source_http_error");
        let err = resp.error_for_status().unwrap_err();
        return Err(SourceError::Transient(err));
    }

    let status_code = status.as_u16();
    let body: serde_json::Value = match resp.json().await {
        Ok(v) => v,
        Err(_) => {
            return Err(SourceError::Absent(AuthoritativeAbsent::new(
                status_code,
                "Invalid JSON",
            )))
        }
    };

    match body.get("url").and_then(|v| v.as_str()) {
        Some(u) if !u.is_empty() => Ok(u.to_string()),
        _ => Err(SourceError::Absent(AuthoritativeAbsent::new(
            status_code,
            "Empty or missing URL field",
        ))),
    }
}

/// Download the ZIP payload at `url`.
pub async fn download_zip(
    client: &reqwest::Client,
    url: &str,
) -> Result<Vec<u8>, SourceError> {
    let opts = RetryOptions::default();
    let resp = request_with_retry(client, Method::GET, url, None, None, opts).await?;
    let status = resp.status();

    if status.as_u16() == 404 {
        return Err(SourceError::Absent(AuthoritativeAbsent::new(404, "ZIP download 404")));
    }

    if !status.is_success() {
        let err = resp.error_for_status().unwrap_err();
        return Err(SourceError::Transient(err));
    }

    let status_code = status.as_u16();
    let bytes = resp.bytes().await?;
    if bytes.is_empty() {
        return Err(SourceError::Absent(AuthoritativeAbsent::new(
            status_code,
            "Empty ZIP response",
        )));
    }

    Ok(bytes.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn get_caderno_url_returns_url_on_2xx() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/caderno/TJSP/2024-01-15/D"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "url": "https://example.invalid/TJSP-2024-01-15.zip"
            })))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let url = get_caderno_url(&client, &server.uri(), "TJSP", date)
            .await
            .unwrap();
        assert_eq!(url, "https://example.invalid/TJSP-2024-01-15.zip");
    }

    #[tokio::test]
    async fn get_caderno_url_404_is_authoritative_absent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/caderno/TJSP/2024-01-15/D"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let err = get_caderno_url(&client, &server.uri(), "TJSP", date)
            .await
            .unwrap_err();
        match err {
            SourceError::Absent(a) => assert_eq!(a.status_code, 404),
            other => panic!("expected Absent, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn get_caderno_url_empty_url_field_is_authoritative_absent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/caderno/TJSP/2024-01-15/D"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "url": "" })),
            )
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let err = get_caderno_url(&client, &server.uri(), "TJSP", date)
            .await
            .unwrap_err();
        match err {
            SourceError::Absent(a) => {
                assert_eq!(a.status_code, 200);
                assert_eq!(a.reason, "Empty or missing URL field");
            }
            other => panic!("expected Absent, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn download_zip_empty_body_is_authoritative_absent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/zip"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(Vec::<u8>::new()))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/zip", server.uri());
        let err = download_zip(&client, &url).await.unwrap_err();
        match err {
            SourceError::Absent(a) => assert_eq!(a.reason, "Empty ZIP response"),
            other => panic!("expected Absent, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn download_zip_returns_bytes_on_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/zip"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1, 2, 3, 4]))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/zip", server.uri());
        let bytes = download_zip(&client, &url).await.unwrap();
        assert_eq!(bytes, vec![1, 2, 3, 4]);
    }
}
