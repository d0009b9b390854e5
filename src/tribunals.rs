//! Tribunal list management — hardcoded fallback merged with the live API (§6).

use reqwest::Method;
use tracing::warn;

use crate::retry::{request_with_retry, RetryOptions};

pub const TRIBUNAIS: &[&str] = &[
    "CJF", "PJeCor", "SEEU", "TRF1", "TRF2", "TRF3", "TRF4", "TRF5", "TRF6", "STF", "STJ", "TST",
    "TSE", "STM", "CNJ", "TJAC", "TJAL", "TJAM", "TJAP", "TJBA", "TJCE", "TJDFT", "TJES", "TJGO",
    "TJMA", "TJMG", "TJMS", "TJMT", "TJPA", "TJPB", "TJPE", "TJPI", "TJPR", "TJRJ", "TJRN", "TJRO",
    "TJRR", "TJRS", "TJSC", "TJSE", "TJSP", "TJTO", "TJMMG", "TJMRS", "TJMSP", "TRT1", "TRT2",
    "TRT3", "TRT4", "TRT5", "TRT6", "TRT7", "TRT8", "TRT9", "TRT10", "TRT11", "TRT12", "TRT13",
    "TRT14", "TRT15", "TRT16", "TRT17", "TRT18", "TRT19", "TRT20", "TRT21", "TRT22", "TRT23",
    "TRT24", "TRE-AC", "TRE-AL", "TRE-AM", "TRE-AP", "TRE-BA", "TRE-CE", "TRE-DF", "TRE-ES",
    "TRE-GO", "TRE-MA", "TRE-MG", "TRE-MS", "TRE-MT", "TRE-PA", "TRE-PB", "TRE-PE", "TRE-PI",
    "TRE-PR", "TRE-RJ", "TRE-RN", "TRE-RO", "TRE-RR", "TRE-RS", "TRE-SC", "TRE-SE", "TRE-SP",
    "TRE-TO",
];

/// Fetch additional tribunal codes from the proxy's directory endpoint.
/// Any failure (transport, malformed payload) yields an empty list — the
/// hardcoded fallback always covers the caller.
pub async fn fetch_tribunal_list_from_api(client: &reqwest::Client, base_url: &str) -> Vec<String> {
    let url = format!("{base_url}/api/v1/comunicacao/tribunal");
    let resp = match request_with_retry(client, Method::GET, &url, None, None, RetryOptions::default()).await {
        Ok(r) => r,
        Err(err) => {
            warn!(error = %err, "tribunal_api_fetch_failed");
            return Vec::new();
        }
    };

    if !resp.status().is_success() {
        warn!(status = resp.status().as_u16(), "tribunal_api_fetch_failed");
        return Vec::new();
    }

    let body: serde_json::Value = match resp.json().await {
        Ok(v) => v,
        Err(err) => {
            warn!(error = %err, "tribunal_api_unexpected_payload");
            return Vec::new();
        }
    };

    let Some(groups) = body.as_array() else {
        warn!("tribunal_api_unexpected_payload");
        return Vec::new();
    };

    let mut codes = Vec::new();
    for group in groups {
        let Some(instituicoes) = group.get("instituicoes").and_then(|v| v.as_array()) else {
            continue;
        };
        for inst in instituicoes {
            if let Some(sigla) = inst.get("sigla").and_then(|v| v.as_str()) {
                if !sigla.is_empty() {
                    codes.push(sigla.to_string());
                }
            }
        }
    }
    codes
}

/// Merged, sorted, de-duplicated union of the hardcoded list and the API's
/// codes.
pub async fn get_tribunal_list(client: &reqwest::Client, base_url: &str) -> Vec<String> {
    let api_codes = fetch_tribunal_list_from_api(client, base_url).await;
    let mut merged: std::collections::BTreeSet<String> =
        TRIBUNAIS.iter().map(|s| s.to_string()).collect();
    let from_api = api_codes.len();
    merged.extend(api_codes);

    tracing::info!(
        hardcoded = TRIBUNAIS.len(),
        from_api,
        merged = merged.len(),
        "tribunal_list_loaded"
    );
    merged.into_iter().collect()
}
