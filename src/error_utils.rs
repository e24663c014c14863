use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use serde::de::DeserializeOwned;
use std::io::Read;
use std::time::Duration;

/// Longest error body excerpt kept in log lines
const MAX_BODY_EXCERPT: usize = 512;

/// HTTP request error handling utilities
///
/// Parse HTTP response as JSON with contextual error handling
pub async fn parse_http_response_json<T: DeserializeOwned>(
    response: reqwest::Response,
    api_desc: &str,
) -> Result<T> {
    response
        .json::<T>()
        .await
        .with_context(|| format!("Failed to parse {api_desc} response"))
}

/// Create HTTP client with contextual error handling
pub fn create_http_client_with_context() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(300))
        .build()
        .context("Failed to create HTTP client")
}

/// Read the body of a failed response into a printable excerpt.
///
/// Gzip bodies are decoded; binary bodies are summarised by their length.
pub async fn describe_error_body(response: reqwest::Response) -> String {
    let is_gzipped = response
        .headers()
        .get(reqwest::header::CONTENT_ENCODING)
        .is_some_and(|h| h == "gzip");

    let bytes = match response.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => return format!("Could not read response body: {e}"),
    };

    let mut decoded = Vec::new();
    let body = if is_gzipped && GzDecoder::new(&bytes[..]).read_to_end(&mut decoded).is_ok() {
        decoded
    } else {
        bytes.to_vec()
    };

    match String::from_utf8(body) {
        Ok(text) => truncate_excerpt(&text),
        Err(e) => format!(
            "Non-UTF8 binary body ({bytes_len} bytes): {e}",
            bytes_len = bytes.len()
        ),
    }
}

fn truncate_excerpt(text: &str) -> String {
    if text.chars().count() <= MAX_BODY_EXCERPT {
        return text.to_string();
    }
    let mut excerpt: String = text.chars().take(MAX_BODY_EXCERPT).collect();
    excerpt.push_str("...");
    excerpt
}
