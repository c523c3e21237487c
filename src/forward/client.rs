//! HTTP client utilities for forwarding requests to upstream providers.
//!
//! `reqwest`'s default client already honors `HTTP_PROXY`/`HTTPS_PROXY`/
//! `NO_PROXY` from the environment, so no custom proxy plumbing is needed
//! here — this module is retry/backoff and SSE framing only.

use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use rand::{rngs::OsRng, RngCore};
use reqwest::{header::HeaderMap, Client, Response};
use serde_json::Value;

use super::error::{ForwardError, ForwardResult};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay_ms: 300,
            max_delay_ms: 3000,
        }
    }
}

static DEFAULT_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .timeout(Duration::from_secs(120))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .expect("default upstream http client")
});

static STREAMING_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .timeout(Duration::from_secs(120))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .expect("streaming upstream http client")
});

/// Non-streaming client; 120s hard ceiling per spec.
pub fn default_client() -> Client {
    DEFAULT_CLIENT.clone()
}

/// Streaming client; same hard ceiling but without request-body buffering.
pub fn streaming_client() -> Client {
    STREAMING_CLIENT.clone()
}

/// Determine if an HTTP status code should trigger a retry.
pub fn should_retry(status: u16) -> bool {
    matches!(status, 500 | 502 | 503 | 504 | 429)
}

/// Exponential backoff with jitter, capped at `max_delay_ms`.
pub fn calculate_retry_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let base_delay = config.initial_delay_ms;
    let max_delay = config.max_delay_ms;

    let exp_delay = (1u64 << attempt.min(10)) * base_delay;
    let delay = exp_delay.min(max_delay);

    let mut jitter_bytes = [0u8; 8];
    OsRng.fill_bytes(&mut jitter_bytes);
    let jitter = u64::from_le_bytes(jitter_bytes) % (delay / 4 + 1);

    Duration::from_millis(delay + jitter)
}

pub struct RequestAttemptResult {
    pub response: Response,
    pub latency_ms: u64,
}

/// Make a single POST request attempt.
pub async fn make_request(
    client: &Client,
    url: &str,
    headers: HeaderMap,
    body: &Value,
) -> ForwardResult<RequestAttemptResult> {
    let start = Instant::now();
    crate::logger::debug("client", &format!("sending request to {url}"));

    let response = client
        .post(url)
        .headers(headers)
        .json(body)
        .send()
        .await
        .map_err(|e| {
            crate::logger::error("client", &format!("request failed: {e}"));
            if e.is_timeout() {
                ForwardError::Timeout("request timeout".to_string())
            } else if e.is_connect() {
                ForwardError::RequestFailed(format!("connection failed: {e}"))
            } else {
                ForwardError::RequestFailed(format!("request error: {e}"))
            }
        })?;

    let latency_ms = start.elapsed().as_millis() as u64;
    crate::logger::debug(
        "client",
        &format!("response status {} ({}ms)", response.status(), latency_ms),
    );

    Ok(RequestAttemptResult { response, latency_ms })
}

/// Send request with retry over a single endpoint using exponential backoff.
pub async fn send_with_retry(
    client: &Client,
    url: &str,
    headers: &HeaderMap,
    body: &Value,
    config: &RetryConfig,
) -> ForwardResult<RequestAttemptResult> {
    let mut attempt = 0u32;
    let mut last_error: Option<String> = None;

    loop {
        if attempt >= config.max_attempts {
            return Err(ForwardError::RequestFailed(format!(
                "max retries ({}) exceeded, last error: {}",
                config.max_attempts,
                last_error.unwrap_or_else(|| "unknown".to_string())
            )));
        }

        match make_request(client, url, headers.clone(), body).await {
            Ok(result) => {
                let status = result.response.status();
                if status.is_success() {
                    return Ok(result);
                } else if !should_retry(status.as_u16()) {
                    let error_body = result.response.text().await.unwrap_or_default();
                    return Err(ForwardError::RequestFailed(format!(
                        "upstream returned {status}: {error_body}"
                    )));
                } else {
                    last_error = Some(format!("HTTP {status}"));
                }
            }
            Err(e) => last_error = Some(e.to_string()),
        }

        attempt += 1;
        let delay = calculate_retry_delay(attempt, config);
        tokio::time::sleep(delay).await;
    }
}

/// Parse an SSE `data:` line, stripping the leading field name and a single
/// following space.
pub fn parse_sse_data(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
}

pub fn is_sse_done(data: &str) -> bool {
    data.trim() == "[DONE]"
}

/// Drain complete SSE lines from a byte buffer, tolerating reads that split
/// a line (and CRLF line endings) across chunk boundaries.
pub fn drain_sse_lines(buffer: &mut Vec<u8>, chunk: &[u8]) -> Vec<String> {
    if !chunk.is_empty() {
        buffer.extend_from_slice(chunk);
    }

    let mut lines = Vec::new();
    loop {
        let Some(pos) = buffer.iter().position(|&b| b == b'\n') else {
            break;
        };

        let mut line = buffer.drain(..=pos).collect::<Vec<u8>>();
        if line.last() == Some(&b'\n') {
            line.pop();
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }

        lines.push(String::from_utf8_lossy(&line).to_string());
    }

    lines
}

/// Parse a JSON response body, tolerating a trailing SSE `data:`/`[DONE]`
/// framing that some upstreams emit even for "non-streaming" requests.
pub fn parse_json_response(response_text: &str) -> Result<Value, serde_json::Error> {
    let trimmed = response_text.trim();
    let parse_err = match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => return Ok(value),
        Err(err) => err,
    };

    if response_text.contains("data:") {
        let mut last_value = None;
        for line in response_text.lines() {
            if let Some(data) = parse_sse_data(line) {
                let data = data.trim();
                if data.is_empty() || is_sse_done(data) {
                    continue;
                }
                if let Ok(value) = serde_json::from_str::<Value>(data) {
                    last_value = Some(value);
                }
            }
        }
        if let Some(value) = last_value {
            return Ok(value);
        }
    }

    Err(parse_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_retry() {
        assert!(should_retry(500));
        assert!(should_retry(502));
        assert!(should_retry(503));
        assert!(should_retry(504));
        assert!(should_retry(429));
        assert!(!should_retry(400));
        assert!(!should_retry(404));
        assert!(!should_retry(200));
    }

    #[test]
    fn test_calculate_retry_delay() {
        let config = RetryConfig::default();
        let delay0 = calculate_retry_delay(0, &config);
        let delay1 = calculate_retry_delay(1, &config);
        assert!(delay1 >= delay0);
        let delay_max = calculate_retry_delay(20, &config);
        assert!(delay_max.as_millis() <= (config.max_delay_ms + config.max_delay_ms / 4) as u128);
    }

    #[test]
    fn test_parse_sse_data() {
        assert_eq!(parse_sse_data("data: hello"), Some("hello"));
        assert_eq!(parse_sse_data("data:hello"), Some("hello"));
        assert_eq!(parse_sse_data("event: message"), None);
    }

    #[test]
    fn test_is_sse_done() {
        assert!(is_sse_done("[DONE]"));
        assert!(is_sse_done("  [DONE]  "));
        assert!(!is_sse_done("{}"));
    }

    #[test]
    fn test_drain_sse_lines_partial() {
        let mut buffer = Vec::new();
        let lines = drain_sse_lines(&mut buffer, b"data: {\"id\":");
        assert!(lines.is_empty());
        let lines = drain_sse_lines(&mut buffer, b"1}\n");
        assert_eq!(lines, vec!["data: {\"id\":1}"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_drain_sse_lines_crlf() {
        let mut buffer = Vec::new();
        let lines = drain_sse_lines(&mut buffer, b"data: ok\r\n");
        assert_eq!(lines, vec!["data: ok"]);
        assert!(buffer.is_empty());
    }
}
