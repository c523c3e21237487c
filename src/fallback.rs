//! Fallback Engine: walks a fallback chain on qualifying upstream failures.
//!
//! `FallbackContext` lives only in memory, keyed by requestId, visible only
//! to that request's worker (§5) — no lock is needed since nothing else
//! touches it.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use once_cell::sync::Lazy;
use rand::{rngs::OsRng, RngCore};
use serde::Serialize;

use crate::store::FallbackChainRow;

#[derive(Debug, Clone, Serialize)]
pub struct FallbackContext {
    pub chain_id: String,
    pub current_index: usize,
    pub retry_count: u32,
    pub errors: Vec<String>,
}

static CONTEXTS: Lazy<Mutex<HashMap<String, FallbackContext>>> = Lazy::new(|| Mutex::new(HashMap::new()));

pub fn create_context(request_id: &str, chain_id: &str) {
    CONTEXTS.lock().unwrap().insert(
        request_id.to_string(),
        FallbackContext {
            chain_id: chain_id.to_string(),
            current_index: 0,
            retry_count: 0,
            errors: Vec::new(),
        },
    );
}

pub fn clear_context(request_id: &str) {
    CONTEXTS.lock().unwrap().remove(request_id);
}

/// Classification resolved in DESIGN.md: explicit error-type table first,
/// then HTTP status code, otherwise `unknown` (never triggers via errorType).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    RateLimit,
    Overloaded,
    Timeout,
    Unknown,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::RateLimit => "rate_limit",
            ErrorType::Overloaded => "overloaded",
            ErrorType::Timeout => "timeout",
            ErrorType::Unknown => "unknown",
        }
    }
}

/// `error.type`/`error.code` → normalized classification.
fn classify_from_code(code: &str) -> Option<ErrorType> {
    match code {
        "rate_limit_exceeded" => Some(ErrorType::RateLimit),
        "overloaded_error" => Some(ErrorType::Overloaded),
        "insufficient_quota" => Some(ErrorType::RateLimit),
        _ => None,
    }
}

pub fn classify_error(
    error_body: Option<&serde_json::Value>,
    status_code: Option<u16>,
    is_timeout: bool,
) -> ErrorType {
    if is_timeout {
        return ErrorType::Timeout;
    }
    if let Some(body) = error_body {
        let code = body
            .pointer("/error/type")
            .or_else(|| body.pointer("/error/code"))
            .and_then(|v| v.as_str());
        if let Some(code) = code {
            if let Some(classified) = classify_from_code(code) {
                return classified;
            }
        }
    }
    match status_code {
        Some(429) => ErrorType::RateLimit,
        Some(503) => ErrorType::Overloaded,
        _ => ErrorType::Unknown,
    }
}

pub struct UpstreamFailure {
    pub status_code: Option<u16>,
    pub error_type: ErrorType,
    pub response_time_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FallbackDecision {
    pub should_fallback: bool,
    pub next_model: Option<serde_json::Value>,
    pub reason: String,
    pub exhausted: bool,
}

/// `getNextFallback(requestId, error) -> {shouldFallback, nextModel, reason, exhausted}`.
pub fn get_next_fallback(
    request_id: &str,
    chain: &FallbackChainRow,
    error: &UpstreamFailure,
) -> FallbackDecision {
    let triggers_by_status = error
        .status_code
        .map(|code| chain.trigger_status_codes.contains(&(code as i64)))
        .unwrap_or(false);
    let triggers_by_type = chain
        .trigger_error_types
        .iter()
        .any(|t| t == error.error_type.as_str());
    let triggers_by_timeout = error.response_time_ms as i64 > chain.trigger_timeout_ms;

    if !(triggers_by_status || triggers_by_type || triggers_by_timeout) {
        return FallbackDecision {
            should_fallback: false,
            next_model: None,
            reason: "error does not match any fallback trigger".to_string(),
            exhausted: false,
        };
    }

    let mut contexts = CONTEXTS.lock().unwrap();
    let ctx = contexts
        .entry(request_id.to_string())
        .or_insert_with(|| FallbackContext {
            chain_id: chain.chain_id.clone(),
            current_index: 0,
            retry_count: 0,
            errors: Vec::new(),
        });

    ctx.errors.push(format!(
        "{}: status={:?}",
        error.error_type.as_str(),
        error.status_code
    ));
    ctx.retry_count += 1;

    let exhausted =
        ctx.retry_count >= chain.max_retries as u32 || ctx.current_index + 1 >= chain.models.len();

    if exhausted {
        return FallbackDecision {
            should_fallback: false,
            next_model: None,
            reason: "retry count or chain length exhausted".to_string(),
            exhausted: true,
        };
    }

    ctx.current_index += 1;
    let next_model = chain.models.get(ctx.current_index).cloned();

    FallbackDecision {
        should_fallback: true,
        next_model,
        reason: format!("fallback triggered by {}", error.error_type.as_str()),
        exhausted: false,
    }
}

/// `retryDelay(chainId) -> ms`, with jitter, mirroring the forwarder's
/// exponential-backoff-with-jitter scheme.
pub fn retry_delay(chain: &FallbackChainRow) -> Duration {
    let base = chain.retry_delay_ms.max(1) as u64;
    let mut jitter_bytes = [0u8; 8];
    OsRng.fill_bytes(&mut jitter_bytes);
    let jitter = u64::from_le_bytes(jitter_bytes) % (base / 4 + 1);
    Duration::from_millis(base + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_chain() -> FallbackChainRow {
        FallbackChainRow {
            chain_id: "chain-1".to_string(),
            name: "default".to_string(),
            models: vec![
                serde_json::json!({"vendor": "anthropic", "model": "claude-3-5-sonnet"}),
                serde_json::json!({"vendor": "openrouter", "model": "claude-3-5-sonnet"}),
            ],
            trigger_status_codes: vec![429, 500, 502, 503, 504],
            trigger_error_types: vec!["rate_limit".to_string(), "overloaded".to_string(), "timeout".to_string()],
            trigger_timeout_ms: 120_000,
            max_retries: 3,
            retry_delay_ms: 100,
            preserve_protocol: false,
        }
    }

    #[test]
    fn triggers_on_503_and_advances_index() {
        let chain = sample_chain();
        let request_id = uuid::Uuid::new_v4().to_string();
        let decision = get_next_fallback(
            &request_id,
            &chain,
            &UpstreamFailure {
                status_code: Some(503),
                error_type: ErrorType::Overloaded,
                response_time_ms: 10,
            },
        );
        assert!(decision.should_fallback);
        assert!(!decision.exhausted);
        assert_eq!(
            decision.next_model,
            Some(serde_json::json!({"vendor": "openrouter", "model": "claude-3-5-sonnet"}))
        );
    }

    #[test]
    fn exhausts_after_chain_length() {
        let chain = sample_chain();
        let request_id = uuid::Uuid::new_v4().to_string();
        let failure = UpstreamFailure {
            status_code: Some(503),
            error_type: ErrorType::Overloaded,
            response_time_ms: 10,
        };
        let first = get_next_fallback(&request_id, &chain, &failure);
        assert!(!first.exhausted);
        let second = get_next_fallback(&request_id, &chain, &failure);
        assert!(second.exhausted);
    }

    #[test]
    fn non_matching_error_does_not_fallback() {
        let chain = sample_chain();
        let request_id = uuid::Uuid::new_v4().to_string();
        let decision = get_next_fallback(
            &request_id,
            &chain,
            &UpstreamFailure {
                status_code: Some(400),
                error_type: ErrorType::Unknown,
                response_time_ms: 10,
            },
        );
        assert!(!decision.should_fallback);
        assert!(!decision.exhausted);
    }

    #[test]
    fn classify_error_prefers_explicit_code() {
        let body = serde_json::json!({"error": {"type": "overloaded_error"}});
        assert_eq!(
            classify_error(Some(&body), Some(500), false).as_str(),
            "overloaded"
        );
    }

    #[test]
    fn classify_error_falls_back_to_status() {
        assert_eq!(classify_error(None, Some(429), false).as_str(), "rate_limit");
        assert_eq!(classify_error(None, Some(400), false).as_str(), "unknown");
    }
}
