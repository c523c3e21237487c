//! Streaming Forwarder (C9) and Proxy Controller entrypoints (C10).
//!
//! Ties every other component together for one inbound request: authenticate
//! (C3) -> route (C7) -> resolve candidate credentials (C5), skipping any the
//! breaker (C6) has open -> forward via the matching vendor handler -> record
//! the outcome back into the breaker and resolver health score -> on a
//! qualifying failure, consult the fallback engine (C8) for the next model in
//! the chain and retry -> on success, track cost (C11) and persist a usage
//! log, both fire-and-forget so the client response is never delayed by them.

pub mod client;
pub mod context;
pub mod error;
pub mod handlers;
pub mod limits;
pub mod middleware;
pub mod ring_buffer;

use std::io::Read;
use std::time::Instant;

use axum::{
    body::{Body, Bytes},
    extract::Path,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::{breaker, fallback, pricing::UsageTokens, quota, resolver, routing, store};

pub use context::{ApiType, ForwardContext, TokenUsage};
pub use error::{ForwardError, ForwardResult};
use handlers::ProviderHandler;

const HOP_BY_HOP: [&str; 3] = ["connection", "transfer-encoding", "content-length"];
const MAX_FALLBACK_HOPS: u32 = 8;

/// `ALL /v1/:vendor/*rest`
pub async fn proxy_vendor(
    Path((vendor_segment, rest)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle(&vendor_segment, &format!("/{rest}"), headers, body, false).await
}

/// `ALL /v1/anthropic/*rest` — forced anthropic-native protocol (§4.7).
pub async fn proxy_anthropic(
    Path(rest): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle("anthropic", &format!("/{rest}"), headers, body, true).await
}

async fn handle(
    vendor_segment: &str,
    path: &str,
    headers: HeaderMap,
    body_bytes: Bytes,
    forced_anthropic: bool,
) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let started = Instant::now();

    let (validation, parsed) = match middleware::authenticate(&headers, vendor_segment).await {
        Ok(v) => v,
        Err(e) => return e.into_response(),
    };

    let limit_guard = match limits::check_and_acquire(Some(validation.bot_id.clone())).await {
        Ok(guard) => guard,
        Err(e) => return e.into_response(),
    };

    let budget = quota::check_budget(&validation.bot_id);
    if budget.exhausted {
        return ForwardError::RateLimited(format!(
            "bot {} has exhausted its cost budget (daily=${:.4}, monthly=${:.4})",
            validation.bot_id, budget.daily_cost, budget.monthly_cost
        ))
        .into_response();
    }

    let mut body: Value = if body_bytes.is_empty() {
        Value::Object(Default::default())
    } else {
        match serde_json::from_slice(&body_bytes) {
            Ok(v) => v,
            Err(err) => {
                return ForwardError::InvalidRequest(format!("invalid JSON body: {err}")).into_response();
            }
        }
    };

    if forced_anthropic {
        apply_anthropic_protocol_patch(&mut body);
    }

    let bot_tags = store::get_bot(&validation.bot_id).map(|b| b.tags).unwrap_or_default();
    let route_req = routing::RouteRequest {
        bot_id: &validation.bot_id,
        bot_tags: &bot_tags,
        requested_vendor: &parsed.api_type,
        is_compat_mode: parsed.is_compat_mode,
        body: &body,
    };

    let Some(route) = routing::route(&route_req).await else {
        return ForwardError::ServiceUnavailable(format!(
            "no credential available for vendor '{}'",
            parsed.api_type
        ))
        .into_response();
    };

    let chain = store::list_fallback_chains().into_iter().find(|c| {
        c.models
            .iter()
            .any(|m| m.get("model").and_then(Value::as_str) == Some(route.model.as_str()))
    });
    if let Some(chain) = &chain {
        fallback::create_context(&request_id, &chain.chain_id);
    }

    let outcome = drive_fallback_chain(
        &request_id,
        &validation.bot_id,
        &bot_tags,
        route.vendor.clone(),
        route.model.clone(),
        forced_anthropic,
        path,
        body,
        chain.as_ref(),
    )
    .await;

    if chain.is_some() {
        fallback::clear_context(&request_id);
    }

    let response = match outcome {
        Ok(response) => response,
        Err(message) => {
            crate::logger::error(
                "forward",
                &format!("request {request_id} failed after all fallbacks exhausted: {message}"),
            );
            ForwardError::RequestFailed(message).into_response()
        }
    };
    limits::attach_guard(response, limit_guard)
}

/// Walks credential candidates for the current model; on a qualifying
/// failure asks the fallback engine for the next model in the chain and
/// keeps going until something succeeds or the chain (or hop budget) is
/// exhausted.
#[allow(clippy::too_many_arguments)]
async fn drive_fallback_chain(
    request_id: &str,
    bot_id: &str,
    bot_tags: &[String],
    mut vendor: String,
    mut model: String,
    forced_anthropic: bool,
    path: &str,
    body: Value,
    chain: Option<&store::FallbackChainRow>,
) -> Result<Response, String> {
    let mut hops = 0u32;
    loop {
        match try_model(request_id, bot_id, bot_tags, &vendor, &model, forced_anthropic, path, &body).await {
            Ok(response) => return Ok(response),
            Err(failure) => {
                hops += 1;
                let Some(chain) = chain else {
                    return Err(failure.message);
                };
                if hops > MAX_FALLBACK_HOPS {
                    return Err("fallback hop budget exhausted".to_string());
                }
                let decision = fallback::get_next_fallback(
                    request_id,
                    chain,
                    &fallback::UpstreamFailure {
                        status_code: failure.status_code,
                        error_type: failure.error_type,
                        response_time_ms: failure.duration_ms,
                    },
                );
                if !decision.should_fallback {
                    return Err(failure.message);
                }
                let Some(next) = decision.next_model else {
                    return Err(failure.message);
                };
                let Some(next_vendor) = next.get("vendor").and_then(Value::as_str) else {
                    return Err(failure.message);
                };
                let Some(next_model) = next.get("model").and_then(Value::as_str) else {
                    return Err(failure.message);
                };
                crate::logger::warn(
                    "forward",
                    &format!("request {request_id} falling back {vendor}/{model} -> {next_vendor}/{next_model}: {}", failure.message),
                );
                tokio::time::sleep(fallback::retry_delay(chain)).await;
                vendor = next_vendor.to_string();
                model = next_model.to_string();
            }
        }
    }
}

struct AttemptFailure {
    message: String,
    status_code: Option<u16>,
    error_type: fallback::ErrorType,
    duration_ms: u64,
}

/// Tries every breaker-available credential serving `model` (preferring
/// `vendor`) in resolver rank order; the first to succeed wins.
async fn try_model(
    request_id: &str,
    bot_id: &str,
    bot_tags: &[String],
    vendor: &str,
    model: &str,
    forced_anthropic: bool,
    path: &str,
    body: &Value,
) -> Result<Response, AttemptFailure> {
    let _ = bot_tags;
    let candidates = resolver::resolve_all(
        model,
        &resolver::ResolveOptions {
            preferred_vendor: Some(vendor.to_string()),
            ..Default::default()
        },
    );
    let available: Vec<_> = candidates.into_iter().filter(|c| breaker::is_available(&c.credential_id)).collect();

    if available.is_empty() {
        return Err(AttemptFailure {
            message: format!("no available credential for {vendor}/{model}"),
            status_code: None,
            error_type: fallback::ErrorType::Unknown,
            duration_ms: 0,
        });
    }

    let mut last_failure = None;
    for candidate in available {
        let Some(cred) = store::get_credential(&candidate.credential_id) else {
            continue;
        };
        let Ok(secret) = crate::crypto::decrypt(&cred.secret_ciphertext) else {
            continue;
        };
        let Some(api_type) = ApiType::from_str(if forced_anthropic { "anthropic" } else { &candidate.api_type })
        else {
            continue;
        };

        let is_streaming = body.get("stream").and_then(Value::as_bool).unwrap_or(false);
        let ctx = ForwardContext {
            request_id: request_id.to_string(),
            bot_id: bot_id.to_string(),
            credential_id: candidate.credential_id.clone(),
            vendor: candidate.vendor.clone(),
            api_type,
            base_url: candidate.base_url.clone(),
            api_key: secret,
            model: model.to_string(),
            is_streaming,
            metadata: cred.metadata.clone(),
        };

        let mut outbound_body = body.clone();
        apply_body_transforms(&mut outbound_body, api_type, is_streaming);

        match forward_once(&ctx, path, &outbound_body).await {
            Ok(response) => return Ok(response),
            Err(failure) => {
                breaker::record_failure(&candidate.credential_id, &failure.message);
                resolver::update_health(&candidate.credential_id, model, false);
                store::log_usage(
                    bot_id,
                    &candidate.vendor,
                    Some(&candidate.credential_id),
                    failure.status_code.map(|c| c as i64),
                    path,
                    model,
                    0,
                    0,
                    Some(&failure.message),
                    failure.duration_ms as i64,
                    api_type.protocol_type(),
                );
                last_failure = Some(failure);
            }
        }
    }

    Err(last_failure.unwrap_or(AttemptFailure {
        message: format!("all credentials for {vendor}/{model} failed"),
        status_code: None,
        error_type: fallback::ErrorType::Unknown,
        duration_ms: 0,
    }))
}

fn handler_for(ctx: &ForwardContext) -> ProviderHandler {
    handlers::get_handler(ctx.api_type)
}

/// One upstream attempt against a single resolved credential. 2xx headers
/// are treated as success immediately (breaker + health score), even for a
/// streaming body that later aborts mid-flight (§4.9).
async fn forward_once(ctx: &ForwardContext, path: &str, body: &Value) -> Result<Response, AttemptFailure> {
    let handler = handler_for(ctx);
    let url = append_metadata_query_params(&handler.build_url(ctx, path), &ctx.metadata);
    let outbound_headers = handler.build_headers(ctx);

    let started = Instant::now();
    let client = if ctx.is_streaming { client::streaming_client() } else { client::default_client() };
    let attempt = client::make_request(&client, &url, outbound_headers, body).await;
    let duration_ms = started.elapsed().as_millis() as u64;

    let result = match attempt {
        Ok(r) => r,
        Err(err) => {
            let is_timeout = matches!(err, ForwardError::Timeout(_));
            return Err(AttemptFailure {
                error_type: fallback::classify_error(None, None, is_timeout),
                message: err.to_string(),
                status_code: None,
                duration_ms,
            });
        }
    };

    let status = result.response.status();
    if !status.is_success() {
        let body_bytes = result.response.bytes().await.unwrap_or_default();
        let error_body: Option<Value> = serde_json::from_slice(&body_bytes).ok();
        let error_type = fallback::classify_error(error_body.as_ref(), Some(status.as_u16()), false);
        return Err(AttemptFailure {
            message: format!("upstream returned {status}"),
            status_code: Some(status.as_u16()),
            error_type,
            duration_ms,
        });
    }

    breaker::record_success(&ctx.credential_id);
    resolver::update_health(&ctx.credential_id, &ctx.model, true);

    let content_type = result
        .response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let content_encoding = result
        .response
        .headers()
        .get(reqwest::header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let is_sse = content_type.contains("text/event-stream");
    let response_headers = filtered_response_headers(result.response.headers(), is_sse);

    if ctx.is_streaming {
        Ok(stream_response(ctx.clone(), handler, result.response, status, response_headers, content_encoding))
    } else {
        let raw = result.response.bytes().await.unwrap_or_default();
        let decoded = decompress(&raw, content_encoding.as_deref());
        let usage = extract_usage(&decoded, &handler);
        finalize_success(ctx, handler.name(), status.as_u16(), usage, "/non-stream", duration_ms);
        let mut builder = Response::builder().status(status.as_u16());
        for (name, value) in response_headers.iter() {
            builder = builder.header(name, value);
        }
        Ok(builder.body(Body::from(decoded)).unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()))
    }
}

/// Streams the upstream body to the client chunk-for-chunk (rewriting GLM
/// `reasoning_content` into `content` where applicable), keeping a rolling
/// 64 KiB tail for post-stream usage extraction.
fn stream_response(
    ctx: ForwardContext,
    handler: ProviderHandler,
    mut upstream: reqwest::Response,
    status: reqwest::StatusCode,
    response_headers: HeaderMap,
    content_encoding: Option<String>,
) -> Response {
    let is_glm = is_glm_model(&ctx.model);
    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(32);

    tokio::spawn(async move {
        let started = Instant::now();
        let mut ring = ring_buffer::RingBuffer::new();
        let mut line_buf: Vec<u8> = Vec::new();

        loop {
            match upstream.chunk().await {
                Ok(Some(chunk)) => {
                    ring.push(&chunk);
                    if is_glm {
                        for line in client::drain_sse_lines(&mut line_buf, &chunk) {
                            let rewritten = rewrite_glm_line(&line);
                            let mut framed = rewritten.into_bytes();
                            framed.push(b'\n');
                            if tx.send(Ok(Bytes::from(framed))).await.is_err() {
                                return;
                            }
                        }
                    } else if tx.send(Ok(chunk)).await.is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    crate::logger::error("forward", &format!("stream read error for {}: {err}", ctx.credential_id));
                    break;
                }
            }
        }

        let decoded = decompress(ring.as_bytes(), content_encoding.as_deref());
        let usage = extract_usage(&decoded, &handler);
        let duration_ms = started.elapsed().as_millis() as i64;
        finalize_success(&ctx, handler.name(), status.as_u16(), usage, "/stream", duration_ms as u64);
    });

    let stream = futures_util::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) });
    let body = Body::from_stream(stream);

    let mut builder = Response::builder().status(status.as_u16());
    for (name, value) in response_headers.iter() {
        builder = builder.header(name, value);
    }
    builder.body(body).unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Fire-and-forget bookkeeping once a response has been (or is being) sent
/// to the client: quota tracking and the BotUsageLog row (§4.9 "on completion").
fn finalize_success(ctx: &ForwardContext, _handler_name: &str, status: u16, usage: TokenUsage, endpoint: &str, duration_ms: u64) {
    let usage_tokens = UsageTokens {
        input_tokens: usage.request_tokens,
        output_tokens: usage.response_tokens,
        ..Default::default()
    };
    quota::track_usage(&ctx.bot_id, &ctx.model, &usage_tokens);
    store::log_usage(
        &ctx.bot_id,
        &ctx.vendor,
        Some(&ctx.credential_id),
        Some(status as i64),
        endpoint,
        &ctx.model,
        usage.request_tokens,
        usage.response_tokens,
        None,
        duration_ms as i64,
        ctx.protocol_type(),
    );
}

fn apply_body_transforms(body: &mut Value, api_type: ApiType, is_streaming: bool) {
    strip_provider_prefix_in_place(body);
    if api_type.is_native_openai() {
        if is_streaming {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }
    } else if let Some(obj) = body.as_object_mut() {
        obj.remove("prompt_cache_key");
        obj.remove("stream_options");
    }
}

fn strip_provider_prefix_in_place(body: &mut Value) {
    if let Some(model) = body.get("model").and_then(Value::as_str) {
        let stripped = crate::routing::strategies::strip_provider_prefix(model);
        if stripped != model {
            body["model"] = Value::String(stripped);
        }
    }
}

/// §4.7 forced-Anthropic protocol patch: default `max_tokens`, drop
/// `stream_options` (Anthropic's Messages API has no such field).
fn apply_anthropic_protocol_patch(body: &mut Value) {
    strip_provider_prefix_in_place(body);
    if body.get("max_tokens").is_none() {
        body["max_tokens"] = serde_json::json!(8192);
    }
    if let Some(obj) = body.as_object_mut() {
        obj.remove("stream_options");
    }
}

fn append_metadata_query_params(url: &str, metadata: &Value) -> String {
    let Some(params) = metadata.get("queryParams").and_then(Value::as_object) else {
        return url.to_string();
    };
    let mut out = url.to_string();
    for (key, value) in params {
        let Some(value) = value.as_str() else { continue };
        let separator = if out.contains('?') { '&' } else { '?' };
        out.push(separator);
        out.push_str(key);
        out.push('=');
        out.push_str(value);
    }
    out
}

fn filtered_response_headers(upstream: &reqwest::header::HeaderMap, is_sse: bool) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in upstream.iter() {
        if HOP_BY_HOP.contains(&name.as_str()) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_str().as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            out.insert(name, value);
        }
    }
    if is_sse {
        out.insert("cache-control", HeaderValue::from_static("no-cache"));
        out.insert("connection", HeaderValue::from_static("keep-alive"));
    }
    out
}

fn decompress(bytes: &[u8], encoding: Option<&str>) -> Vec<u8> {
    let decoded = match encoding {
        Some("gzip") => {
            let mut out = Vec::new();
            flate2::read::GzDecoder::new(bytes).read_to_end(&mut out).map(|_| out)
        }
        Some("deflate") => {
            let mut out = Vec::new();
            flate2::read::DeflateDecoder::new(bytes).read_to_end(&mut out).map(|_| out)
        }
        Some("br") => {
            let mut out = Vec::new();
            brotli::Decompressor::new(bytes, 4096)
                .read_to_end(&mut out)
                .map(|_| out)
        }
        _ => return bytes.to_vec(),
    };
    decoded.unwrap_or_else(|_| bytes.to_vec())
}

fn is_glm_model(model: &str) -> bool {
    let lower = model.to_lowercase();
    lower.contains("glm") || lower.contains("zhipu") || lower.contains("chatglm")
}

fn rewrite_glm_line(line: &str) -> String {
    let Some(data) = client::parse_sse_data(line) else { return line.to_string() };
    if client::is_sse_done(data) {
        return line.to_string();
    }
    let Ok(mut value) = serde_json::from_str::<Value>(data) else { return line.to_string() };
    if let Some(choices) = value.get_mut("choices").and_then(Value::as_array_mut) {
        for choice in choices.iter_mut() {
            let Some(delta) = choice.get_mut("delta") else { continue };
            let reasoning = delta.get("reasoning_content").and_then(Value::as_str).map(str::to_string);
            let content_empty = delta
                .get("content")
                .and_then(Value::as_str)
                .map(str::is_empty)
                .unwrap_or(true);
            if let Some(reasoning) = reasoning {
                if !reasoning.is_empty() && content_empty {
                    delta["content"] = Value::String(reasoning);
                }
            }
        }
    }
    match serde_json::to_string(&value) {
        Ok(rewritten) => format!("data: {rewritten}"),
        Err(_) => line.to_string(),
    }
}

/// Scans from the end for a usage-bearing line — handles whole-body JSON,
/// SSE `data:` framing, and bare newline-delimited JSON (Ollama) uniformly
/// (§4.9 usage extraction).
fn extract_usage(decoded: &[u8], handler: &ProviderHandler) -> TokenUsage {
    let text = String::from_utf8_lossy(decoded);
    if let Ok(value) = client::parse_json_response(&text) {
        if value.get("usage").is_some()
            || value.get("usageMetadata").is_some()
            || value.get("prompt_eval_count").is_some()
        {
            return handler.parse_usage(&value);
        }
    }
    for line in text.lines().rev() {
        let candidate = client::parse_sse_data(line).unwrap_or(line).trim();
        if candidate.is_empty() || client::is_sse_done(candidate) {
            continue;
        }
        if let Ok(value) = serde_json::from_str::<Value>(candidate) {
            return handler.parse_usage(&value);
        }
    }
    TokenUsage::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_provider_prefix_and_adds_stream_options_for_native_openai() {
        let mut body = serde_json::json!({"model": "openai/gpt-4o", "stream": true});
        apply_body_transforms(&mut body, ApiType::OpenAi, true);
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["stream_options"]["include_usage"], true);
    }

    #[test]
    fn strips_cache_key_and_stream_options_for_non_native_vendors() {
        let mut body = serde_json::json!({"model": "m", "prompt_cache_key": "x", "stream_options": {}});
        apply_body_transforms(&mut body, ApiType::Anthropic, false);
        assert!(body.get("prompt_cache_key").is_none());
        assert!(body.get("stream_options").is_none());
    }

    #[test]
    fn anthropic_protocol_patch_defaults_max_tokens() {
        let mut body = serde_json::json!({"model": "anthropic/claude-3-5-sonnet"});
        apply_anthropic_protocol_patch(&mut body);
        assert_eq!(body["max_tokens"], 8192);
        assert_eq!(body["model"], "claude-3-5-sonnet");
    }

    #[test]
    fn anthropic_protocol_patch_respects_explicit_max_tokens() {
        let mut body = serde_json::json!({"model": "m", "max_tokens": 256});
        apply_anthropic_protocol_patch(&mut body);
        assert_eq!(body["max_tokens"], 256);
    }

    #[test]
    fn appends_metadata_query_params() {
        let metadata = serde_json::json!({"queryParams": {"group_id": "abc123"}});
        let url = append_metadata_query_params("https://api.minimax.chat/v1/chat", &metadata);
        assert_eq!(url, "https://api.minimax.chat/v1/chat?group_id=abc123");
    }

    #[test]
    fn glm_model_names_are_detected_case_insensitively() {
        assert!(is_glm_model("GLM-5"));
        assert!(is_glm_model("zhipu-air"));
        assert!(!is_glm_model("gpt-4o"));
    }

    #[test]
    fn glm_rewrite_copies_reasoning_into_empty_content() {
        let line = r#"data: {"choices":[{"delta":{"reasoning_content":"Let me think","content":""}}]}"#;
        let rewritten = rewrite_glm_line(line);
        let value: Value = serde_json::from_str(client::parse_sse_data(&rewritten).unwrap()).unwrap();
        assert_eq!(value["choices"][0]["delta"]["content"], "Let me think");
        assert_eq!(value["choices"][0]["delta"]["reasoning_content"], "Let me think");
    }

    #[test]
    fn glm_rewrite_leaves_existing_content_alone() {
        let line = r#"data: {"choices":[{"delta":{"reasoning_content":"x","content":"already here"}}]}"#;
        let rewritten = rewrite_glm_line(line);
        let value: Value = serde_json::from_str(client::parse_sse_data(&rewritten).unwrap()).unwrap();
        assert_eq!(value["choices"][0]["delta"]["content"], "already here");
    }

    #[test]
    fn done_marker_passes_through_unrewritten() {
        assert_eq!(rewrite_glm_line("data: [DONE]"), "data: [DONE]");
    }
}
