//! OpenAI *Responses* API handler — a distinct shape from chat-completions:
//! the endpoint is `/responses` and usage is reported as
//! `usage.input_tokens`/`usage.output_tokens` rather than
//! `usage.prompt_tokens`/`usage.completion_tokens`.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

use super::super::context::{ForwardContext, TokenUsage};
use super::ProviderHandlerImpl;

pub struct OpenAiResponseHandler;

impl ProviderHandlerImpl for OpenAiResponseHandler {
    fn name(&self) -> &'static str {
        "openai-response"
    }

    fn build_url(&self, ctx: &ForwardContext, path: &str) -> String {
        let base = ctx.base_url.as_deref().unwrap_or("https://api.openai.com");
        // The inbound path may still address /chat/completions-shaped
        // routes; this apiType always speaks the Responses endpoint.
        let _ = path;
        format!("{}/v1/responses", base.trim_end_matches('/'))
    }

    fn build_headers(&self, ctx: &ForwardContext) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", ctx.api_key.as_str())) {
            headers.insert(AUTHORIZATION, value);
        }
        headers
    }

    fn parse_usage(&self, response: &Value) -> TokenUsage {
        TokenUsage {
            request_tokens: response.pointer("/usage/input_tokens").and_then(|v| v.as_i64()).unwrap_or(0),
            response_tokens: response.pointer("/usage/output_tokens").and_then(|v| v.as_i64()).unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_responses_api_usage_fields() {
        let body = serde_json::json!({"usage": {"input_tokens": 14, "output_tokens": 6}});
        let usage = OpenAiResponseHandler.parse_usage(&body);
        assert_eq!(usage.request_tokens, 14);
        assert_eq!(usage.response_tokens, 6);
    }

    #[test]
    fn build_url_always_targets_responses_endpoint() {
        let ctx = ForwardContext {
            request_id: "r1".to_string(),
            bot_id: "b1".to_string(),
            credential_id: "c1".to_string(),
            vendor: "openai".to_string(),
            api_type: super::super::super::context::ApiType::OpenAiResponse,
            base_url: None,
            api_key: crate::crypto::Secret::from("sk-test".to_string()),
            model: "gpt-4o".to_string(),
            is_streaming: false,
            metadata: serde_json::json!({}),
        };
        assert_eq!(OpenAiResponseHandler.build_url(&ctx, "/anything"), "https://api.openai.com/v1/responses");
    }
}
