//! Native Anthropic Messages API handler.

use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::Value;

use super::super::context::{ForwardContext, TokenUsage};
use super::ProviderHandlerImpl;

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicHandler;

impl ProviderHandlerImpl for AnthropicHandler {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn build_url(&self, ctx: &ForwardContext, path: &str) -> String {
        let base = ctx.base_url.as_deref().unwrap_or("https://api.anthropic.com");
        format!("{}{}", base.trim_end_matches('/'), path)
    }

    fn build_headers(&self, ctx: &ForwardContext) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(ctx.api_key.as_str()) {
            headers.insert("x-api-key", value);
        }
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
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
    fn extracts_anthropic_usage_fields() {
        let body = serde_json::json!({"usage": {"input_tokens": 20, "output_tokens": 8}});
        let usage = AnthropicHandler.parse_usage(&body);
        assert_eq!(usage.request_tokens, 20);
        assert_eq!(usage.response_tokens, 8);
    }

    #[test]
    fn build_headers_sets_version_and_key() {
        let ctx = ForwardContext {
            request_id: "r1".to_string(),
            bot_id: "b1".to_string(),
            credential_id: "c1".to_string(),
            vendor: "anthropic".to_string(),
            api_type: super::super::super::context::ApiType::Anthropic,
            base_url: None,
            api_key: crate::crypto::Secret::from("sk-ant".to_string()),
            model: "claude-3-5-sonnet".to_string(),
            is_streaming: false,
            metadata: serde_json::json!({}),
        };
        let headers = AnthropicHandler.build_headers(&ctx);
        assert_eq!(headers.get("anthropic-version").unwrap(), ANTHROPIC_VERSION);
        assert_eq!(headers.get("x-api-key").unwrap(), "sk-ant");
    }
}
