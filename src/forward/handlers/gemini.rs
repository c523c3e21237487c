//! Native Gemini (Google AI Studio) handler.
//!
//! Auth is the `x-goog-api-key` header rather than Bearer, and usage fields
//! live under `usageMetadata` instead of `usage`.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;

use super::super::context::{ForwardContext, TokenUsage};
use super::ProviderHandlerImpl;

pub struct GeminiHandler;

impl ProviderHandlerImpl for GeminiHandler {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn build_url(&self, ctx: &ForwardContext, path: &str) -> String {
        let base = ctx
            .base_url
            .as_deref()
            .unwrap_or("https://generativelanguage.googleapis.com");
        format!("{}{}", base.trim_end_matches('/'), path)
    }

    fn build_headers(&self, ctx: &ForwardContext) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(ctx.api_key.as_str()) {
            headers.insert(HeaderName::from_static("x-goog-api-key"), value);
        }
        headers
    }

    fn parse_usage(&self, response: &Value) -> TokenUsage {
        TokenUsage {
            request_tokens: response
                .pointer("/usageMetadata/promptTokenCount")
                .and_then(|v| v.as_i64())
                .unwrap_or(0),
            response_tokens: response
                .pointer("/usageMetadata/candidatesTokenCount")
                .and_then(|v| v.as_i64())
                .unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_gemini_usage_metadata_fields() {
        let body = serde_json::json!({"usageMetadata": {"promptTokenCount": 30, "candidatesTokenCount": 12}});
        let usage = GeminiHandler.parse_usage(&body);
        assert_eq!(usage.request_tokens, 30);
        assert_eq!(usage.response_tokens, 12);
    }

    #[test]
    fn build_url_has_no_query_param() {
        let ctx = sample_ctx();
        let url = GeminiHandler.build_url(&ctx, "/v1beta/models/gemini-1.5-pro:generateContent");
        assert!(!url.contains('?'));
        assert!(url.starts_with("https://generativelanguage.googleapis.com"));
    }

    #[test]
    fn build_headers_sets_x_goog_api_key() {
        let ctx = sample_ctx();
        let headers = GeminiHandler.build_headers(&ctx);
        assert_eq!(headers.get("x-goog-api-key").unwrap(), "goog-key");
    }

    fn sample_ctx() -> ForwardContext {
        ForwardContext {
            request_id: "r1".to_string(),
            bot_id: "b1".to_string(),
            credential_id: "c1".to_string(),
            vendor: "gemini".to_string(),
            api_type: super::super::super::context::ApiType::Gemini,
            base_url: None,
            api_key: crate::crypto::Secret::from("goog-key".to_string()),
            model: "gemini-1.5-pro".to_string(),
            is_streaming: false,
            metadata: serde_json::json!({}),
        }
    }
}
