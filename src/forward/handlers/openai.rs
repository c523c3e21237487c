//! Native OpenAI chat-completions handler.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

use super::super::context::{ForwardContext, TokenUsage};
use super::ProviderHandlerImpl;

pub struct OpenAiHandler;

impl ProviderHandlerImpl for OpenAiHandler {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn build_url(&self, ctx: &ForwardContext, path: &str) -> String {
        let base = ctx.base_url.as_deref().unwrap_or("https://api.openai.com");
        format!("{}{}", base.trim_end_matches('/'), path)
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
            request_tokens: response.pointer("/usage/prompt_tokens").and_then(|v| v.as_i64()).unwrap_or(0),
            response_tokens: response.pointer("/usage/completion_tokens").and_then(|v| v.as_i64()).unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_openai_family_usage_fields() {
        let body = serde_json::json!({"usage": {"prompt_tokens": 10, "completion_tokens": 5}});
        let usage = OpenAiHandler.parse_usage(&body);
        assert_eq!(usage.request_tokens, 10);
        assert_eq!(usage.response_tokens, 5);
    }
}
