//! Ollama handler — local inference server, no auth header, usage fields
//! expressed in `prompt_eval_count`/`eval_count` rather than `usage.*`.

use reqwest::header::HeaderMap;
use serde_json::Value;

use super::super::context::{ForwardContext, TokenUsage};
use super::ProviderHandlerImpl;

const DEFAULT_BASE_URL: &str = "http://localhost:11434";

pub struct OllamaHandler;

impl ProviderHandlerImpl for OllamaHandler {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn build_url(&self, ctx: &ForwardContext, path: &str) -> String {
        let base = ctx.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        format!("{}{}", base.trim_end_matches('/'), path)
    }

    fn build_headers(&self, _ctx: &ForwardContext) -> HeaderMap {
        HeaderMap::new()
    }

    fn parse_usage(&self, response: &Value) -> TokenUsage {
        TokenUsage {
            request_tokens: response.get("prompt_eval_count").and_then(|v| v.as_i64()).unwrap_or(0),
            response_tokens: response.get("eval_count").and_then(|v| v.as_i64()).unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_ollama_eval_count_fields() {
        let body = serde_json::json!({"prompt_eval_count": 40, "eval_count": 18});
        let usage = OllamaHandler.parse_usage(&body);
        assert_eq!(usage.request_tokens, 40);
        assert_eq!(usage.response_tokens, 18);
    }

    #[test]
    fn build_url_falls_back_to_local_default() {
        let ctx = ForwardContext {
            request_id: "r1".to_string(),
            bot_id: "b1".to_string(),
            credential_id: "c1".to_string(),
            vendor: "ollama".to_string(),
            api_type: super::super::super::context::ApiType::Ollama,
            base_url: None,
            api_key: crate::crypto::Secret::from(String::new()),
            model: "llama3".to_string(),
            is_streaming: false,
            metadata: serde_json::json!({}),
        };
        assert_eq!(OllamaHandler.build_url(&ctx, "/api/chat"), "http://localhost:11434/api/chat");
    }

    #[test]
    fn build_headers_has_no_auth() {
        let headers = OllamaHandler.build_headers(&ForwardContext {
            request_id: "r1".to_string(),
            bot_id: "b1".to_string(),
            credential_id: "c1".to_string(),
            vendor: "ollama".to_string(),
            api_type: super::super::super::context::ApiType::Ollama,
            base_url: None,
            api_key: crate::crypto::Secret::from(String::new()),
            model: "llama3".to_string(),
            is_streaming: false,
            metadata: serde_json::json!({}),
        });
        assert!(headers.is_empty());
    }
}
