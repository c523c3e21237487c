//! Azure OpenAI handler.
//!
//! Azure's OpenAI-compatible endpoint is reached through a deployment path
//! (`/openai/deployments/<deployment>/...`) and an `api-version` query
//! parameter rather than the `/v1` convention native OpenAI uses; auth is
//! `api-key`, not `Authorization: Bearer`.

use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::Value;

use super::super::context::{ForwardContext, TokenUsage};
use super::ProviderHandlerImpl;

const DEFAULT_API_VERSION: &str = "2024-06-01";

pub struct AzureOpenAiHandler;

impl ProviderHandlerImpl for AzureOpenAiHandler {
    fn name(&self) -> &'static str {
        "azure-openai"
    }

    fn build_url(&self, ctx: &ForwardContext, path: &str) -> String {
        let base = ctx.base_url.as_deref().unwrap_or("");
        let deployment = &ctx.model;
        let api_version = ctx
            .metadata
            .get("apiVersion")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_API_VERSION);
        format!(
            "{}/openai/deployments/{}{}?api-version={}",
            base.trim_end_matches('/'),
            deployment,
            path,
            api_version
        )
    }

    fn build_headers(&self, ctx: &ForwardContext) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(ctx.api_key.as_str()) {
            headers.insert("api-key", value);
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

    fn ctx(base_url: Option<&str>, metadata: Value) -> ForwardContext {
        ForwardContext {
            request_id: "r1".to_string(),
            bot_id: "b1".to_string(),
            credential_id: "c1".to_string(),
            vendor: "azure-openai".to_string(),
            api_type: super::super::super::context::ApiType::AzureOpenAi,
            base_url: base_url.map(str::to_string),
            api_key: crate::crypto::Secret::from("az-key".to_string()),
            model: "my-deployment".to_string(),
            is_streaming: false,
            metadata,
        }
    }

    #[test]
    fn build_url_uses_deployment_path_and_default_api_version() {
        let c = ctx(Some("https://my-resource.openai.azure.com"), serde_json::json!({}));
        let url = AzureOpenAiHandler.build_url(&c, "/chat/completions");
        assert_eq!(
            url,
            "https://my-resource.openai.azure.com/openai/deployments/my-deployment/chat/completions?api-version=2024-06-01"
        );
    }

    #[test]
    fn build_url_honors_metadata_api_version_override() {
        let c = ctx(Some("https://my-resource.openai.azure.com"), serde_json::json!({"apiVersion": "2023-05-15"}));
        let url = AzureOpenAiHandler.build_url(&c, "/chat/completions");
        assert!(url.ends_with("api-version=2023-05-15"));
    }

    #[test]
    fn build_headers_uses_api_key_not_bearer() {
        let c = ctx(None, serde_json::json!({}));
        let headers = AzureOpenAiHandler.build_headers(&c);
        assert_eq!(headers.get("api-key").unwrap(), "az-key");
        assert!(headers.get(reqwest::header::AUTHORIZATION).is_none());
    }
}
