//! Per-vendor forwarding handlers.
//!
//! Each handler knows only its own URL convention, auth header, and usage
//! field names — everything else (model-prefix stripping, hop-by-hop
//! header filtering, GLM rewrite, ring-buffer usage extraction, completion
//! hooks) lives once in `forward::mod` and is shared across vendors.

pub mod anthropic;
pub mod azure;
pub mod gemini;
pub mod ollama;
pub mod openai;
pub mod responses;

use reqwest::header::HeaderMap;
use serde_json::Value;

use super::context::{ApiType, ForwardContext, TokenUsage};

pub enum ProviderHandler {
    OpenAi(openai::OpenAiHandler),
    OpenAiResponse(responses::OpenAiResponseHandler),
    Anthropic(anthropic::AnthropicHandler),
    Gemini(gemini::GeminiHandler),
    AzureOpenAi(azure::AzureOpenAiHandler),
    Ollama(ollama::OllamaHandler),
}

impl ProviderHandler {
    pub fn name(&self) -> &'static str {
        match self {
            ProviderHandler::OpenAi(h) => h.name(),
            ProviderHandler::OpenAiResponse(h) => h.name(),
            ProviderHandler::Anthropic(h) => h.name(),
            ProviderHandler::Gemini(h) => h.name(),
            ProviderHandler::AzureOpenAi(h) => h.name(),
            ProviderHandler::Ollama(h) => h.name(),
        }
    }

    pub fn build_url(&self, ctx: &ForwardContext, path: &str) -> String {
        match self {
            ProviderHandler::OpenAi(h) => h.build_url(ctx, path),
            ProviderHandler::OpenAiResponse(h) => h.build_url(ctx, path),
            ProviderHandler::Anthropic(h) => h.build_url(ctx, path),
            ProviderHandler::Gemini(h) => h.build_url(ctx, path),
            ProviderHandler::AzureOpenAi(h) => h.build_url(ctx, path),
            ProviderHandler::Ollama(h) => h.build_url(ctx, path),
        }
    }

    pub fn build_headers(&self, ctx: &ForwardContext) -> HeaderMap {
        match self {
            ProviderHandler::OpenAi(h) => h.build_headers(ctx),
            ProviderHandler::OpenAiResponse(h) => h.build_headers(ctx),
            ProviderHandler::Anthropic(h) => h.build_headers(ctx),
            ProviderHandler::Gemini(h) => h.build_headers(ctx),
            ProviderHandler::AzureOpenAi(h) => h.build_headers(ctx),
            ProviderHandler::Ollama(h) => h.build_headers(ctx),
        }
    }

    pub fn parse_usage(&self, response: &Value) -> TokenUsage {
        match self {
            ProviderHandler::OpenAi(h) => h.parse_usage(response),
            ProviderHandler::OpenAiResponse(h) => h.parse_usage(response),
            ProviderHandler::Anthropic(h) => h.parse_usage(response),
            ProviderHandler::Gemini(h) => h.parse_usage(response),
            ProviderHandler::AzureOpenAi(h) => h.parse_usage(response),
            ProviderHandler::Ollama(h) => h.parse_usage(response),
        }
    }
}

pub fn get_handler(api_type: ApiType) -> ProviderHandler {
    match api_type {
        ApiType::OpenAi => ProviderHandler::OpenAi(openai::OpenAiHandler),
        ApiType::OpenAiResponse => ProviderHandler::OpenAiResponse(responses::OpenAiResponseHandler),
        ApiType::Anthropic => ProviderHandler::Anthropic(anthropic::AnthropicHandler),
        ApiType::Gemini => ProviderHandler::Gemini(gemini::GeminiHandler),
        ApiType::AzureOpenAi => ProviderHandler::AzureOpenAi(azure::AzureOpenAiHandler),
        ApiType::Ollama => ProviderHandler::Ollama(ollama::OllamaHandler),
    }
}

/// Per-vendor behavior. Forwarding itself (retry, streaming, usage
/// extraction plumbing) is orchestrated once in `forward::mod`; a handler
/// only describes how to reach and authenticate against its upstream and
/// how to read its usage fields back out of a response body.
#[allow(dead_code)]
pub trait ProviderHandlerImpl: Send + Sync {
    fn name(&self) -> &'static str;

    /// Build the full request URL given the inbound path suffix.
    fn build_url(&self, ctx: &ForwardContext, path: &str) -> String;

    /// Build outbound auth/content headers (no hop-by-hop headers; those
    /// are filtered generically from the inbound request separately).
    fn build_headers(&self, ctx: &ForwardContext) -> HeaderMap;

    /// Extract `{requestTokens, responseTokens}` from a parsed response
    /// body, per this vendor family's usage field names.
    fn parse_usage(&self, response: &Value) -> TokenUsage;
}
