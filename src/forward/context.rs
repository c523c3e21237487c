//! Shared data structures passed from the Proxy Controller into the
//! Streaming Forwarder and its per-vendor handlers.

use serde::Serialize;
use serde_json::Value;

use crate::crypto::Secret;

/// Wire protocol a credential/upstream speaks — drives header injection,
/// auth format, and which handler variant forwards the request (§4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApiType {
    OpenAi,
    OpenAiResponse,
    Anthropic,
    Gemini,
    AzureOpenAi,
    Ollama,
}

impl ApiType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "openai" => Some(ApiType::OpenAi),
            "openai-response" => Some(ApiType::OpenAiResponse),
            "anthropic" => Some(ApiType::Anthropic),
            "gemini" => Some(ApiType::Gemini),
            "azure-openai" => Some(ApiType::AzureOpenAi),
            "ollama" => Some(ApiType::Ollama),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ApiType::OpenAi => "openai",
            ApiType::OpenAiResponse => "openai-response",
            ApiType::Anthropic => "anthropic",
            ApiType::Gemini => "gemini",
            ApiType::AzureOpenAi => "azure-openai",
            ApiType::Ollama => "ollama",
        }
    }

    /// Whether this apiType is native OpenAI (drives the `stream_options`
    /// / `prompt_cache_key` body-transform rules in §4.9).
    pub fn is_native_openai(&self) -> bool {
        matches!(self, ApiType::OpenAi)
    }

    /// `protocolType` recorded on BotUsageLog (§3).
    pub fn protocol_type(&self) -> &'static str {
        match self {
            ApiType::Anthropic => "anthropic-native",
            _ => "openai-compatible",
        }
    }
}

/// Everything a handler needs to forward one request attempt to one
/// resolved upstream instance.
#[derive(Debug, Clone)]
pub struct ForwardContext {
    pub request_id: String,
    pub bot_id: String,
    pub credential_id: String,
    pub vendor: String,
    pub api_type: ApiType,
    pub base_url: Option<String>,
    pub api_key: Secret,
    pub model: String,
    pub is_streaming: bool,
    pub metadata: Value,
}

impl ForwardContext {
    pub fn protocol_type(&self) -> &'static str {
        self.api_type.protocol_type()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub request_tokens: i64,
    pub response_tokens: i64,
}

impl TokenUsage {
    pub fn total(&self) -> i64 {
        self.request_tokens + self.response_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_type_round_trips_through_str() {
        for t in [
            ApiType::OpenAi,
            ApiType::OpenAiResponse,
            ApiType::Anthropic,
            ApiType::Gemini,
            ApiType::AzureOpenAi,
            ApiType::Ollama,
        ] {
            assert_eq!(ApiType::from_str(t.as_str()), Some(t));
        }
    }

    #[test]
    fn only_openai_is_native_openai() {
        assert!(ApiType::OpenAi.is_native_openai());
        assert!(!ApiType::OpenAiResponse.is_native_openai());
        assert!(!ApiType::Anthropic.is_native_openai());
    }

    #[test]
    fn anthropic_protocol_type_is_native() {
        assert_eq!(ApiType::Anthropic.protocol_type(), "anthropic-native");
        assert_eq!(ApiType::OpenAi.protocol_type(), "openai-compatible");
        assert_eq!(ApiType::Gemini.protocol_type(), "openai-compatible");
    }
}
