//! Proxy Controller auth and vendor-segment parsing (§4.10).
//!
//! Kept deliberately small: everything here is pure request-shape logic with
//! no upstream I/O, so it can run ahead of the forwarder without holding
//! anything open.

use axum::http::{header::AUTHORIZATION, HeaderMap};

use crate::tokens::{self, Validation};

use super::context::ApiType;
use super::error::{ForwardError, ForwardResult};

pub struct ParsedVendor {
    pub api_type: String,
    pub is_compat_mode: bool,
}

/// Strips a trailing `-compatible` suffix from the inbound vendor path
/// segment; its presence marks auto-routing / compatibility mode (§4.7).
pub fn parse_vendor_segment(vendor: &str) -> ParsedVendor {
    match vendor.strip_suffix("-compatible") {
        Some(stripped) => ParsedVendor {
            api_type: stripped.to_string(),
            is_compat_mode: true,
        },
        None => ParsedVendor {
            api_type: vendor.to_string(),
            is_compat_mode: false,
        },
    }
}

pub fn extract_bearer_token(headers: &HeaderMap) -> ForwardResult<String> {
    let value = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ForwardError::Unauthorized("missing Authorization header".to_string()))?;
    value
        .strip_prefix("Bearer ")
        .map(str::to_string)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ForwardError::Unauthorized("Authorization header is not a well-formed Bearer token".to_string()))
}

/// Authenticates the request, then — outside compat mode — enforces that
/// the token's bound vendor matches the requested apiType (403 on mismatch,
/// per §4.10's status table).
pub async fn authenticate(headers: &HeaderMap, vendor_segment: &str) -> ForwardResult<(Validation, ParsedVendor)> {
    let token = extract_bearer_token(headers)?;
    let parsed = parse_vendor_segment(vendor_segment);

    if !parsed.is_compat_mode && ApiType::from_str(&parsed.api_type).is_none() {
        return Err(ForwardError::InvalidRequest(format!(
            "unknown vendor '{}'",
            parsed.api_type
        )));
    }

    let validation = tokens::validate(&token)
        .ok_or_else(|| ForwardError::Forbidden("invalid, expired, or revoked token".to_string()))?;

    if !parsed.is_compat_mode && validation.vendor != parsed.api_type {
        return Err(ForwardError::Forbidden(format!(
            "token is bound to vendor '{}' but request targeted '{}'",
            validation.vendor, parsed.api_type
        )));
    }

    Ok((validation, parsed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn strips_compatible_suffix_and_flags_compat_mode() {
        let parsed = parse_vendor_segment("openai-compatible");
        assert_eq!(parsed.api_type, "openai");
        assert!(parsed.is_compat_mode);
    }

    #[test]
    fn native_vendor_segment_is_not_compat_mode() {
        let parsed = parse_vendor_segment("anthropic");
        assert_eq!(parsed.api_type, "anthropic");
        assert!(!parsed.is_compat_mode);
    }

    #[test]
    fn missing_authorization_header_is_rejected() {
        let headers = HeaderMap::new();
        assert!(extract_bearer_token(&headers).is_err());
    }

    #[test]
    fn extracts_token_from_bearer_header() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc123"));
        assert_eq!(extract_bearer_token(&headers).unwrap(), "abc123");
    }

    #[test]
    fn non_bearer_scheme_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc123"));
        assert!(extract_bearer_token(&headers).is_err());
    }

    #[tokio::test]
    async fn unknown_vendor_is_rejected_before_token_lookup() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer whatever-not-a-real-token"));
        let err = authenticate(&headers, "garbage").await.unwrap_err();
        assert!(matches!(err, ForwardError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn unknown_vendor_in_compat_mode_is_not_rejected_here() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer whatever-not-a-real-token"));
        let err = authenticate(&headers, "garbage-compatible").await.unwrap_err();
        assert!(matches!(err, ForwardError::Forbidden(_)));
    }
}
