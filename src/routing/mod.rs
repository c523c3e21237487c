//! Routing Engine: maps a bot + request into a concrete upstream route.
//!
//! Evaluates strategies A–E against a bot's routing rules in ascending
//! priority order, falling through to the bot's primary model when nothing
//! matches. Mirrors the upstream request router's priority-sort-then-pick
//! shape, generalized from a single model list to per-bot rule sets.

pub mod strategies;

use serde::Serialize;
use serde_json::Value;

use crate::classifier::{self, ComplexityLevel};
use crate::resolver::{self, ResolveOptions, ResolvedInstance};
use crate::store::{self, RoutingRuleRow};

#[derive(Debug, Clone, Serialize)]
pub struct Route {
    pub credential_id: String,
    pub vendor: String,
    pub model: String,
    pub api_type: String,
    pub base_url: Option<String>,
    pub matched_reason: String,
}

pub struct RouteRequest<'a> {
    pub bot_id: &'a str,
    pub bot_tags: &'a [String],
    pub requested_vendor: &'a str,
    pub is_compat_mode: bool,
    pub body: &'a Value,
}

pub(super) fn resolved_to_route(resolved: ResolvedInstance, model: &str, reason: &str) -> Route {
    Route {
        credential_id: resolved.credential_id,
        vendor: resolved.vendor,
        model: model.to_string(),
        api_type: resolved.api_type,
        base_url: resolved.base_url,
        matched_reason: reason.to_string(),
    }
}

/// `route(request) -> Route`, the engine's primary entry point.
pub async fn route(req: &RouteRequest<'_>) -> Option<Route> {
    if req.is_compat_mode {
        let model = strategies::extract_model(req.body).unwrap_or_default();
        let model = strategies::strip_provider_prefix(&model);
        let candidates = resolver::resolve_all(&model, &ResolveOptions::default());
        let chosen = candidates.into_iter().next()?;
        return Some(resolved_to_route(chosen, &model, "auto-routing compatibility mode"));
    }

    let rules = store::list_routing_rules_for_bot(req.bot_id);
    let message = strategies::extract_last_user_message(req.body);

    for rule in &rules {
        if let Some(route) = try_rule(rule, req, message.as_deref()).await {
            return Some(route);
        }
    }

    if let Some(route) = strategies::capability_tag_route(req.body) {
        return Some(route);
    }

    default_route(req).await
}

async fn try_rule(rule: &RoutingRuleRow, req: &RouteRequest<'_>, message: Option<&str>) -> Option<Route> {
    match rule.strategy.as_str() {
        "keyword" | "function" => strategies::keyword_route(&rule.rule, message),
        "load_balance" => strategies::load_balance_route(&rule.id, &rule.rule),
        "failover" => strategies::failover_route(&rule.rule),
        "complexity" => complexity_route(rule, req, message).await,
        _ => None,
    }
}

async fn complexity_route(rule: &RoutingRuleRow, req: &RouteRequest<'_>, message: Option<&str>) -> Option<Route> {
    if !classifier::enabled() {
        return None;
    }
    let message = message?;
    let meta = store::get_complexity_meta()?;
    let min_level = ComplexityLevel::from_str(&meta.tool_min_complexity).unwrap_or(ComplexityLevel::SuperEasy);

    let level = classifier::classify(
        message,
        &[],
        meta.classifier_vendor.as_deref(),
        meta.classifier_model.as_deref(),
    )
    .await?;

    let has_tools = req
        .body
        .get("tools")
        .and_then(|t| t.as_array())
        .map(|a| !a.is_empty())
        .unwrap_or(false);

    let effective_level = if has_tools && level < min_level { min_level } else { level };

    let routes = store::list_complexity_routes();
    let mapped = routes.iter().find(|r| r.level == effective_level.as_str())?;

    let _ = rule;
    let candidates = resolver::resolve_all(
        &mapped.model,
        &ResolveOptions {
            preferred_vendor: Some(mapped.vendor.clone()),
            ..Default::default()
        },
    );
    let chosen = candidates.into_iter().next()?;
    Some(resolved_to_route(
        chosen,
        &mapped.model,
        &format!("complexity routing ({})", effective_level.as_str()),
    ))
}

async fn default_route(req: &RouteRequest<'_>) -> Option<Route> {
    // No rule matched: pick this vendor's best-ranked available model and
    // resolve the best credential serving it (§4.7 "Default route").
    let model = store::first_available_model_for_vendor(req.requested_vendor)?;
    let candidates = resolver::resolve_all(
        &model,
        &ResolveOptions {
            preferred_vendor: Some(req.requested_vendor.to_string()),
            ..Default::default()
        },
    );
    let chosen = candidates.into_iter().next()?;
    Some(resolved_to_route(chosen, &model, "default route"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db() {
        let dir = std::env::temp_dir().join(format!("fleet-gateway-routing-{}", uuid::Uuid::new_v4()));
        std::env::set_var("FLEET_GATEWAY_DB_PATH", dir.to_string_lossy().to_string());
        store::init();
    }

    #[tokio::test]
    async fn compat_mode_strips_provider_prefix_and_resolves() {
        temp_db();
        let cred = store::create_credential(
            "cred-compat",
            "openai",
            "openai",
            None,
            b"ct",
            &[],
            &serde_json::json!({}),
            0,
        );
        store::upsert_model_availability(&cred.id, "gpt-4o", 5);
        let body = serde_json::json!({"model": "openai/gpt-4o"});
        let req = RouteRequest {
            bot_id: "bot-x",
            bot_tags: &[],
            requested_vendor: "openai",
            is_compat_mode: true,
            body: &body,
        };
        let routed = route(&req).await.unwrap();
        assert_eq!(routed.model, "gpt-4o");
    }

    #[tokio::test]
    async fn no_rules_falls_through_to_default_route() {
        temp_db();
        let cred = store::create_credential(
            "cred-default",
            "anthropic",
            "anthropic",
            None,
            b"ct",
            &[],
            &serde_json::json!({}),
            0,
        );
        store::upsert_model_availability(&cred.id, "claude-3-5-sonnet", 5);
        let body = serde_json::json!({});
        let req = RouteRequest {
            bot_id: "bot-y",
            bot_tags: &[],
            requested_vendor: "anthropic",
            is_compat_mode: false,
            body: &body,
        };
        let routed = route(&req).await.unwrap();
        assert_eq!(routed.vendor, "anthropic");
    }
}
