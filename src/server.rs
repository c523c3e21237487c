//! Proxy Controller (C10) route table plus the abridged Admin Surface (C13):
//! credential CRUD, bot/token lifecycle hooks, routing-table admin, the
//! classify/calculate-cost/select-optimal-model passthroughs, and bot usage
//! reads. Mirrors the teacher's single `app()` router + CORS layer shape.

use axum::{
    extract::{Path, Query},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;

use crate::error::{AppError, AppResult};
use crate::{classifier, config, forward, keyring, logger, pricing, quota, store, tokens};

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn config_load_status() -> Json<Value> {
    Json(json!(config::load_status()))
}

// ============================================
// Credential Keyring admin (§4.2, §6)
// ============================================

#[derive(Deserialize)]
struct CreateCredentialReq {
    vendor: String,
    api_type: String,
    base_url: Option<String>,
    secret: String,
    tags: Option<Vec<String>>,
    metadata: Option<Value>,
    vendor_priority: Option<i64>,
}

async fn create_credential(Json(req): Json<CreateCredentialReq>) -> AppResult<Json<Value>> {
    let cred = keyring::create(
        &req.vendor,
        &req.api_type,
        req.base_url.as_deref(),
        &req.secret,
        &req.tags.unwrap_or_default(),
        &req.metadata.unwrap_or_else(|| json!({})),
        req.vendor_priority.unwrap_or(0),
    );
    Ok(Json(json!(cred)))
}

async fn list_credentials() -> Json<Value> {
    Json(json!(keyring::list_all()))
}

async fn delete_credential(Path(id): Path<String>) -> AppResult<StatusCode> {
    keyring::delete(&id).map_err(AppError::BadRequest)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn credential_health(Path(id): Path<String>) -> AppResult<Json<Value>> {
    keyring::health(&id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("credential {id} not found")))
}

// ============================================
// Bot & token lifecycle (§6: "(botId, tags) + token mint/revoke hooks")
// ============================================

#[derive(Deserialize)]
struct CreateBotReq {
    id: String,
    hostname: String,
    tags: Option<Vec<String>>,
}

async fn create_bot(Json(req): Json<CreateBotReq>) -> Json<Value> {
    let bot = store::create_bot(&req.id, &req.hostname, &req.tags.unwrap_or_default());
    Json(json!(bot))
}

async fn list_bots() -> Json<Value> {
    Json(json!(store::list_bots()))
}

async fn get_bot(Path(id): Path<String>) -> AppResult<Json<Value>> {
    store::get_bot(&id)
        .map(|b| Json(json!(b)))
        .ok_or_else(|| AppError::NotFound(format!("bot {id} not found")))
}

async fn delete_bot(Path(id): Path<String>) -> StatusCode {
    tokens::delete_for_bot(&id);
    store::delete_bot(&id);
    StatusCode::NO_CONTENT
}

#[derive(Deserialize)]
struct RegisterTokenReq {
    vendor: String,
    credential_id: String,
    tags: Option<Vec<String>>,
}

/// Called by the container orchestrator collaborator when a bot's credential
/// assignment changes; mints a fresh proxy token and invalidates any prior
/// one (§4.3 register semantics).
async fn register_token(Path(bot_id): Path<String>, Json(req): Json<RegisterTokenReq>) -> Json<Value> {
    let reg = tokens::register(&bot_id, &req.vendor, &req.credential_id, &req.tags.unwrap_or_default());
    Json(json!(reg))
}

async fn revoke_token(Path(bot_id): Path<String>) -> StatusCode {
    tokens::revoke(&bot_id);
    StatusCode::NO_CONTENT
}

async fn delete_token(Path(bot_id): Path<String>) -> StatusCode {
    tokens::delete_for_bot(&bot_id);
    StatusCode::NO_CONTENT
}

#[derive(Deserialize, Default)]
struct UsageQ {
    limit: Option<i64>,
    since_secs_ago: Option<i64>,
}

async fn bot_usage(Path(bot_id): Path<String>, Query(q): Query<UsageQ>) -> Json<Value> {
    let since = chrono::Utc::now().timestamp() - q.since_secs_ago.unwrap_or(86_400);
    let summary = store::usage_summary_for_bot_since(&bot_id, since);
    let recent = store::recent_usage_for_bot(&bot_id, q.limit.unwrap_or(50));
    Json(json!({ "summary": summary, "recent": recent }))
}

async fn bot_budget(Path(bot_id): Path<String>) -> Json<Value> {
    Json(json!(quota::check_budget(&bot_id)))
}

// ============================================
// Routing table admin (§4.4, §4.7: capability tags, fallback chains, cost
// strategies, complexity config, model pricing, per-bot routing rules)
// ============================================

async fn list_capability_tags() -> Json<Value> {
    Json(json!(store::list_capability_tags()))
}

async fn put_capability_tag(Json(row): Json<store::CapabilityTagRow>) -> Json<Value> {
    store::put_capability_tag(&row);
    Json(json!(row))
}

async fn delete_capability_tag(Path(id): Path<String>) -> AppResult<StatusCode> {
    store::delete_capability_tag(&id).map_err(AppError::NotFound)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_fallback_chains() -> Json<Value> {
    Json(json!(store::list_fallback_chains()))
}

async fn put_fallback_chain(Json(row): Json<store::FallbackChainRow>) -> Json<Value> {
    store::put_fallback_chain(&row);
    Json(json!(row))
}

async fn delete_fallback_chain(Path(id): Path<String>) -> AppResult<StatusCode> {
    store::delete_fallback_chain(&id).map_err(AppError::NotFound)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_cost_strategies() -> Json<Value> {
    Json(json!(store::list_cost_strategies()))
}

async fn put_cost_strategy(Json(row): Json<store::CostStrategyRow>) -> Json<Value> {
    store::put_cost_strategy(&row);
    Json(json!(row))
}

async fn delete_cost_strategy(Path(id): Path<String>) -> AppResult<StatusCode> {
    store::delete_cost_strategy(&id).map_err(AppError::NotFound)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_model_pricing() -> Json<Value> {
    Json(json!(store::list_model_pricing()))
}

async fn put_model_pricing(Json(row): Json<store::ModelPricingRow>) -> Json<Value> {
    store::put_model_pricing(&row);
    Json(json!(row))
}

async fn delete_model_pricing(Path(model): Path<String>) -> AppResult<StatusCode> {
    store::delete_model_pricing(&model).map_err(AppError::NotFound)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_complexity_routes() -> Json<Value> {
    Json(json!(store::list_complexity_routes()))
}

async fn get_complexity_meta() -> Json<Value> {
    Json(json!(store::get_complexity_meta()))
}

#[derive(Deserialize)]
struct PutRoutingRuleReq {
    id: String,
    strategy: String,
    priority: i64,
    rule: Value,
}

async fn put_routing_rule(Path(bot_id): Path<String>, Json(req): Json<PutRoutingRuleReq>) -> StatusCode {
    store::put_routing_rule(&req.id, &bot_id, &req.strategy, req.priority, &req.rule);
    StatusCode::NO_CONTENT
}

async fn list_routing_rules(Path(bot_id): Path<String>) -> Json<Value> {
    Json(json!(store::list_routing_rules_for_bot(&bot_id)))
}

/// `reload()`: re-runs the configuration loader outside the 5-minute tick,
/// e.g. right after an admin write to a routing table.
async fn reload_config() -> StatusCode {
    config::refresh();
    StatusCode::NO_CONTENT
}

// ============================================
// Classify / cost calc / optimal-model passthroughs (§4.7 Strategy D, §4.11)
// ============================================

#[derive(Deserialize)]
struct ClassifyReq {
    message: String,
    #[serde(default)]
    prior_context: Vec<String>,
    vendor: Option<String>,
    model: Option<String>,
}

async fn classify_sample(Json(req): Json<ClassifyReq>) -> Json<Value> {
    let level = classifier::classify(&req.message, &req.prior_context, req.vendor.as_deref(), req.model.as_deref()).await;
    Json(json!({ "level": level, "classifierEnabled": classifier::enabled() }))
}

#[derive(Deserialize)]
struct CalculateCostReq {
    model: String,
    input_tokens: i64,
    output_tokens: i64,
    #[serde(default)]
    thinking_tokens: i64,
    #[serde(default)]
    cache_read_tokens: i64,
    #[serde(default)]
    cache_write_tokens: i64,
}

async fn calculate_cost(Json(req): Json<CalculateCostReq>) -> Json<Value> {
    let usage = pricing::UsageTokens {
        input_tokens: req.input_tokens,
        output_tokens: req.output_tokens,
        thinking_tokens: req.thinking_tokens,
        cache_read_tokens: req.cache_read_tokens,
        cache_write_tokens: req.cache_write_tokens,
    };
    let cost = pricing::calculate_cost(&req.model, &usage);
    Json(json!({ "costUsd": cost }))
}

#[derive(Deserialize)]
struct SelectOptimalModelReq {
    candidate_models: Vec<String>,
    strategy_id: String,
    scenario: Option<String>,
}

async fn select_optimal_model(Json(req): Json<SelectOptimalModelReq>) -> AppResult<Json<Value>> {
    let strategy = store::get_cost_strategy(&req.strategy_id)
        .ok_or_else(|| AppError::NotFound(format!("cost strategy {} not found", req.strategy_id)))?;
    let candidates: Vec<_> = req
        .candidate_models
        .iter()
        .filter_map(|m| store::get_model_pricing(m))
        .collect();
    let selected = quota::select_optimal_model(&candidates, &strategy, req.scenario.as_deref());
    Ok(Json(json!({ "model": selected })))
}

// ============================================
// Global Logs API (§12 AMBIENT structured logging)
// ============================================

#[derive(Deserialize, Default)]
struct LogsQ {
    limit: Option<i64>,
    offset: Option<i64>,
    level: Option<String>,
    source: Option<String>,
    start_time: Option<i64>,
    end_time: Option<i64>,
}

impl From<LogsQ> for logger::LogQuery {
    fn from(q: LogsQ) -> Self {
        logger::LogQuery {
            limit: q.limit,
            offset: q.offset,
            level: q.level.as_deref().and_then(logger::LogLevel::from_str),
            source: q.source,
            start_time: q.start_time,
            end_time: q.end_time,
        }
    }
}

async fn get_global_logs(Query(q): Query<LogsQ>) -> Json<Value> {
    Json(json!(logger::query_logs(&q.into())))
}

async fn get_global_logs_count(Query(q): Query<LogsQ>) -> Json<Value> {
    Json(json!({ "count": logger::logs_count(&q.into()) }))
}

async fn clear_global_logs() -> AppResult<StatusCode> {
    logger::clear_all_logs().map_err(AppError::Internal)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_global_log(Path(id): Path<i64>) -> AppResult<StatusCode> {
    logger::delete_log(id).map_err(AppError::NotFound)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_global_logs_batch(Json(req): Json<logger::DeleteLogsRequest>) -> AppResult<Json<Value>> {
    let deleted = logger::delete_logs(&req).map_err(AppError::Internal)?;
    Ok(Json(json!({ "deleted": deleted })))
}

pub fn app() -> Router {
    let cors = CorsLayer::permissive();

    Router::new()
        .route("/health", get(health))
        .route("/api/config/load-status", get(config_load_status))
        .route("/api/config/reload", post(reload_config))
        // ----- Proxy surface (C10) -----
        .route("/v1/:vendor/*rest", axum::routing::any(forward::proxy_vendor))
        .route("/v1/anthropic/*rest", axum::routing::any(forward::proxy_anthropic))
        // ----- Credential keyring admin -----
        .route("/admin/credentials", get(list_credentials).post(create_credential))
        .route("/admin/credentials/:id", axum::routing::delete(delete_credential))
        .route("/admin/credentials/:id/health", get(credential_health))
        // ----- Bot & token lifecycle -----
        .route("/admin/bots", get(list_bots).post(create_bot))
        .route("/admin/bots/:id", get(get_bot).delete(delete_bot))
        .route("/admin/bots/:id/usage", get(bot_usage))
        .route("/admin/bots/:id/budget", get(bot_budget))
        .route("/admin/bots/:id/token", post(register_token).delete(delete_token))
        .route("/admin/bots/:id/token/revoke", post(revoke_token))
        .route(
            "/admin/bots/:id/routing-rules",
            get(list_routing_rules).post(put_routing_rule),
        )
        // ----- Routing table admin -----
        .route("/admin/capability-tags", get(list_capability_tags).put(put_capability_tag))
        .route("/admin/capability-tags/:id", axum::routing::delete(delete_capability_tag))
        .route("/admin/fallback-chains", get(list_fallback_chains).put(put_fallback_chain))
        .route("/admin/fallback-chains/:id", axum::routing::delete(delete_fallback_chain))
        .route("/admin/cost-strategies", get(list_cost_strategies).put(put_cost_strategy))
        .route("/admin/cost-strategies/:id", axum::routing::delete(delete_cost_strategy))
        .route("/admin/model-pricing", get(list_model_pricing).put(put_model_pricing))
        .route("/admin/model-pricing/:id", axum::routing::delete(delete_model_pricing))
        .route("/admin/complexity-routes", get(list_complexity_routes))
        .route("/admin/complexity-meta", get(get_complexity_meta))
        // ----- Classify / cost calc / optimal-model passthroughs -----
        .route("/admin/classify", post(classify_sample))
        .route("/admin/calculate-cost", post(calculate_cost))
        .route("/admin/select-optimal-model", post(select_optimal_model))
        // ----- Global logs -----
        .route("/admin/logs", get(get_global_logs).delete(clear_global_logs))
        .route("/admin/logs/count", get(get_global_logs_count))
        .route("/admin/logs/:id", axum::routing::delete(delete_global_log))
        .route("/admin/logs/delete", post(delete_global_logs_batch))
        .layer(cors)
}

fn bind_addr() -> SocketAddr {
    std::env::var("FLEET_GATEWAY_BIND_ADDR")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(|| "127.0.0.1:8787".parse().unwrap())
}

pub async fn serve() {
    let app = app();
    let addr = bind_addr();
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    logger::info("server", &format!("listening on {addr}"));
    axum::serve(listener, app).await.unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db() {
        std::env::set_var("BOT_MASTER_KEY", "dGVzdC1tYXN0ZXIta2V5LWJ5dGVzLTEyMzQ1Ng");
        let dir = std::env::temp_dir().join(format!("fleet-gateway-server-{}", uuid::Uuid::new_v4()));
        std::env::set_var("FLEET_GATEWAY_DB_PATH", dir.to_string_lossy().to_string());
        store::init();
        let _ = crate::crypto::init_master_key();
    }

    #[tokio::test]
    async fn health_ok() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let a = app();
        let h = tokio::spawn(async move { axum::serve(listener, a).await.unwrap() });
        let url = format!("http://{}", addr);
        let r = reqwest::get(format!("{}/health", url)).await.unwrap();
        let s = r.json::<serde_json::Value>().await.unwrap();
        assert_eq!(s["status"], "ok");
        h.abort();
    }

    #[tokio::test]
    async fn create_and_list_credential_round_trip() {
        temp_db();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let a = app();
        let h = tokio::spawn(async move { axum::serve(listener, a).await.unwrap() });
        let url = format!("http://{}", addr);

        let client = reqwest::Client::new();
        let resp = client
            .post(format!("{}/admin/credentials", url))
            .json(&json!({"vendor": "openai", "api_type": "openai", "secret": "sk-test"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let list = client
            .get(format!("{}/admin/credentials", url))
            .send()
            .await
            .unwrap()
            .json::<Value>()
            .await
            .unwrap();
        assert_eq!(list.as_array().unwrap().len(), 1);
        h.abort();
    }

    #[tokio::test]
    async fn put_then_delete_model_pricing_round_trip() {
        temp_db();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let a = app();
        let h = tokio::spawn(async move { axum::serve(listener, a).await.unwrap() });
        let url = format!("http://{}", addr);
        let client = reqwest::Client::new();

        let row = store::ModelPricingRow {
            model: "gpt-4o-mini".to_string(),
            input_per_million: 0.15,
            output_per_million: 0.60,
            thinking_per_million: None,
            cache_read_per_million: None,
            cache_write_per_million: None,
            reasoning_score: 60,
            coding_score: 65,
            creativity_score: 55,
            speed_score: 90,
        };
        let resp = client
            .put(format!("{}/admin/model-pricing", url))
            .json(&row)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let list = client
            .get(format!("{}/admin/model-pricing", url))
            .send()
            .await
            .unwrap()
            .json::<Value>()
            .await
            .unwrap();
        assert_eq!(list.as_array().unwrap().len(), 1);

        let resp = client
            .delete(format!("{}/admin/model-pricing/gpt-4o-mini", url))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 204);

        let resp = client
            .delete(format!("{}/admin/model-pricing/gpt-4o-mini", url))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
        h.abort();
    }
}
