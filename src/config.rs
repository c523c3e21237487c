//! Configuration Loader: hot-reloads routing tables from the store into
//! in-memory, copy-on-write snapshots.
//!
//! Readers take a lock-free snapshot (an `Arc` clone) at the start of a
//! request; the loader builds a brand-new snapshot and atomically swaps the
//! published pointer, so there is never a reader-visible half-updated map
//! (§9 REDESIGN FLAGS: "Global mutable configuration caches").

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use once_cell::sync::Lazy;
use serde::Serialize;

use crate::store::{
    self, CapabilityTagRow, ComplexityMeta, ComplexityRoute, CostStrategyRow, FallbackChainRow,
    ModelPricingRow,
};

#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub capability_tags: Vec<CapabilityTagRow>,
    pub fallback_chains: Vec<FallbackChainRow>,
    pub cost_strategies: Vec<CostStrategyRow>,
    pub model_pricing: Vec<ModelPricingRow>,
    pub complexity_routes: Vec<ComplexityRoute>,
    pub complexity_meta: Option<ComplexityMeta>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryStatus {
    pub loaded: bool,
    pub count: usize,
    pub last_update: i64,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct LoadStatus {
    pub capability_tags: Option<CategoryStatus>,
    pub fallback_chains: Option<CategoryStatus>,
    pub cost_strategies: Option<CategoryStatus>,
    pub model_pricing: Option<CategoryStatus>,
    pub complexity_routes: Option<CategoryStatus>,
}

/// Instance-wide request admission limits (§4.11 AMBIENT rate limiting).
/// Unset fields disable that particular check. Read fresh from the
/// environment on every call, same pattern as `tokens::token_ttl_secs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RateLimitConfig {
    pub rpm: Option<u32>,
    pub max_concurrent: Option<u32>,
    pub max_concurrent_per_bot: Option<u32>,
}

fn env_u32(key: &str) -> Option<u32> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

pub fn rate_limit_config() -> RateLimitConfig {
    RateLimitConfig {
        rpm: env_u32("FLEET_GATEWAY_RPM"),
        max_concurrent: env_u32("FLEET_GATEWAY_MAX_CONCURRENT"),
        max_concurrent_per_bot: env_u32("FLEET_GATEWAY_MAX_CONCURRENT_PER_BOT"),
    }
}

static SNAPSHOT: Lazy<RwLock<Arc<Snapshot>>> = Lazy::new(|| RwLock::new(Arc::new(Snapshot::default())));
static LOAD_STATUS: Lazy<RwLock<LoadStatus>> = Lazy::new(|| RwLock::new(LoadStatus::default()));
static LAST_REFRESH: AtomicI64 = AtomicI64::new(0);

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn default_capability_tags() -> Vec<CapabilityTagRow> {
    vec![
        CapabilityTagRow {
            tag_id: "deep-reasoning".to_string(),
            name: "deep-reasoning".to_string(),
            category: "reasoning".to_string(),
            priority: 100,
            required_protocol: Some("anthropic-native".to_string()),
            required_models: vec![],
            required_skills: vec![],
            requires_extended_thinking: true,
            requires_cache_control: false,
            requires_vision: false,
            is_active: true,
        },
        CapabilityTagRow {
            tag_id: "vision".to_string(),
            name: "vision".to_string(),
            category: "modality".to_string(),
            priority: 80,
            required_protocol: None,
            required_models: vec![],
            required_skills: vec![],
            requires_extended_thinking: false,
            requires_cache_control: false,
            requires_vision: true,
            is_active: true,
        },
        CapabilityTagRow {
            tag_id: "cost-optimized".to_string(),
            name: "cost-optimized".to_string(),
            category: "cost".to_string(),
            priority: 60,
            required_protocol: Some("anthropic-native".to_string()),
            required_models: vec![],
            required_skills: vec![],
            requires_extended_thinking: false,
            requires_cache_control: true,
            requires_vision: false,
            is_active: true,
        },
    ]
}

fn default_cost_strategy() -> Vec<CostStrategyRow> {
    vec![CostStrategyRow {
        strategy_id: "default".to_string(),
        cost_weight: 0.34,
        performance_weight: 0.33,
        capability_weight: 0.33,
        max_cost_per_request: None,
        max_latency_ms: None,
        min_capability_score: None,
        scenario_weights: None,
    }]
}

/// Loads every category from the store. Any category the store reports
/// empty falls back to a built-in default set, which is logged (§4.4).
pub fn load_snapshot() -> Snapshot {
    let mut status = LoadStatus::default();
    let ts = now();

    let mut capability_tags = store::list_capability_tags();
    if capability_tags.is_empty() {
        crate::logger::info("config", "capability_tag table empty, using built-in defaults");
        capability_tags = default_capability_tags();
    }
    status.capability_tags = Some(CategoryStatus {
        loaded: true,
        count: capability_tags.len(),
        last_update: ts,
    });

    let fallback_chains = store::list_fallback_chains();
    status.fallback_chains = Some(CategoryStatus {
        loaded: true,
        count: fallback_chains.len(),
        last_update: ts,
    });

    let mut cost_strategies = store::list_cost_strategies();
    if cost_strategies.is_empty() {
        crate::logger::info("config", "cost_strategy table empty, using built-in defaults");
        cost_strategies = default_cost_strategy();
    }
    status.cost_strategies = Some(CategoryStatus {
        loaded: true,
        count: cost_strategies.len(),
        last_update: ts,
    });

    let model_pricing = store::list_model_pricing();
    status.model_pricing = Some(CategoryStatus {
        loaded: true,
        count: model_pricing.len(),
        last_update: ts,
    });

    let complexity_routes = store::list_complexity_routes();
    status.complexity_routes = Some(CategoryStatus {
        loaded: true,
        count: complexity_routes.len(),
        last_update: ts,
    });

    let complexity_meta = store::get_complexity_meta();

    *LOAD_STATUS.write().unwrap() = status;
    LAST_REFRESH.store(ts, Ordering::Relaxed);

    Snapshot {
        capability_tags,
        fallback_chains,
        cost_strategies,
        model_pricing,
        complexity_routes,
        complexity_meta,
    }
}

/// Atomically swaps the published snapshot pointer.
pub fn refresh() {
    let new_snapshot = Arc::new(load_snapshot());
    *SNAPSHOT.write().unwrap() = new_snapshot;
}

/// Takes a cheap `Arc` clone of the currently published snapshot.
pub fn snapshot() -> Arc<Snapshot> {
    SNAPSHOT.read().unwrap().clone()
}

pub fn load_status() -> LoadStatus {
    LOAD_STATUS.read().unwrap().clone()
}

/// Spawns the 5-minute hot-reload tick.
pub fn spawn_reload_tick() {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            refresh();
            crate::logger::debug("config", "periodic configuration reload complete");
        }
    });
}

pub fn init() {
    refresh();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_categories_fall_back_to_defaults() {
        let dir = std::env::temp_dir().join(format!("fleet-gateway-config-{}", uuid::Uuid::new_v4()));
        std::env::set_var("FLEET_GATEWAY_DB_PATH", dir.to_string_lossy().to_string());
        store::init();
        let snap = load_snapshot();
        assert!(!snap.capability_tags.is_empty());
        assert!(!snap.cost_strategies.is_empty());
    }

    #[test]
    fn refresh_publishes_a_new_arc() {
        let dir = std::env::temp_dir().join(format!("fleet-gateway-config-{}", uuid::Uuid::new_v4()));
        std::env::set_var("FLEET_GATEWAY_DB_PATH", dir.to_string_lossy().to_string());
        store::init();
        refresh();
        let first = snapshot();
        refresh();
        let second = snapshot();
        assert!(!Arc::ptr_eq(&first, &second));
    }
}
