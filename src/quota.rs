//! Quota & Cost (C11): rolling per-bot daily/monthly cost counters with
//! date/month rollover applied at read time, budget-threshold checks, and
//! weighted optimal-model selection.

use serde::Serialize;

use crate::pricing::{self, UsageTokens};
use crate::store::{self, BotQuotaRow, CostStrategyRow, ModelPricingRow};

fn today() -> String {
    chrono::Utc::now().format("%Y-%m-%d").to_string()
}

fn this_month() -> String {
    chrono::Utc::now().format("%Y-%m").to_string()
}

/// Applies date/month rollover to a freshly loaded row, never persisting a
/// row that still carries a stale period's accumulated cost.
fn rolled_over(mut row: BotQuotaRow) -> BotQuotaRow {
    let today = today();
    let month = this_month();
    if row.last_reset_date != today {
        row.daily_cost = 0.0;
        row.last_reset_date = today;
    }
    if row.last_reset_month != month {
        row.monthly_cost = 0.0;
        row.last_reset_month = month;
    }
    row
}

/// Records one request's cost against a bot's rolling counters. Returns the
/// cost in USD that was added.
pub fn track_usage(bot_id: &str, model: &str, usage: &UsageTokens) -> f64 {
    let cost = pricing::calculate_cost(model, usage);
    let mut row = rolled_over(store::get_or_init_quota(bot_id));
    row.daily_cost += cost;
    row.monthly_cost += cost;
    store::save_quota(&row);
    cost
}

#[derive(Debug, Clone, Serialize)]
pub struct BudgetStatus {
    pub daily_cost: f64,
    pub monthly_cost: f64,
    pub daily_limit: Option<f64>,
    pub monthly_limit: Option<f64>,
    /// Either limit is at or past `alertThreshold` fraction of its budget.
    pub alert: bool,
    /// Either limit has been fully exhausted; callers should downgrade or
    /// refuse further requests for this bot.
    pub exhausted: bool,
}

/// `checkBudget`: rolls the counters over if a period boundary has passed,
/// then reports whether the bot is within its alert/hard limits.
pub fn check_budget(bot_id: &str) -> BudgetStatus {
    let row = rolled_over(store::get_or_init_quota(bot_id));
    store::save_quota(&row);

    let daily_ratio = row.daily_limit.map(|limit| {
        if limit <= 0.0 {
            1.0
        } else {
            row.daily_cost / limit
        }
    });
    let monthly_ratio = row.monthly_limit.map(|limit| {
        if limit <= 0.0 {
            1.0
        } else {
            row.monthly_cost / limit
        }
    });

    let alert = daily_ratio.map(|r| r >= row.alert_threshold).unwrap_or(false)
        || monthly_ratio.map(|r| r >= row.alert_threshold).unwrap_or(false);
    let exhausted = daily_ratio.map(|r| r >= 1.0).unwrap_or(false)
        || monthly_ratio.map(|r| r >= 1.0).unwrap_or(false);

    BudgetStatus {
        daily_cost: row.daily_cost,
        monthly_cost: row.monthly_cost,
        daily_limit: row.daily_limit,
        monthly_limit: row.monthly_limit,
        alert,
        exhausted,
    }
}

fn capability_score(p: &ModelPricingRow) -> f64 {
    (p.reasoning_score + p.coding_score + p.creativity_score) as f64 / 3.0 / 100.0
}

fn performance_score(p: &ModelPricingRow) -> f64 {
    p.speed_score as f64 / 100.0
}

/// Representative per-request price: the blended input/output per-million
/// rate, used only to rank candidates relative to each other.
fn blended_price(p: &ModelPricingRow) -> f64 {
    (p.input_per_million + p.output_per_million) / 2.0
}

struct Weights {
    cost: f64,
    performance: f64,
    capability: f64,
}

fn resolve_weights(strategy: &CostStrategyRow, scenario: Option<&str>) -> Weights {
    if let (Some(scenario), Some(table)) = (scenario, strategy.scenario_weights.as_ref()) {
        if let Some(w) = table.get(scenario) {
            let cost = w.get("cost").and_then(|v| v.as_f64()).unwrap_or(strategy.cost_weight);
            let performance = w
                .get("performance")
                .and_then(|v| v.as_f64())
                .unwrap_or(strategy.performance_weight);
            let capability = w
                .get("capability")
                .and_then(|v| v.as_f64())
                .unwrap_or(strategy.capability_weight);
            return Weights { cost, performance, capability };
        }
    }
    Weights {
        cost: strategy.cost_weight,
        performance: strategy.performance_weight,
        capability: strategy.capability_weight,
    }
}

/// `selectOptimalModel`: ranks candidates by a weighted sum of normalized
/// cost/performance/capability scores, gated by `minCapabilityScore`. When
/// every candidate fails the gate, it is dropped rather than leaving the
/// caller with no model at all.
pub fn select_optimal_model(
    candidates: &[ModelPricingRow],
    strategy: &CostStrategyRow,
    scenario: Option<&str>,
) -> Option<String> {
    if candidates.is_empty() {
        return None;
    }

    let gated: Vec<&ModelPricingRow> = match strategy.min_capability_score {
        Some(min) => {
            let min = min as f64 / 100.0;
            let passing: Vec<&ModelPricingRow> = candidates
                .iter()
                .filter(|c| capability_score(c) >= min)
                .collect();
            if passing.is_empty() {
                crate::logger::warn(
                    "quota",
                    "no candidate model meets min_capability_score, falling back to full candidate set",
                );
                candidates.iter().collect()
            } else {
                passing
            }
        }
        None => candidates.iter().collect(),
    };

    let weights = resolve_weights(strategy, scenario);

    let min_price = gated.iter().map(|c| blended_price(c)).fold(f64::INFINITY, f64::min);
    let max_price = gated.iter().map(|c| blended_price(c)).fold(f64::NEG_INFINITY, f64::max);
    let price_span = (max_price - min_price).max(f64::EPSILON);

    gated
        .into_iter()
        .map(|c| {
            let cost_score = 1.0 - ((blended_price(c) - min_price) / price_span);
            let score = weights.cost * cost_score
                + weights.performance * performance_score(c)
                + weights.capability * capability_score(c);
            (c.model.clone(), score)
        })
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(model, _)| model)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db() {
        let dir = std::env::temp_dir().join(format!("fleet-gateway-quota-{}", uuid::Uuid::new_v4()));
        std::env::set_var("FLEET_GATEWAY_DB_PATH", dir.to_string_lossy().to_string());
        store::init();
    }

    #[test]
    fn track_usage_accumulates_into_both_periods() {
        temp_db();
        store::create_credential("c1", "openai", "openai", None, b"ct", &[], &serde_json::json!({}), 0);
        // no pricing row: calculate_cost returns 0, but counters still update.
        let cost = track_usage("bot-1", "gpt-4o", &UsageTokens { input_tokens: 100, output_tokens: 50, ..Default::default() });
        assert_eq!(cost, 0.0);
        let status = check_budget("bot-1");
        assert_eq!(status.daily_cost, 0.0);
    }

    #[test]
    fn check_budget_flags_alert_and_exhausted_thresholds() {
        temp_db();
        let mut row = store::get_or_init_quota("bot-2");
        row.daily_limit = Some(10.0);
        row.daily_cost = 9.0;
        row.alert_threshold = 0.8;
        store::save_quota(&row);
        let status = check_budget("bot-2");
        assert!(status.alert);
        assert!(!status.exhausted);

        let mut row = store::get_or_init_quota("bot-2");
        row.daily_cost = 10.0;
        store::save_quota(&row);
        let status = check_budget("bot-2");
        assert!(status.exhausted);
    }

    fn model(id: &str, input: f64, output: f64, reasoning: i64, speed: i64) -> ModelPricingRow {
        ModelPricingRow {
            model: id.to_string(),
            input_per_million: input,
            output_per_million: output,
            thinking_per_million: None,
            cache_read_per_million: None,
            cache_write_per_million: None,
            reasoning_score: reasoning,
            coding_score: reasoning,
            creativity_score: reasoning,
            speed_score: speed,
        }
    }

    #[test]
    fn cheap_model_wins_under_cost_heavy_strategy() {
        let strategy = CostStrategyRow {
            strategy_id: "cost-first".to_string(),
            cost_weight: 1.0,
            performance_weight: 0.0,
            capability_weight: 0.0,
            max_cost_per_request: None,
            max_latency_ms: None,
            min_capability_score: None,
            scenario_weights: None,
        };
        let candidates = vec![model("expensive", 20.0, 60.0, 90, 50), model("cheap", 1.0, 2.0, 60, 50)];
        assert_eq!(select_optimal_model(&candidates, &strategy, None), Some("cheap".to_string()));
    }

    #[test]
    fn min_capability_score_excludes_weak_models() {
        let strategy = CostStrategyRow {
            strategy_id: "quality".to_string(),
            cost_weight: 1.0,
            performance_weight: 0.0,
            capability_weight: 0.0,
            max_cost_per_request: None,
            max_latency_ms: None,
            min_capability_score: Some(70),
            scenario_weights: None,
        };
        let candidates = vec![model("weak-but-cheap", 1.0, 1.0, 40, 50), model("strong", 5.0, 10.0, 90, 50)];
        assert_eq!(select_optimal_model(&candidates, &strategy, None), Some("strong".to_string()));
    }
}
