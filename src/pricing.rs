//! Cost calculation (§4.11): linear combination of per-million token prices,
//! including cache-read/cache-write/thinking tokens where a model bills them.

use crate::store::{self, ModelPricingRow};

#[derive(Debug, Clone, Copy, Default)]
pub struct UsageTokens {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub thinking_tokens: i64,
    pub cache_read_tokens: i64,
    pub cache_write_tokens: i64,
}

fn per_million(tokens: i64, price: f64) -> f64 {
    (tokens as f64 / 1_000_000.0) * price
}

/// `calculateCost`: looks up the model's pricing row and applies it. Models
/// with no pricing row configured cost $0 (logged, never a hard failure —
/// cost tracking degrades gracefully rather than blocking traffic).
pub fn calculate_cost(model: &str, usage: &UsageTokens) -> f64 {
    match store::get_model_pricing(model) {
        Some(pricing) => cost_from_pricing(&pricing, usage),
        None => {
            crate::logger::warn("pricing", &format!("no pricing row for model {model}, cost recorded as 0"));
            0.0
        }
    }
}

pub fn cost_from_pricing(pricing: &ModelPricingRow, usage: &UsageTokens) -> f64 {
    let mut cost = per_million(usage.input_tokens, pricing.input_per_million)
        + per_million(usage.output_tokens, pricing.output_per_million);
    if let Some(thinking_price) = pricing.thinking_per_million {
        cost += per_million(usage.thinking_tokens, thinking_price);
    }
    if let Some(cache_read_price) = pricing.cache_read_per_million {
        cost += per_million(usage.cache_read_tokens, cache_read_price);
    }
    if let Some(cache_write_price) = pricing.cache_write_per_million {
        cost += per_million(usage.cache_write_tokens, cache_write_price);
    }
    cost
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pricing() -> ModelPricingRow {
        ModelPricingRow {
            model: "gpt-4o".to_string(),
            input_per_million: 5.0,
            output_per_million: 15.0,
            thinking_per_million: Some(10.0),
            cache_read_per_million: Some(1.25),
            cache_write_per_million: Some(6.25),
            reasoning_score: 80,
            coding_score: 85,
            creativity_score: 70,
            speed_score: 60,
        }
    }

    #[test]
    fn combines_input_and_output() {
        let usage = UsageTokens {
            input_tokens: 1_000_000,
            output_tokens: 1_000_000,
            ..Default::default()
        };
        assert!((cost_from_pricing(&pricing(), &usage) - 20.0).abs() < 1e-9);
    }

    #[test]
    fn includes_thinking_and_cache_tokens_when_priced() {
        let usage = UsageTokens {
            input_tokens: 0,
            output_tokens: 0,
            thinking_tokens: 1_000_000,
            cache_read_tokens: 1_000_000,
            cache_write_tokens: 1_000_000,
        };
        let expected = 10.0 + 1.25 + 6.25;
        assert!((cost_from_pricing(&pricing(), &usage) - expected).abs() < 1e-9);
    }

    #[test]
    fn missing_cache_pricing_is_excluded_not_zeroed_by_mistake() {
        let mut p = pricing();
        p.cache_read_per_million = None;
        let usage = UsageTokens {
            cache_read_tokens: 1_000_000,
            ..Default::default()
        };
        assert_eq!(cost_from_pricing(&p, &usage), 0.0);
    }
}
