//! Provider cost model.
//!
//! Prices are per 1M tokens. `cached_tokens` is a subset of `input_tokens`,
//! not an addition: uncached tokens bill at the input rate, the cached
//! portion at the discounted rate. Native web-search calls carry a flat
//! per-call price on top of token costs.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Per-1M-token prices for one model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input: f64,
    pub cached: f64,
    pub output: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Known models. Unknown models fall back to `default`.
    #[serde(default = "default_models")]
    pub models: HashMap<String, ModelPricing>,
    #[serde(default = "default_default_pricing")]
    pub default: ModelPricing,
    /// Flat USD price per native web-search call.
    #[serde(default = "default_web_search_price")]
    pub web_search_per_call: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            models: default_models(),
            default: default_default_pricing(),
            web_search_per_call: default_web_search_price(),
        }
    }
}

impl PricingConfig {
    pub fn for_model(&self, model: &str) -> ModelPricing {
        self.models.get(model).copied().unwrap_or(self.default)
    }

    /// Total USD cost for one request's summed usage.
    ///
    /// The provider guarantees `cached <= input`; a defensive clamp keeps
    /// the arithmetic sane if a response ever violates that.
    pub fn calculate_cost(
        &self,
        model: &str,
        input_tokens: u64,
        cached_tokens: u64,
        output_tokens: u64,
        web_search_calls: u64,
    ) -> f64 {
        let pricing = self.for_model(model);
        let cached = cached_tokens.min(input_tokens);
        let uncached = input_tokens - cached;

        let token_cost = (uncached as f64 / 1_000_000.0) * pricing.input
            + (cached as f64 / 1_000_000.0) * pricing.cached
            + (output_tokens as f64 / 1_000_000.0) * pricing.output;

        token_cost + web_search_calls as f64 * self.web_search_per_call
    }
}

fn default_models() -> HashMap<String, ModelPricing> {
    let mut models = HashMap::new();
    models.insert(
        "gpt-5.2".to_string(),
        ModelPricing {
            input: 1.75,
            cached: 0.175,
            output: 14.00,
        },
    );
    models.insert(
        "gpt-image-1.5".to_string(),
        ModelPricing {
            input: 5.00,
            cached: 1.25,
            output: 10.00,
        },
    );
    models
}

fn default_default_pricing() -> ModelPricing {
    ModelPricing {
        input: 2.00,
        cached: 0.20,
        output: 10.00,
    }
}

fn default_web_search_price() -> f64 {
    0.01
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncached_plus_cached_split() {
        let pricing = PricingConfig::default();
        // 1M input of which 400k cached, 100k output.
        let cost = pricing.calculate_cost("gpt-5.2", 1_000_000, 400_000, 100_000, 0);
        let expected = 0.6 * 1.75 + 0.4 * 0.175 + 0.1 * 14.00;
        assert!((cost - expected).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_uses_default_row() {
        let pricing = PricingConfig::default();
        let cost = pricing.calculate_cost("mystery-model", 1_000_000, 0, 0, 0);
        assert!((cost - 2.00).abs() < 1e-9);
    }

    #[test]
    fn web_search_calls_add_flat_cost() {
        let pricing = PricingConfig::default();
        let base = pricing.calculate_cost("gpt-5.2", 0, 0, 0, 0);
        let with_calls = pricing.calculate_cost("gpt-5.2", 0, 0, 0, 3);
        assert!((with_calls - base - 0.03).abs() < 1e-9);
    }

    #[test]
    fn cached_above_input_is_clamped() {
        let pricing = PricingConfig::default();
        // Misbehaving provider: cached > input. Cost must equal all-cached.
        let cost = pricing.calculate_cost("gpt-5.2", 100_000, 250_000, 0, 0);
        let expected = 0.1 * 0.175;
        assert!((cost - expected).abs() < 1e-9);
    }
}
